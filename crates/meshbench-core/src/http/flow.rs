use std::collections::HashMap;

use rand::Rng;
use reqwest::Url;

use super::payload::{render_payload, substitute};
use crate::plan::model::{HttpMethod, LoadSpec, ParamValue, PayloadParam, RequestStep};

/// One concrete request of a probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub params: Vec<(String, String)>,
}

/// The ordered requests every probe sends. The first targets the spec's
/// URL; later steps resolve their paths against it.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestFlow {
    steps: Vec<RequestStep>,
    vars: Vec<PayloadParam>,
}

impl RequestFlow {
    pub fn from_spec(spec: &LoadSpec) -> Self {
        let first = RequestStep::new(spec.method, spec.target_url.clone())
            .with_payload(spec.payload.clone());
        let mut steps = Vec::with_capacity(1 + spec.steps.len());
        steps.push(first);
        steps.extend(spec.steps.iter().cloned());
        Self {
            steps,
            vars: spec.vars.clone(),
        }
    }

    /// A flow of exactly one request.
    pub fn single(url: impl Into<String>, method: HttpMethod, payload: Vec<PayloadParam>) -> Self {
        Self {
            steps: vec![RequestStep::new(method, url).with_payload(payload)],
            vars: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// URL of the first request, placeholders unresolved.
    pub fn target(&self) -> &str {
        self.steps.first().map(|s| s.path.as_str()).unwrap_or_default()
    }

    /// Draw the variables once and render every step with them.
    pub fn render<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<RenderedRequest> {
        let vars: HashMap<String, String> = render_payload(&self.vars, rng).into_iter().collect();
        let mut base: Option<String> = None;
        self.steps
            .iter()
            .map(|step| {
                let path = substitute(&step.path, &vars);
                let url = match base.as_deref() {
                    Some(first) => resolve(first, &path),
                    None => path,
                };
                if base.is_none() {
                    base = Some(url.clone());
                }
                let params = step
                    .payload
                    .iter()
                    .filter_map(|param| {
                        let (name, value) =
                            render_payload(std::slice::from_ref(param), rng).pop()?;
                        match param.value {
                            ParamValue::Fixed(_) => Some((name, substitute(&value, &vars))),
                            ParamValue::OneOf(_) => Some((name, value)),
                        }
                    })
                    .collect();
                RenderedRequest {
                    method: step.method,
                    url,
                    params,
                }
            })
            .collect()
    }
}

/// Resolve `path` against `base`. An absolute URL is returned as is; a path
/// that cannot be resolved is passed through and fails when sent.
fn resolve(base: &str, path: &str) -> String {
    match Url::parse(base).and_then(|b| b.join(path)) {
        Ok(url) => url.to_string(),
        Err(_) => path.to_string(),
    }
}
