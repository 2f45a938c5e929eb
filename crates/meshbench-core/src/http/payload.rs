use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::plan::model::{ParamValue, PayloadParam};

/// Resolve the configured parameters into the concrete name/value pairs for
/// one request. Choice parameters draw a fresh value on every call; a choice
/// list with no entries contributes nothing.
pub fn render_payload<R: Rng + ?Sized>(
    params: &[PayloadParam],
    rng: &mut R,
) -> Vec<(String, String)> {
    params
        .iter()
        .filter_map(|param| {
            let value = match &param.value {
                ParamValue::Fixed(v) => v.clone(),
                ParamValue::OneOf(choices) => choices.choose(rng)?.clone(),
            };
            Some((param.name.clone(), value))
        })
        .collect()
}

/// Replace every `{name}` in `template` whose name is in `vars`. Unknown
/// placeholders and unmatched braces are kept verbatim.
pub fn substitute(template: &str, vars: &HashMap<String, String>) -> String {
    if vars.is_empty() || !template.contains('{') {
        return template.to_string();
    }
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let name = &after[..close];
        match vars.get(name) {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[open..open + close + 2]),
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

/// Names of the `{name}` placeholders in `template`, in order.
pub fn placeholders(template: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            break;
        };
        names.push(&after[..close]);
        rest = &after[close + 1..];
    }
    names
}
