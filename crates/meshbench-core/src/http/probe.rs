use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::http::classifier::{StatusCodeClassifier, SuccessClassifier};
use crate::http::client::HttpClient;
use crate::http::flow::{RenderedRequest, RequestFlow};
use crate::plan::model::{HttpMethod, LoadSpec};

// ---------------------------------------------------------------------------
// ProbeOutcome / ProbeResult
// ---------------------------------------------------------------------------

/// How a single probe ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Success,
    /// The server answered with a status the classifier rejected.
    HttpError { status_code: u16 },
    /// The probe did not complete within the per-request timeout.
    Timeout,
    /// Connect, TLS, or transport failure before a response was read.
    ConnectionError,
}

impl ProbeOutcome {
    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            ProbeOutcome::Success => "success",
            ProbeOutcome::HttpError { .. } => "http_error",
            ProbeOutcome::Timeout => "timeout",
            ProbeOutcome::ConnectionError => "connection_error",
        }
    }
}

/// Result of one request attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProbeResult {
    pub issued_at: DateTime<Utc>,
    /// Present whenever a response was received, absent on timeout and
    /// connection failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    pub outcome: ProbeOutcome,
}

impl ProbeResult {
    pub fn success(issued_at: DateTime<Utc>, latency_ms: f64) -> Self {
        Self {
            issued_at,
            latency_ms: Some(latency_ms),
            outcome: ProbeOutcome::Success,
        }
    }

    pub fn http_error(issued_at: DateTime<Utc>, latency_ms: f64, status_code: u16) -> Self {
        Self {
            issued_at,
            latency_ms: Some(latency_ms),
            outcome: ProbeOutcome::HttpError { status_code },
        }
    }

    pub fn timeout(issued_at: DateTime<Utc>) -> Self {
        Self {
            issued_at,
            latency_ms: None,
            outcome: ProbeOutcome::Timeout,
        }
    }

    pub fn connection_error(issued_at: DateTime<Utc>) -> Self {
        Self {
            issued_at,
            latency_ms: None,
            outcome: ProbeOutcome::ConnectionError,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == ProbeOutcome::Success
    }
}

// ---------------------------------------------------------------------------
// ProbeTarget
// ---------------------------------------------------------------------------

/// Everything a probe needs: the requests to send and the bound on the
/// whole exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeTarget {
    pub flow: RequestFlow,
    pub timeout: Duration,
}

impl ProbeTarget {
    pub fn new(flow: RequestFlow, timeout: Duration) -> Self {
        Self { flow, timeout }
    }

    pub fn from_spec(spec: &LoadSpec) -> Self {
        Self::new(RequestFlow::from_spec(spec), spec.timeout())
    }
}

// ---------------------------------------------------------------------------
// Probe trait
// ---------------------------------------------------------------------------

/// Issues one probe and reports how it went. Implementations never fail:
/// every problem is folded into the returned [`ProbeResult`].
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, target: &ProbeTarget) -> ProbeResult;
}

// ---------------------------------------------------------------------------
// RequestProbe
// ---------------------------------------------------------------------------

/// HTTP implementation of [`Probe`] backed by a shared connection pool.
#[derive(Clone)]
pub struct RequestProbe {
    client: HttpClient,
    classifier: Arc<dyn SuccessClassifier>,
}

impl RequestProbe {
    /// Probe that treats only `200 OK` as success.
    pub fn new(client: HttpClient) -> Self {
        Self::with_classifier(client, Arc::new(StatusCodeClassifier::default()))
    }

    pub fn with_classifier(client: HttpClient, classifier: Arc<dyn SuccessClassifier>) -> Self {
        Self { client, classifier }
    }

    /// Send one request and classify it.
    ///
    /// Latency covers sending the request and reading the full body. No
    /// retries are attempted.
    pub async fn send(
        &self,
        url: &str,
        method: HttpMethod,
        payload: &[(String, String)],
        timeout: Duration,
    ) -> ProbeResult {
        let request = RenderedRequest {
            method,
            url: url.to_string(),
            params: payload.to_vec(),
        };
        self.send_flow(std::slice::from_ref(&request), timeout).await
    }

    /// Send `requests` in order as one probe.
    ///
    /// Cookies set by a response go out with the later requests of the same
    /// flow. The first response the classifier rejects ends the flow as an
    /// HTTP error. `timeout` and the reported latency both cover the whole
    /// flow.
    pub async fn send_flow(&self, requests: &[RenderedRequest], timeout: Duration) -> ProbeResult {
        let issued_at = Utc::now();
        let start = Instant::now();
        let exchange = async {
            let mut cookies: Vec<String> = Vec::new();
            let mut last_status = None;
            for request in requests {
                let status = self.exchange(request, &mut cookies).await?;
                last_status = Some(status);
                if !self.classifier.is_success(status) {
                    break;
                }
            }
            Ok::<Option<u16>, reqwest::Error>(last_status)
        };
        let result = tokio::time::timeout(timeout, exchange).await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        let url = requests.first().map(|r| r.url.as_str()).unwrap_or_default();

        let outcome = match result {
            Err(_) => ProbeResult::timeout(issued_at),
            Ok(Err(e)) if e.is_timeout() => ProbeResult::timeout(issued_at),
            Ok(Err(e)) => {
                tracing::debug!(url, "request failed: {e}");
                ProbeResult::connection_error(issued_at)
            }
            Ok(Ok(Some(status))) if self.classifier.is_success(status) => {
                ProbeResult::success(issued_at, latency_ms)
            }
            Ok(Ok(Some(status))) => ProbeResult::http_error(issued_at, latency_ms, status),
            Ok(Ok(None)) => ProbeResult::connection_error(issued_at),
        };
        if !outcome.is_success() {
            tracing::debug!(
                url,
                steps = requests.len(),
                ?timeout,
                outcome = outcome.outcome.label(),
                "probe failed"
            );
        }
        outcome
    }

    /// One request/response pair. Returns the status once the body has been
    /// read in full.
    async fn exchange(
        &self,
        request: &RenderedRequest,
        cookies: &mut Vec<String>,
    ) -> Result<u16, reqwest::Error> {
        let client = self.client.inner();
        let mut builder = match request.method {
            HttpMethod::Get => client.get(&request.url),
            HttpMethod::Post => client.post(&request.url),
        };
        if !request.params.is_empty() {
            builder = match request.method {
                HttpMethod::Get => builder.query(&request.params),
                HttpMethod::Post => builder.form(&request.params),
            };
        }
        if !cookies.is_empty() {
            builder = builder.header(reqwest::header::COOKIE, cookies.join("; "));
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        for value in response.headers().get_all(reqwest::header::SET_COOKIE) {
            if let Some(pair) = value.to_str().ok().and_then(|v| v.split(';').next()) {
                remember_cookie(cookies, pair.trim());
            }
        }
        response.bytes().await?;
        Ok(status)
    }
}

/// Store `name=value`, replacing an earlier cookie of the same name.
fn remember_cookie(cookies: &mut Vec<String>, pair: &str) {
    let Some((name, _)) = pair.split_once('=') else {
        return;
    };
    if name.is_empty() {
        return;
    }
    cookies.retain(|c| c.split_once('=').map(|(n, _)| n) != Some(name));
    cookies.push(pair.to_string());
}

#[async_trait]
impl Probe for RequestProbe {
    async fn probe(&self, target: &ProbeTarget) -> ProbeResult {
        let requests = target.flow.render(&mut rand::thread_rng());
        self.send_flow(&requests, target.timeout).await
    }
}
