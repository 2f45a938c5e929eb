use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// HttpMethod
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Value of a single request parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Sent unchanged on every request.
    Fixed(String),
    /// One entry is picked at random for each request.
    OneOf(Vec<String>),
}

/// A named request parameter. GET requests carry parameters in the query
/// string, POST requests send them form-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PayloadParam {
    pub name: String,
    pub value: ParamValue,
}

impl PayloadParam {
    pub fn fixed(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: ParamValue::Fixed(value.into()),
        }
    }

    pub fn one_of<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            value: ParamValue::OneOf(values.into_iter().map(Into::into).collect()),
        }
    }
}

// ---------------------------------------------------------------------------
// RequestStep
// ---------------------------------------------------------------------------

/// A request sent after the first one within the same probe, such as the
/// `POST /cart` that follows a product page view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RequestStep {
    #[serde(default)]
    pub method: HttpMethod,
    /// Absolute URL, or a path resolved against the probe's target URL.
    pub path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<PayloadParam>,
}

impl RequestStep {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            payload: Vec::new(),
        }
    }

    pub fn with_payload(mut self, payload: Vec<PayloadParam>) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// LoadSpec
// ---------------------------------------------------------------------------

/// Describes the load applied to one target for one benchmark run.
///
/// `{name}` in the target URL, in step paths and in fixed payload values is
/// replaced by the variable `name`, drawn once per probe from `vars`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoadSpec {
    pub target_url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<PayloadParam>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vars: Vec<PayloadParam>,
    /// Requests sent after the first one, in order, as part of every probe.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<RequestStep>,
    /// Size of the worker pool used within a tick.
    pub concurrency: u32,
    /// Probes dispatched per one-second tick.
    pub rate_qps: u32,
    /// Number of ticks.
    pub duration_seconds: u32,
    pub per_request_timeout_ms: u64,
}

impl LoadSpec {
    pub fn new(target_url: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
            method: HttpMethod::Get,
            payload: Vec::new(),
            vars: Vec::new(),
            steps: Vec::new(),
            concurrency: 10,
            rate_qps: 10,
            duration_seconds: 30,
            per_request_timeout_ms: 5_000,
        }
    }

    /// Bound on a whole probe, every step included.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.per_request_timeout_ms)
    }

    /// Number of probes a run issues when it is not cut short by a deadline.
    pub fn total_probes(&self) -> u64 {
        self.rate_qps as u64 * self.duration_seconds as u64
    }
}

// ---------------------------------------------------------------------------
// InclusionPolicy
// ---------------------------------------------------------------------------

/// Which probe results feed the latency buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InclusionPolicy {
    /// Only successful probes.
    #[default]
    SuccessOnly,
    /// Every probe that received a response, whatever its status code.
    CompletedResponses,
}

// ---------------------------------------------------------------------------
// Variants and runner settings
// ---------------------------------------------------------------------------

/// One configuration under test, with the external commands that put it in
/// place and remove it. `{variant}` in any argument is replaced by the name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VariantConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub undeploy: Option<Vec<String>>,
}

impl VariantConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            deploy: None,
            undeploy: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RunnerSettings {
    /// Pause between a successful deploy and the first warm-up request.
    #[serde(default = "default_stabilization_delay_ms")]
    pub stabilization_delay_ms: u64,
    #[serde(default = "default_warmup_requests")]
    pub warmup_requests: u32,
    #[serde(default = "default_num_buckets")]
    pub num_buckets: usize,
    #[serde(default)]
    pub inclusion: InclusionPolicy,
    #[serde(default = "default_success_status")]
    pub success_status: u16,
    /// Upper bound on the scheduling phase of each variant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_seconds: Option<u64>,
}

fn default_stabilization_delay_ms() -> u64 {
    5_000
}

fn default_warmup_requests() -> u32 {
    10
}

fn default_num_buckets() -> usize {
    crate::engine::aggregator::DEFAULT_NUM_BUCKETS
}

fn default_success_status() -> u16 {
    200
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            stabilization_delay_ms: default_stabilization_delay_ms(),
            warmup_requests: default_warmup_requests(),
            num_buckets: default_num_buckets(),
            inclusion: InclusionPolicy::default(),
            success_status: default_success_status(),
            deadline_seconds: None,
        }
    }
}

impl RunnerSettings {
    pub fn stabilization_delay(&self) -> Duration {
        Duration::from_millis(self.stabilization_delay_ms)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_seconds.map(Duration::from_secs)
    }
}

// ---------------------------------------------------------------------------
// BenchConfig
// ---------------------------------------------------------------------------

/// Top-level benchmark configuration as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BenchConfig {
    #[serde(default)]
    pub name: String,
    pub spec: LoadSpec,
    #[serde(default)]
    pub variants: Vec<VariantConfig>,
    #[serde(default)]
    pub runner: RunnerSettings,
    /// Format version for forward-compatibility.
    #[serde(default = "default_format_version")]
    pub format_version: u32,
}

fn default_format_version() -> u32 {
    1
}

impl BenchConfig {
    pub fn new(name: impl Into<String>, spec: LoadSpec) -> Self {
        Self {
            name: name.into(),
            spec,
            variants: Vec::new(),
            runner: RunnerSettings::default(),
            format_version: 1,
        }
    }
}
