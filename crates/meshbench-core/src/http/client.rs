use std::time::Duration;

use crate::error::BenchError;
use crate::plan::LoadSpec;

const USER_AGENT: &str = concat!("meshbench/", env!("CARGO_PKG_VERSION"));

/// Idle connections are kept for longer than one scheduler tick so a pool
/// survives the pause between batches.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Pooled reqwest client shared by every probe of a run. Cloning is cheap;
/// all clones share one pool.
///
/// The client has no overall request timeout: each probe is bounded by its
/// own `per_request_timeout_ms` alone.
#[derive(Clone, Debug)]
pub struct HttpClient {
    inner: reqwest::Client,
}

impl HttpClient {
    /// Client sized for `spec`: one idle connection per worker.
    pub fn for_spec(spec: &LoadSpec) -> Result<Self, BenchError> {
        Self::with_pool_size(spec.concurrency as usize)
    }

    pub fn with_pool_size(max_idle_per_host: usize) -> Result<Self, BenchError> {
        let inner = reqwest::Client::builder()
            .pool_max_idle_per_host(max_idle_per_host.max(1))
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .user_agent(USER_AGENT)
            .gzip(true)
            .brotli(true)
            .build()?;
        Ok(Self { inner })
    }

    pub fn inner(&self) -> &reqwest::Client {
        &self.inner
    }
}
