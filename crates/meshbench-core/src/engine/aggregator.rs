use serde::{Deserialize, Serialize};

use crate::error::BenchError;
use crate::http::probe::{ProbeOutcome, ProbeResult};
use crate::plan::model::InclusionPolicy;

/// Bucket count used when none is configured.
pub const DEFAULT_NUM_BUCKETS: usize = 10;

// ---------------------------------------------------------------------------
// LatencyBucket
// ---------------------------------------------------------------------------

/// One latency range of a duration histogram.
///
/// Shaped like the percentile-vs-latency points of external load tools so
/// both can be drawn on the same plot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LatencyBucket {
    pub range_start_ms: f64,
    pub range_end_ms: f64,
    pub count: u64,
    /// Share of included results at or below this bucket, in percent.
    pub cumulative_percent: f64,
}

// ---------------------------------------------------------------------------
// LatencySummary
// ---------------------------------------------------------------------------

/// Headline numbers for one run. Latency fields cover successful probes
/// only and are zero when there are none.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LatencySummary {
    pub total_probes: u64,
    pub successful: u64,
    pub http_errors: u64,
    pub timeouts: u64,
    pub connection_errors: u64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl LatencySummary {
    pub fn failed(&self) -> u64 {
        self.total_probes - self.successful
    }

    pub fn error_rate(&self) -> f64 {
        if self.total_probes == 0 {
            return 0.0;
        }
        self.failed() as f64 / self.total_probes as f64
    }
}

// ---------------------------------------------------------------------------
// ResultAggregator
// ---------------------------------------------------------------------------

/// Turns probe results into a fixed number of equal-width latency buckets.
///
/// The output depends only on the multiset of included latencies, never on
/// the order in which probes completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultAggregator {
    num_buckets: usize,
    inclusion: InclusionPolicy,
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self {
            num_buckets: DEFAULT_NUM_BUCKETS,
            inclusion: InclusionPolicy::SuccessOnly,
        }
    }
}

impl ResultAggregator {
    pub fn new(num_buckets: usize, inclusion: InclusionPolicy) -> Self {
        Self {
            num_buckets,
            inclusion,
        }
    }

    pub fn num_buckets(&self) -> usize {
        self.num_buckets
    }

    pub fn inclusion(&self) -> InclusionPolicy {
        self.inclusion
    }

    fn includes(&self, result: &ProbeResult) -> bool {
        match self.inclusion {
            InclusionPolicy::SuccessOnly => result.is_success(),
            InclusionPolicy::CompletedResponses => matches!(
                result.outcome,
                ProbeOutcome::Success | ProbeOutcome::HttpError { .. }
            ),
        }
    }

    /// Latencies of the included results, sorted ascending.
    pub fn included_latencies(&self, results: &[ProbeResult]) -> Vec<f64> {
        let mut latencies: Vec<f64> = results
            .iter()
            .filter(|r| self.includes(r))
            .filter_map(|r| r.latency_ms)
            .collect();
        latencies.sort_by(f64::total_cmp);
        latencies
    }

    /// Bucket the included results.
    ///
    /// Fails with [`BenchError::InsufficientData`] when fewer than two
    /// distinct latencies are available, since the bucket width would be zero.
    pub fn aggregate(&self, results: &[ProbeResult]) -> Result<Vec<LatencyBucket>, BenchError> {
        let latencies = self.included_latencies(results);
        self.bucket_sorted(&latencies)
    }

    /// Bucket latencies that are already sorted ascending.
    pub fn bucket_sorted(&self, sorted: &[f64]) -> Result<Vec<LatencyBucket>, BenchError> {
        if self.num_buckets == 0 {
            return Err(BenchError::Validation(
                "num_buckets must be at least 1".to_string(),
            ));
        }
        let (min, max) = match (sorted.first(), sorted.last()) {
            (Some(&min), Some(&max)) if max > min => (min, max),
            _ => {
                return Err(BenchError::InsufficientData(format!(
                    "need at least 2 distinct latencies, got {} included results",
                    sorted.len()
                )))
            }
        };

        let n = self.num_buckets;
        let width = (max - min) / n as f64;
        // Lower edge of bucket `i`, computed exactly as it is reported.
        let edge = |i: usize| min + width * i as f64;
        let mut counts = vec![0u64; n];
        for &latency in sorted {
            // The quotient can round to the wrong side of an edge, so settle
            // the index against the reported edges.
            let mut idx = (((latency - min) / width).floor() as usize).min(n - 1);
            while idx + 1 < n && latency >= edge(idx + 1) {
                idx += 1;
            }
            while idx > 0 && latency < edge(idx) {
                idx -= 1;
            }
            counts[idx] += 1;
        }

        let total = sorted.len() as f64;
        let mut running = 0u64;
        let buckets = counts
            .into_iter()
            .enumerate()
            .map(|(i, count)| {
                running += count;
                let range_end_ms = if i + 1 == n { max } else { edge(i + 1) };
                LatencyBucket {
                    range_start_ms: edge(i),
                    range_end_ms,
                    count,
                    cumulative_percent: running as f64 / total * 100.0,
                }
            })
            .collect();
        Ok(buckets)
    }
}

/// Bucket `results` with the default bucket count, successes only.
pub fn aggregate(results: &[ProbeResult]) -> Result<Vec<LatencyBucket>, BenchError> {
    ResultAggregator::default().aggregate(results)
}

// ---------------------------------------------------------------------------
// Percentiles and summary
// ---------------------------------------------------------------------------

/// Nearest-rank percentile of an ascending slice. `p` is in (0.0, 100.0].
/// Returns 0.0 for an empty slice.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    let idx = idx.saturating_sub(1).min(sorted.len() - 1);
    sorted[idx]
}

/// Count outcomes across all results and describe the successful latencies.
pub fn summarize(results: &[ProbeResult]) -> LatencySummary {
    let mut summary = LatencySummary {
        total_probes: results.len() as u64,
        ..LatencySummary::default()
    };
    for result in results {
        match result.outcome {
            ProbeOutcome::Success => summary.successful += 1,
            ProbeOutcome::HttpError { .. } => summary.http_errors += 1,
            ProbeOutcome::Timeout => summary.timeouts += 1,
            ProbeOutcome::ConnectionError => summary.connection_errors += 1,
        }
    }

    let sorted = ResultAggregator::default().included_latencies(results);
    if let (Some(&min), Some(&max)) = (sorted.first(), sorted.last()) {
        summary.min_ms = min;
        summary.max_ms = max;
        summary.mean_ms = sorted.iter().sum::<f64>() / sorted.len() as f64;
        summary.p50_ms = percentile(&sorted, 50.0);
        summary.p90_ms = percentile(&sorted, 90.0);
        summary.p95_ms = percentile(&sorted, 95.0);
        summary.p99_ms = percentile(&sorted, 99.0);
    }
    summary
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
