pub mod export;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::aggregator::{summarize, LatencyBucket, LatencySummary, ResultAggregator};
use crate::engine::scheduler::ScheduleOutcome;
use crate::error::BenchError;
use crate::http::probe::ProbeResult;
use crate::plan::model::LoadSpec;

// ---------------------------------------------------------------------------
// BenchmarkRun
// ---------------------------------------------------------------------------

/// Everything measured for one variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BenchmarkRun {
    pub run_id: Uuid,
    pub variant_name: String,
    pub spec: LoadSpec,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub ticks_completed: u32,
    /// The run was stopped at its deadline before every tick was issued.
    pub deadline_reached: bool,
    pub achieved_qps: f64,
    pub summary: LatencySummary,
    /// Empty until [`BenchmarkRun::finalize`] succeeds.
    pub buckets: Vec<LatencyBucket>,
    /// Latencies that fed the buckets, sorted ascending.
    pub latencies_ms: Vec<f64>,
    /// Every probe result in tick order, failures included.
    pub results: Vec<ProbeResult>,
}

impl BenchmarkRun {
    /// Collect a finished schedule into a run without buckets.
    pub fn from_schedule(
        variant_name: impl Into<String>,
        spec: LoadSpec,
        outcome: ScheduleOutcome,
    ) -> Self {
        let ticks_completed = outcome.ticks_completed();
        let achieved_qps = outcome.achieved_qps();
        let deadline_reached = outcome.deadline_reached;
        let started_at = outcome.started_at;
        let results = outcome.flatten();

        Self {
            run_id: Uuid::new_v4(),
            variant_name: variant_name.into(),
            spec,
            started_at,
            finished_at: Utc::now(),
            ticks_completed,
            deadline_reached,
            achieved_qps,
            summary: summarize(&results),
            buckets: Vec::new(),
            latencies_ms: Vec::new(),
            results,
        }
    }

    /// Compute buckets and the included latency list. On failure the run is
    /// left without buckets.
    pub fn finalize(&mut self, aggregator: &ResultAggregator) -> Result<(), BenchError> {
        let latencies = aggregator.included_latencies(&self.results);
        self.buckets = aggregator.bucket_sorted(&latencies)?;
        self.latencies_ms = latencies;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// VariantOutcome / VariantReport
// ---------------------------------------------------------------------------

/// What happened to one variant in a benchmark sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VariantOutcome {
    /// Measured and bucketed.
    Completed { run: Box<BenchmarkRun> },
    /// Measured, but too few distinct latencies to bucket.
    InsufficientData { run: Box<BenchmarkRun>, reason: String },
    /// The deploy step failed; nothing was measured.
    DeployFailed { error: String },
    /// Measured, but the undeploy step failed afterwards.
    UndeployFailed { run: Box<BenchmarkRun>, error: String },
    /// Skipped because an earlier variant failed to deploy or undeploy.
    NotAttempted,
}

impl VariantOutcome {
    pub fn run(&self) -> Option<&BenchmarkRun> {
        match self {
            VariantOutcome::Completed { run }
            | VariantOutcome::InsufficientData { run, .. }
            | VariantOutcome::UndeployFailed { run, .. } => Some(&**run),
            VariantOutcome::DeployFailed { .. } | VariantOutcome::NotAttempted => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            VariantOutcome::Completed { .. } => "completed",
            VariantOutcome::InsufficientData { .. } => "insufficient_data",
            VariantOutcome::DeployFailed { .. } => "deploy_failed",
            VariantOutcome::UndeployFailed { .. } => "undeploy_failed",
            VariantOutcome::NotAttempted => "not_attempted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VariantReport {
    pub variant_name: String,
    #[serde(flatten)]
    pub outcome: VariantOutcome,
}

// ---------------------------------------------------------------------------
// RunStatus / BenchmarkReport
// ---------------------------------------------------------------------------

/// Overall verdict of a benchmark sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    /// A deploy or undeploy step failed; later variants were not run.
    DeployFailure { variant: String },
    /// A variant was measured but could not be bucketed.
    InsufficientData { variant: String },
    /// At least one variant stopped at its deadline.
    Aborted { deadline_reached: bool },
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Success => write!(f, "success"),
            RunStatus::DeployFailure { variant } => write!(f, "deploy failure ({variant})"),
            RunStatus::InsufficientData { variant } => {
                write!(f, "insufficient data ({variant})")
            }
            RunStatus::Aborted { .. } => write!(f, "aborted (deadline reached)"),
        }
    }
}

/// Result of a whole benchmark sequence. Lists every variant that was
/// requested, in order, whether or not it ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BenchmarkReport {
    pub report_id: Uuid,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub variants: Vec<VariantReport>,
}

impl BenchmarkReport {
    pub fn new(
        name: impl Into<String>,
        started_at: DateTime<Utc>,
        variants: Vec<VariantReport>,
    ) -> Self {
        let status = derive_status(&variants);
        Self {
            report_id: Uuid::new_v4(),
            name: name.into(),
            started_at,
            finished_at: Utc::now(),
            status,
            variants,
        }
    }

    pub fn runs(&self) -> impl Iterator<Item = &BenchmarkRun> {
        self.variants.iter().filter_map(|v| v.outcome.run())
    }

    pub fn variant(&self, name: &str) -> Option<&VariantReport> {
        self.variants.iter().find(|v| v.variant_name == name)
    }
}

/// Deploy failures outrank bucketing failures, which outrank deadlines.
fn derive_status(variants: &[VariantReport]) -> RunStatus {
    if let Some(v) = variants.iter().find(|v| {
        matches!(
            v.outcome,
            VariantOutcome::DeployFailed { .. } | VariantOutcome::UndeployFailed { .. }
        )
    }) {
        return RunStatus::DeployFailure {
            variant: v.variant_name.clone(),
        };
    }
    if let Some(v) = variants
        .iter()
        .find(|v| matches!(v.outcome, VariantOutcome::InsufficientData { .. }))
    {
        return RunStatus::InsufficientData {
            variant: v.variant_name.clone(),
        };
    }
    if variants
        .iter()
        .filter_map(|v| v.outcome.run())
        .any(|run| run.deadline_reached)
    {
        return RunStatus::Aborted {
            deadline_reached: true,
        };
    }
    RunStatus::Success
}

// ---------------------------------------------------------------------------
// VariantComparison
// ---------------------------------------------------------------------------

/// Latency overhead of one variant relative to the first measured variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VariantComparison {
    pub baseline: String,
    pub variant: String,
    pub delta_mean_ms: f64,
    pub delta_p50_ms: f64,
    pub delta_p95_ms: f64,
    pub delta_p99_ms: f64,
    pub delta_achieved_qps: f64,
    pub delta_error_rate: f64,
}

/// Compare every measured variant against the first measured one, which is
/// conventionally the unfiltered baseline.
pub fn compare_to_baseline(report: &BenchmarkReport) -> Vec<VariantComparison> {
    let mut runs = report.runs();
    let Some(baseline) = runs.next() else {
        return Vec::new();
    };
    let a = &baseline.summary;
    runs.map(|run| {
        let b = &run.summary;
        VariantComparison {
            baseline: baseline.variant_name.clone(),
            variant: run.variant_name.clone(),
            delta_mean_ms: b.mean_ms - a.mean_ms,
            delta_p50_ms: b.p50_ms - a.p50_ms,
            delta_p95_ms: b.p95_ms - a.p95_ms,
            delta_p99_ms: b.p99_ms - a.p99_ms,
            delta_achieved_qps: run.achieved_qps - baseline.achieved_qps,
            delta_error_rate: b.error_rate() - a.error_rate(),
        }
    })
    .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::Duration;

    /// Build a run from plain latencies, all successful, one tick.
    pub(crate) fn make_run(variant: &str, latencies: &[f64]) -> BenchmarkRun {
        let now = Utc::now();
        let outcome = ScheduleOutcome {
            started_at: now,
            ticks: vec![latencies
                .iter()
                .map(|&l| ProbeResult::success(now, l))
                .collect()],
            deadline_reached: false,
            elapsed: Duration::from_millis(500),
        };
        BenchmarkRun::from_schedule(variant, LoadSpec::new("http://gw/productpage"), outcome)
    }

    fn completed(variant: &str, latencies: &[f64]) -> VariantReport {
        let mut run = make_run(variant, latencies);
        run.finalize(&ResultAggregator::default()).unwrap();
        VariantReport {
            variant_name: variant.to_string(),
            outcome: VariantOutcome::Completed { run: Box::new(run) },
        }
    }

    // -----------------------------------------------------------------------
    // BenchmarkRun
    // -----------------------------------------------------------------------

    #[test]
    fn from_schedule_summarizes_without_buckets() {
        let run = make_run("no_filter", &[1.0, 2.0, 3.0]);
        assert_eq!(run.results.len(), 3);
        assert_eq!(run.summary.successful, 3);
        assert_eq!(run.ticks_completed, 1);
        assert!(run.buckets.is_empty());
        assert!(run.latencies_ms.is_empty());
    }

    #[test]
    fn finalize_fills_buckets_and_latencies() {
        let mut run = make_run("no_filter", &[3.0, 1.0, 2.0]);
        run.finalize(&ResultAggregator::default()).unwrap();
        assert_eq!(run.latencies_ms, vec![1.0, 2.0, 3.0]);
        assert_eq!(run.buckets.iter().map(|b| b.count).sum::<u64>(), 3);
    }

    #[test]
    fn finalize_failure_leaves_buckets_empty() {
        let mut run = make_run("no_filter", &[5.0]);
        let err = run.finalize(&ResultAggregator::default()).unwrap_err();
        assert!(matches!(err, BenchError::InsufficientData(_)));
        assert!(run.buckets.is_empty());
    }

    // -----------------------------------------------------------------------
    // Status derivation
    // -----------------------------------------------------------------------

    #[test]
    fn all_completed_is_success() {
        let report = BenchmarkReport::new(
            "bench",
            Utc::now(),
            vec![completed("a", &[1.0, 2.0]), completed("b", &[1.0, 3.0])],
        );
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.runs().count(), 2);
    }

    #[test]
    fn deploy_failure_outranks_insufficient_data() {
        let run = make_run("a", &[1.0]);
        let variants = vec![
            VariantReport {
                variant_name: "a".to_string(),
                outcome: VariantOutcome::InsufficientData {
                    run: Box::new(run),
                    reason: "1 result".to_string(),
                },
            },
            VariantReport {
                variant_name: "b".to_string(),
                outcome: VariantOutcome::DeployFailed {
                    error: "exit 1".to_string(),
                },
            },
            VariantReport {
                variant_name: "c".to_string(),
                outcome: VariantOutcome::NotAttempted,
            },
        ];
        let report = BenchmarkReport::new("bench", Utc::now(), variants);
        assert_eq!(
            report.status,
            RunStatus::DeployFailure { variant: "b".to_string() }
        );
        assert_eq!(report.variant("c").unwrap().outcome.label(), "not_attempted");
    }

    #[test]
    fn deadline_marks_report_aborted() {
        let mut report_variant = completed("a", &[1.0, 2.0]);
        if let VariantOutcome::Completed { run } = &mut report_variant.outcome {
            run.deadline_reached = true;
        }
        let report = BenchmarkReport::new("bench", Utc::now(), vec![report_variant]);
        assert_eq!(report.status, RunStatus::Aborted { deadline_reached: true });
        assert_eq!(report.status.to_string(), "aborted (deadline reached)");
    }

    #[test]
    fn variant_report_serializes_flat_status() {
        let v = VariantReport {
            variant_name: "snicket_filter".to_string(),
            outcome: VariantOutcome::NotAttempted,
        };
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["variant_name"], "snicket_filter");
        assert_eq!(json["status"], "not_attempted");
    }

    #[test]
    fn run_status_serializes_with_code() {
        let json = serde_json::to_value(RunStatus::DeployFailure {
            variant: "span_filter".to_string(),
        })
        .unwrap();
        assert_eq!(json["code"], "deploy_failure");
        assert_eq!(json["variant"], "span_filter");
    }

    // -----------------------------------------------------------------------
    // compare_to_baseline
    // -----------------------------------------------------------------------

    #[test]
    fn comparison_uses_first_measured_variant_as_baseline() {
        let report = BenchmarkReport::new(
            "bench",
            Utc::now(),
            vec![
                VariantReport {
                    variant_name: "broken".to_string(),
                    outcome: VariantOutcome::DeployFailed {
                        error: "x".to_string(),
                    },
                },
                completed("no_filter", &[10.0, 20.0, 30.0]),
                completed("snicket_filter", &[12.0, 24.0, 36.0]),
            ],
        );
        let cmp = compare_to_baseline(&report);
        assert_eq!(cmp.len(), 1);
        assert_eq!(cmp[0].baseline, "no_filter");
        assert_eq!(cmp[0].variant, "snicket_filter");
        assert!((cmp[0].delta_mean_ms - 4.0).abs() < 1e-9);
        assert!((cmp[0].delta_p50_ms - 4.0).abs() < 1e-9);
        assert_eq!(cmp[0].delta_error_rate, 0.0);
    }

    #[test]
    fn comparison_of_empty_report_is_empty() {
        let report = BenchmarkReport::new("bench", Utc::now(), Vec::new());
        assert!(compare_to_baseline(&report).is_empty());
    }
}
