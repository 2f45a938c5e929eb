use serde::{Deserialize, Serialize};

pub mod aggregator;
pub mod runner;
pub mod scheduler;

pub use aggregator::{
    aggregate, percentile, summarize, LatencyBucket, LatencySummary, ResultAggregator,
    DEFAULT_NUM_BUCKETS,
};
pub use runner::{run_config, BenchmarkRunner, RunnerEvent, Variant};
pub use scheduler::{RateScheduler, ScheduleOutcome, SchedulerEvent};

/// Phase the benchmark runner is in for the current variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    /// Waiting for the deploy hook.
    Deploying,
    /// Waiting out the stabilization delay after a deploy.
    Stabilizing,
    /// Sending warm-up requests whose results are discarded.
    WarmingUp,
    /// The rate scheduler is running.
    Measuring,
    /// Waiting for the undeploy hook.
    Undeploying,
    /// The variant has been measured and removed.
    Completed,
    /// The variant failed to deploy or undeploy.
    Error,
}

impl std::fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EngineStatus::Deploying => "deploying",
            EngineStatus::Stabilizing => "stabilizing",
            EngineStatus::WarmingUp => "warming_up",
            EngineStatus::Measuring => "measuring",
            EngineStatus::Undeploying => "undeploying",
            EngineStatus::Completed => "completed",
            EngineStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_serialized_name() {
        let all = [
            EngineStatus::Deploying,
            EngineStatus::Stabilizing,
            EngineStatus::WarmingUp,
            EngineStatus::Measuring,
            EngineStatus::Undeploying,
            EngineStatus::Completed,
            EngineStatus::Error,
        ];
        for status in all {
            let json = serde_json::to_string(&status).expect("serialize should succeed");
            assert_eq!(json, format!("\"{status}\""));
        }
    }

    #[test]
    fn deserialize_invalid_variant_fails() {
        assert!(serde_json::from_str::<EngineStatus>("\"stopping\"").is_err());
        assert!(serde_json::from_str::<EngineStatus>("\"idle\"").is_err());
    }
}
