use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::deploy::{hook_for, DeployHook};
use crate::engine::aggregator::ResultAggregator;
use crate::engine::scheduler::RateScheduler;
use crate::engine::EngineStatus;
use crate::error::BenchError;
use crate::http::classifier::StatusCodeClassifier;
use crate::http::client::HttpClient;
use crate::http::probe::{Probe, ProbeTarget, RequestProbe};
use crate::plan::model::{BenchConfig, LoadSpec, RunnerSettings, VariantConfig};
use crate::plan::validation::{validate_config, validate_spec};
use crate::results::{BenchmarkReport, BenchmarkRun, VariantOutcome, VariantReport};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// A named variant together with the hook that deploys it.
#[derive(Clone)]
pub struct Variant {
    pub name: String,
    pub hook: Arc<dyn DeployHook>,
}

impl Variant {
    pub fn new(name: impl Into<String>, hook: Arc<dyn DeployHook>) -> Self {
        Self {
            name: name.into(),
            hook,
        }
    }

    pub fn from_config(config: &VariantConfig) -> Self {
        Self::new(config.name.clone(), hook_for(config))
    }
}

impl std::fmt::Debug for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Variant").field("name", &self.name).finish()
    }
}

/// Progress notification emitted by [`BenchmarkRunner`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerEvent {
    /// The runner entered a new phase for `variant`.
    StatusChange { variant: String, status: EngineStatus },
    /// `variant` is done; `outcome` is its [`VariantOutcome::label`].
    VariantFinished { variant: String, outcome: String },
}

// ---------------------------------------------------------------------------
// BenchmarkRunner
// ---------------------------------------------------------------------------

/// Measures a sequence of variants against the same load spec, one at a time.
pub struct BenchmarkRunner {
    name: String,
    probe: Arc<dyn Probe>,
    settings: RunnerSettings,
    cancel: CancellationToken,
    events: Option<mpsc::Sender<RunnerEvent>>,
}

impl BenchmarkRunner {
    pub fn new(probe: Arc<dyn Probe>, settings: RunnerSettings) -> Self {
        Self {
            name: "benchmark".to_string(),
            probe,
            settings,
            cancel: CancellationToken::new(),
            events: None,
        }
    }

    /// Name recorded in the report.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Cancelling `token` stops the current schedule at its next tick
    /// boundary and skips every variant that has not been deployed yet.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_events(mut self, tx: mpsc::Sender<RunnerEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Run every variant in order and collect a report.
    ///
    /// A failed deploy or undeploy stops the sequence: the failing variant
    /// is recorded as such and every later variant as not attempted. A
    /// variant with too little data to bucket is recorded and the sequence
    /// continues. Only an invalid `spec` or runner setting is an `Err`.
    pub async fn run_variants(
        &self,
        variants: &[Variant],
        spec: &LoadSpec,
    ) -> Result<BenchmarkReport, BenchError> {
        if let Some(err) = validate_spec(spec).into_iter().next() {
            return Err(err);
        }
        if self.settings.num_buckets == 0 {
            return Err(BenchError::Validation(
                "num_buckets must be at least 1".to_string(),
            ));
        }

        let started_at = Utc::now();
        let aggregator = ResultAggregator::new(self.settings.num_buckets, self.settings.inclusion);
        let mut reports = Vec::with_capacity(variants.len());
        let mut halted = false;

        tracing::info!(
            name = %self.name,
            variants = variants.len(),
            "starting benchmark sequence"
        );

        for variant in variants {
            let outcome = if halted || self.cancel.is_cancelled() {
                tracing::info!(variant = %variant.name, "variant not attempted");
                VariantOutcome::NotAttempted
            } else {
                let outcome = self.run_variant(variant, spec, &aggregator).await?;
                if matches!(
                    outcome,
                    VariantOutcome::DeployFailed { .. } | VariantOutcome::UndeployFailed { .. }
                ) {
                    halted = true;
                }
                outcome
            };

            self.emit(RunnerEvent::VariantFinished {
                variant: variant.name.clone(),
                outcome: outcome.label().to_string(),
            });
            reports.push(VariantReport {
                variant_name: variant.name.clone(),
                outcome,
            });
        }

        let report = BenchmarkReport::new(self.name.clone(), started_at, reports);
        tracing::info!(name = %report.name, status = %report.status, "benchmark sequence finished");
        Ok(report)
    }

    async fn run_variant(
        &self,
        variant: &Variant,
        spec: &LoadSpec,
        aggregator: &ResultAggregator,
    ) -> Result<VariantOutcome, BenchError> {
        let name = variant.name.as_str();

        self.set_status(name, EngineStatus::Deploying);
        if let Err(e) = variant.hook.deploy(name).await {
            tracing::error!(variant = name, "deploy failed: {e}");
            self.set_status(name, EngineStatus::Error);
            return Ok(VariantOutcome::DeployFailed {
                error: e.to_string(),
            });
        }

        self.set_status(name, EngineStatus::Stabilizing);
        tokio::select! {
            _ = tokio::time::sleep(self.settings.stabilization_delay()) => {}
            _ = self.cancel.cancelled() => {}
        }

        self.set_status(name, EngineStatus::WarmingUp);
        self.warm_up(name, spec).await;

        self.set_status(name, EngineStatus::Measuring);
        let scheduler =
            RateScheduler::new(Arc::clone(&self.probe)).with_cancel_token(self.cancel.clone());
        let schedule = scheduler.run(spec, self.settings.deadline()).await?;

        let mut run = BenchmarkRun::from_schedule(name, spec.clone(), schedule);
        let insufficient = match run.finalize(aggregator) {
            Ok(()) => None,
            Err(BenchError::InsufficientData(reason)) => {
                tracing::warn!(variant = name, "cannot bucket latencies: {reason}");
                Some(reason)
            }
            Err(e) => return Err(e),
        };
        tracing::info!(
            variant = name,
            probes = run.summary.total_probes,
            successful = run.summary.successful,
            mean_ms = run.summary.mean_ms,
            p99_ms = run.summary.p99_ms,
            "variant measured"
        );

        self.set_status(name, EngineStatus::Undeploying);
        if let Err(e) = variant.hook.undeploy(name).await {
            tracing::error!(variant = name, "undeploy failed: {e}");
            self.set_status(name, EngineStatus::Error);
            return Ok(VariantOutcome::UndeployFailed {
                run: Box::new(run),
                error: e.to_string(),
            });
        }

        self.set_status(name, EngineStatus::Completed);
        Ok(match insufficient {
            None => VariantOutcome::Completed { run: Box::new(run) },
            Some(reason) => VariantOutcome::InsufficientData {
                run: Box::new(run),
                reason,
            },
        })
    }

    /// Send the warm-up requests one after another and discard the results.
    async fn warm_up(&self, variant: &str, spec: &LoadSpec) {
        let count = self.settings.warmup_requests;
        if count == 0 {
            return;
        }
        let target = ProbeTarget::from_spec(spec);
        let mut failures = 0u32;
        for _ in 0..count {
            if self.cancel.is_cancelled() {
                break;
            }
            if !self.probe.probe(&target).await.is_success() {
                failures += 1;
            }
        }
        tracing::debug!(variant, count, failures, "warm-up finished");
    }

    fn set_status(&self, variant: &str, status: EngineStatus) {
        tracing::debug!(variant, %status, "runner status");
        self.emit(RunnerEvent::StatusChange {
            variant: variant.to_string(),
            status,
        });
    }

    fn emit(&self, event: RunnerEvent) {
        if let Some(tx) = &self.events {
            if let Err(e) = tx.try_send(event) {
                tracing::debug!("dropping runner event: {e}");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config entry point
// ---------------------------------------------------------------------------

/// Validate `config`, build an HTTP probe and the variants' hooks from it,
/// and run the whole sequence.
pub async fn run_config(
    config: &BenchConfig,
    cancel: CancellationToken,
) -> Result<BenchmarkReport, BenchError> {
    let errors = validate_config(config);
    if !errors.is_empty() {
        let joined = errors
            .iter()
            .map(|e| match e {
                BenchError::Validation(msg) => msg.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("; ");
        return Err(BenchError::Validation(joined));
    }

    let client = HttpClient::for_spec(&config.spec)?;
    let classifier = Arc::new(StatusCodeClassifier::new(config.runner.success_status));
    let probe = Arc::new(RequestProbe::with_classifier(client, classifier));
    let variants: Vec<Variant> = config.variants.iter().map(Variant::from_config).collect();

    let name = if config.name.is_empty() {
        "benchmark".to_string()
    } else {
        config.name.clone()
    };

    BenchmarkRunner::new(probe, config.runner.clone())
        .with_name(name)
        .with_cancel_token(cancel)
        .run_variants(&variants, &config.spec)
        .await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
