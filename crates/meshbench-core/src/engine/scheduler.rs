use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::BenchError;
use crate::http::probe::{Probe, ProbeResult, ProbeTarget};
use crate::plan::model::LoadSpec;
use crate::plan::validation::validate_spec;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Progress notification emitted while a schedule is running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerEvent {
    /// All probes of one tick have completed.
    TickComplete {
        tick: u32,
        dispatched: u32,
        failures: u32,
        /// Wall-clock time the batch took, which may exceed one second.
        batch_ms: u64,
    },
    /// The schedule ended, either normally or at the deadline.
    Finished { ticks: u32, deadline_reached: bool },
}

/// Everything a schedule produced, grouped by tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleOutcome {
    pub started_at: DateTime<Utc>,
    /// One batch per completed tick, in tick order. Results inside a batch
    /// are in completion order.
    pub ticks: Vec<Vec<ProbeResult>>,
    /// `true` when the deadline or cancellation stopped the run before every
    /// tick was issued.
    pub deadline_reached: bool,
    pub elapsed: Duration,
}

impl ScheduleOutcome {
    pub fn ticks_completed(&self) -> u32 {
        self.ticks.len() as u32
    }

    pub fn total_probes(&self) -> usize {
        self.ticks.iter().map(Vec::len).sum()
    }

    pub fn results(&self) -> impl Iterator<Item = &ProbeResult> {
        self.ticks.iter().flatten()
    }

    /// Probes per second of wall-clock time. Every completed tick counts as
    /// at least one second, so an unsaturated run reports `rate_qps`.
    pub fn achieved_qps(&self) -> f64 {
        let window = self
            .elapsed
            .as_secs_f64()
            .max(self.ticks.len() as f64);
        if window <= 0.0 {
            return 0.0;
        }
        self.total_probes() as f64 / window
    }

    pub fn flatten(self) -> Vec<ProbeResult> {
        self.ticks.into_iter().flatten().collect()
    }
}

// ---------------------------------------------------------------------------
// RateScheduler
// ---------------------------------------------------------------------------

/// Open-loop load generator with one-second granularity.
///
/// Each tick dispatches exactly `rate_qps` probes through a pool of
/// `concurrency` workers and waits for the whole batch. A batch that finishes
/// early is followed by a pause until the next one-second boundary; a batch
/// that overruns its second delays the next tick instead of overlapping it.
/// Under saturation the achieved rate therefore drops below `rate_qps`, and
/// that skew is the same for every variant measured with this scheduler.
pub struct RateScheduler {
    probe: Arc<dyn Probe>,
    cancel: CancellationToken,
    events: Option<mpsc::Sender<SchedulerEvent>>,
}

impl RateScheduler {
    pub fn new(probe: Arc<dyn Probe>) -> Self {
        Self {
            probe,
            cancel: CancellationToken::new(),
            events: None,
        }
    }

    /// Stop at the next tick boundary once `token` is cancelled.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Publish [`SchedulerEvent`]s on `tx`. Events are dropped rather than
    /// stalling the schedule when the channel is full.
    pub fn with_events(mut self, tx: mpsc::Sender<SchedulerEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Run the full schedule described by `spec`.
    ///
    /// `deadline` bounds the whole run. It is only honoured between ticks:
    /// probes already dispatched finish (each bounded by its own timeout) and
    /// no further tick starts.
    pub async fn run(
        &self,
        spec: &LoadSpec,
        deadline: Option<Duration>,
    ) -> Result<ScheduleOutcome, BenchError> {
        if let Some(err) = validate_spec(spec).into_iter().next() {
            return Err(err);
        }

        let started_at = Utc::now();
        let run_start = Instant::now();
        let deadline_at = deadline.map(|d| run_start + d);
        let target = Arc::new(ProbeTarget::from_spec(spec));
        let pool = Arc::new(Semaphore::new(spec.concurrency as usize));

        tracing::info!(
            url = %spec.target_url,
            rate_qps = spec.rate_qps,
            duration_seconds = spec.duration_seconds,
            concurrency = spec.concurrency,
            planned_probes = spec.total_probes(),
            "starting schedule"
        );

        let mut ticks: Vec<Vec<ProbeResult>> = Vec::with_capacity(spec.duration_seconds as usize);
        let mut deadline_reached = false;

        for tick in 0..spec.duration_seconds {
            let now = Instant::now();
            if self.cancel.is_cancelled() || deadline_at.is_some_and(|d| now >= d) {
                deadline_reached = true;
                break;
            }

            let batch = self.run_tick(&target, spec.rate_qps, &pool).await;
            let batch_ms = now.elapsed().as_millis() as u64;
            let failures = batch.iter().filter(|r| !r.is_success()).count() as u32;
            tracing::debug!(tick, failures, batch_ms, "tick complete");
            self.emit(SchedulerEvent::TickComplete {
                tick,
                dispatched: spec.rate_qps,
                failures,
                batch_ms,
            });
            ticks.push(batch);

            if tick + 1 < spec.duration_seconds {
                let boundary = now + Duration::from_secs(1);
                let wake = match deadline_at {
                    Some(d) if d < boundary => d,
                    _ => boundary,
                };
                tokio::select! {
                    _ = sleep_until(wake) => {}
                    _ = self.cancel.cancelled() => {}
                }
            }
        }

        let outcome = ScheduleOutcome {
            started_at,
            ticks,
            deadline_reached,
            elapsed: run_start.elapsed(),
        };

        tracing::info!(
            ticks = outcome.ticks_completed(),
            probes = outcome.total_probes(),
            achieved_qps = outcome.achieved_qps(),
            deadline_reached,
            "schedule finished"
        );
        self.emit(SchedulerEvent::Finished {
            ticks: outcome.ticks_completed(),
            deadline_reached,
        });

        Ok(outcome)
    }

    /// Dispatch `count` probes and collect every result before returning.
    ///
    /// Workers hand their result to this task over a channel; the batch is
    /// owned here alone, so nothing is shared while probes are in flight.
    async fn run_tick(
        &self,
        target: &Arc<ProbeTarget>,
        count: u32,
        pool: &Arc<Semaphore>,
    ) -> Vec<ProbeResult> {
        let (tx, mut rx) = mpsc::channel::<ProbeResult>(count.max(1) as usize);
        let mut workers: JoinSet<()> = JoinSet::new();

        for _ in 0..count {
            let probe = Arc::clone(&self.probe);
            let target = Arc::clone(target);
            let pool = Arc::clone(pool);
            let tx = tx.clone();
            workers.spawn(async move {
                let Ok(_permit) = pool.acquire_owned().await else {
                    return;
                };
                let result = probe.probe(&target).await;
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        let mut batch = Vec::with_capacity(count as usize);
        while let Some(result) = rx.recv().await {
            batch.push(result);
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!("probe worker failed: {e}");
            }
        }
        batch
    }

    fn emit(&self, event: SchedulerEvent) {
        if let Some(tx) = &self.events {
            if let Err(e) = tx.try_send(event) {
                tracing::debug!("dropping scheduler event: {e}");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use crate::http::probe::ProbeOutcome;

    /// In-process probe with a fixed service time and outcome.
    struct FakeProbe {
        delay: Duration,
        outcome: ProbeOutcome,
        calls: AtomicU32,
        in_flight: AtomicU32,
        max_in_flight: AtomicU32,
    }

    impl FakeProbe {
        fn new(delay_ms: u64, outcome: ProbeOutcome) -> Arc<Self> {
            Arc::new(Self {
                delay: Duration::from_millis(delay_ms),
                outcome,
                calls: AtomicU32::new(0),
                in_flight: AtomicU32::new(0),
                max_in_flight: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Probe for FakeProbe {
        async fn probe(&self, _target: &ProbeTarget) -> ProbeResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            let latency = self.delay.as_secs_f64() * 1000.0;
            match self.outcome {
                ProbeOutcome::Success => ProbeResult::success(Utc::now(), latency),
                ProbeOutcome::HttpError { status_code } => {
                    ProbeResult::http_error(Utc::now(), latency, status_code)
                }
                ProbeOutcome::Timeout => ProbeResult::timeout(Utc::now()),
                ProbeOutcome::ConnectionError => ProbeResult::connection_error(Utc::now()),
            }
        }
    }

    fn spec(rate_qps: u32, duration_seconds: u32, concurrency: u32) -> LoadSpec {
        let mut spec = LoadSpec::new("http://gateway/productpage");
        spec.rate_qps = rate_qps;
        spec.duration_seconds = duration_seconds;
        spec.concurrency = concurrency;
        spec.per_request_timeout_ms = 1_000;
        spec
    }

    // -----------------------------------------------------------------------
    // Dispatch counts
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn issues_exactly_rate_times_duration_probes() {
        let probe = FakeProbe::new(10, ProbeOutcome::Success);
        let scheduler = RateScheduler::new(probe.clone());

        let outcome = scheduler.run(&spec(10, 5, 2), None).await.unwrap();

        assert_eq!(probe.calls.load(Ordering::SeqCst), 50);
        assert_eq!(outcome.ticks_completed(), 5);
        assert!(outcome.ticks.iter().all(|t| t.len() == 10));
        assert_eq!(outcome.results().filter(|r| r.is_success()).count(), 50);
        assert!(!outcome.deadline_reached);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_pool_bounds_concurrency() {
        let probe = FakeProbe::new(50, ProbeOutcome::Success);
        let scheduler = RateScheduler::new(probe.clone());

        scheduler.run(&spec(20, 2, 3), None).await.unwrap();

        assert_eq!(probe.max_in_flight.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_failures_do_not_abort_the_run() {
        let probe = FakeProbe::new(5, ProbeOutcome::Timeout);
        let scheduler = RateScheduler::new(probe.clone());

        let outcome = scheduler.run(&spec(4, 3, 4), None).await.unwrap();

        assert_eq!(outcome.total_probes(), 12);
        assert!(outcome
            .results()
            .all(|r| r.outcome == ProbeOutcome::Timeout && r.latency_ms.is_none()));
    }

    // -----------------------------------------------------------------------
    // Tick timing
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn fast_batches_wait_for_the_next_second() {
        let probe = FakeProbe::new(10, ProbeOutcome::Success);
        let scheduler = RateScheduler::new(probe);

        let outcome = scheduler.run(&spec(1, 3, 1), None).await.unwrap();

        // Ticks start at 0s, 1s and 2s; the last batch takes 10ms.
        assert!(outcome.elapsed >= Duration::from_millis(2_010));
        assert!(outcome.elapsed < Duration::from_millis(2_100));
        assert!((outcome.achieved_qps() - 1.0).abs() < 0.01);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_batches_delay_but_never_overlap_ticks() {
        let probe = FakeProbe::new(1_500, ProbeOutcome::Success);
        let scheduler = RateScheduler::new(probe.clone());

        let outcome = scheduler.run(&spec(1, 3, 1), None).await.unwrap();

        assert_eq!(probe.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.total_probes(), 3);
        assert!(outcome.elapsed >= Duration::from_millis(4_500));
        assert!(outcome.elapsed < Duration::from_millis(4_600));
        assert!(outcome.achieved_qps() < 1.0);

        let issued: Vec<_> = outcome.results().map(|r| r.issued_at).collect();
        assert!(issued.windows(2).all(|w| w[0] <= w[1]));
    }

    // -----------------------------------------------------------------------
    // Deadline and cancellation
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn deadline_stops_before_the_next_tick() {
        let probe = FakeProbe::new(10, ProbeOutcome::Success);
        let scheduler = RateScheduler::new(probe.clone());

        let outcome = scheduler
            .run(&spec(5, 10, 5), Some(Duration::from_millis(2_500)))
            .await
            .unwrap();

        assert!(outcome.deadline_reached);
        assert_eq!(outcome.ticks_completed(), 3);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 15);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_lets_in_flight_probes_finish() {
        let probe = FakeProbe::new(3_000, ProbeOutcome::Success);
        let scheduler = RateScheduler::new(probe);

        let outcome = scheduler
            .run(&spec(2, 5, 2), Some(Duration::from_secs(1)))
            .await
            .unwrap();

        assert!(outcome.deadline_reached);
        assert_eq!(outcome.ticks_completed(), 1);
        assert_eq!(outcome.ticks[0].len(), 2);
        assert!(outcome.ticks[0].iter().all(|r| r.is_success()));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_token_starts_no_ticks() {
        let probe = FakeProbe::new(10, ProbeOutcome::Success);
        let token = CancellationToken::new();
        token.cancel();
        let scheduler = RateScheduler::new(probe.clone()).with_cancel_token(token);

        let outcome = scheduler.run(&spec(5, 5, 1), None).await.unwrap();

        assert!(outcome.deadline_reached);
        assert_eq!(outcome.ticks_completed(), 0);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.achieved_qps(), 0.0);
    }

    // -----------------------------------------------------------------------
    // Events and validation
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn emits_one_event_per_tick_then_finished() {
        let probe = FakeProbe::new(10, ProbeOutcome::HttpError { status_code: 503 });
        let (tx, mut rx) = mpsc::channel(16);
        let scheduler = RateScheduler::new(probe).with_events(tx);

        scheduler.run(&spec(3, 2, 3), None).await.unwrap();
        drop(scheduler);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events.len(), 3);
        assert!(matches!(
            events[0],
            SchedulerEvent::TickComplete { tick: 0, dispatched: 3, failures: 3, .. }
        ));
        assert_eq!(
            events[2],
            SchedulerEvent::Finished { ticks: 2, deadline_reached: false }
        );
    }

    #[tokio::test]
    async fn invalid_spec_is_rejected() {
        let probe = FakeProbe::new(0, ProbeOutcome::Success);
        let scheduler = RateScheduler::new(probe);

        let result = scheduler.run(&spec(10, 5, 0), None).await;
        assert!(matches!(result, Err(BenchError::Validation(_))));
    }

    // -----------------------------------------------------------------------
    // End to end over HTTP
    // -----------------------------------------------------------------------

    mod over_http {
        use super::*;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        use crate::http::client::HttpClient;
        use crate::http::probe::RequestProbe;

        fn http_scheduler() -> RateScheduler {
            let client = HttpClient::with_pool_size(4).expect("client should build");
            RateScheduler::new(Arc::new(RequestProbe::new(client)))
        }

        #[tokio::test]
        async fn ten_qps_for_five_seconds_yields_fifty_successes() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/productpage"))
                .respond_with(ResponseTemplate::new(200))
                .expect(50)
                .mount(&server)
                .await;

            let mut load = spec(10, 5, 2);
            load.target_url = format!("{}/productpage", server.uri());
            let outcome = http_scheduler().run(&load, None).await.unwrap();

            assert_eq!(outcome.total_probes(), 50);
            assert_eq!(outcome.results().filter(|r| r.is_success()).count(), 50);
        }

        #[tokio::test]
        async fn slow_target_times_out_without_extra_delay() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(800)))
                .mount(&server)
                .await;

            let mut load = spec(3, 2, 3);
            load.target_url = format!("{}/productpage", server.uri());
            load.per_request_timeout_ms = 100;
            let outcome = http_scheduler().run(&load, None).await.unwrap();

            assert_eq!(outcome.total_probes(), 6);
            assert!(outcome
                .results()
                .all(|r| r.outcome == ProbeOutcome::Timeout));
            // Tick two starts at +1s and its batch is cut off at +100ms.
            assert!(outcome.elapsed < Duration::from_millis(1_600));
        }

        #[tokio::test]
        async fn server_errors_are_recorded_per_probe() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(500))
                .mount(&server)
                .await;

            let mut load = spec(4, 1, 2);
            load.target_url = server.uri();
            let outcome = http_scheduler().run(&load, None).await.unwrap();

            assert_eq!(outcome.total_probes(), 4);
            assert!(outcome
                .results()
                .all(|r| r.outcome == ProbeOutcome::HttpError { status_code: 500 }));
        }
    }

    #[test]
    fn flatten_preserves_tick_order() {
        let t0 = Utc::now();
        let outcome = ScheduleOutcome {
            started_at: t0,
            ticks: vec![
                vec![ProbeResult::success(t0, 1.0)],
                vec![ProbeResult::timeout(t0), ProbeResult::success(t0, 3.0)],
            ],
            deadline_reached: false,
            elapsed: Duration::from_secs(2),
        };
        let flat = outcome.flatten();
        assert_eq!(flat.len(), 3);
        assert_eq!(flat[0].latency_ms, Some(1.0));
        assert_eq!(flat[2].latency_ms, Some(3.0));
    }
}
