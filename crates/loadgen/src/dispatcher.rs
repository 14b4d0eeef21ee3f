//! Adaptive dispatcher
//!
//! Drains the bounded work queue with a worker pool that starts small and
//! ramps toward a ceiling as workers complete their batches. A global
//! sent-counter reserves dispatch attempts against the total budget; the
//! counter reflects attempts, not confirmed successes. Workers cap out at
//! the ceiling plus a small overrun allowance; submitting beyond that cap
//! blocks the submitter instead of growing the pool.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use slopestream_types::{
    LiftRideEvent, RequestKind, RequestMetrics, Result, RetryExecutor, RetryPolicy,
};

/// Outbound dispatch seam; the production target posts over HTTP
#[async_trait]
pub trait RideDispatcher: Send + Sync {
    /// Attempt one outbound call, returning the response code on success.
    /// Failures carry their class so the retry executor can decide.
    async fn dispatch(&self, event: &LiftRideEvent) -> Result<u16>;
}

/// Dispatcher tuning
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Total dispatch-attempt budget for the run
    pub total_requests: u64,
    pub initial_workers: usize,
    /// Worker ceiling for the ramp
    pub max_workers: usize,
    /// Events per worker during ramp-up
    pub initial_batch: usize,
    /// Events per replacement worker
    pub steady_batch: usize,
    pub max_retries: u32,
    /// Live workers tolerated beyond the ceiling before submitters block
    pub worker_overrun: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            total_requests: 200_000,
            initial_workers: 32,
            max_workers: 200,
            initial_batch: 1000,
            steady_batch: 1500,
            max_retries: 5,
            worker_overrun: 20,
        }
    }
}

/// Shared cross-worker coordination state
#[derive(Debug, Default)]
struct DispatchState {
    requests_sent: AtomicU64,
    failed_requests: AtomicU64,
    active_workers: AtomicUsize,
    queue_exhausted: AtomicBool,
}

impl DispatchState {
    fn requests_sent(&self) -> u64 {
        self.requests_sent.load(Ordering::SeqCst)
    }

    fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    fn queue_exhausted(&self) -> bool {
        self.queue_exhausted.load(Ordering::SeqCst)
    }
}

/// Everything a worker needs, shared by reference
struct WorkerContext<D> {
    target: Arc<D>,
    retry: RetryExecutor,
    queue: Mutex<mpsc::Receiver<LiftRideEvent>>,
    state: DispatchState,
    metrics: Mutex<Vec<RequestMetrics>>,
    total_requests: u64,
}

/// Result of a completed dispatch run
#[derive(Debug)]
pub struct DispatchReport {
    pub requests_sent: u64,
    pub failed_requests: u64,
    pub wall_time: Duration,
    /// One row per dispatch attempt, in completion order
    pub metrics: Vec<RequestMetrics>,
}

/// Worker pool driving dispatch attempts against the budget
pub struct AdaptiveDispatcher<D> {
    config: DispatcherConfig,
    target: Arc<D>,
}

impl<D: RideDispatcher + 'static> AdaptiveDispatcher<D> {
    pub fn new(config: DispatcherConfig, target: Arc<D>) -> Self {
        Self { config, target }
    }

    /// Drain the queue until the budget is reached or production ends.
    ///
    /// Individual event failures are counted, never fatal to the run.
    pub async fn run(&self, queue: mpsc::Receiver<LiftRideEvent>) -> DispatchReport {
        let context = Arc::new(WorkerContext {
            target: self.target.clone(),
            retry: RetryExecutor::new(RetryPolicy::for_dispatch(self.config.max_retries)),
            queue: Mutex::new(queue),
            state: DispatchState::default(),
            metrics: Mutex::new(Vec::new()),
            total_requests: self.config.total_requests,
        });
        let live_cap = Arc::new(Semaphore::new(
            self.config.max_workers + self.config.worker_overrun,
        ));
        let mut workers = JoinSet::new();
        let started = Instant::now();

        info!(
            total = self.config.total_requests,
            initial_workers = self.config.initial_workers,
            max_workers = self.config.max_workers,
            "dispatch started"
        );

        for _ in 0..self.config.initial_workers {
            Self::submit_worker(
                &mut workers,
                &context,
                &live_cap,
                self.config.initial_batch,
            )
            .await;
        }

        // Replace finished workers until the budget is reached: each
        // completion frees a slot, then the pool refills to the ceiling.
        while context.state.requests_sent() < self.config.total_requests
            && !context.state.queue_exhausted()
        {
            if workers.join_next().await.is_none() {
                break;
            }
            while context.state.active_workers() < self.config.max_workers
                && context.state.requests_sent() < self.config.total_requests
                && !context.state.queue_exhausted()
            {
                Self::submit_worker(&mut workers, &context, &live_cap, self.config.steady_batch)
                    .await;
            }
        }

        // Budget reached: in-flight workers observe the counter and stop
        // early without completing their remaining slots.
        while workers.join_next().await.is_some() {}

        let wall_time = started.elapsed();
        let requests_sent = context.state.requests_sent();
        let failed_requests = context.state.failed_requests.load(Ordering::SeqCst);
        let metrics = std::mem::take(&mut *context.metrics.lock().await);

        info!(
            requests_sent,
            failed_requests,
            wall_time_ms = wall_time.as_millis() as u64,
            "dispatch finished"
        );

        DispatchReport {
            requests_sent,
            failed_requests,
            wall_time,
            metrics,
        }
    }

    /// Submit one worker; blocks the submitter while the live-worker cap
    /// is saturated.
    async fn submit_worker(
        workers: &mut JoinSet<()>,
        context: &Arc<WorkerContext<D>>,
        live_cap: &Arc<Semaphore>,
        batch_size: usize,
    ) {
        let permit = match live_cap.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                error!("worker cap semaphore closed");
                return;
            }
        };
        context.state.active_workers.fetch_add(1, Ordering::SeqCst);

        let context = context.clone();
        workers.spawn(async move {
            let _permit = permit;
            Self::worker_loop(&context, batch_size).await;
            context.state.active_workers.fetch_sub(1, Ordering::SeqCst);
        });
    }

    async fn worker_loop(context: &WorkerContext<D>, batch_size: usize) {
        for _ in 0..batch_size {
            // Reserve one attempt against the budget before pulling the
            // event; overshoot from racing workers is handed back.
            let ticket = context.state.requests_sent.fetch_add(1, Ordering::SeqCst);
            if ticket >= context.total_requests {
                context.state.requests_sent.fetch_sub(1, Ordering::SeqCst);
                break;
            }

            let event = { context.queue.lock().await.recv().await };
            let Some(event) = event else {
                context.state.requests_sent.fetch_sub(1, Ordering::SeqCst);
                context.state.queue_exhausted.store(true, Ordering::SeqCst);
                break;
            };

            let start_time = Utc::now();
            let clock = Instant::now();
            let outcome = context
                .retry
                .execute(|_| context.target.dispatch(&event))
                .await;
            let latency_ms = clock.elapsed().as_millis() as u64;

            let response_code = match &outcome.result {
                Ok(code) => *code,
                Err(err) => err.status().unwrap_or(0),
            };
            context.metrics.lock().await.push(RequestMetrics::new(
                start_time,
                RequestKind::Post,
                latency_ms,
                response_code,
            ));

            if !outcome.is_success() {
                context.state.failed_requests.fetch_add(1, Ordering::SeqCst);
                warn!(
                    skier_id = event.skier_id,
                    attempts = outcome.attempts,
                    response_code,
                    "dispatch failed after retries"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slopestream_types::PipelineError;

    /// Target that succeeds, optionally failing specific skier ids
    struct FakeTarget {
        attempts: AtomicU64,
        fail_skier: Option<u32>,
        transient_until_attempt: AtomicU64,
    }

    impl FakeTarget {
        fn always_ok() -> Self {
            Self {
                attempts: AtomicU64::new(0),
                fail_skier: None,
                transient_until_attempt: AtomicU64::new(0),
            }
        }

        fn failing_skier(skier_id: u32) -> Self {
            Self {
                fail_skier: Some(skier_id),
                ..Self::always_ok()
            }
        }
    }

    #[async_trait]
    impl RideDispatcher for FakeTarget {
        async fn dispatch(&self, event: &LiftRideEvent) -> Result<u16> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_skier == Some(event.skier_id) {
                return Err(PipelineError::from_status(500));
            }
            if attempt <= self.transient_until_attempt.load(Ordering::SeqCst) {
                return Err(PipelineError::from_status(503));
            }
            Ok(201)
        }
    }

    fn event(skier_id: u32) -> LiftRideEvent {
        LiftRideEvent::new(skier_id, 1, 2024, 3, 100, 4).unwrap()
    }

    fn small_config(total: u64) -> DispatcherConfig {
        DispatcherConfig {
            total_requests: total,
            initial_workers: 4,
            max_workers: 8,
            initial_batch: 5,
            steady_batch: 7,
            max_retries: 2,
            worker_overrun: 2,
        }
    }

    #[tokio::test]
    async fn test_budget_is_respected_with_events_left_over() {
        let (tx, rx) = mpsc::channel(500);
        for i in 1..=300u32 {
            tx.send(event(i)).await.unwrap();
        }
        // Producer stays alive: the queue still holds events at the end.

        let target = Arc::new(FakeTarget::always_ok());
        let dispatcher = AdaptiveDispatcher::new(small_config(100), target.clone());
        let report = dispatcher.run(rx).await;

        assert_eq!(report.requests_sent, 100);
        assert_eq!(report.failed_requests, 0);
        assert_eq!(report.metrics.len(), 100);
        assert_eq!(target.attempts.load(Ordering::SeqCst), 100);
        drop(tx);
    }

    #[tokio::test]
    async fn test_stops_when_production_ends_short_of_budget() {
        let (tx, rx) = mpsc::channel(100);
        for i in 1..=40u32 {
            tx.send(event(i)).await.unwrap();
        }
        drop(tx);

        let dispatcher =
            AdaptiveDispatcher::new(small_config(1000), Arc::new(FakeTarget::always_ok()));
        let report = dispatcher.run(rx).await;

        assert_eq!(report.requests_sent, 40);
        assert_eq!(report.metrics.len(), 40);
    }

    #[tokio::test]
    async fn test_individual_failures_do_not_abort_the_run() {
        let (tx, rx) = mpsc::channel(100);
        for i in 1..=50u32 {
            tx.send(event(i)).await.unwrap();
        }
        drop(tx);

        // Skier 7 always fails with a transient status; retries exhaust.
        let dispatcher =
            AdaptiveDispatcher::new(small_config(50), Arc::new(FakeTarget::failing_skier(7)));
        let report = dispatcher.run(rx).await;

        assert_eq!(report.requests_sent, 50);
        assert_eq!(report.failed_requests, 1);
        assert_eq!(report.metrics.len(), 50);
        let failed_rows = report
            .metrics
            .iter()
            .filter(|m| m.response_code == 500)
            .count();
        assert_eq!(failed_rows, 1);
    }

    #[tokio::test]
    async fn test_one_metrics_row_per_event_regardless_of_retries() {
        let (tx, rx) = mpsc::channel(100);
        for i in 1..=20u32 {
            tx.send(event(i)).await.unwrap();
        }
        drop(tx);

        let target = Arc::new(FakeTarget::always_ok());
        // First 10 attempts fail transiently, forcing retries on early events.
        target.transient_until_attempt.store(10, Ordering::SeqCst);

        let dispatcher = AdaptiveDispatcher::new(small_config(20), target.clone());
        let report = dispatcher.run(rx).await;

        assert_eq!(report.metrics.len(), 20);
        assert_eq!(report.requests_sent, 20);
        // More attempts than events, but still one row per event.
        assert!(target.attempts.load(Ordering::SeqCst) > 20);
    }
}
