//! rdt-scheduler
//!
//! The tick scheduler: fires the detection orchestrator at a fixed cadence,
//! enforces non-reentrancy with an in-flight flag, records cumulative
//! metrics, and survives per-tick errors without terminating.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use cron::Schedule;
use rdt_clients::ClaimsOracleClient;
use rdt_orchestrator::DetectionOrchestrator;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_CRON_EXPRESSION: &str = "*/5 * * * *";

/// Parses a 5-field (minute-level, no seconds) cron expression the way the
/// rest of the configuration surface documents it, by prefixing a `0`
/// seconds field for the underlying 6/7-field `cron` crate parser.
pub fn parse_cron(expr: &str) -> Result<Schedule> {
    let normalized = if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    Schedule::from_str(&normalized).with_context(|| format!("invalid cron expression: {expr}"))
}

/// Cumulative counters exposed to the health/metrics surface. Snapshotted by
/// `SchedulerMetrics::snapshot`; updated atomically so `Execute` never blocks
/// a concurrent reader.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    executions: AtomicU64,
    journeys_processed: AtomicU64,
    errors: AtomicU64,
    last_duration_ms: AtomicU64,
    skipped_reentrant: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerMetricsSnapshot {
    pub executions: u64,
    pub journeys_processed: u64,
    pub errors: u64,
    pub last_duration_ms: u64,
    pub skipped_reentrant: u64,
}

impl SchedulerMetrics {
    pub fn snapshot(&self) -> SchedulerMetricsSnapshot {
        SchedulerMetricsSnapshot {
            executions: self.executions.load(Ordering::Relaxed),
            journeys_processed: self.journeys_processed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            last_duration_ms: self.last_duration_ms.load(Ordering::Relaxed),
            skipped_reentrant: self.skipped_reentrant.load(Ordering::Relaxed),
        }
    }
}

/// Drives `DetectionOrchestrator::run_tick` on a fixed cadence.
///
/// `Start` is idempotent and fires one tick immediately before installing the
/// repeating timer. `Stop` is idempotent and waits for an in-flight tick to
/// drain before returning. Overlapping ticks within one process are
/// prevented by `in_flight`; the orchestrator's per-journey transactions are
/// the safety net across processes.
pub struct TickScheduler<C: ClaimsOracleClient + 'static> {
    orchestrator: Arc<DetectionOrchestrator<C>>,
    cron_expression: String,
    metrics: Arc<SchedulerMetrics>,
    in_flight: Arc<AtomicBool>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<C: ClaimsOracleClient + 'static> TickScheduler<C> {
    pub fn new(orchestrator: Arc<DetectionOrchestrator<C>>, cron_expression: impl Into<String>) -> Self {
        TickScheduler {
            orchestrator,
            cron_expression: cron_expression.into(),
            metrics: Arc::new(SchedulerMetrics::default()),
            in_flight: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    pub fn metrics(&self) -> SchedulerMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.cancel_child_alive()
    }

    fn cancel_child_alive(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Installs the repeating timer and fires one tick immediately. A second
    /// call while already started is a no-op.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut guard = self.handle.lock().await;
        if guard.is_some() {
            tracing::info!("scheduler start: already running, no-op");
            return Ok(());
        }

        let schedule = parse_cron(&self.cron_expression)?;
        let scheduler = Arc::clone(self);
        let cancel = self.cancel.clone();

        let task = tokio::spawn(async move {
            // Fire one tick immediately on start, per spec.
            scheduler.execute().await;

            loop {
                let sleep_for = match schedule.upcoming(Utc).next() {
                    Some(next) => (next - Utc::now()).to_std().unwrap_or(std::time::Duration::from_secs(1)),
                    None => std::time::Duration::from_secs(60),
                };

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(sleep_for) => {
                        scheduler.execute().await;
                    }
                }
            }
        });

        *guard = Some(task);
        tracing::info!(cron = %self.cron_expression, "scheduler started");
        Ok(())
    }

    /// Cancels the timer and waits for an in-flight tick to drain. A second
    /// call while already stopped is a no-op.
    pub async fn stop(self: &Arc<Self>) {
        let mut guard = self.handle.lock().await;
        let Some(task) = guard.take() else {
            tracing::info!("scheduler stop: already stopped, no-op");
            return;
        };
        self.cancel.cancel();
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "scheduler task join failed during stop");
        }
        tracing::info!("scheduler stopped");
    }

    /// Runs one tick, guarded by the in-flight flag. Orchestrator errors are
    /// captured, counted, and logged; they never propagate out of `execute`.
    async fn execute(&self) {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            self.metrics.skipped_reentrant.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("tick skipped: previous tick still in flight");
            return;
        }

        let now = Utc::now();
        let result = self.orchestrator.run_tick(now).await;
        self.in_flight.store(false, Ordering::Release);

        self.metrics.executions.fetch_add(1, Ordering::Relaxed);
        match result {
            Ok(report) => {
                self.metrics.journeys_processed.fetch_add(report.journeys_checked as u64, Ordering::Relaxed);
                self.metrics.last_duration_ms.store(report.duration_ms, Ordering::Relaxed);
                tracing::info!(
                    journeys_checked = report.journeys_checked,
                    delays_detected = report.delays_detected,
                    claims_triggered = report.claims_triggered,
                    duration_ms = report.duration_ms,
                    "tick completed"
                );
            }
            Err(e) => {
                self.metrics.errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!(error = %e, "tick failed; scheduler continues");
            }
        }
    }
}
