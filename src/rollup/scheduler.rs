//! Rollup scheduler: fires a run at startup and then on every tick
//!
//! Runs never overlap: the loop awaits each run before taking the next tick,
//! and any other caller of [`RollupService::refresh`] queues on the service's
//! run lock. Failures are logged and the next tick retries.

use super::engine::RollupService;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Run counts, returned when the scheduler stops
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSummary {
    pub runs: u64,
    pub failures: u64,
}

/// Run the scheduler until `shutdown` flips to true (or its sender drops)
///
/// A run already in progress when shutdown is requested is allowed to finish.
pub async fn rollup_scheduler_task(
    service: Arc<RollupService>,
    mut shutdown: watch::Receiver<bool>,
) -> SchedulerSummary {
    let tick_interval = service.config().tick_interval();
    log::info!(
        "⏰ Starting rollup scheduler (interval: {}ms, deadline: {}ms)",
        tick_interval.as_millis(),
        service.config().run_deadline().as_millis()
    );

    let mut timer = interval(tick_interval);
    // A run that outlasts the interval pushes the next tick back instead of
    // bunching up catch-up runs.
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut summary = SchedulerSummary::default();

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            // First tick completes immediately: one run at startup
            _ = timer.tick() => {
                summary.runs += 1;
                match service.refresh().await {
                    Ok(report) => {
                        log::debug!(
                            "Rollup run #{} report: {}",
                            summary.runs,
                            serde_json::to_string(&report).unwrap_or_default()
                        );
                    }
                    Err(e) if e.is_deadline() => {
                        summary.failures += 1;
                        log::warn!("⏱️  Rollup run #{} cut short: {}", summary.runs, e);
                    }
                    Err(e) => {
                        summary.failures += 1;
                        log::error!("❌ Rollup run #{} failed: {}", summary.runs, e);
                    }
                }
            }

            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    log::info!(
        "✅ Rollup scheduler stopped ({} runs, {} failed)",
        summary.runs,
        summary.failures
    );
    summary
}

/// Handle to a spawned scheduler task
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<SchedulerSummary>,
}

impl SchedulerHandle {
    /// Spawn [`rollup_scheduler_task`] on the current runtime
    pub fn spawn(service: Arc<RollupService>) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(rollup_scheduler_task(service, rx));
        Self { shutdown, task }
    }

    /// Request shutdown and wait for the in-flight run (if any) to finish
    pub async fn shutdown(self) -> SchedulerSummary {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(summary) => summary,
            Err(e) => {
                log::error!("❌ Rollup scheduler task failed: {}", e);
                SchedulerSummary::default()
            }
        }
    }
}
