// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Background loops: the worker pool draining the task queue, the retry
//! pump feeding due retries back in, and the periodic reconciliation
//! scan.

use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::{EngineState, SyncEngine};
use crate::executor::ExecOutcome;
use crate::metrics;
use crate::reconcile::ScanScope;
use crate::remote::client::RemoteError;
use crate::scheduler::ScheduleOutcome;
use crate::store::traits::{AuditEntry, SyncStateStore};
use crate::task::{Direction, SyncTask};

/// Pump sleep when no retry is scheduled.
const PUMP_IDLE: Duration = Duration::from_secs(60);

fn direction_label(direction: Direction) -> &'static str {
    match direction {
        Direction::Push => "push",
        Direction::Pull => "pull",
    }
}

impl SyncEngine {
    pub(super) async fn worker_loop(&self, worker_id: usize) {
        debug!(worker_id, "worker started");
        while let Some(task) = self.queue.pop().await {
            let started = Instant::now();
            self.run_task(&task).await;
            metrics::record_task_duration(direction_label(task.direction), started.elapsed());
            self.queue.complete(&task.entity_id).await;
            self.refresh_gauges().await;
        }
        debug!(worker_id, "worker exiting");
    }

    /// Execute one attempt and apply the outcome's status transition.
    ///
    /// Every path lands the entity in exactly one of SYNCED (the
    /// executor wrote it), PENDING (a queued healing task owns the
    /// rest), FAILED, or DEAD.
    async fn run_task(&self, task: &SyncTask) {
        let outcome = self.executor.execute(task).await;
        metrics::record_task(direction_label(task.direction), outcome.as_str());
        match outcome {
            ExecOutcome::Done => {}
            ExecOutcome::Retry(cause) => self.schedule_retry(task, cause).await,
            ExecOutcome::Fault(detail) => {
                // Faults are bad inputs, not bad luck. Retrying cannot
                // fix them, so nothing is scheduled; the entity sits
                // FAILED until an operator or a fresh change event
                // re-triggers it.
                warn!(entity_id = %task.entity_id, %detail, "task fault");
                self.mark_failed_logging(&task.entity_id, &detail).await;
            }
            ExecOutcome::Dead(detail) => self.dead_letter(task, &detail).await,
        }
    }

    async fn schedule_retry(&self, task: &SyncTask, cause: RemoteError) {
        let retry_after = match &cause {
            RemoteError::RateLimited { retry_after } => *retry_after,
            _ => None,
        };
        self.mark_failed_logging(&task.entity_id, &cause.to_string())
            .await;
        match self.scheduler.schedule(task.clone(), retry_after).await {
            ScheduleOutcome::Scheduled(due_at) => {
                metrics::record_retry_scheduled();
                debug!(
                    entity_id = %task.entity_id,
                    attempt = task.attempt,
                    due_at = %due_at,
                    "attempt failed, retry scheduled"
                );
            }
            ScheduleOutcome::Exhausted => {
                let detail = format!(
                    "retries exhausted after {} attempts: {}",
                    task.attempt + 1,
                    cause
                );
                self.dead_letter(task, &detail).await;
            }
        }
    }

    async fn dead_letter(&self, task: &SyncTask, detail: &str) {
        error!(
            entity_id = %task.entity_id,
            attempts = task.attempt + 1,
            %detail,
            "dead-lettering entity"
        );
        if let Err(e) = self.state_store.mark_dead(&task.entity_id, detail).await {
            error!(entity_id = %task.entity_id, error = %e, "could not mark entity dead");
        }
        let entry = AuditEntry::dead_letter(task.entity_id.as_str(), detail);
        if let Err(e) = self.state_store.append_audit(&entry).await {
            warn!(entity_id = %task.entity_id, error = %e, "could not append dead-letter audit entry");
        }
        metrics::record_dead_letter();
    }

    async fn mark_failed_logging(&self, entity_id: &str, detail: &str) {
        if let Err(e) = self.state_store.mark_failed(entity_id, detail).await {
            error!(entity_id = %entity_id, error = %e, "could not mark entity failed");
        }
    }

    pub(super) async fn refresh_gauges(&self) {
        let stats = self.queue.stats().await;
        metrics::set_queue_depth(stats.depth());
        metrics::set_in_flight(stats.in_flight);
        metrics::set_scheduled_retries(self.scheduler.pending().await);
    }

    /// Moves due retries from the scheduler back onto the task queue.
    ///
    /// Sleeps until the earliest due time; a newly scheduled retry
    /// wakes it early so a sooner deadline is never slept through.
    pub(super) async fn retry_pump(&self) {
        let mut state_rx = self.state_receiver();
        debug!("retry pump started");
        loop {
            while let Some(task) = self.scheduler.next_due().await {
                // FAILED -> PENDING: the task is in the queue again
                if let Err(e) = self.state_store.mark_pending(&task.entity_id).await {
                    warn!(entity_id = %task.entity_id, error = %e, "could not mark retried entity pending");
                }
                debug!(entity_id = %task.entity_id, attempt = task.attempt, "retry due, re-queued");
                self.queue.push(task).await;
            }
            let sleep_for = self.scheduler.time_to_next().await.unwrap_or(PUMP_IDLE);
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = self.scheduler.notified() => {}
                changed = state_rx.changed() => {
                    if changed.is_err()
                        || matches!(
                            *state_rx.borrow_and_update(),
                            EngineState::ShuttingDown | EngineState::Stopped
                        )
                    {
                        break;
                    }
                }
            }
        }
        debug!("retry pump stopped");
    }

    /// Runs a full drift scan every `scan_interval_secs`.
    pub(super) async fn scan_loop(&self) {
        let mut state_rx = self.state_receiver();
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.scan_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick fires immediately; skip it so startup does not
        // sweep the whole table while webhooks are already arriving
        interval.tick().await;
        info!(
            every_secs = self.config.scan_interval_secs,
            "reconciliation loop started"
        );
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.run_scan(ScanScope::Full).await;
                    debug!(
                        checked = report.total_checked,
                        discrepancies = report.discrepancies.len(),
                        complete = report.complete,
                        "periodic scan finished"
                    );
                }
                changed = state_rx.changed() => {
                    if changed.is_err()
                        || matches!(
                            *state_rx.borrow_and_update(),
                            EngineState::ShuttingDown | EngineState::Stopped
                        )
                    {
                        break;
                    }
                }
            }
        }
        debug!("reconciliation loop stopped");
    }
}
