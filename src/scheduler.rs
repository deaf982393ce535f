// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry scheduling: exponential backoff with jitter, a hard attempt
//! ceiling, and a delayed-task heap.
//!
//! Failed tasks are never re-queued directly. They sit in a min-heap
//! keyed by due time, and the engine's pump moves them back onto the
//! task queue once due. The pump sleeps until the earliest due time or
//! until a new entry arrives; nothing here polls in a tight loop.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::futures::Notified;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};

use crate::config::SyncEngineConfig;
use crate::task::SyncTask;

/// Backoff policy for failed sync tasks.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the second attempt; doubles from there.
    pub base: Duration,
    /// Ceiling on any single delay.
    pub cap: Duration,
    /// Fraction of the delay used as symmetric jitter (0.0 to 1.0).
    pub jitter: f64,
    /// Total executions allowed before the entity is dead-lettered.
    pub max_attempts: u32,
}

impl BackoffPolicy {
    #[must_use]
    pub fn from_config(config: &SyncEngineConfig) -> Self {
        Self {
            base: Duration::from_millis(config.retry_base_ms),
            cap: Duration::from_millis(config.retry_cap_ms),
            jitter: config.retry_jitter,
            max_attempts: config.max_attempts,
        }
    }

    /// Fast policy for unit tests.
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            base: Duration::from_millis(4),
            cap: Duration::from_millis(32),
            jitter: 0.0,
            max_attempts: 3,
        }
    }

    /// Nominal delay after a failure of the given zero-based attempt:
    /// `base * 2^attempt`, capped, with jitter applied.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(31);
        let nominal = self
            .base
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.cap);
        if self.jitter <= 0.0 {
            return nominal;
        }
        let spread = nominal.mul_f64(self.jitter);
        let low = nominal.saturating_sub(spread);
        let span_ms = (2 * spread.as_millis()) as u64;
        if span_ms == 0 {
            return nominal;
        }
        low + Duration::from_millis(rand::thread_rng().gen_range(0..=span_ms))
    }
}

/// Decision for a task that just failed retryably.
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleOutcome {
    /// Parked in the delayed heap; due at the contained time.
    Scheduled(DateTime<Utc>),
    /// The attempt ceiling was reached. The caller must dead-letter
    /// the entity; nothing was queued.
    Exhausted,
}

struct DelayedEntry {
    due_at_ms: i64,
    /// Tie-break so equal due times stay FIFO.
    seq: u64,
    task: SyncTask,
}

impl PartialEq for DelayedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due_at_ms == other.due_at_ms && self.seq == other.seq
    }
}

impl Eq for DelayedEntry {}

impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.due_at_ms, self.seq).cmp(&(other.due_at_ms, other.seq))
    }
}

/// Holds not-yet-due retry tasks.
pub struct RetryScheduler {
    policy: BackoffPolicy,
    delayed: Mutex<BinaryHeap<Reverse<DelayedEntry>>>,
    notify: Notify,
    seq: AtomicU64,
}

impl RetryScheduler {
    #[must_use]
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            delayed: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            seq: AtomicU64::new(0),
        }
    }

    /// Decide what happens to a task whose attempt just failed
    /// retryably. A rate-limit hint from the provider overrides the
    /// exponential delay for this one re-schedule.
    pub async fn schedule(
        &self,
        task: SyncTask,
        retry_after: Option<Duration>,
    ) -> ScheduleOutcome {
        let completed_attempts = task.attempt + 1;
        if completed_attempts >= self.policy.max_attempts {
            info!(
                entity_id = %task.entity_id,
                attempts = completed_attempts,
                "retry budget exhausted"
            );
            return ScheduleOutcome::Exhausted;
        }
        let delay = retry_after.unwrap_or_else(|| self.policy.delay_for(task.attempt));
        let due_at = Utc::now()
            + chrono::Duration::milliseconds(delay.as_millis().min(i64::MAX as u128) as i64);
        let entry = DelayedEntry {
            due_at_ms: due_at.timestamp_millis(),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            task: SyncTask {
                attempt: completed_attempts,
                next_attempt_at: due_at,
                ..task
            },
        };
        debug!(
            entity_id = %entry.task.entity_id,
            attempt = entry.task.attempt,
            delay_ms = delay.as_millis() as u64,
            hinted = retry_after.is_some(),
            "retry scheduled"
        );
        self.delayed.lock().await.push(Reverse(entry));
        self.notify.notify_one();
        ScheduleOutcome::Scheduled(due_at)
    }

    /// Pop the earliest task whose due time has passed. Non-blocking.
    pub async fn next_due(&self) -> Option<SyncTask> {
        let mut delayed = self.delayed.lock().await;
        let now = Utc::now().timestamp_millis();
        if delayed
            .peek()
            .map_or(false, |Reverse(entry)| entry.due_at_ms <= now)
        {
            return delayed.pop().map(|Reverse(entry)| entry.task);
        }
        None
    }

    /// Time until the earliest scheduled task, if any. Zero when one is
    /// already due.
    pub async fn time_to_next(&self) -> Option<Duration> {
        let delayed = self.delayed.lock().await;
        delayed.peek().map(|Reverse(entry)| {
            let now = Utc::now().timestamp_millis();
            Duration::from_millis(entry.due_at_ms.saturating_sub(now).max(0) as u64)
        })
    }

    /// Wakes when a new entry lands, so the pump can re-evaluate its
    /// sleep.
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    pub async fn pending(&self) -> usize {
        self.delayed.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Direction, TaskReason};

    fn task(attempt: u32) -> SyncTask {
        let mut task = SyncTask::new("P1", Direction::Push, TaskReason::Webhook);
        task.attempt = attempt;
        task
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = BackoffPolicy {
            base: Duration::from_secs(2),
            cap: Duration::from_secs(600),
            jitter: 0.0,
            max_attempts: 6,
        };
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(2), Duration::from_secs(8));
        assert_eq!(policy.delay_for(8), Duration::from_secs(512));
        // capped from here on
        assert_eq!(policy.delay_for(9), Duration::from_secs(600));
        assert_eq!(policy.delay_for(30), Duration::from_secs(600));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(1000),
            cap: Duration::from_secs(600),
            jitter: 0.2,
            max_attempts: 6,
        };
        for _ in 0..200 {
            let delay = policy.delay_for(0);
            assert!(delay >= Duration::from_millis(800), "delay {delay:?} under band");
            assert!(delay <= Duration::from_millis(1200), "delay {delay:?} over band");
        }
    }

    #[tokio::test]
    async fn test_schedule_bumps_attempt() {
        let scheduler = RetryScheduler::new(BackoffPolicy::test());
        let outcome = scheduler.schedule(task(0), None).await;
        assert!(matches!(outcome, ScheduleOutcome::Scheduled(_)));
        assert_eq!(scheduler.pending().await, 1);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let due = scheduler.next_due().await.expect("should be due");
        assert_eq!(due.attempt, 1);
    }

    #[tokio::test]
    async fn test_exhaustion_at_ceiling() {
        // max_attempts = 3: attempts 0 and 1 reschedule, attempt 2 exhausts
        let scheduler = RetryScheduler::new(BackoffPolicy::test());
        assert!(matches!(
            scheduler.schedule(task(0), None).await,
            ScheduleOutcome::Scheduled(_)
        ));
        assert!(matches!(
            scheduler.schedule(task(1), None).await,
            ScheduleOutcome::Scheduled(_)
        ));
        assert_eq!(
            scheduler.schedule(task(2), None).await,
            ScheduleOutcome::Exhausted
        );
        // the exhausted task was not queued
        assert_eq!(scheduler.pending().await, 2);
    }

    #[tokio::test]
    async fn test_rate_limit_hint_overrides_backoff() {
        let scheduler = RetryScheduler::new(BackoffPolicy::test());
        let before = Utc::now();
        let outcome = scheduler
            .schedule(task(0), Some(Duration::from_secs(30)))
            .await;
        let ScheduleOutcome::Scheduled(due_at) = outcome else {
            panic!("expected scheduled");
        };
        // policy delay would be ~4ms; the hint pushes it out 30s
        assert!(due_at - before >= chrono::Duration::seconds(29));
        assert!(scheduler.next_due().await.is_none());
        let wait = scheduler.time_to_next().await.unwrap();
        assert!(wait > Duration::from_secs(25));
    }

    #[tokio::test]
    async fn test_next_due_is_ordered_and_fifo_on_ties() {
        let scheduler = RetryScheduler::new(BackoffPolicy::test());
        let mut a = task(0);
        a.entity_id = "A".into();
        let mut b = task(0);
        b.entity_id = "B".into();
        scheduler.schedule(a, Some(Duration::from_millis(0))).await;
        scheduler.schedule(b, Some(Duration::from_millis(0))).await;

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(scheduler.next_due().await.unwrap().entity_id, "A");
        assert_eq!(scheduler.next_due().await.unwrap().entity_id, "B");
        assert!(scheduler.next_due().await.is_none());
    }

    #[tokio::test]
    async fn test_not_due_until_delay_elapses() {
        let scheduler = RetryScheduler::new(BackoffPolicy::test());
        scheduler
            .schedule(task(0), Some(Duration::from_millis(50)))
            .await;
        assert!(scheduler.next_due().await.is_none());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(scheduler.next_due().await.is_some());
    }
}
