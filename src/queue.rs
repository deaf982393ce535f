// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded-concurrency task intake with per-entity single flight.
//!
//! Workers pull from a shared FIFO of ready tasks. At most one task per
//! entity is ever ready or executing; later tasks for the same entity
//! park in arrival order and are promoted one at a time as each
//! execution completes. Two workers can therefore never interleave
//! writes for the same entity, while tasks for different entities run
//! in parallel.

use std::collections::{HashMap, HashSet, VecDeque};

use tokio::sync::{Mutex, Notify};

use crate::task::SyncTask;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    /// Tasks a worker could pick up right now.
    pub ready: usize,
    /// Tasks parked behind an in-flight task for the same entity.
    pub parked: usize,
    /// Entities currently being executed.
    pub in_flight: usize,
}

impl QueueStats {
    /// All tasks the queue is holding, executing ones excluded.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.ready + self.parked
    }
}

#[derive(Default)]
struct QueueInner {
    ready: VecDeque<SyncTask>,
    /// Entities with a task in `ready`. Guards the one-ready-per-entity
    /// invariant.
    queued: HashSet<String>,
    parked: HashMap<String, VecDeque<SyncTask>>,
    in_flight: HashSet<String>,
    closed: bool,
}

/// Shared task queue.
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
        }
    }

    /// Enqueue a task. If the entity already has a ready or executing
    /// task, this one parks behind it. Tasks pushed after [`close`] are
    /// dropped.
    ///
    /// [`close`]: TaskQueue::close
    pub async fn push(&self, task: SyncTask) {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return;
        }
        let entity_id = task.entity_id.clone();
        if inner.in_flight.contains(&entity_id) || inner.queued.contains(&entity_id) {
            inner.parked.entry(entity_id).or_default().push_back(task);
        } else {
            inner.queued.insert(entity_id);
            inner.ready.push_back(task);
            self.notify.notify_one();
        }
    }

    /// Wait for the next ready task and claim its entity. Returns
    /// `None` once the queue is closed and drained of ready tasks.
    pub async fn pop(&self) -> Option<SyncTask> {
        loop {
            // created before the check so a close() racing with the
            // lock release still wakes this iteration
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().await;
                if let Some(task) = inner.ready.pop_front() {
                    inner.queued.remove(&task.entity_id);
                    inner.in_flight.insert(task.entity_id.clone());
                    // notify_one stores at most one permit, so chain the
                    // wakeup while more work remains
                    if !inner.ready.is_empty() {
                        self.notify.notify_one();
                    }
                    return Some(task);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Release an entity after executing its task, promoting the next
    /// parked task for that entity, if any.
    pub async fn complete(&self, entity_id: &str) {
        let mut inner = self.inner.lock().await;
        inner.in_flight.remove(entity_id);
        let next = match inner.parked.get_mut(entity_id) {
            Some(waiting) => {
                let next = waiting.pop_front();
                if waiting.is_empty() {
                    inner.parked.remove(entity_id);
                }
                next
            }
            None => None,
        };
        if let Some(task) = next {
            inner.queued.insert(task.entity_id.clone());
            inner.ready.push_back(task);
            self.notify.notify_one();
        }
    }

    /// Stop intake and wake every blocked `pop`. Ready tasks already in
    /// the queue are still handed out so workers can finish them.
    pub async fn close(&self) {
        self.inner.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    pub async fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().await;
        QueueStats {
            ready: inner.ready.len(),
            parked: inner.parked.values().map(VecDeque::len).sum(),
            in_flight: inner.in_flight.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Direction, TaskReason};
    use std::time::Duration;

    fn task(entity_id: &str) -> SyncTask {
        SyncTask::new(entity_id, Direction::Push, TaskReason::ManualTrigger)
    }

    #[tokio::test]
    async fn test_fifo_across_entities() {
        let queue = TaskQueue::new();
        queue.push(task("A")).await;
        queue.push(task("B")).await;
        assert_eq!(queue.pop().await.unwrap().entity_id, "A");
        assert_eq!(queue.pop().await.unwrap().entity_id, "B");
    }

    #[tokio::test]
    async fn test_second_task_for_entity_parks_until_complete() {
        let queue = TaskQueue::new();
        queue.push(task("A")).await;
        queue.push(task("A")).await;

        let first = queue.pop().await.unwrap();
        assert_eq!(first.entity_id, "A");

        // the parked task must not surface while A is in flight
        let blocked = tokio::time::timeout(Duration::from_millis(20), queue.pop()).await;
        assert!(blocked.is_err());

        queue.complete("A").await;
        let second = tokio::time::timeout(Duration::from_millis(100), queue.pop())
            .await
            .expect("promoted after complete")
            .unwrap();
        assert_eq!(second.entity_id, "A");
    }

    #[tokio::test]
    async fn test_parked_tasks_keep_arrival_order() {
        let queue = TaskQueue::new();
        queue.push(task("A")).await;
        let mut t1 = task("A");
        t1.attempt = 1;
        let mut t2 = task("A");
        t2.attempt = 2;
        queue.push(t1).await;
        queue.push(t2).await;

        queue.pop().await.unwrap();
        queue.complete("A").await;
        assert_eq!(queue.pop().await.unwrap().attempt, 1);
        queue.complete("A").await;
        assert_eq!(queue.pop().await.unwrap().attempt, 2);
    }

    #[tokio::test]
    async fn test_other_entities_flow_while_one_is_blocked() {
        let queue = TaskQueue::new();
        queue.push(task("A")).await;
        queue.push(task("A")).await;
        queue.push(task("B")).await;

        assert_eq!(queue.pop().await.unwrap().entity_id, "A");
        // B is unrelated and flows past A's parked task
        assert_eq!(queue.pop().await.unwrap().entity_id, "B");
    }

    #[tokio::test]
    async fn test_close_unblocks_waiting_pop() {
        let queue = std::sync::Arc::new(TaskQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close().await;
        assert!(waiter.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_push_after_close_is_dropped() {
        let queue = TaskQueue::new();
        queue.close().await;
        queue.push(task("A")).await;
        assert_eq!(queue.stats().await.depth(), 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let queue = TaskQueue::new();
        queue.push(task("A")).await;
        queue.push(task("A")).await;
        queue.push(task("B")).await;
        let stats = queue.stats().await;
        assert_eq!(stats.ready, 2);
        assert_eq!(stats.parked, 1);
        assert_eq!(stats.in_flight, 0);

        queue.pop().await.unwrap();
        let stats = queue.stats().await;
        assert_eq!(stats.ready, 1);
        assert_eq!(stats.in_flight, 1);
        assert_eq!(stats.depth(), 2);
    }
}
