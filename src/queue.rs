/* Copyright (c) 2026 The taskd Authors
 *
 * SPDX-License-Identifier: MIT
 */

//! The bridge between in-process tasks and the shared ring: serialization on
//! the way in, re-materialization on the way out, and the reorder pass that
//! lets a policy pick the next head.

use std::sync::Arc;

use super::common::Result;
use super::policy::Policy;
use super::shm::SharedQueue;
use super::task::Task;

/// Serializes tasks into the shared queue and back, and reorders the
/// pending set under a scheduling policy.
pub struct QueueManager {
    shm: Arc<SharedQueue>,
}

impl QueueManager {
    pub fn new(shm: Arc<SharedQueue>) -> QueueManager {
        QueueManager { shm }
    }

    /// Serializes `task` and enqueues it. Blocks while the ring is full.
    pub fn add_task(&self, task: &Task) -> Result<()> {
        self.shm.enqueue(&task.to_record())
    }

    /// Dequeues the head record and re-materializes it. Blocks while the
    /// ring is empty.
    pub fn next_task(&self) -> Result<Task> {
        Ok(Task::from_record(&self.shm.dequeue()?))
    }

    #[inline]
    pub fn task_count(&self) -> usize {
        self.shm.size()
    }

    /// One reorder pass: drain everything currently queued, let the policy
    /// refresh priorities, move its selection to the front, and put the
    /// whole set back. The queued multiset is preserved even when a step
    /// fails mid-pass; the first error is reported after re-enqueueing.
    pub fn reorder(&self, policy: &mut Policy) -> Result<()> {
        let mut tasks = Vec::with_capacity(self.shm.size());
        let mut first_error = None;

        while !self.shm.empty() {
            match self.next_task() {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    first_error = Some(e);
                    break;
                }
            }
        }

        if tasks.is_empty() {
            return first_error.map_or(Ok(()), Err);
        }

        for task in tasks.iter_mut() {
            policy.update_priority(task);
        }

        if let Ok(next) = policy.select(&tasks) {
            let chosen = tasks.remove(next);
            tasks.insert(0, chosen);
        }

        for task in tasks.iter() {
            if let Err(e) = self.add_task(task) {
                error!("failed to re-enqueue task {}: {}", task.id(), e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    static NEXT_QUEUE: AtomicUsize = AtomicUsize::new(0);

    fn manager(capacity: usize) -> QueueManager {
        let name = format!(
            "/taskd_qm_{}_{}",
            std::process::id(),
            NEXT_QUEUE.fetch_add(1, Ordering::Relaxed)
        );
        let mut shm = SharedQueue::new(&name, capacity).unwrap();
        shm.create().unwrap();
        QueueManager::new(Arc::new(shm))
    }

    #[test]
    fn static_priority_reorder_puts_the_winner_first() {
        let manager = manager(16);
        manager.add_task(&Task::new(1, "T1", 10).unwrap()).unwrap();
        manager.add_task(&Task::new(2, "T2", 5).unwrap()).unwrap();

        let mut policy = Policy::StaticPriority;
        manager.reorder(&mut policy).unwrap();
        assert_eq!(manager.next_task().unwrap().id(), 1);
        assert_eq!(manager.next_task().unwrap().id(), 2);
    }

    #[test]
    fn round_robin_visits_every_task() {
        let manager = manager(16);
        manager.add_task(&Task::new(1, "T1", 0).unwrap()).unwrap();
        manager.add_task(&Task::new(2, "T2", 0).unwrap()).unwrap();

        let mut policy = Policy::round_robin();
        let mut seen = Vec::new();
        for _ in 0..2 {
            manager.reorder(&mut policy).unwrap();
            seen.push(manager.next_task().unwrap().id());
        }
        seen.sort();
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn reorder_preserves_the_task_multiset() {
        let manager = manager(16);
        for id in 1..=5 {
            manager
                .add_task(&Task::cpu_intensive(id, Duration::from_millis(50)))
                .unwrap();
        }

        let mut policy = Policy::DynamicPriority;
        manager.reorder(&mut policy).unwrap();
        assert_eq!(manager.task_count(), 5);

        let mut ids = HashSet::new();
        while manager.task_count() > 0 {
            ids.insert(manager.next_task().unwrap().id());
        }
        assert_eq!(ids, (1..=5).collect::<HashSet<i32>>());
    }

    #[test]
    fn reorder_of_an_empty_queue_is_a_no_op() {
        let manager = manager(4);
        let mut policy = Policy::round_robin();
        manager.reorder(&mut policy).unwrap();
        assert_eq!(manager.task_count(), 0);
    }
}
