/* Copyright (c) 2026 The taskd Authors
 *
 * SPDX-License-Identifier: MIT
 */

//! The cooperative scheduler: two worker threads over one shared queue. The
//! reorderer periodically drains and re-prioritizes the pending set under
//! the active policy; the executor runs the head task for one quantum at a
//! time and re-enqueues survivors.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use spin::RwLock;

use super::common::{Error, Result};
use super::policy::Policy;
use super::queue::QueueManager;
use super::shm::SharedQueue;
use super::task::Task;

/// Quantum used until `set_quantum` says otherwise.
pub const DEFAULT_QUANTUM: Duration = Duration::from_millis(100);

/// How long the executor naps when the queue is empty.
const IDLE_SLEEP: Duration = Duration::from_millis(100);

/// Pause between reorder passes.
const REORDER_INTERVAL: Duration = Duration::from_millis(500);

/// Granularity at which the sleeping reorderer notices shutdown or a
/// freshly submitted task.
const REORDER_POLL: Duration = Duration::from_millis(50);

/// State shared between the submitting thread and both workers.
struct Inner {
    queue: QueueManager,
    shm: Arc<SharedQueue>,
    policy: RwLock<Policy>,
    quantum_ms: AtomicU64,
    running: AtomicBool,
    reorder_hint: AtomicBool,
}

/// Owns the shared queue and the two worker threads. `add` may be called
/// from any thread; `start` and `stop` belong to the submitting thread.
pub struct Scheduler {
    inner: Arc<Inner>,
    executor: Option<JoinHandle<()>>,
    reorderer: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(shm: Arc<SharedQueue>) -> Scheduler {
        Scheduler {
            inner: Arc::new(Inner {
                queue: QueueManager::new(shm.clone()),
                shm,
                policy: RwLock::new(Policy::default()),
                quantum_ms: AtomicU64::new(DEFAULT_QUANTUM.as_millis() as u64),
                running: AtomicBool::new(false),
                reorder_hint: AtomicBool::new(false),
            }),
            executor: None,
            reorderer: None,
        }
    }

    /// Spawns the executor and reorderer threads and flags the queue as
    /// actively scheduled. Calling `start` on a running scheduler is a
    /// no-op.
    pub fn start(&mut self) -> Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.inner.shm.set_scheduler_running(true) {
            self.inner.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let inner = self.inner.clone();
        match thread::Builder::new()
            .name("executor".to_string())
            .spawn(move || executor_loop(inner))
        {
            Ok(handle) => self.executor = Some(handle),
            Err(e) => {
                self.stop();
                return Err(Error::Process(format!("spawning executor: {}", e)));
            }
        }

        let inner = self.inner.clone();
        match thread::Builder::new()
            .name("reorderer".to_string())
            .spawn(move || reorderer_loop(inner))
        {
            Ok(handle) => self.reorderer = Some(handle),
            Err(e) => {
                self.stop();
                return Err(Error::Process(format!("spawning reorderer: {}", e)));
            }
        }

        info!(
            "scheduler started with policy {} and quantum {} ms",
            self.inner.policy.read().name(),
            self.inner.quantum_ms.load(Ordering::Relaxed)
        );
        Ok(())
    }

    /// Stops both workers and joins them. Must not be called from inside a
    /// worker thread. A worker blocked on an empty dequeue is woken through
    /// a sentinel token on the dequeue semaphore.
    pub fn stop(&mut self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Err(e) = self.inner.shm.set_scheduler_running(false) {
            error!("failed to clear scheduler flag: {}", e);
        }
        self.inner.shm.wake_consumers(2);

        for handle in self.executor.take().into_iter().chain(self.reorderer.take()) {
            if handle.join().is_err() {
                error!("scheduler worker panicked");
            }
        }
    }

    /// Serializes `task` into the shared queue and nudges the reorderer.
    /// Inherits `enqueue` blocking: a full ring stalls the caller until a
    /// slot frees up.
    pub fn add(&self, task: &Task) -> Result<()> {
        self.inner.queue.add_task(task)?;
        self.inner.reorder_hint.store(true, Ordering::SeqCst);
        debug!("queued task {} ({})", task.id(), task.description());
        Ok(())
    }

    pub fn set_policy(&self, policy: Policy) {
        info!("switching policy to {}", policy.name());
        *self.inner.policy.write() = policy;
    }

    /// Changes the execution quantum. Observed by the executor on its next
    /// iteration.
    pub fn set_quantum(&self, quantum: Duration) {
        self.inner
            .quantum_ms
            .store(quantum.as_millis() as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn task_count(&self) -> usize {
        self.inner.queue.task_count()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pops the head task and runs it for one quantum, re-queueing survivors.
/// Every failure is logged and the loop keeps going; a task whose `execute`
/// errors is dropped rather than re-enqueued so a broken task cannot
/// circulate forever.
fn executor_loop(inner: Arc<Inner>) {
    while inner.running.load(Ordering::SeqCst) {
        if inner.queue.task_count() == 0 {
            thread::sleep(IDLE_SLEEP);
            continue;
        }

        let mut task = match inner.queue.next_task() {
            Ok(task) => task,
            // Shutdown sentinel, or the reorderer drained the ring first.
            Err(Error::QueueEmpty) => continue,
            Err(e) => {
                error!("executor dequeue failed: {}", e);
                continue;
            }
        };

        if task.is_completed() {
            debug!("dropping already-completed task {}", task.id());
            continue;
        }

        let quantum = Duration::from_millis(inner.quantum_ms.load(Ordering::Relaxed));

        // A task whose whole budget fits inside the quantum runs to
        // completion in one go instead of paying another round trip.
        let budget = match task.total_time() {
            Some(total) if total < quantum => total,
            _ => quantum,
        };

        match task.execute(budget) {
            Ok(true) => info!("task {} completed", task.id()),
            Ok(false) => {
                if budget < quantum {
                    info!("task {} completed (ran out its budget)", task.id());
                } else if inner.running.load(Ordering::SeqCst) {
                    if let Err(e) = inner.queue.add_task(&task) {
                        error!("failed to re-enqueue task {}: {}", task.id(), e);
                    }
                }
            }
            Err(e) => error!("task {} failed, dropping it: {}", task.id(), e),
        }
    }
}

/// Periodically drains the queue, refreshes priorities under the active
/// policy, and re-enqueues with the policy's choice at the front.
fn reorderer_loop(inner: Arc<Inner>) {
    while inner.running.load(Ordering::SeqCst) {
        if inner.queue.task_count() > 0 {
            let mut policy = inner.policy.write();
            if let Err(e) = inner.queue.reorder(&mut policy) {
                error!("reorder pass failed: {}", e);
            }
        }

        let mut slept = Duration::from_millis(0);
        while slept < REORDER_INTERVAL && inner.running.load(Ordering::SeqCst) {
            if inner.reorder_hint.swap(false, Ordering::SeqCst) {
                break;
            }
            thread::sleep(REORDER_POLL);
            slept += REORDER_POLL;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    static NEXT_QUEUE: AtomicUsize = AtomicUsize::new(0);

    fn scheduler(capacity: usize) -> Scheduler {
        let name = format!(
            "/taskd_sched_{}_{}",
            std::process::id(),
            NEXT_QUEUE.fetch_add(1, Ordering::Relaxed)
        );
        let mut shm = SharedQueue::new(&name, capacity).unwrap();
        shm.create().unwrap();
        Scheduler::new(Arc::new(shm))
    }

    #[test]
    fn short_cpu_task_runs_to_completion() {
        let mut scheduler = scheduler(16);
        scheduler.set_quantum(Duration::from_millis(500));
        scheduler.start().unwrap();
        assert!(scheduler.inner.shm.is_scheduler_running());

        scheduler
            .add(&Task::cpu_intensive(1, Duration::from_millis(5)))
            .unwrap();

        wait_until_drained(&scheduler);
        assert_eq!(scheduler.task_count(), 0);

        scheduler.stop();
        assert!(!scheduler.inner.shm.is_scheduler_running());
        let (enqueued, dequeued) = scheduler.inner.shm.totals();
        assert_eq!(enqueued, dequeued);
    }

    /// Blocks until the queue is quiescent: empty, every enqueue matched by
    /// a dequeue, and still so a full reorder interval later. A single
    /// sample races with a reorder pass that has drained a task but not yet
    /// put it back.
    fn wait_until_drained(scheduler: &Scheduler) {
        let quiescent = |scheduler: &Scheduler| {
            let (enqueued, dequeued) = scheduler.inner.shm.totals();
            scheduler.task_count() == 0 && enqueued == dequeued
        };

        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if quiescent(scheduler) {
                thread::sleep(REORDER_INTERVAL + Duration::from_millis(100));
                if quiescent(scheduler) {
                    return;
                }
            } else {
                thread::sleep(Duration::from_millis(20));
            }
        }
    }

    #[test]
    fn start_is_idempotent_and_stop_is_safe_without_start() {
        let mut idle = scheduler(4);
        idle.stop();

        let mut running = scheduler(4);
        running.start().unwrap();
        running.start().unwrap();
        running.stop();
    }

    #[test]
    fn policy_and_quantum_can_change_mid_flight() {
        let mut scheduler = scheduler(16);
        scheduler.start().unwrap();

        scheduler.set_policy(Policy::DynamicPriority);
        scheduler.set_quantum(Duration::from_millis(50));
        scheduler
            .add(&Task::cpu_intensive(7, Duration::from_millis(5)))
            .unwrap();

        wait_until_drained(&scheduler);
        assert_eq!(scheduler.task_count(), 0);
        scheduler.stop();
    }
}
