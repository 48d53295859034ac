/* Copyright (c) 2026 The taskd Authors
 *
 * SPDX-License-Identifier: MIT
 */

//! Executable units and their scheduling state. A task is a closed variant
//! (CPU-bound, I/O-bound, or a generic process-launching request) behind one
//! uniform cooperative-execution contract: run for at most one quantum,
//! report whether the work is done.

use std::cmp;
use std::ffi::CString;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execvp, fork, ForkResult, Pid};

use super::common::{Error, Result};
use super::wireformat::{TaskKind, TaskRecord};

/// Lowest static or dynamic priority a task can carry.
pub const PRIO_MIN: i32 = -20;

/// Highest static or dynamic priority a task can carry.
pub const PRIO_MAX: i32 = 19;

/// Waiting this long without running maxes out the starvation term of the
/// dynamic-priority formula.
const STARVATION_WINDOW: f32 = 10.0;

/// Description prefix under which an I/O-bound task carries its output path
/// through serialization.
const IO_DESC_PREFIX: &str = "I/O-bound task: ";

/// Lifecycle of a task. `Completed` is terminal. `Waiting` is reserved for
/// I/O-bound work that blocks externally; the built-in variants never enter
/// it on their own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Waiting,
    Completed,
}

/// Weights of the dynamic-priority formula.
#[derive(Clone, Copy, Debug)]
pub struct SchedParams {
    pub cpu_weight: f32,
    pub starvation_weight: f32,
    pub io_boost: f32,
}

impl Default for SchedParams {
    fn default() -> SchedParams {
        SchedParams {
            cpu_weight: 0.7,
            starvation_weight: 0.3,
            io_boost: 0.2,
        }
    }
}

/// The variant-specific half of a task.
enum Work {
    /// Simulated CPU load. `remaining_ms` can go negative on the final
    /// quantum; at or below zero the task is done.
    Cpu {
        total_work: Duration,
        remaining_ms: i64,
    },

    /// Appends one line to `path` per invocation and spends most of its
    /// quantum sleeping.
    Io {
        path: PathBuf,
        operations_remaining: i32,
    },

    /// A parameterized request carrying a shell command. Not directly
    /// executable; the submission path converts these into one of the
    /// runnable variants, or launches the command as a child process.
    Generic {
        command: String,
        child: Option<Pid>,
    },
}

/// An executable unit with static and dynamic priority, arrival bookkeeping,
/// and a cooperative `execute(quantum)` contract.
pub struct Task {
    id: i32,
    description: String,
    static_priority: i32,
    dynamic_priority: i32,
    state: TaskState,
    completed: bool,
    arrival_time: Instant,
    last_execution_time: Instant,
    cpu_usage: f32,
    virtual_runtime: f32,
    params: SchedParams,
    work: Work,
}

impl Task {
    /// Builds a generic task whose description doubles as its shell command.
    /// Fails with `InvalidArgument` when the static priority is outside
    /// [−20, +19].
    pub fn new(id: i32, description: &str, static_priority: i32) -> Result<Task> {
        validate_priority(static_priority)?;
        Ok(Task::build(
            id,
            description.to_string(),
            static_priority,
            Work::Generic {
                command: description.to_string(),
                child: None,
            },
        ))
    }

    /// Builds a CPU-bound task that simulates `duration` worth of load.
    pub fn cpu_intensive(id: i32, duration: Duration) -> Task {
        Task::build(
            id,
            "CPU-intensive task".to_string(),
            0,
            Work::Cpu {
                total_work: duration,
                remaining_ms: duration.as_millis() as i64,
            },
        )
    }

    /// Builds an I/O-bound task that appends `operations` lines to `path`.
    pub fn io_bound(id: i32, path: &Path, operations: i32) -> Task {
        Task::build(
            id,
            format!("{}{}", IO_DESC_PREFIX, path.display()),
            0,
            Work::Io {
                path: path.to_path_buf(),
                operations_remaining: operations,
            },
        )
    }

    fn build(id: i32, description: String, static_priority: i32, work: Work) -> Task {
        let now = Instant::now();
        Task {
            id,
            description,
            static_priority,
            dynamic_priority: static_priority,
            state: TaskState::Ready,
            completed: false,
            arrival_time: now,
            last_execution_time: now,
            cpu_usage: 0.0,
            virtual_runtime: 0.0,
            params: SchedParams::default(),
            work,
        }
    }

    #[inline]
    pub fn id(&self) -> i32 {
        self.id
    }

    #[inline]
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: &str) {
        self.description = description.to_string();
    }

    /// The task's current (dynamic) priority. Higher values win selection.
    #[inline]
    pub fn priority(&self) -> i32 {
        self.dynamic_priority
    }

    #[inline]
    pub fn static_priority(&self) -> i32 {
        self.static_priority
    }

    #[inline]
    pub fn state(&self) -> TaskState {
        self.state
    }

    #[inline]
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    #[inline]
    pub fn arrival_time(&self) -> Instant {
        self.arrival_time
    }

    #[inline]
    pub fn virtual_runtime(&self) -> f32 {
        self.virtual_runtime
    }

    #[inline]
    pub fn kind(&self) -> TaskKind {
        match self.work {
            Work::Cpu { .. } => TaskKind::CpuIntensive,
            Work::Io { .. } => TaskKind::IoBound,
            Work::Generic { .. } => TaskKind::Generic,
        }
    }

    #[inline]
    pub fn is_io_bound(&self) -> bool {
        matches!(self.work, Work::Io { .. })
    }

    /// The total work budget of a CPU-bound task. The executor uses this to
    /// run a task to completion in one go when it fits inside a quantum.
    /// `None` for variants without a fixed time budget.
    pub fn total_time(&self) -> Option<Duration> {
        match self.work {
            Work::Cpu { total_work, .. } => Some(total_work),
            _ => None,
        }
    }

    /// Moves the task to `state`, latching the terminal `completed` flag
    /// when the state is `Completed`.
    pub fn set_state(&mut self, state: TaskState) {
        if state == TaskState::Completed {
            self.completed = true;
        }
        debug!("task {} entered state {:?}", self.id, state);
        self.state = state;
    }

    /// Sets the static priority, rejecting values outside [−20, +19], and
    /// recomputes the dynamic priority.
    pub fn set_static_priority(&mut self, nice: i32) -> Result<()> {
        validate_priority(nice)?;
        self.static_priority = nice;
        self.adjust_dynamic_priority();
        Ok(())
    }

    /// Recomputes the dynamic priority from CPU usage, starvation, and
    /// I/O-boundedness, then resets the usage accumulator.
    pub fn adjust_dynamic_priority(&mut self) {
        let now = Instant::now();
        let waited = now.duration_since(self.last_execution_time).as_secs_f32();
        let starvation = (waited / STARVATION_WINDOW).max(0.0).min(1.0);

        let mut adjustment = self.params.cpu_weight * self.cpu_usage
            - self.params.starvation_weight * starvation;
        if self.is_io_bound() {
            adjustment -= self.params.io_boost;
        }

        self.dynamic_priority = clamp_priority(self.static_priority + (adjustment * 20.0).round() as i32);
        self.last_execution_time = now;
        self.cpu_usage = 0.0;
    }

    /// Runs the task cooperatively for at most `quantum` wall-clock time.
    /// Returns `Ok(true)` once the task has completed. Generic tasks are
    /// requests, not work; executing one fails with `NotImplemented`.
    pub fn execute(&mut self, quantum: Duration) -> Result<bool> {
        if let Work::Generic { .. } = self.work {
            return Err(Error::NotImplemented);
        }

        self.set_state(TaskState::Running);
        let started = Instant::now();

        let (elapsed, completed) = match self.work {
            Work::Cpu {
                ref mut remaining_ms,
                ..
            } => {
                // Burn wall time with a deterministic computation, checking
                // the clock each iteration so the quantum is never overshot
                // by more than a tick.
                let budget = cmp::min(
                    quantum,
                    Duration::from_millis((*remaining_ms).max(0) as u64),
                );
                let mut acc = 0.0f64;
                let mut i = 0u64;
                while started.elapsed() < budget {
                    acc += (i as f64).sin() * (i as f64).cos();
                    i = i.wrapping_add(1);
                }
                let _ = acc;

                let elapsed = started.elapsed();
                *remaining_ms -= elapsed.as_millis() as i64;
                (elapsed, *remaining_ms <= 0)
            }

            Work::Io {
                ref path,
                ref mut operations_remaining,
            } => match OpenOptions::new().append(true).create(true).open(path) {
                // An unwritable target ends the task rather than erroring:
                // there is nothing left for it to do.
                Err(_) => (started.elapsed(), true),
                Ok(mut file) => {
                    let _ = writeln!(file, "Operation #{}", *operations_remaining);
                    thread::sleep(quantum / 2);
                    *operations_remaining -= 1;
                    (started.elapsed(), *operations_remaining <= 0)
                }
            },

            Work::Generic { .. } => unreachable!(),
        };

        let cap = if self.is_io_bound() { 0.3 } else { 1.0 };
        let quantum_secs = quantum.as_secs_f32();
        self.cpu_usage = if quantum_secs > 0.0 {
            (elapsed.as_secs_f32() / quantum_secs).min(cap)
        } else {
            cap
        };
        self.virtual_runtime += elapsed.as_secs_f32();

        self.set_state(if completed {
            TaskState::Completed
        } else {
            TaskState::Ready
        });
        Ok(completed)
    }

    /// Forks a child, drops its OS priority to the task's static priority,
    /// and execs `command` through `/bin/sh`. The child pid is retained for
    /// `check_process_status`.
    pub fn launch_process(&mut self, command: &str) -> Result<Pid> {
        let shell = CString::new("/bin/sh").map_err(|e| Error::Process(e.to_string()))?;
        let argv = [
            CString::new("sh").map_err(|e| Error::Process(e.to_string()))?,
            CString::new("-c").map_err(|e| Error::Process(e.to_string()))?,
            CString::new(command).map_err(|e| Error::Process(e.to_string()))?,
        ];

        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                unsafe {
                    libc::setpriority(libc::PRIO_PROCESS as _, 0, self.static_priority);
                }
                let _ = execvp(&shell, &argv[..]);
                // exec failed; nothing sane left to do in the child.
                std::process::exit(127);
            }
            Ok(ForkResult::Parent { child }) => {
                if let Work::Generic { child: ref mut slot, .. } = self.work {
                    *slot = Some(child);
                }
                info!("task {} launched child {} for {:?}", self.id, child, command);
                Ok(child)
            }
            Err(e) => Err(Error::Process(e.to_string())),
        }
    }

    /// True when the launched child has exited (or no child was ever
    /// launched).
    pub fn check_process_status(&self) -> bool {
        let child = match self.work {
            Work::Generic { child, .. } => child,
            _ => None,
        };
        match child {
            None => true,
            Some(pid) => match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => false,
                _ => true,
            },
        }
    }

    /// Serializes the task into its fixed-size shared-memory form. The
    /// `remaining_ms` field carries the residual time budget for CPU-bound
    /// tasks and the residual operation count for I/O-bound ones.
    pub fn to_record(&self) -> TaskRecord {
        let remaining_ms = if self.completed {
            0
        } else {
            match self.work {
                Work::Cpu { total_work, .. } => {
                    let elapsed = self.arrival_time.elapsed();
                    saturate_ms(total_work.checked_sub(elapsed).unwrap_or(Duration::from_millis(0)))
                }
                Work::Io {
                    operations_remaining,
                    ..
                } => operations_remaining.max(0),
                Work::Generic { .. } => 0,
            }
        };

        TaskRecord {
            id: self.id,
            priority: self.dynamic_priority,
            description: self.description.clone(),
            kind: self.kind(),
            completed: self.completed,
            remaining_ms,
        }
    }

    /// Re-materializes a task from its shared-memory form. The round trip
    /// is lossy for in-process state (`virtual_runtime`,
    /// `last_execution_time`, `cpu_usage` restart from zero), and the
    /// priority is clamped rather than rejected: records outlive the
    /// process that wrote them.
    pub fn from_record(record: &TaskRecord) -> Task {
        let mut task = match record.kind {
            TaskKind::CpuIntensive => Task::cpu_intensive(
                record.id,
                Duration::from_millis(record.remaining_ms.max(0) as u64),
            ),
            TaskKind::IoBound => {
                let path = record
                    .description
                    .strip_prefix(IO_DESC_PREFIX)
                    .unwrap_or(&record.description);
                Task::io_bound(record.id, Path::new(path), record.remaining_ms)
            }
            TaskKind::Generic => Task::build(
                record.id,
                record.description.clone(),
                0,
                Work::Generic {
                    command: record.description.clone(),
                    child: None,
                },
            ),
        };

        task.description = record.description.clone();
        let clamped = clamp_priority(record.priority);
        task.static_priority = clamped;
        task.dynamic_priority = clamped;
        if record.completed {
            task.set_state(TaskState::Completed);
        }
        task
    }
}

fn validate_priority(nice: i32) -> Result<()> {
    if nice < PRIO_MIN || nice > PRIO_MAX {
        return Err(Error::InvalidArgument(format!(
            "priority {} outside [{}, {}]",
            nice, PRIO_MIN, PRIO_MAX
        )));
    }
    Ok(())
}

#[inline]
fn clamp_priority(priority: i32) -> i32 {
    cmp::max(PRIO_MIN, cmp::min(PRIO_MAX, priority))
}

fn saturate_ms(duration: Duration) -> i32 {
    cmp::min(duration.as_millis(), i32::max_value() as u128) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_file(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("taskd_{}_{}", tag, std::process::id()))
    }

    #[test]
    fn construction_validates_priority() {
        assert!(matches!(
            Task::new(1, "Test case", 22),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            Task::new(1, "Test case", -21),
            Err(Error::InvalidArgument(_))
        ));

        let task = Task::new(1, "Test case", 10).unwrap();
        assert_eq!(task.priority(), 10);
        assert_eq!(task.state(), TaskState::Ready);
    }

    #[test]
    fn set_static_priority_rejects_out_of_range() {
        let mut task = Task::new(1, "Test case", 0).unwrap();
        assert!(task.set_static_priority(20).is_err());
        assert!(task.set_static_priority(-21).is_err());
        task.set_static_priority(19).unwrap();
        assert_eq!(task.static_priority(), 19);
    }

    #[test]
    fn generic_execute_is_not_implemented() {
        let mut task = Task::new(1, "echo hi", 0).unwrap();
        assert!(matches!(
            task.execute(Duration::from_millis(100)),
            Err(Error::NotImplemented)
        ));
    }

    #[test]
    fn cpu_task_completes_within_its_budget() {
        let mut task = Task::cpu_intensive(1, Duration::from_millis(5));
        assert_eq!(task.total_time(), Some(Duration::from_millis(5)));
        assert_eq!(task.execute(Duration::from_millis(500)).unwrap(), true);
        assert_eq!(task.state(), TaskState::Completed);
        assert!(task.is_completed());
    }

    #[test]
    fn cpu_task_yields_at_quantum_end() {
        let mut task = Task::cpu_intensive(1, Duration::from_millis(500));
        assert_eq!(task.execute(Duration::from_millis(10)).unwrap(), false);
        assert_eq!(task.state(), TaskState::Ready);
        assert!(!task.is_completed());
        assert!(task.cpu_usage > 0.0 && task.cpu_usage <= 1.0);
        assert!(task.virtual_runtime() > 0.0);
    }

    #[test]
    fn io_task_appends_and_completes() {
        let path = scratch_file("io");
        let _ = std::fs::remove_file(&path);

        let mut task = Task::io_bound(2, &path, 2);
        assert!(task.is_io_bound());
        assert_eq!(task.execute(Duration::from_millis(10)).unwrap(), false);
        assert_eq!(task.execute(Duration::from_millis(10)).unwrap(), true);
        assert_eq!(task.state(), TaskState::Completed);
        assert!(task.cpu_usage <= 0.3);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn unwritable_io_target_counts_as_done() {
        let mut task = Task::io_bound(3, Path::new("/taskd_no_such_dir/out"), 5);
        assert_eq!(task.execute(Duration::from_millis(10)).unwrap(), true);
        assert!(task.is_completed());
    }

    #[test]
    fn dynamic_priority_stays_in_range() {
        let mut task = Task::cpu_intensive(1, Duration::from_millis(200));
        task.set_static_priority(19).unwrap();
        for _ in 0..3 {
            task.execute(Duration::from_millis(5)).unwrap();
            task.adjust_dynamic_priority();
            assert!(task.priority() >= PRIO_MIN && task.priority() <= PRIO_MAX);
        }

        let mut low = Task::io_bound(2, Path::new("/taskd_no_such_dir/out"), 1);
        low.set_static_priority(-20).unwrap();
        low.adjust_dynamic_priority();
        assert!(low.priority() >= PRIO_MIN && low.priority() <= PRIO_MAX);
    }

    #[test]
    fn adjust_resets_the_usage_accumulator() {
        let mut task = Task::cpu_intensive(1, Duration::from_millis(100));
        task.execute(Duration::from_millis(5)).unwrap();
        assert!(task.cpu_usage > 0.0);
        task.adjust_dynamic_priority();
        assert_eq!(task.cpu_usage, 0.0);
    }

    #[test]
    fn completed_state_is_latched() {
        let mut task = Task::new(4, "latched", 0).unwrap();
        task.set_state(TaskState::Running);
        assert!(!task.is_completed());
        task.set_state(TaskState::Completed);
        assert!(task.is_completed());
        task.set_state(TaskState::Waiting);
        assert!(task.is_completed());
    }

    #[test]
    fn launch_process_reaps_its_child() {
        let mut task = Task::new(5, "true", 0).unwrap();
        let pid = task.launch_process("true").unwrap();
        assert!(pid.as_raw() > 0);

        let mut exited = false;
        for _ in 0..100 {
            if task.check_process_status() {
                exited = true;
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(exited);
    }

    #[test]
    fn record_round_trip_preserves_identity() {
        let mut task = Task::new(9, "echo roundtrip", 7).unwrap();
        task.set_state(TaskState::Completed);
        let record = task.to_record();
        assert_eq!(record.remaining_ms, 0);

        let back = Task::from_record(&record);
        assert_eq!(back.id(), 9);
        assert_eq!(back.description(), "echo roundtrip");
        assert_eq!(back.priority(), task.priority());
        assert_eq!(back.kind(), TaskKind::Generic);
        assert!(back.is_completed());
    }

    #[test]
    fn cpu_record_budget_is_non_negative() {
        let task = Task::cpu_intensive(1, Duration::from_millis(250));
        let record = task.to_record();
        assert_eq!(record.kind, TaskKind::CpuIntensive);
        assert!(record.remaining_ms >= 0);
        assert!(record.remaining_ms <= 250);

        let back = Task::from_record(&record);
        assert_eq!(
            back.total_time(),
            Some(Duration::from_millis(record.remaining_ms as u64))
        );
    }

    #[test]
    fn io_record_carries_the_operation_count() {
        let path = scratch_file("io_record");
        let task = Task::io_bound(6, &path, 12);
        let record = task.to_record();
        assert_eq!(record.kind, TaskKind::IoBound);
        assert_eq!(record.remaining_ms, 12);

        let back = Task::from_record(&record);
        assert_eq!(back.kind(), TaskKind::IoBound);
        assert_eq!(back.description(), task.description());
    }

    #[test]
    fn out_of_range_record_priority_is_clamped() {
        let task = Task::cpu_intensive(1, Duration::from_millis(10));
        let mut record = task.to_record();
        record.priority = 40;
        assert_eq!(Task::from_record(&record).priority(), PRIO_MAX);
        record.priority = -40;
        assert_eq!(Task::from_record(&record).priority(), PRIO_MIN);
    }
}
