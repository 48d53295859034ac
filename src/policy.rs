/* Copyright (c) 2026 The taskd Authors
 *
 * SPDX-License-Identifier: MIT
 */

//! Scheduling policies. Only three exist and the scheduler needs no open
//! extension, so this is a closed variant with explicit dispatch rather
//! than a trait object.

use super::common::{Error, Result};
use super::task::Task;

/// Decides which pending task runs next, and optionally refreshes each
/// task's dynamic priority during a reorder pass.
pub enum Policy {
    /// Rotates through the task list with a persistent cursor.
    RoundRobin { current: usize },

    /// Picks the highest priority; ties go to the earliest-inserted task.
    /// Priorities are left alone.
    StaticPriority,

    /// Like `StaticPriority`, but recomputes every task's dynamic priority
    /// before selection observes it.
    DynamicPriority,
}

impl Policy {
    pub fn round_robin() -> Policy {
        Policy::RoundRobin { current: 0 }
    }

    /// Index of the task that should run next. Fails with `EmptyTaskSet`
    /// when there is nothing to pick from.
    pub fn select(&mut self, tasks: &[Task]) -> Result<usize> {
        if tasks.is_empty() {
            return Err(Error::EmptyTaskSet);
        }

        match self {
            Policy::RoundRobin { current } => {
                *current = (*current + 1) % tasks.len();
                Ok(*current)
            }
            Policy::StaticPriority | Policy::DynamicPriority => {
                let mut selected = 0;
                let mut highest = tasks[0].priority();
                for (index, task) in tasks.iter().enumerate().skip(1) {
                    if task.priority() > highest {
                        highest = task.priority();
                        selected = index;
                    }
                }
                Ok(selected)
            }
        }
    }

    /// Refreshes one task's priority ahead of selection. A no-op for every
    /// policy except `DynamicPriority`.
    pub fn update_priority(&self, task: &mut Task) {
        if let Policy::DynamicPriority = self {
            task.adjust_dynamic_priority();
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Policy::RoundRobin { .. } => "round robin",
            Policy::StaticPriority => "static priority",
            Policy::DynamicPriority => "dynamic priority",
        }
    }
}

impl Default for Policy {
    fn default() -> Policy {
        Policy::round_robin()
    }
}
