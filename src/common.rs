/* Copyright (c) 2026 The taskd Authors
 *
 * SPDX-License-Identifier: MIT
 */

use std::error;
use std::fmt;
use std::io;

/// Errors surfaced by the queue, the tasks, and the scheduler. Data-path
/// errors propagate to the caller; the worker loops catch and log them, and
/// teardown paths log without propagating so that destructors run to
/// completion.
#[derive(Debug)]
pub enum Error {
    /// A constructor argument was outside its documented range (queue
    /// capacity, static priority).
    InvalidArgument(String),

    /// A queue operation was attempted before the segment was mapped.
    NotAttached,

    /// An underlying semaphore wait or post returned an OS error.
    Semaphore(io::Error),

    /// The defensive consistency check in `dequeue` fired: the dequeue
    /// semaphore let a consumer through but the ring was empty.
    QueueEmpty,

    /// The named segment could not be created or opened.
    SegmentCreate(io::Error),

    /// Mapping the segment into the address space failed.
    Map(io::Error),

    /// Sizing the freshly created segment failed.
    Truncate(io::Error),

    /// `execute` was invoked on a generic (process-launch) task.
    NotImplemented,

    /// A scheduling policy was asked to select from an empty task set.
    EmptyTaskSet,

    /// Forking or exec'ing a child process for a generic task failed.
    Process(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Error::NotAttached => write!(f, "shared queue is not attached"),
            Error::Semaphore(e) => write!(f, "semaphore operation failed: {}", e),
            Error::QueueEmpty => write!(f, "dequeue observed an empty ring"),
            Error::SegmentCreate(e) => write!(f, "shared segment open failed: {}", e),
            Error::Map(e) => write!(f, "shared segment mmap failed: {}", e),
            Error::Truncate(e) => write!(f, "shared segment resize failed: {}", e),
            Error::NotImplemented => write!(f, "execute is not implemented for generic tasks"),
            Error::EmptyTaskSet => write!(f, "no tasks available for selection"),
            Error::Process(msg) => write!(f, "process launch failed: {}", msg),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Semaphore(e)
            | Error::SegmentCreate(e)
            | Error::Map(e)
            | Error::Truncate(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
