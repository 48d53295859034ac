/* Copyright (c) 2026 The taskd Authors
 *
 * SPDX-License-Identifier: MIT
 */

//! A multi-process task scheduling service. Producers hand serialized task
//! records to a bounded queue in a named shared-memory segment; a scheduler
//! process drains, re-prioritizes, and cooperatively executes them under a
//! pluggable policy.

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

pub mod client;
pub mod common;
pub mod config;
pub mod logger;
pub mod policy;
pub mod queue;
pub mod sched;
pub mod server;
pub mod shm;
pub mod task;
pub mod wireformat;

pub use common::{Error, Result};
