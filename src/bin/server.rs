/* Copyright (c) 2026 The taskd Authors
 *
 * SPDX-License-Identifier: MIT
 */

//! The scheduler server: owns the shared queue, runs the scheduler, and
//! accepts work requests over TCP.

#[macro_use]
extern crate log;

use std::path::Path;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use log::LevelFilter;

use taskd::config::ServerConfig;
use taskd::sched::Scheduler;
use taskd::server;
use taskd::shm::SharedQueue;
use taskd::task::Task;
use taskd::{logger, Error};

const CONFIG_PATH: &str = "server.toml";

fn main() {
    let config = ServerConfig::load(CONFIG_PATH);

    if let Err(e) = logger::init(Path::new(&config.logs_dir), LevelFilter::Info) {
        eprintln!("failed to initialize logging: {}", e);
        process::exit(1);
    }

    let shm = match open_queue(&config) {
        Ok(shm) => Arc::new(shm),
        Err(e) => {
            error!("cannot open shared queue {}: {}", config.queue_name, e);
            process::exit(1);
        }
    };

    let mut scheduler = Scheduler::new(shm);
    scheduler.set_policy(config.scheduling_policy());
    scheduler.set_quantum(Duration::from_millis(config.quantum_ms));
    if let Err(e) = scheduler.start() {
        error!("failed to start scheduler: {}", e);
        process::exit(1);
    }

    // Warm-up work queued on every startup; ids 1 and 2 are reserved for
    // these, command tasks number from 3.
    if let Err(e) = scheduler.add(&Task::cpu_intensive(1, Duration::from_secs(1))) {
        error!("failed to queue seed task 1: {}", e);
    }
    if let Err(e) = scheduler.add(&Task::io_bound(2, Path::new("output.txt"), 10)) {
        error!("failed to queue seed task 2: {}", e);
    }

    println!("server started on port {}", config.port);
    if let Err(e) = server::run(config.port, Arc::new(scheduler)) {
        error!("command server failed: {}", e);
        process::exit(1);
    }
}

/// Creates the queue, or attaches when another process already owns it.
fn open_queue(config: &ServerConfig) -> Result<SharedQueue, Error> {
    let mut shm = SharedQueue::new(&config.queue_name, config.capacity)?;
    if let Err(e) = shm.create() {
        info!(
            "create of {} failed ({}); attaching to the existing queue",
            config.queue_name, e
        );
        shm.attach()?;
    }
    Ok(shm)
}
