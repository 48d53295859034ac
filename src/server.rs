/* Copyright (c) 2026 The taskd Authors
 *
 * SPDX-License-Identifier: MIT
 */

//! The TCP command server. Clients send a single ASCII command of the form
//! `<op> <int> <int>`; accepted operations become CPU-bound tasks with a
//! fixed per-operation static priority. Malformed or unknown commands are
//! logged and dropped, never fatal.

use std::io::Read;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::sched::Scheduler;
use super::task::Task;

/// Longest command a client may send.
const MAX_COMMAND: usize = 1024;

/// Identifiers handed to tasks built from client commands. Ids 1 and 2
/// belong to the seed tasks the server binary queues at startup.
static NEXT_TASK_ID: AtomicI32 = AtomicI32::new(3);

/// Static priority assigned to each accepted operation.
fn operation_priority(op: &str) -> Option<i32> {
    match op {
        "add" => Some(19),
        "sub" => Some(18),
        "mul" => Some(15),
        "del" => Some(16),
        _ => None,
    }
}

/// Accept loop. Each connection is handled on its own thread; the listener
/// itself runs until the process exits.
pub fn run(port: u16, scheduler: Arc<Scheduler>) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))?;
    info!("command server listening on port {}", port);

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let scheduler = scheduler.clone();
                thread::spawn(move || handle_client(stream, &scheduler));
            }
            Err(e) => error!("accept failed: {}", e),
        }
    }
    Ok(())
}

/// Reads one command off the connection and turns it into a scheduled task.
/// Generic requests never reach the queue: the command is converted into a
/// runnable CPU-bound task before submission, with work proportional to the
/// operand magnitudes.
fn handle_client(mut stream: TcpStream, scheduler: &Scheduler) {
    let mut buffer = [0u8; MAX_COMMAND];
    let read = match stream.read(&mut buffer) {
        Ok(read) => read,
        Err(e) => {
            error!("failed to read command: {}", e);
            return;
        }
    };

    let command = String::from_utf8_lossy(&buffer[..read]);
    let command = command.trim();
    info!("received command: {}", command);

    let mut parts = command.split_whitespace();
    let op = parts.next();
    let lhs = parts.next().and_then(|s| s.parse::<i32>().ok());
    let rhs = parts.next().and_then(|s| s.parse::<i32>().ok());

    let (op, lhs, rhs) = match (op, lhs, rhs) {
        (Some(op), Some(lhs), Some(rhs)) => (op, lhs, rhs),
        _ => {
            error!("invalid command format: {:?}", command);
            return;
        }
    };

    let priority = match operation_priority(op) {
        Some(priority) => priority,
        None => {
            error!("unknown operation: {}", op);
            return;
        }
    };

    let work_ms = ((lhs as i64).abs() + (rhs as i64).abs()).max(1) as u64;
    let work = Duration::from_millis(work_ms);
    let mut task = Task::cpu_intensive(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed), work);
    task.set_description(command);
    if let Err(e) = task.set_static_priority(priority) {
        error!("rejecting command {:?}: {}", command, e);
        return;
    }

    match scheduler.add(&task) {
        Ok(()) => info!("task added: {} {} and {}", op, lhs, rhs),
        Err(e) => error!("failed to add task for {:?}: {}", command, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_table_matches_the_protocol() {
        assert_eq!(operation_priority("add"), Some(19));
        assert_eq!(operation_priority("sub"), Some(18));
        assert_eq!(operation_priority("mul"), Some(15));
        assert_eq!(operation_priority("del"), Some(16));
        assert_eq!(operation_priority("div"), None);
    }
}
