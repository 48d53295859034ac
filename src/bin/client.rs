/* Copyright (c) 2026 The taskd Authors
 *
 * SPDX-License-Identifier: MIT
 */

//! Interactive client: reads commands from stdin and forwards each one to
//! the command server.

use std::io::{self, BufRead, Write};

use taskd::client;
use taskd::config::ClientConfig;

const CONFIG_PATH: &str = "client.toml";

fn main() {
    let config = ClientConfig::load(CONFIG_PATH);
    let stdin = io::stdin();

    loop {
        print!("Enter command (e.g., 'add 5 10'): ");
        let _ = io::stdout().flush();

        let mut command = String::new();
        match stdin.lock().read_line(&mut command) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("failed to read command: {}", e);
                break;
            }
        }

        let command = command.trim();
        if command.is_empty() {
            println!("Empty command. Please try again");
            continue;
        }

        if let Err(e) = client::send_command(&config.server_addr, command) {
            eprintln!("failed to send command: {}", e);
        }
    }
}
