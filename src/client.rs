/* Copyright (c) 2026 The taskd Authors
 *
 * SPDX-License-Identifier: MIT
 */

//! One-shot command submission to the command server: connect, write the
//! bytes, close.

use std::io::{self, Write};
use std::net::TcpStream;

pub fn send_command(addr: &str, command: &str) -> io::Result<()> {
    let mut stream = TcpStream::connect(addr)?;
    stream.write_all(command.as_bytes())?;
    info!("command sent: {}", command);
    Ok(())
}
