// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deadline-bounded frame I/O over blocking (non-blocking-mode) streams.
//!
//! Used by workers and the client library. Streams are expected to be in
//! non-blocking mode; `WouldBlock` is retried with a short sleep while the
//! deadline is alive.

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::frame::{self, DELIM};
use crate::WireError;

const RETRY_SLEEP: Duration = Duration::from_millis(10);
const RECV_BUFFER: usize = 4096;

/// Read one frame, decode it, and return the JSON payload.
///
/// Accumulates reads until the last received byte is the terminator, the
/// peer closes, or the deadline elapses.
pub fn read_frame<R: Read>(reader: &mut R, deadline: Duration) -> Result<Value, WireError> {
    let start = Instant::now();
    let mut buffer: Vec<u8> = Vec::new();
    let mut chunk = [0u8; RECV_BUFFER];
    while start.elapsed() < deadline {
        match reader.read(&mut chunk) {
            Ok(0) => return Err(WireError::ConnectionClosed),
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if chunk[n - 1] == DELIM {
                    return frame::decode(&buffer[..buffer.len() - 1]);
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                std::thread::sleep(RETRY_SLEEP);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(WireError::Io(e)),
        }
    }
    Err(WireError::Timeout(deadline))
}

/// Write a complete frame produced by [`crate::encode`].
pub fn write_frame<W: Write>(
    writer: &mut W,
    bytes: &[u8],
    deadline: Duration,
) -> Result<(), WireError> {
    let start = Instant::now();
    let mut written = 0;
    while written < bytes.len() {
        match writer.write(&bytes[written..]) {
            Ok(0) => return Err(WireError::ConnectionClosed),
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                if start.elapsed() >= deadline {
                    return Err(WireError::Timeout(deadline));
                }
                std::thread::sleep(RETRY_SLEEP);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(WireError::Io(e)),
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "blocking_tests.rs"]
mod tests;
