// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deadline-bounded frame I/O over tokio streams.
//!
//! Used by the supervisor for handshake traffic; workers and clients use the
//! blocking variant in [`crate::blocking`].

use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::frame::{self, DELIM};
use crate::WireError;

const RECV_BUFFER: usize = 4096;

/// Read one frame, decode it, and return the JSON payload.
pub async fn read_frame<R>(reader: &mut R, deadline: Duration) -> Result<Value, WireError>
where
    R: AsyncRead + Unpin,
{
    let read = async {
        let mut buffer: Vec<u8> = Vec::new();
        let mut chunk = [0u8; RECV_BUFFER];
        loop {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                return Err(WireError::ConnectionClosed);
            }
            buffer.extend_from_slice(&chunk[..n]);
            if chunk[n - 1] == DELIM {
                return frame::decode(&buffer[..buffer.len() - 1]);
            }
        }
    };
    tokio::time::timeout(deadline, read)
        .await
        .map_err(|_| WireError::Timeout(deadline))?
}

/// Write a complete frame produced by [`crate::encode`].
pub async fn write_frame<W>(
    writer: &mut W,
    bytes: &[u8],
    deadline: Duration,
) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    tokio::time::timeout(deadline, writer.write_all(bytes))
        .await
        .map_err(|_| WireError::Timeout(deadline))?
        .map_err(WireError::Io)
}

#[cfg(test)]
#[path = "aio_tests.rs"]
mod tests;
