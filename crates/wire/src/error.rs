// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use thiserror::Error;

/// Errors from encoding, framing, and frame I/O.
#[derive(Debug, Error)]
pub enum WireError {
    /// The peer closed the connection (a read returned zero bytes).
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// No complete frame arrived within the deadline.
    #[error("did not receive a complete frame within {0:?}; frames must end with '\\n'")]
    Timeout(Duration),

    /// The frame decoded but the request is not usable.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The frame could not be decoded (UTF-8, percent-encoding, or JSON).
    #[error("failed to decode frame: {0}")]
    Malformed(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    /// True for errors where the peer is gone and a reply must not be
    /// attempted.
    pub fn is_peer_gone(&self) -> bool {
        matches!(self, WireError::ConnectionClosed | WireError::Io(_))
    }
}
