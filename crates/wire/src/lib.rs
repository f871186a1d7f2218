// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire protocol shared by the supervisor, workers, and clients.
//!
//! Wire format: URL-percent-encoded (space as `+`) JSON text followed by a
//! single `\n` terminator byte. Percent-encoding the whole payload guarantees
//! the terminator is the only un-encoded `0x0A` on the stream, so framing is
//! "read until newline".

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod aio;
pub mod blocking;
mod envelope;
mod error;
mod frame;

pub use envelope::{format_traceback, Call, Handshake, Response};
pub use error::WireError;
pub use frame::{encode, require_fields, DELIM};
