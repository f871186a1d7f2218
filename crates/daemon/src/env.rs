// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized defaults and environment variable access for the daemon.

use std::time::Duration;

/// Default bind address.
pub const DEFAULT_ADDR: &str = "localhost";

/// Default listening port.
pub const DEFAULT_PORT: u16 = 36577;

fn duration_from_env(var: &str, default: Duration) -> Duration {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

/// Accept timeout: how long the supervisor waits on `accept()` before
/// servicing periodic work (`MH_ACCEPT_TIMEOUT_MS`).
pub fn accept_timeout() -> Duration {
    duration_from_env("MH_ACCEPT_TIMEOUT_MS", Duration::from_secs(1))
}

/// Worker inbound-queue wait between reload checks (`MH_IDLE_TIMEOUT_MS`).
pub fn idle_timeout() -> Duration {
    duration_from_env("MH_IDLE_TIMEOUT_MS", Duration::from_secs(1))
}

/// Deadline for reading or writing one frame (`MH_READ_TIMEOUT_MS`).
pub fn read_timeout() -> Duration {
    duration_from_env("MH_READ_TIMEOUT_MS", Duration::from_secs(1))
}

/// How long the supervisor waits for a worker's load result
/// (`MH_LOAD_TIMEOUT_MS`).
pub fn load_timeout() -> Duration {
    duration_from_env("MH_LOAD_TIMEOUT_MS", Duration::from_secs(5))
}

/// How long the supervisor waits for a stopping worker to join
/// (`MH_JOIN_TIMEOUT_MS`).
pub fn join_timeout() -> Duration {
    duration_from_env("MH_JOIN_TIMEOUT_MS", Duration::from_secs(5))
}

/// The daemon's timing knobs, resolved once at startup.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub accept: Duration,
    pub idle: Duration,
    pub read: Duration,
    pub load: Duration,
    pub join: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            accept: accept_timeout(),
            idle: idle_timeout(),
            read: read_timeout(),
            load: load_timeout(),
            join: join_timeout(),
        }
    }
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
