// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Log sink: every part of the daemon logs through `tracing`; this module
//! installs the fan-in.
//!
//! Records go to a human-readable stdout stream and, when a log file is
//! configured, to a size-rotated JSON-lines file. File writes run on a
//! dedicated background thread behind a non-blocking channel, so producers
//! never suspend on logging. Workers log inside a `worker` span, which puts
//! the worker name on every record they emit.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const MAX_BYTES: u64 = 10 * 1024 * 1024;
const BACKUPS: usize = 5;

#[derive(Debug, Error)]
pub enum LogSinkError {
    #[error("failed to open log file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to install log subscriber: {0}")]
    Init(String),
}

/// Keeps the background writer alive; dropping it flushes and stops the
/// sink thread.
pub struct LogGuard {
    _file: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Install the global subscriber. `level` is a default filter directive
/// (e.g. `"debug"`); the `MH_LOG` environment variable overrides it.
pub fn init(level: &str, log_file: Option<&Path>) -> Result<LogGuard, LogSinkError> {
    let filter =
        EnvFilter::try_from_env("MH_LOG").unwrap_or_else(|_| EnvFilter::new(level));
    let stdout_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);
    let registry = tracing_subscriber::registry().with(filter).with(stdout_layer);

    match log_file {
        Some(path) => {
            let writer = RotatingWriter::open(path.to_path_buf(), MAX_BYTES, BACKUPS)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(writer);
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_writer(non_blocking);
            registry
                .with(json_layer)
                .try_init()
                .map_err(|e| LogSinkError::Init(e.to_string()))?;
            Ok(LogGuard { _file: Some(guard) })
        }
        None => {
            registry.try_init().map_err(|e| LogSinkError::Init(e.to_string()))?;
            Ok(LogGuard { _file: None })
        }
    }
}

/// Append-only writer that rotates `path` -> `path.1` -> ... -> `path.N`
/// once the current file would exceed `max_bytes`.
pub(crate) struct RotatingWriter {
    path: PathBuf,
    max_bytes: u64,
    backups: usize,
    file: File,
    written: u64,
}

impl RotatingWriter {
    pub(crate) fn open(
        path: PathBuf,
        max_bytes: u64,
        backups: usize,
    ) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self { path, max_bytes, backups, file, written })
    }

    fn rotate(&mut self) -> std::io::Result<()> {
        self.file.flush()?;
        for index in (1..self.backups).rev() {
            let from = backup_path(&self.path, index);
            if from.exists() {
                std::fs::rename(&from, backup_path(&self.path, index + 1))?;
            }
        }
        if self.backups > 0 {
            std::fs::rename(&self.path, backup_path(&self.path, 1))?;
        }
        self.file = OpenOptions::new().create(true).write(true).truncate(true).open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

fn backup_path(path: &Path, index: usize) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.written + buf.len() as u64 > self.max_bytes {
            if let Err(err) = self.rotate() {
                // A failing sink must not stop the loop; report and keep
                // appending to the oversized file
                eprintln!("log rotation failed: {err}");
            }
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

#[cfg(test)]
#[path = "logsink_tests.rs"]
mod tests;
