// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Poll-based file modification detection.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use sha2::{Digest, Sha256};

const DEFAULT_SETTLE: Duration = Duration::from_millis(100);

type Fingerprint = (SystemTime, [u8; 32]);

/// Tracks modification state per path.
///
/// A file counts as changed only when its mtime differs from the last
/// observation AND a hash of its contents differs, so a touch-only
/// timestamp change never triggers a reload. The first observation of a
/// path always reports changed.
#[derive(Debug)]
pub struct ModificationTracker {
    seen: HashMap<PathBuf, Fingerprint>,
    settle: Option<Duration>,
}

impl Default for ModificationTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ModificationTracker {
    pub fn new() -> Self {
        Self { seen: HashMap::new(), settle: Some(DEFAULT_SETTLE) }
    }

    /// Tracker without the settle delay, for tests.
    pub fn without_settle() -> Self {
        Self { seen: HashMap::new(), settle: None }
    }

    /// Has `path` changed since the last observation?
    pub fn changed(&mut self, path: &Path) -> std::io::Result<bool> {
        let mtime = std::fs::metadata(path)?.modified()?;
        if let Some(&(last_mtime, _)) = self.seen.get(path) {
            if last_mtime == mtime {
                return Ok(false);
            }
        }
        // The mtime moved; let the writer finish before hashing
        if let Some(settle) = self.settle {
            std::thread::sleep(settle);
        }
        let digest: [u8; 32] = Sha256::digest(std::fs::read(path)?).into();
        let prior = self.seen.insert(path.to_path_buf(), (mtime, digest));
        Ok(match prior {
            Some((_, last_digest)) => last_digest != digest,
            None => true,
        })
    }
}

#[cfg(test)]
#[path = "modified_tests.rs"]
mod tests;
