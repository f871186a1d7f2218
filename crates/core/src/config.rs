// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Config store: parse and clean the module configuration file.
//!
//! The file is a JSON object mapping module names to three-element lists
//! `[source, entry, dispatcher|null]`. Names starting with underscore are
//! reserved for comments and examples and are ignored.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::ModuleDescriptor;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// Parse failure. The supervisor catches this without mutating the
    /// registry.
    #[error("failed to load config file (no modules changed): {0}")]
    Invalid(String),

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
}

/// Read and clean the config file: underscore-prefixed names are dropped
/// silently, entries that are not a valid three-element list are dropped
/// with a warning.
pub fn load_and_clean(path: &Path) -> Result<BTreeMap<String, ModuleDescriptor>, ConfigError> {
    let raw = std::fs::read(path)?;
    let parsed: Value =
        serde_json::from_slice(&raw).map_err(|e| ConfigError::Invalid(e.to_string()))?;
    let Some(entries) = parsed.as_object() else {
        return Err(ConfigError::Invalid("config must be a JSON object".to_string()));
    };

    let mut cleaned = BTreeMap::new();
    for (name, value) in entries {
        if name.starts_with('_') {
            continue;
        }
        match ModuleDescriptor::from_value(value) {
            Ok(descriptor) => {
                cleaned.insert(name.clone(), descriptor);
            }
            Err(reason) => {
                warn!(module = %name, "removing \"{name}\" from config: {reason}");
            }
        }
    }
    Ok(cleaned)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
