// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The typed form of one config entry.

use std::path::PathBuf;

use serde_json::Value;

/// Configuration record for one named module: where its implementation
/// lives, which entry symbol constructs the instance, and the optional
/// dispatcher method name.
///
/// On the wire and in the config file this is the three-element list
/// `[source, entry, dispatcher|null]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    /// Source path watched for changes; a change gates instance rebuild.
    pub source: PathBuf,
    /// Entry symbol naming the registered factory that builds the instance.
    pub entry: String,
    /// Dispatcher method name; when set, every call is routed through the
    /// instance's dispatch capability instead of direct lookup.
    pub dispatcher: Option<String>,
}

impl ModuleDescriptor {
    /// Parse a raw config value. The error is a human-readable reason used
    /// in the "removing from config" warning.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let Some(items) = value.as_array() else {
            return Err("the config value should be a list".to_string());
        };
        if items.len() != 3 {
            return Err(format!(
                "the config value should have 3 entries (found {})",
                items.len()
            ));
        }
        let Some(source) = items[0].as_str() else {
            return Err("the source entry should be a string".to_string());
        };
        let Some(entry) = items[1].as_str() else {
            return Err("the entry symbol should be a string".to_string());
        };
        let dispatcher = match &items[2] {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            _ => return Err("the dispatcher entry should be a string or null".to_string()),
        };
        Ok(ModuleDescriptor {
            source: PathBuf::from(source),
            entry: entry.to_string(),
            dispatcher,
        })
    }
}
