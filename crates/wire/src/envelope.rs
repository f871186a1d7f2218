// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The three envelope shapes of the protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::WireError;

/// First frame on every connection, naming the target module.
///
/// `name` of `null` or `"_ping"` invokes the ping path; `"_help"`,
/// `"_reload_<M>"` and `"_get_modules.<prefix>"` are the other reserved
/// names. Anything else must match a registered module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handshake {
    pub name: Option<String>,
}

/// A request frame sent to a worker after the handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    /// `None` is the graceful-close sentinel: the worker closes without
    /// replying.
    pub function: Option<String>,
    pub args: Vec<Value>,
    pub keep_alive: bool,
}

impl Call {
    /// Parse a decoded frame into a call, validating field types the way the
    /// protocol demands. Field presence is checked by [`crate::require_fields`]
    /// before this runs.
    pub fn from_value(msg: &Value) -> Result<Self, WireError> {
        let keep_alive = msg
            .get("keep_alive")
            .and_then(Value::as_bool)
            .ok_or_else(|| WireError::BadRequest("keep_alive must be a boolean".to_string()))?;
        let args = msg
            .get("args")
            .and_then(Value::as_array)
            .ok_or_else(|| WireError::BadRequest("args should be a list of values".to_string()))?
            .clone();
        let function = match msg.get("function") {
            Some(Value::Null) | None => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                return Err(WireError::BadRequest("function must be a string".to_string()))
            }
        };
        Ok(Call { function, args, keep_alive })
    }
}

/// The single reply shape. Sent exactly once per logical step; the server
/// closes the connection after any reply with `error = true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub response: Value,
    pub error: bool,
    pub traceback: String,
}

impl Response {
    /// Successful reply: `error = false`, empty traceback.
    pub fn success(response: impl Into<Value>) -> Self {
        Response { response: response.into(), error: false, traceback: String::new() }
    }

    /// Error reply carrying a human-readable message and a formatted stack.
    pub fn failure(message: impl Into<String>, traceback: impl Into<String>) -> Self {
        Response { response: Value::String(message.into()), error: true, traceback: traceback.into() }
    }

    /// Error reply built from an error value; the traceback is the formatted
    /// source chain and is never empty.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        Response::failure(err.to_string(), format_traceback(err))
    }
}

/// Render an error and its source chain as the `traceback` field of an error
/// envelope.
pub fn format_traceback(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = format!("error: {err}");
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(&format!("\n  caused by: {cause}"));
        source = cause.source();
    }
    out
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
