// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Payload encoding and frame decoding.

use percent_encoding::{percent_decode, percent_encode_byte};
use serde::Serialize;
use serde_json::Value;

use crate::WireError;

/// Frame terminator byte. Exactly one un-encoded `0x0A` per frame.
pub const DELIM: u8 = b'\n';

/// Serialize a payload to a complete frame: JSON, percent-encoded with
/// space as `+`, terminated by [`DELIM`].
pub fn encode<T: Serialize>(payload: &T) -> Result<Vec<u8>, WireError> {
    let json = serde_json::to_string(payload).map_err(|e| WireError::Malformed(e.to_string()))?;
    let mut out = Vec::with_capacity(json.len() + 1);
    for &byte in json.as_bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte),
            b' ' => out.push(b'+'),
            other => out.extend_from_slice(percent_encode_byte(other).as_bytes()),
        }
    }
    out.push(DELIM);
    Ok(out)
}

/// Decode the body of a frame (terminator already stripped) into JSON.
pub(crate) fn decode(body: &[u8]) -> Result<Value, WireError> {
    let unplussed: Vec<u8> =
        body.iter().map(|&b| if b == b'+' { b' ' } else { b }).collect();
    let decoded: Vec<u8> = percent_decode(&unplussed).collect();
    let text = std::str::from_utf8(&decoded)
        .map_err(|e| WireError::Malformed(format!("frame is not UTF-8: {e}")))?;
    serde_json::from_str(text)
        .map_err(|_| WireError::Malformed(format!("frame is not valid JSON: \"{text}\"")))
}

/// Verify that `msg` is an object carrying every field in `fields`.
pub fn require_fields(msg: &Value, fields: &[&str]) -> Result<(), WireError> {
    for field in fields {
        if msg.get(field).is_none() {
            return Err(WireError::BadRequest(format!(
                "\"{field}\" field missing from request"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
