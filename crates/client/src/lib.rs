// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Synchronous client for the module dispatch server.
//!
//! The one-shot methods ([`Client::com`], [`Client::ping`], ...) open a
//! fresh TCP connection and close it after one response. [`Client::session`]
//! keeps a connection open for a keep-alive call sequence against one
//! module.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use mh_wire::{blocking, Call, Handshake, Response, WireError};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 36577;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("could not resolve the server address")]
    Resolve,

    /// The server answered with an error envelope; `traceback` carries the
    /// formatted remote stack.
    #[error("server error: {message}")]
    Server { message: String, traceback: String },

    #[error("the server did not acknowledge the handshake")]
    NoAck,

    #[error("unexpected response shape: {0}")]
    Unexpected(String),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection settings for one server.
#[derive(Debug, Clone)]
pub struct Client {
    host: String,
    port: u16,
    /// Per-operation deadline. Some hardware calls take longer than the
    /// default; raise it with [`Client::with_timeout`].
    timeout: Duration,
}

impl Default for Client {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl Client {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port, timeout: DEFAULT_TIMEOUT }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Full conversation: handshake to `module`, then one call. The server
    /// closes the connection after the reply.
    pub fn com(&self, module: &str, function: &str, args: &[Value]) -> Result<Value, ClientError> {
        let mut stream = self.open(module)?;
        self.round_trip(
            &mut stream,
            &Call { function: Some(function.to_string()), args: args.to_vec(), keep_alive: false },
        )
    }

    /// The server's help text: registered modules plus the protocol
    /// description.
    pub fn help(&self) -> Result<String, ClientError> {
        let mut stream = self.connect()?;
        let reply = self.round_trip(&mut stream, &Handshake { name: Some("_help".to_string()) })?;
        reply
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ClientError::Unexpected(reply.to_string()))
    }

    /// The `(ip, port)` the server sees for this client.
    pub fn ping(&self) -> Result<(String, u16), ClientError> {
        let mut stream = self.connect()?;
        let reply = self.round_trip(&mut stream, &Handshake { name: Some("_ping".to_string()) })?;
        serde_json::from_value(reply).map_err(|e| ClientError::Unexpected(e.to_string()))
    }

    /// Force `module`'s worker to rebuild its instance.
    pub fn reload(&self, module: &str) -> Result<String, ClientError> {
        let mut stream = self.connect()?;
        let reply = self
            .round_trip(&mut stream, &Handshake { name: Some(format!("_reload_{module}")) })?;
        reply
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ClientError::Unexpected(reply.to_string()))
    }

    /// Registered module names starting with `prefix`.
    pub fn get_modules(&self, prefix: &str) -> Result<Vec<String>, ClientError> {
        let mut stream = self.connect()?;
        let reply = self
            .round_trip(&mut stream, &Handshake { name: Some(format!("_get_modules.{prefix}")) })?;
        serde_json::from_value(reply).map_err(|e| ClientError::Unexpected(e.to_string()))
    }

    /// Open a keep-alive session against `module`.
    pub fn session(&self, module: &str) -> Result<Session, ClientError> {
        let stream = self.open(module)?;
        Ok(Session { stream, timeout: self.timeout, closed: false })
    }

    /// Connect and complete the handshake for `module`, checking the ack.
    fn open(&self, module: &str) -> Result<TcpStream, ClientError> {
        let mut stream = self.connect()?;
        let reply =
            self.round_trip(&mut stream, &Handshake { name: Some(module.to_string()) })?;
        if reply != json!("ack") {
            return Err(ClientError::NoAck);
        }
        Ok(stream)
    }

    fn connect(&self) -> Result<TcpStream, ClientError> {
        let addr = self.resolve()?;
        debug!(%addr, "connecting");
        let stream = TcpStream::connect_timeout(&addr, self.timeout)?;
        stream.set_nonblocking(true)?;
        Ok(stream)
    }

    fn resolve(&self) -> Result<SocketAddr, ClientError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or(ClientError::Resolve)
    }

    fn round_trip(
        &self,
        stream: &mut TcpStream,
        payload: &impl Serialize,
    ) -> Result<Value, ClientError> {
        send(stream, payload, self.timeout)?;
        receive(stream, self.timeout)
    }
}

/// A keep-alive conversation with one module's worker.
///
/// Dropping the session sends the graceful-close sentinel so the worker
/// closes without waiting for its read deadline.
pub struct Session {
    stream: TcpStream,
    timeout: Duration,
    closed: bool,
}

impl Session {
    /// One call; the connection stays open for the next one.
    pub fn call(&mut self, function: &str, args: &[Value]) -> Result<Value, ClientError> {
        let payload =
            Call { function: Some(function.to_string()), args: args.to_vec(), keep_alive: true };
        send(&mut self.stream, &payload, self.timeout)?;
        match receive(&mut self.stream, self.timeout) {
            Ok(value) => Ok(value),
            Err(err) => {
                // The server closes after any error envelope
                self.closed = true;
                Err(err)
            }
        }
    }

    /// Leave nicely: the worker closes without replying.
    pub fn close(mut self) -> Result<(), ClientError> {
        self.send_goodbye()
    }

    fn send_goodbye(&mut self) -> Result<(), ClientError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let payload = Call { function: None, args: Vec::new(), keep_alive: false };
        send(&mut self.stream, &payload, self.timeout)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.send_goodbye();
    }
}

fn send(
    stream: &mut TcpStream,
    payload: &impl Serialize,
    timeout: Duration,
) -> Result<(), ClientError> {
    let bytes = mh_wire::encode(payload)?;
    blocking::write_frame(stream, &bytes, timeout)?;
    Ok(())
}

/// Read one envelope, promoting an error envelope into [`ClientError::Server`].
fn receive(stream: &mut TcpStream, timeout: Duration) -> Result<Value, ClientError> {
    let value = blocking::read_frame(stream, timeout)?;
    let envelope: Response =
        serde_json::from_value(value).map_err(|e| ClientError::Unexpected(e.to_string()))?;
    if envelope.error {
        let message = match envelope.response {
            Value::String(text) => text,
            other => other.to_string(),
        };
        return Err(ClientError::Server { message, traceback: envelope.traceback });
    }
    Ok(envelope.response)
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
