// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The module plug-in seam.
//!
//! A module is a named capability set: a worker either consults the
//! configured dispatcher capability or looks a function up by name in the
//! set discovered from [`Module::methods`]. Implementations are registered
//! as factories in a [`ModuleRegistry`] under their entry symbol; the worker
//! re-invokes the factory to rebuild the instance after a source change.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;

use serde_json::Value;
use thiserror::Error;

/// Errors from module loading and dispatch.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("entry symbol \"{0}\" is not registered")]
    NotRegistered(String),

    #[error("module source {} does not exist", .0.display())]
    SourceMissing(PathBuf),

    #[error("failed to construct instance: {0}")]
    Construct(String),

    /// A call failed inside the module implementation.
    #[error("{0}")]
    Call(String),

    #[error("function not found in instance (case matters)")]
    UnknownFunction,

    #[error("module does not support dispatch")]
    NoDispatcher,

    /// The instance is absent or in the error placeholder state.
    #[error("module failed to load instance")]
    NoInstance,
}

/// A constructed module instance hosted by exactly one worker.
///
/// All calls are serialized by the hosting worker; implementations never
/// need to reason about concurrency.
pub trait Module: Send {
    /// Invoke `function` with positional `args`.
    fn call(&mut self, function: &str, args: &[Value]) -> Result<Value, ModuleError>;

    /// The callable function names, discovered at load time. Used for direct
    /// name lookup and for the default `_help` reply.
    fn methods(&self) -> Vec<String>;

    /// Dispatcher capability: receives the configured dispatcher name, the
    /// peer address, and the requested function, and decides internally what
    /// to invoke. Only reached when the descriptor names a dispatcher.
    fn dispatch(
        &mut self,
        dispatcher: &str,
        peer_ip: IpAddr,
        function: &str,
        args: &[Value],
    ) -> Result<Value, ModuleError> {
        let _ = (dispatcher, peer_ip, function, args);
        Err(ModuleError::NoDispatcher)
    }

    /// Scoped-release hook, invoked when the hosting worker stops.
    fn release(&mut self) {}
}

type Factory = Box<dyn Fn() -> Result<Box<dyn Module>, ModuleError> + Send + Sync>;

/// Registry of module factories keyed by entry symbol.
///
/// The embedder registers every available implementation before the
/// supervisor starts; descriptors then select by entry symbol.
#[derive(Default)]
pub struct ModuleRegistry {
    factories: BTreeMap<String, Factory>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `entry`. Later registrations replace
    /// earlier ones.
    pub fn register<F>(&mut self, entry: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Box<dyn Module>, ModuleError> + Send + Sync + 'static,
    {
        self.factories.insert(entry.into(), Box::new(factory));
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.factories.contains_key(entry)
    }

    /// Build a fresh instance for `entry`.
    pub fn construct(&self, entry: &str) -> Result<Box<dyn Module>, ModuleError> {
        match self.factories.get(entry) {
            Some(factory) => factory(),
            None => Err(ModuleError::NotRegistered(entry.to_string())),
        }
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("entries", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
#[path = "module_tests.rs"]
mod tests;
