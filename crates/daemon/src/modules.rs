// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Built-in demo modules registered by the `mhd` binary.
//!
//! Real deployments embed the daemon as a library and register their own
//! hardware modules; these exist so a fresh checkout serves something and
//! double as the reference for module authors.

use serde_json::{json, Value};

use mh_core::{Module, ModuleError, ModuleRegistry};

/// Echoes its arguments back.
pub struct EchoModule;

impl Module for EchoModule {
    fn call(&mut self, function: &str, args: &[Value]) -> Result<Value, ModuleError> {
        match function {
            "echo" => Ok(Value::Array(args.to_vec())),
            _ => Err(ModuleError::UnknownFunction),
        }
    }

    fn methods(&self) -> Vec<String> {
        vec!["echo".to_string()]
    }
}

/// Minimal arithmetic over numeric arguments.
pub struct CalcModule;

impl CalcModule {
    fn numbers(args: &[Value]) -> Result<Vec<f64>, ModuleError> {
        args.iter()
            .map(|arg| {
                arg.as_f64().ok_or_else(|| ModuleError::Call("arguments must be numbers".into()))
            })
            .collect()
    }
}

impl Module for CalcModule {
    fn call(&mut self, function: &str, args: &[Value]) -> Result<Value, ModuleError> {
        let numbers = Self::numbers(args)?;
        match function {
            "add" => Ok(json!(numbers.iter().sum::<f64>())),
            "mul" => Ok(json!(numbers.iter().product::<f64>())),
            _ => Err(ModuleError::UnknownFunction),
        }
    }

    fn methods(&self) -> Vec<String> {
        vec!["add".to_string(), "mul".to_string()]
    }
}

/// The registry served by the `mhd` binary.
pub fn builtin_registry() -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    registry.register("echo", || Ok(Box::new(EchoModule)));
    registry.register("calc", || Ok(Box::new(CalcModule)));
    registry
}

#[cfg(test)]
#[path = "modules_tests.rs"]
mod tests;
