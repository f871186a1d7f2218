// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared harness: a supervisor running on its own runtime thread, a
//! registry of test modules, and config-file helpers.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use serde_json::{json, Value};

use mh_client::Client;
use mh_core::{Module, ModuleError, ModuleRegistry};
use mh_daemon::{Supervisor, SupervisorConfig, Timeouts};

/// A config entry: name, entry symbol, dispatcher.
pub type Entry<'a> = (&'a str, &'a str, Option<&'a str>);

pub struct TestServer {
    pub port: u16,
    pub config_path: PathBuf,
    /// Counts constructions of the `generational` test module.
    pub constructions: Arc<AtomicUsize>,
    dir: tempfile::TempDir,
    shutdown: Arc<tokio::sync::Notify>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl TestServer {
    /// Start a supervisor serving `entries`; source files are created under
    /// the server's temp dir.
    pub fn start(entries: &[Entry<'_>]) -> TestServer {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("server.config");
        std::fs::write(&config_path, render_config(dir.path(), entries)).unwrap();

        let constructions = Arc::new(AtomicUsize::new(0));
        let registry = test_registry(Arc::clone(&constructions));

        let mut cfg = SupervisorConfig::new("spec-server", &config_path);
        cfg.addr = "127.0.0.1".to_string();
        cfg.port = 0;
        cfg.timeouts = Timeouts {
            accept: Duration::from_millis(50),
            idle: Duration::from_millis(50),
            read: Duration::from_secs(1),
            load: Duration::from_secs(5),
            join: Duration::from_secs(2),
        };

        let shutdown = Arc::new(tokio::sync::Notify::new());
        let stop = Arc::clone(&shutdown);
        let (port_tx, port_rx) = std::sync::mpsc::channel();
        let thread = std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async move {
                let supervisor = Supervisor::bind(cfg, Arc::new(registry)).await.unwrap();
                port_tx.send(supervisor.local_addr().unwrap().port()).unwrap();
                supervisor.run_with_shutdown(stop).await.unwrap();
            });
        });
        let port = port_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        TestServer { port, config_path, constructions, dir, shutdown, thread: Some(thread) }
    }

    pub fn client(&self) -> Client {
        Client::new("127.0.0.1", self.port)
    }

    /// Replace the config file and nudge its mtime so the change is seen on
    /// the next tick.
    pub fn rewrite_config(&self, entries: &[Entry<'_>]) {
        self.rewrite_config_raw(&render_config(self.dir.path(), entries));
    }

    pub fn rewrite_config_raw(&self, contents: &str) {
        std::fs::write(&self.config_path, contents).unwrap();
        bump_mtime(&self.config_path);
    }

    pub fn source_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(format!("{name}.src"))
    }

    /// Rewrite a module's source file so the hosting worker rebuilds its
    /// instance.
    pub fn touch_source(&self, name: &str, contents: &str) {
        let path = self.source_path(name);
        std::fs::write(&path, contents).unwrap();
        bump_mtime(&path);
    }

    /// Wait until a call on `module` succeeds (worker routed and instance
    /// constructed).
    pub fn wait_until_serving(&self, module: &str, function: &str) {
        let client = self.client();
        assert!(
            wait_until(|| client.com(module, function, &[json!(0), json!(0)]).is_ok()),
            "{module} did not become ready in time"
        );
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.notify_one();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Poll `cond` for up to five seconds.
pub fn wait_until<F: FnMut() -> bool>(mut cond: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    false
}

fn render_config(dir: &Path, entries: &[Entry<'_>]) -> String {
    let mut map = serde_json::Map::new();
    for (name, entry, dispatcher) in entries {
        let source = dir.join(format!("{name}.src"));
        if !source.exists() {
            std::fs::write(&source, "source v1").unwrap();
        }
        map.insert(
            name.to_string(),
            json!([source.to_str().unwrap(), entry, dispatcher]),
        );
    }
    serde_json::to_string_pretty(&Value::Object(map)).unwrap()
}

/// Push a file's mtime well past the last observation so poll-based change
/// detection cannot miss it on coarse-grained filesystems.
fn bump_mtime(path: &Path) {
    let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(10)).unwrap();
}

struct Adder;

impl Module for Adder {
    fn call(&mut self, function: &str, args: &[Value]) -> Result<Value, ModuleError> {
        match function {
            "add" => {
                let mut total = 0.0;
                for arg in args {
                    total += arg
                        .as_f64()
                        .ok_or_else(|| ModuleError::Call("arguments must be numbers".into()))?;
                }
                Ok(json!(total))
            }
            _ => Err(ModuleError::UnknownFunction),
        }
    }

    fn methods(&self) -> Vec<String> {
        vec!["add".to_string()]
    }
}

/// Remembers which construction it came from.
struct Generational(usize);

impl Module for Generational {
    fn call(&mut self, function: &str, _args: &[Value]) -> Result<Value, ModuleError> {
        match function {
            "generation" => Ok(json!(self.0)),
            _ => Err(ModuleError::UnknownFunction),
        }
    }

    fn methods(&self) -> Vec<String> {
        vec!["generation".to_string()]
    }
}

/// `die` brings the whole worker thread down; `ok` succeeds.
struct Panicky;

impl Module for Panicky {
    fn call(&mut self, function: &str, _args: &[Value]) -> Result<Value, ModuleError> {
        match function {
            "die" => panic!("hardware module fault"),
            "ok" => Ok(json!("ok")),
            _ => Err(ModuleError::UnknownFunction),
        }
    }

    fn methods(&self) -> Vec<String> {
        vec!["die".to_string(), "ok".to_string()]
    }
}

fn test_registry(constructions: Arc<AtomicUsize>) -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    registry.register("calc", || Ok(Box::new(Adder)));
    registry.register("generational", move || {
        Ok(Box::new(Generational(constructions.fetch_add(1, Ordering::SeqCst) + 1)))
    });
    registry.register("panicky", || Ok(Box::new(Panicky)));
    registry.register("broken", || Err(ModuleError::Construct("no hardware".to_string())));
    registry
}
