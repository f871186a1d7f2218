// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The supervisor: listening socket, worker registry, and the routing
//! front door.
//!
//! The main loop is a `select!` over `accept()` and a one-second tick.
//! Handshakes are handled inline before the next accept, so config
//! reconciliation and liveness checks are never concurrent with
//! connection routing, and the registry has a single owner.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use mh_core::{config, ModificationTracker, ModuleDescriptor, ModuleRegistry};
use mh_wire::{aio, Response};

use crate::env::{self, Timeouts};
use crate::worker::{self, Queue, WorkerMsg};

/// Static protocol description appended to the `_help` reply.
const HELP_TEXT: &str = r#"_help can be sent as "name" in the server handshake to get this text. It can also be sent as the "function" field of a request to a worker (the other two fields are still required, though ignored).

_ping (or a null name) echoes the address and port the server sees for the client.

The server and workers reply with url-encoded (plus) JSON strings:
  {"response": RESPONSE, "error": ERROR_STATUS, "traceback": TRACEBACK}
where ERROR_STATUS is true/false and RESPONSE comes from the requested module. All frames are terminated by '\n'.

Clients send url-encoded (plus) JSON strings. First the handshake:
  {"name": NAME}
The server replies "ack" once the connection is placed on the worker's queue. Then the request for the worker:
  {"function": FUNCTION, "args": [ARG0, ARG1, ...], "keep_alive": KEEP_ALIVE}
Every read (including the next keep-alive request) has a one second timeout after the previous reply. Upon an error in a function, the connection is closed regardless of the keep_alive flag. A request with a null function closes the connection nicely without a reply:
  {"function": null, "args": [], "keep_alive": false}"#;

/// Launch parameters for a supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Server name used in log output.
    pub name: String,
    /// Path to the module config file; polled for changes, never held open.
    pub config_path: PathBuf,
    pub addr: String,
    pub port: u16,
    pub timeouts: Timeouts,
}

impl SupervisorConfig {
    pub fn new(name: impl Into<String>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            config_path: config_path.into(),
            addr: env::DEFAULT_ADDR.to_string(),
            port: env::DEFAULT_PORT,
            timeouts: Timeouts::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to bind {addr}:{port}: {source}")]
    Bind { addr: String, port: u16, source: std::io::Error },
}

/// Handshake rejections that are reported to the client.
#[derive(Debug, Error)]
enum RouteError {
    #[error("{0} does not exist (case matters)")]
    UnknownModule(String),

    #[error("{0} worker is not alive!")]
    WorkerDead(String),
}

#[derive(Debug)]
pub(crate) struct WorkerHandle {
    /// `None` marks a worker that failed to load and must not be posted to.
    thread: Option<JoinHandle<()>>,
    queue: Queue,
}

impl WorkerHandle {
    fn is_alive(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }
}

#[derive(Debug)]
struct ModuleEntry {
    descriptor: ModuleDescriptor,
    handle: WorkerHandle,
}

/// Owns the listening socket, the registry, and every worker lifecycle.
#[derive(Debug)]
pub struct Supervisor {
    cfg: SupervisorConfig,
    listener: TcpListener,
    registry: BTreeMap<String, ModuleEntry>,
    modules: Arc<ModuleRegistry>,
    tracker: ModificationTracker,
}

impl Supervisor {
    /// Bind the listening socket. A failure here is fatal to the caller;
    /// the process should exit nonzero.
    pub async fn bind(
        cfg: SupervisorConfig,
        modules: Arc<ModuleRegistry>,
    ) -> Result<Self, SupervisorError> {
        let listener = TcpListener::bind((cfg.addr.as_str(), cfg.port)).await.map_err(
            |source| SupervisorError::Bind { addr: cfg.addr.clone(), port: cfg.port, source },
        )?;
        Ok(Self {
            cfg,
            listener,
            registry: BTreeMap::new(),
            modules,
            tracker: ModificationTracker::new(),
        })
    }

    /// The bound address (useful when the configured port is 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run until SIGINT.
    pub async fn run(self) -> Result<(), SupervisorError> {
        let shutdown = Arc::new(Notify::new());
        let signal = Arc::clone(&shutdown);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                signal.notify_one();
            }
        });
        self.run_with_shutdown(shutdown).await
    }

    /// Run until `shutdown` is notified.
    pub async fn run_with_shutdown(mut self, shutdown: Arc<Notify>) -> Result<(), SupervisorError> {
        info!(name = %self.cfg.name, "starting up on {} port {}", self.cfg.addr, self.cfg.port);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.handle_handshake(stream, peer).await,
                    Err(err) => warn!(%err, "accept failed"),
                },
                () = tokio::time::sleep(self.cfg.timeouts.accept) => self.tick(),
                () = shutdown.notified() => break,
            }
        }
        info!("shutting down");
        let Supervisor { cfg, listener, mut registry, .. } = self;
        // No more connections; then stop workers in LIFO order
        drop(listener);
        let names: Vec<String> = registry.keys().cloned().collect();
        for name in names.iter().rev() {
            if let Some(entry) = registry.remove(name) {
                stop_worker(name, entry.handle, cfg.timeouts);
            }
        }
        Ok(())
    }

    /// Periodic work between accepts: config reconciliation and worker
    /// liveness.
    fn tick(&mut self) {
        match self.tracker.changed(&self.cfg.config_path) {
            Ok(true) => {
                info!("config file modified");
                if let Err(err) = self.reconcile() {
                    warn!(%err, "failed to reload config");
                }
            }
            Ok(false) => {}
            Err(err) => warn!(%err, "could not check config file"),
        }
        self.check_liveness();
    }

    /// Diff the config file against the registry and converge the workers.
    /// Any load failure leaves the registry untouched.
    fn reconcile(&mut self) -> Result<(), config::ConfigError> {
        let desired = config::load_and_clean(&self.cfg.config_path)?;

        let stale: Vec<String> =
            self.registry.keys().filter(|name| !desired.contains_key(*name)).cloned().collect();
        for name in stale {
            if let Some(entry) = self.registry.remove(&name) {
                stop_worker(&name, entry.handle, self.cfg.timeouts);
            }
        }

        for (name, descriptor) in desired {
            let up_to_date =
                self.registry.get(&name).is_some_and(|entry| entry.descriptor == descriptor);
            if !up_to_date {
                self.start_worker(&name, descriptor);
            }
        }
        Ok(())
    }

    /// Restart any worker whose thread ended unexpectedly.
    fn check_liveness(&mut self) {
        let dead: Vec<String> = self
            .registry
            .iter()
            .filter(|(_, entry)| {
                entry.handle.thread.as_ref().is_some_and(JoinHandle::is_finished)
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in dead {
            error!(worker = %name, "worker died, relaunching");
            if let Some(descriptor) = self.registry.get(&name).map(|e| e.descriptor.clone()) {
                self.start_worker(&name, descriptor);
            }
        }
    }

    /// Stop the previous worker for `name` (if any), recycle or create its
    /// queue, spawn a fresh thread, and wait for the load result.
    fn start_worker(&mut self, name: &str, descriptor: ModuleDescriptor) {
        let queue = match self.registry.remove(name) {
            Some(entry) => stop_worker(name, entry.handle, self.cfg.timeouts),
            None => {
                debug!(worker = %name, "creating queue");
                crossbeam_channel::unbounded()
            }
        };
        scrub_queue(&queue);
        info!(worker = %name, "loading worker");
        let (load_tx, load_rx) = crossbeam_channel::bounded(1);
        let spawned = worker::spawn(
            name,
            descriptor.clone(),
            queue.1.clone(),
            load_tx,
            Arc::clone(&self.modules),
            self.cfg.timeouts,
        );
        let handle = match spawned {
            Ok(thread) => self.await_load(name, thread, &load_rx, queue),
            Err(err) => {
                error!(worker = %name, %err, "could not spawn worker thread");
                WorkerHandle { thread: None, queue }
            }
        };
        self.registry.insert(name.to_string(), ModuleEntry { descriptor, handle });
    }

    /// Wait for the worker's boolean load result. Client handoffs already
    /// posted on a recycled queue stay there, in order, for the fresh
    /// worker to serve after it loads.
    fn await_load(
        &self,
        name: &str,
        thread: JoinHandle<()>,
        load_rx: &crossbeam_channel::Receiver<bool>,
        queue: Queue,
    ) -> WorkerHandle {
        match load_rx.recv_timeout(self.cfg.timeouts.load) {
            Ok(true) => WorkerHandle { thread: Some(thread), queue },
            Ok(false) => {
                // The worker exits on its own; nothing to join
                error!(worker = %name, "worker failed to load its module");
                WorkerHandle { thread: None, queue }
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                error!(worker = %name, "worker did not report a load result in time; abandoning it");
                // The unresponsive thread keeps the old queue so it can
                // never steal messages meant for a replacement
                WorkerHandle { thread: None, queue: crossbeam_channel::unbounded() }
            }
        }
    }

    /// Decode and answer one handshake. On successful routing the
    /// connection moves to the worker; every other outcome replies here
    /// and closes by dropping the stream.
    async fn handle_handshake(&mut self, mut stream: TcpStream, peer: SocketAddr) {
        debug!(client = %peer.ip(), "new client");
        let read = aio::read_frame(&mut stream, self.cfg.timeouts.read).await.and_then(|msg| {
            mh_wire::require_fields(&msg, &["name"])?;
            Ok(msg)
        });
        let msg = match read {
            Ok(msg) => msg,
            Err(err) => {
                warn!(client = %peer.ip(), %err, "handshake failed");
                if !err.is_peer_gone() {
                    self.reply(&mut stream, &Response::from_error(&err)).await;
                }
                return;
            }
        };
        let name = match msg.get("name") {
            Some(Value::Null) | None => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                let err = mh_wire::WireError::BadRequest("name must be a string".to_string());
                warn!(client = %peer.ip(), %err, "handshake rejected");
                self.reply(&mut stream, &Response::from_error(&err)).await;
                return;
            }
        };

        let reply = match name.as_deref() {
            // Ping: echo the peer address as the server sees it
            None | Some("_ping") => {
                Ok(Response::success(json!([peer.ip().to_string(), peer.port()])))
            }
            Some("_help") => Ok(Response::success(Value::String(self.help_text()))),
            Some(n) if n.starts_with("_reload_") => self.post_reload(&n["_reload_".len()..]),
            Some(n) if n.starts_with("_get_modules.") => {
                let prefix = &n["_get_modules.".len()..];
                let names: Vec<&str> = self
                    .registry
                    .keys()
                    .filter(|name| name.starts_with(prefix))
                    .map(String::as_str)
                    .collect();
                Ok(Response::success(json!(names)))
            }
            Some(n) => match self.routable(n) {
                Ok(()) => {
                    if self.reply(&mut stream, &Response::success(json!("ack"))).await {
                        self.handoff(stream, peer, n);
                    }
                    return;
                }
                Err(err) => Err(err),
            },
        };

        let envelope = match reply {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(client = %peer.ip(), %err, "handshake rejected");
                Response::from_error(&err)
            }
        };
        self.reply(&mut stream, &envelope).await;
    }

    /// Is `name` a registered module with a live worker?
    fn routable(&self, name: &str) -> Result<(), RouteError> {
        match self.registry.get(name) {
            Some(entry) if entry.handle.is_alive() => Ok(()),
            Some(_) => Err(RouteError::WorkerDead(name.to_string())),
            None => Err(RouteError::UnknownModule(name.to_string())),
        }
    }

    /// Post a forced reload to a live worker.
    fn post_reload(&self, target: &str) -> Result<Response, RouteError> {
        match self.registry.get(target) {
            Some(entry) if entry.handle.is_alive() => {
                let _ = entry.handle.queue.0.send(WorkerMsg::Reload);
                info!(worker = %target, "reload requested by client");
                Ok(Response::success(json!(format!("reload requested for {target}"))))
            }
            Some(_) => Err(RouteError::WorkerDead(target.to_string())),
            None => Err(RouteError::UnknownModule(target.to_string())),
        }
    }

    /// Move the acked connection onto the worker's queue. The worker owns
    /// it from here.
    fn handoff(&self, stream: TcpStream, peer: SocketAddr, name: &str) {
        match stream.into_std() {
            Ok(conn) => {
                if let Some(entry) = self.registry.get(name) {
                    let _ = entry.handle.queue.0.send(WorkerMsg::Client(conn, peer));
                    debug!(worker = %name, "connection handed to worker");
                }
            }
            Err(err) => warn!(%err, "could not detach client connection"),
        }
    }

    fn help_text(&self) -> String {
        let names: Vec<&str> = self.registry.keys().map(String::as_str).collect();
        render_help(&names)
    }

    async fn reply(&self, stream: &mut TcpStream, envelope: &Response) -> bool {
        match mh_wire::encode(envelope) {
            Ok(bytes) => match aio::write_frame(stream, &bytes, self.cfg.timeouts.read).await {
                Ok(()) => true,
                Err(err) => {
                    debug!(%err, "could not send reply");
                    false
                }
            },
            Err(err) => {
                warn!(%err, "could not encode reply");
                false
            }
        }
    }
}

/// Stop one worker: post the termination sentinel, join bounded by the
/// configured timeout, and return the queue for recycling. An abandoned
/// (unjoinable) worker keeps its old queue; the caller gets a fresh one.
fn stop_worker(name: &str, handle: WorkerHandle, timeouts: Timeouts) -> Queue {
    let WorkerHandle { thread, queue } = handle;
    let Some(thread) = thread else { return queue };
    if !thread.is_finished() {
        info!(worker = %name, "unloading worker");
        let _ = queue.0.send(WorkerMsg::Shutdown);
    }
    debug!(worker = %name, "joining worker thread");
    if join_timeout(thread, timeouts.join) {
        queue
    } else {
        error!(worker = %name, "worker did not stop in time; abandoning it");
        crossbeam_channel::unbounded()
    }
}

/// Drop stale control messages so a recycled queue carries only client
/// handoffs into the next incarnation. A leftover sentinel from a worker
/// that died before draining it must not kill the replacement.
fn scrub_queue(queue: &Queue) {
    let mut keep: Vec<WorkerMsg> = Vec::new();
    while let Ok(msg) = queue.1.try_recv() {
        if matches!(msg, WorkerMsg::Client(..)) {
            keep.push(msg);
        }
    }
    for msg in keep {
        let _ = queue.0.send(msg);
    }
}

/// Join a worker thread, bounded. Returns false when the deadline passed;
/// the dropped handle detaches the thread.
fn join_timeout(thread: JoinHandle<()>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !thread.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    if thread.join().is_err() {
        warn!("worker thread panicked before joining");
    }
    true
}

/// Render the `_help` reply for the given registered module names.
fn render_help(names: &[&str]) -> String {
    format!("Available modules: {}\n\n{}", names.join(", "), HELP_TEXT)
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
