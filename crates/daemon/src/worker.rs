// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker runtime: one thread hosting one module instance.
//!
//! A worker owns its inbound queue and the instance; it never touches the
//! registry or the listening socket. It serves exactly one client
//! connection at a time, checking its module source for changes between
//! clients and rebuilding the instance when the source moved.

use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use mh_core::{ModificationTracker, Module, ModuleDescriptor, ModuleError, ModuleRegistry};
use mh_wire::{blocking, Call, Response, WireError};

use crate::env::Timeouts;

/// Messages carried by a worker's inbound queue.
pub(crate) enum WorkerMsg {
    /// A routed client connection; ownership moves to the worker.
    Client(TcpStream, SocketAddr),
    /// Drop the instance and rebuild it now.
    Reload,
    /// Termination sentinel.
    Shutdown,
}

/// Both ends of an inbound queue. The supervisor keeps a copy of each so
/// the queue can be recycled across restarts of the same worker name,
/// preserving client handoffs already posted.
pub(crate) type Queue = (Sender<WorkerMsg>, Receiver<WorkerMsg>);

/// The instance slot.
///
/// `Errored` suppresses rebuild attempts until the next source change;
/// `Absent` forces a rebuild on the next idle tick.
enum Instance {
    Absent,
    Errored,
    Ready(Box<dyn Module>),
}

/// Spawn a worker thread for `name`. The load result (`true` = the module
/// is loadable) arrives once on `load_tx`; a worker that reports `false`
/// exits on its own.
pub(crate) fn spawn(
    name: &str,
    descriptor: ModuleDescriptor,
    inbound: Receiver<WorkerMsg>,
    load_tx: Sender<bool>,
    modules: Arc<ModuleRegistry>,
    timeouts: Timeouts,
) -> std::io::Result<JoinHandle<()>> {
    let worker_name = name.to_string();
    std::thread::Builder::new().name(format!("worker-{name}")).spawn(move || {
        let span = tracing::info_span!("worker", name = %worker_name);
        let _enter = span.enter();
        Worker {
            descriptor,
            inbound,
            load_tx,
            modules,
            timeouts,
            tracker: ModificationTracker::new(),
            instance: Instance::Absent,
        }
        .run();
    })
}

struct Worker {
    descriptor: ModuleDescriptor,
    inbound: Receiver<WorkerMsg>,
    load_tx: Sender<bool>,
    modules: Arc<ModuleRegistry>,
    timeouts: Timeouts,
    tracker: ModificationTracker,
    instance: Instance,
}

enum Step {
    Continue,
    Close,
    /// Send the error envelope, then close.
    Fail(Response),
}

impl Worker {
    fn run(mut self) {
        if let Err(err) = self.check_loadable() {
            error!(%err, "failed to load module");
            let _ = self.load_tx.send(false);
            return;
        }
        info!(module = %self.descriptor.entry, "module loaded");
        let _ = self.load_tx.send(true);

        loop {
            match self.inbound.recv_timeout(self.timeouts.idle) {
                Ok(WorkerMsg::Shutdown) => {
                    debug!("worker stopping");
                    break;
                }
                Ok(WorkerMsg::Client(stream, peer)) => {
                    if matches!(self.instance, Instance::Ready(_)) {
                        self.serve(stream, peer);
                    } else {
                        self.refuse(stream, peer);
                        self.maybe_reload();
                    }
                }
                Ok(WorkerMsg::Reload) => {
                    info!("reload requested");
                    self.drop_instance();
                    self.maybe_reload();
                }
                Err(RecvTimeoutError::Timeout) => self.maybe_reload(),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.drop_instance();
    }

    /// Can this worker's module be served at all? Checked once at startup;
    /// the instance itself is built later in [`Self::maybe_reload`].
    fn check_loadable(&self) -> Result<(), ModuleError> {
        if !self.descriptor.source.is_file() {
            return Err(ModuleError::SourceMissing(self.descriptor.source.clone()));
        }
        if !self.modules.contains(&self.descriptor.entry) {
            return Err(ModuleError::NotRegistered(self.descriptor.entry.clone()));
        }
        Ok(())
    }

    /// Rebuild the instance if the source changed or it was never built.
    fn maybe_reload(&mut self) {
        let source_changed = match self.tracker.changed(&self.descriptor.source) {
            Ok(changed) => changed,
            Err(err) => {
                warn!(%err, "could not check module source");
                false
            }
        };
        if !source_changed && !matches!(self.instance, Instance::Absent) {
            return;
        }
        debug!("reloading module and instance");
        self.drop_instance();
        self.instance = Instance::Errored;
        match self.modules.construct(&self.descriptor.entry) {
            Ok(instance) => {
                info!("instance constructed");
                self.instance = Instance::Ready(instance);
            }
            Err(err) => error!(%err, "failed to construct instance"),
        }
    }

    fn drop_instance(&mut self) {
        if let Instance::Ready(mut instance) =
            std::mem::replace(&mut self.instance, Instance::Absent)
        {
            debug!("releasing module instance");
            instance.release();
        }
    }

    /// Serve one client connection until close.
    fn serve(&mut self, mut stream: TcpStream, peer: SocketAddr) {
        debug!(client = %peer.ip(), "serving client");
        loop {
            match self.step(&mut stream, peer) {
                Step::Continue => {}
                Step::Close => break,
                Step::Fail(envelope) => {
                    if let Err(err) = send_response(&mut stream, &envelope, self.timeouts.read) {
                        debug!(%err, "could not send error to client");
                    }
                    break;
                }
            }
        }
        debug!(client = %peer.ip(), "closed client");
    }

    /// One request/response exchange.
    fn step(&mut self, stream: &mut TcpStream, peer: SocketAddr) -> Step {
        let msg = match blocking::read_frame(stream, self.timeouts.read) {
            Ok(msg) => msg,
            Err(err) if err.is_peer_gone() => {
                debug!(%err, "client lost");
                return Step::Close;
            }
            Err(err) => return Step::Fail(Response::from_error(&err)),
        };
        let call = match mh_wire::require_fields(&msg, &["function", "args", "keep_alive"])
            .and_then(|()| Call::from_value(&msg))
        {
            Ok(call) => call,
            Err(err) => return Step::Fail(Response::from_error(&err)),
        };
        let Some(function) = call.function.as_deref() else {
            debug!("client left gracefully");
            return Step::Close;
        };
        debug!(function, "dispatching");
        match self.dispatch(function, &call.args, peer) {
            Ok(value) => {
                if let Err(err) =
                    send_response(stream, &Response::success(value), self.timeouts.read)
                {
                    debug!(%err, "client lost while replying");
                    return Step::Close;
                }
                if call.keep_alive {
                    Step::Continue
                } else {
                    Step::Close
                }
            }
            Err(err) => Step::Fail(Response::from_error(&err)),
        }
    }

    /// Route a call into the instance: through the configured dispatcher, or
    /// by direct lookup in the instance's capability set.
    fn dispatch(
        &mut self,
        function: &str,
        args: &[Value],
        peer: SocketAddr,
    ) -> Result<Value, ModuleError> {
        let Instance::Ready(instance) = &mut self.instance else {
            return Err(ModuleError::NoInstance);
        };
        if let Some(dispatcher) = &self.descriptor.dispatcher {
            debug!("using instance dispatcher");
            return instance.dispatch(dispatcher, peer.ip(), function, args);
        }
        let methods = instance.methods();
        if function == "_help" && !methods.iter().any(|m| m == "_help") {
            return Ok(Value::from(methods));
        }
        if !methods.iter().any(|m| m == function) {
            return Err(ModuleError::UnknownFunction);
        }
        debug!("using instance direct call");
        instance.call(function, args)
    }

    /// No usable instance: tell the client and close.
    fn refuse(&mut self, mut stream: TcpStream, peer: SocketAddr) {
        warn!(client = %peer.ip(), "no instance to serve client");
        let envelope = Response::from_error(&ModuleError::NoInstance);
        if let Err(err) = send_response(&mut stream, &envelope, self.timeouts.read) {
            debug!(%err, "could not send error to client");
        }
    }
}

fn send_response(
    stream: &mut TcpStream,
    envelope: &Response,
    deadline: std::time::Duration,
) -> Result<(), WireError> {
    let bytes = mh_wire::encode(envelope)?;
    blocking::write_frame(stream, &bytes, deadline)
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
