// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker dispatch specs: calls, keep-alive sequences, graceful close,
//! and hot reload.

use std::net::TcpStream;
use std::time::Duration;

use serde_json::json;

use mh_client::ClientError;
use mh_wire::{blocking, Response, WireError};

use crate::support::TestServer;

const READ: Duration = Duration::from_secs(2);

#[test]
fn call_success_roundtrip() {
    let server = TestServer::start(&[("calc", "calc", None)]);
    server.wait_until_serving("calc", "add");

    let result = server.client().com("calc", "add", &[json!(2), json!(3)]).unwrap();
    assert_eq!(result, json!(5.0));
}

#[test]
fn unknown_function_reports_case_matters_and_closes() {
    let server = TestServer::start(&[("calc", "calc", None)]);
    server.wait_until_serving("calc", "add");

    let err = server.client().com("calc", "mul", &[]).unwrap_err();
    match err {
        ClientError::Server { message, traceback } => {
            assert_eq!(message, "function not found in instance (case matters)");
            assert!(!traceback.is_empty());
        }
        other => panic!("expected a server error, got {other:?}"),
    }
}

#[test]
fn keep_alive_session_serves_in_order() {
    let server = TestServer::start(&[("calc", "calc", None)]);
    server.wait_until_serving("calc", "add");

    let client = server.client();
    let mut session = client.session("calc").unwrap();
    assert_eq!(session.call("add", &[json!(1), json!(1)]).unwrap(), json!(2.0));
    assert_eq!(session.call("add", &[json!(2), json!(2)]).unwrap(), json!(4.0));
    session.close().unwrap();
}

#[test]
fn a_second_client_is_served_after_the_first_session_ends() {
    let server = TestServer::start(&[("calc", "calc", None)]);
    server.wait_until_serving("calc", "add");
    let client = server.client();

    let mut first = client.session("calc").unwrap();
    // The handshake for the second client acks immediately even though the
    // worker is busy; its requests wait on the worker queue
    let mut second = client.session("calc").unwrap();

    assert_eq!(first.call("add", &[json!(1), json!(1)]).unwrap(), json!(2.0));
    first.close().unwrap();

    assert_eq!(second.call("add", &[json!(3), json!(3)]).unwrap(), json!(6.0));
    second.close().unwrap();
}

#[test]
fn graceful_close_sends_no_envelope() {
    let server = TestServer::start(&[("calc", "calc", None)]);
    server.wait_until_serving("calc", "add");

    // Raw socket so the wire is observable
    let mut stream = TcpStream::connect(("127.0.0.1", server.port)).unwrap();
    stream.set_nonblocking(true).unwrap();

    let handshake = mh_wire::encode(&json!({"name": "calc"})).unwrap();
    blocking::write_frame(&mut stream, &handshake, READ).unwrap();
    let ack: Response =
        serde_json::from_value(blocking::read_frame(&mut stream, READ).unwrap()).unwrap();
    assert_eq!(ack.response, json!("ack"));

    let goodbye =
        mh_wire::encode(&json!({"function": null, "args": [], "keep_alive": false})).unwrap();
    blocking::write_frame(&mut stream, &goodbye, READ).unwrap();

    // No reply: the next read observes the close, not an envelope
    let err = blocking::read_frame(&mut stream, READ).unwrap_err();
    assert!(matches!(err, WireError::ConnectionClosed), "got {err:?}");
}

#[test]
fn source_change_rebuilds_the_instance_before_the_next_call() {
    let server = TestServer::start(&[("gen", "generational", None)]);
    server.wait_until_serving("gen", "generation");
    let client = server.client();
    assert_eq!(client.com("gen", "generation", &[]).unwrap(), json!(1));

    server.touch_source("gen", "source v2");

    assert!(crate::support::wait_until(|| {
        client.com("gen", "generation", &[]).map(|v| v == json!(2)).unwrap_or(false)
    }));
}

#[test]
fn worker_help_lists_the_instance_methods() {
    let server = TestServer::start(&[("calc", "calc", None)]);
    server.wait_until_serving("calc", "add");

    let reply = server.client().com("calc", "_help", &[]).unwrap();
    assert_eq!(reply, json!(["add"]));
}

#[test]
fn construction_failure_is_reported_to_the_client() {
    let server = TestServer::start(&[("dead", "broken", None)]);
    let client = server.client();

    // The worker loads (source + entry exist) but the instance never builds
    assert!(crate::support::wait_until(|| {
        matches!(
            client.com("dead", "anything", &[]),
            Err(ClientError::Server { ref message, .. })
                if message == "module failed to load instance"
        )
    }));
}
