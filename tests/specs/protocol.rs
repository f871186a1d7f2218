// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Handshake-level specs: ping, help, meta commands, and rejections.

use std::net::TcpStream;
use std::time::Duration;

use serde_json::json;

use mh_client::ClientError;
use mh_wire::{blocking, Response};

use crate::support::TestServer;

const READ: Duration = Duration::from_secs(2);

#[test]
fn ping_echoes_the_client_address_from_a_literal_frame() {
    let server = TestServer::start(&[]);

    let mut stream = TcpStream::connect(("127.0.0.1", server.port)).unwrap();
    let local_port = stream.local_addr().unwrap().port();
    stream.set_nonblocking(true).unwrap();

    // The exact bytes of a ping handshake
    blocking::write_frame(&mut stream, b"%7B%22name%22%3A%22_ping%22%7D\n", READ).unwrap();

    let value = blocking::read_frame(&mut stream, READ).unwrap();
    let response: Response = serde_json::from_value(value).unwrap();
    assert!(!response.error);
    assert_eq!(response.traceback, "");
    assert_eq!(response.response, json!(["127.0.0.1", local_port]));

    // The server closes after the reply
    assert!(blocking::read_frame(&mut stream, READ).is_err());
}

#[test]
fn ping_via_the_client_library() {
    let server = TestServer::start(&[]);
    let (ip, _port) = server.client().ping().unwrap();
    assert_eq!(ip, "127.0.0.1");
}

#[test]
fn help_lists_registered_modules_then_the_protocol_description() {
    let server = TestServer::start(&[
        ("modA", "calc", None),
        ("modB", "calc", None),
    ]);
    let client = server.client();
    assert!(crate::support::wait_until(|| {
        client.get_modules("").map(|names| names.len() == 2).unwrap_or(false)
    }));

    let help = client.help().unwrap();
    assert!(
        help.starts_with("Available modules: modA, modB"),
        "unexpected help prefix: {help}"
    );
    assert!(help.contains("keep_alive"));
    assert!(help.contains("_ping"));
}

#[test]
fn unknown_module_is_rejected_and_the_connection_closed() {
    let server = TestServer::start(&[]);
    let err = server.client().com("ghost", "anything", &[]).unwrap_err();
    match err {
        ClientError::Server { message, traceback } => {
            assert_eq!(message, "ghost does not exist (case matters)");
            assert!(!traceback.is_empty());
        }
        other => panic!("expected a server error, got {other:?}"),
    }
}

#[test]
fn get_modules_filters_by_prefix() {
    let server = TestServer::start(&[
        ("modA", "calc", None),
        ("modB", "calc", None),
        ("other", "calc", None),
    ]);
    let client = server.client();
    assert!(crate::support::wait_until(|| {
        client.get_modules("").map(|names| names.len() == 3).unwrap_or(false)
    }));

    assert_eq!(client.get_modules("mod").unwrap(), vec!["modA", "modB"]);
    assert_eq!(client.get_modules("other").unwrap(), vec!["other"]);
    assert!(client.get_modules("zzz").unwrap().is_empty());
}

#[test]
fn reload_command_rebuilds_the_instance() {
    let server = TestServer::start(&[("gen", "generational", None)]);
    server.wait_until_serving("gen", "generation");
    let client = server.client();
    assert_eq!(client.com("gen", "generation", &[]).unwrap(), json!(1));

    let confirmation = client.reload("gen").unwrap();
    assert!(confirmation.contains("gen"), "unexpected reload reply: {confirmation}");

    assert!(crate::support::wait_until(|| {
        client.com("gen", "generation", &[]).map(|v| v == json!(2)).unwrap_or(false)
    }));
}

#[test]
fn reload_of_an_unknown_module_is_rejected() {
    let server = TestServer::start(&[]);
    let err = server.client().reload("ghost").unwrap_err();
    match err {
        ClientError::Server { message, .. } => {
            assert_eq!(message, "ghost does not exist (case matters)");
        }
        other => panic!("expected a server error, got {other:?}"),
    }
}

#[test]
fn malformed_handshake_is_a_bad_request() {
    let server = TestServer::start(&[]);

    let mut stream = TcpStream::connect(("127.0.0.1", server.port)).unwrap();
    stream.set_nonblocking(true).unwrap();
    // Valid frame, wrong fields
    let frame = mh_wire::encode(&json!({"module": "calc"})).unwrap();
    blocking::write_frame(&mut stream, &frame, READ).unwrap();

    let value = blocking::read_frame(&mut stream, READ).unwrap();
    let response: Response = serde_json::from_value(value).unwrap();
    assert!(response.error);
    assert_eq!(
        response.response,
        json!("bad request: \"name\" field missing from request")
    );
}
