// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Command wire-format capture over loopback TCP.

use meglink::CommanderClient;
use std::io::Read;
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

/// Capture exactly `expect` bytes from the first client.
fn capture_bytes(expect: usize) -> (u16, thread::JoinHandle<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let port = listener.local_addr().expect("local addr").port();
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let mut captured = vec![0u8; expect];
        stream.read_exact(&mut captured).expect("read command");
        captured
    });
    (port, handle)
}

#[test]
fn activate_sensor_wire_bytes() {
    let payload = b"Sensor|Activate Sensor|5";
    let (port, server) = capture_bytes(4 + payload.len());

    let mut client = CommanderClient::new("127.0.0.1", port, Duration::from_secs(1));
    client.connect().expect("connect");
    client
        .send("Sensor", "Activate Sensor", Some("5"), None)
        .expect("send");

    let captured = server.join().expect("server thread");
    assert_eq!(&captured[..4], &(payload.len() as u32).to_le_bytes());
    assert_eq!(&captured[4..], payload);
}

#[test]
fn convenience_commands_reuse_one_connection() {
    let first = b"Sensor|Activate All";
    let second = b"Sensor|Deactivate Sensor|12";
    let (port, server) = capture_bytes(4 + first.len() + 4 + second.len());

    let mut client = CommanderClient::new("127.0.0.1", port, Duration::from_secs(1));
    client.activate_all().expect("activate all");
    client.toggle_stream(12, false).expect("toggle");
    assert!(client.is_connected());

    let captured = server.join().expect("server thread");
    let (head, tail) = captured.split_at(4 + first.len());
    assert_eq!(&head[..4], &(first.len() as u32).to_le_bytes());
    assert_eq!(&head[4..], first);
    assert_eq!(&tail[..4], &(second.len() as u32).to_le_bytes());
    assert_eq!(&tail[4..], second);
}

#[test]
fn send_reconnects_lazily() {
    let payload = b"DAQ|Set Frequency|750 Hz";
    let (port, server) = capture_bytes(4 + payload.len());

    // No explicit connect(): the first send establishes the connection.
    let mut client = CommanderClient::new("127.0.0.1", port, Duration::from_secs(1));
    assert!(!client.is_connected());
    client
        .send("DAQ", "Set Frequency", Some("750 Hz"), None)
        .expect("send");
    assert!(client.is_connected());

    let captured = server.join().expect("server thread");
    assert_eq!(&captured[4..], payload);
}

#[test]
fn send_failure_forces_disconnect() {
    // Server closes the connection right after accept.
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        drop(stream);
    });

    let mut client = CommanderClient::new("127.0.0.1", port, Duration::from_secs(1));
    client.connect().expect("connect");
    let _ = server.join();

    // The kernel may buffer the first write; keep sending until the reset
    // surfaces, then the client must have dropped its connection.
    let mut failed = false;
    for _ in 0..50 {
        if client.send("Sensor", "Activate All", None, None).is_err() {
            failed = true;
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert!(failed, "send against a closed peer never failed");
    assert!(!client.is_connected());
}
