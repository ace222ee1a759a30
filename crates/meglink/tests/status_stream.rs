// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end status-stream scenarios over loopback TCP.

use meglink::codec::status::{self, SensorFlags};
use meglink::{LinkConfig, SessionState, StatusSession};
use std::io::Write;
use std::net::TcpListener;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

fn serve_bytes(bytes: Vec<u8>, hold_open: Duration) -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let port = listener.local_addr().expect("local addr").port();
    let handle = thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let _ = stream.write_all(&bytes);
            let _ = stream.flush();
            thread::sleep(hold_open);
        }
    });
    (port, handle)
}

fn test_config() -> LinkConfig {
    LinkConfig::default()
        .with_connect_timeout(Duration::from_secs(2))
        .with_recv_timeout(Duration::from_millis(5))
}

fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < limit {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

fn all_active() -> Vec<SensorFlags> {
    vec![
        SensorFlags {
            act: 1,
            lls: 0,
            sls: 0,
            fls: 0
        };
        64
    ]
}

#[test]
fn status_frame_with_all_sensors_active() {
    let bytes = status::encode(1, "OPM-ARRAY-A", &all_active(), 38_400);
    let (port, server) = serve_bytes(bytes, Duration::from_secs(3));

    let mut session = StatusSession::new("127.0.0.1", port, test_config());
    session.open().expect("open status session");

    assert!(wait_until(Duration::from_secs(2), || session.latest().is_some()));

    let latest = session.latest().expect("status present");
    assert_eq!(latest.frame_number, 1);
    assert_eq!(latest.declared_payload_size, 38_400);
    assert_eq!(latest.sensor_count, 64);
    assert_eq!(latest.status_size, 600);
    assert_eq!(latest.sensors.len(), 64);
    for flags in &latest.sensors {
        assert_eq!(flags.act, 1);
        assert_eq!(flags.lls, 0);
        assert_eq!(flags.sls, 0);
        assert_eq!(flags.fls, 0);
    }
    assert!(latest.labels.starts_with("OPM-ARRAY-A"));
    assert!(latest.timestamp > 0.0);

    session.close();
    assert_eq!(session.state(), SessionState::Disconnected);
    let _ = server.join();
}

#[test]
fn latest_tracks_newest_frame() {
    let mut bytes = status::encode(1, "A", &all_active(), 38_400);
    let mut second = all_active();
    second[10].act = 0;
    second[10].fls = 9;
    bytes.extend_from_slice(&status::encode(2, "B", &second, 38_400));
    let (port, server) = serve_bytes(bytes, Duration::from_secs(3));

    let mut session = StatusSession::new("127.0.0.1", port, test_config());
    session.open().expect("open status session");

    assert!(wait_until(Duration::from_secs(2), || {
        session.frames_parsed() == 2
    }));

    let latest = session.latest().expect("status present");
    assert_eq!(latest.frame_number, 2);
    assert_eq!(latest.sensors[10].act, 0);
    assert_eq!(latest.sensors[10].fls, 9);

    session.close();
    let _ = server.join();
}

#[test]
fn resync_recovers_after_garbage_prefix() {
    let mut bytes = vec![0xDE, 0xAD, 0xBE, 0xEF];
    bytes.extend_from_slice(&status::encode(7, "SYNCED", &all_active(), 38_400));
    let (port, server) = serve_bytes(bytes, Duration::from_secs(3));

    let mut session = StatusSession::new("127.0.0.1", port, test_config());
    session.open().expect("open status session");

    assert!(wait_until(Duration::from_secs(2), || session.latest().is_some()));
    assert_eq!(session.latest().expect("status").frame_number, 7);
    assert_eq!(session.sync_losses(), 1);

    session.close();
    let _ = server.join();
}

#[test]
fn repeated_empty_reads_reach_error_state() {
    let (port, server) = serve_bytes(Vec::new(), Duration::ZERO);

    let mut session = StatusSession::new("127.0.0.1", port, test_config());
    session.open().expect("open status session");

    assert!(wait_until(Duration::from_secs(5), || {
        session.state() == SessionState::Error
    }));
    assert!(session.latest().is_none());

    session.close();
    let _ = server.join();
}
