// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transient connection probe.
//!
//! Opens its own short-lived connection to the data port, reads at least
//! three frames worth of bytes, decodes as many frames as it can find, and
//! reports timing and throughput. Never touches a persistent session.

use crate::codec::data;
use crate::config::DATA_FRAME_SIZE;
use crate::error::Result;
use crate::session::open_stream;
use std::io::Read;
use std::time::{Duration, Instant};

/// Bytes the probe tries to collect before scanning (three frames).
const PROBE_TARGET_BYTES: usize = DATA_FRAME_SIZE * 3;

/// Per-read timeout while collecting probe bytes.
const PROBE_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Result of a connection probe.
#[derive(Clone, Debug)]
pub struct ProbeReport {
    /// Time to establish the TCP connection, in milliseconds.
    pub connection_time_ms: f64,

    /// Throughput over the read phase, in Mbps.
    pub throughput_mbps: f64,

    /// Complete frames decoded from the collected bytes.
    pub frames_found: usize,

    /// Bytes collected during the read phase.
    pub total_bytes_received: usize,
}

impl ProbeReport {
    /// Whether the peer produced at least one decodable frame.
    pub fn ok(&self) -> bool {
        self.frames_found > 0
    }
}

/// Probe `host:port` within `timeout`.
///
/// Connection failures are returned as transport errors; a connected peer
/// that produces no decodable frames yields a report with
/// `frames_found == 0`.
pub fn probe(host: &str, port: u16, timeout: Duration) -> Result<ProbeReport> {
    log::info!("[probe] testing connection to {}:{}", host, port);

    let connect_start = Instant::now();
    let mut stream = open_stream(host, port, timeout, Some(PROBE_READ_TIMEOUT), 1024 * 1024)?;
    let connection_time_ms = connect_start.elapsed().as_secs_f64() * 1000.0;

    let read_start = Instant::now();
    let deadline = read_start + timeout;
    let mut collected = Vec::with_capacity(PROBE_TARGET_BYTES);
    let mut chunk = vec![0u8; 8192];

    while collected.len() < PROBE_TARGET_BYTES && Instant::now() < deadline {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => collected.extend_from_slice(&chunk[..n]),
            Err(ref e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                break
            }
            Err(e) => {
                log::debug!("[probe] read error: {}", e);
                break;
            }
        }
    }
    drop(stream);

    let read_secs = read_start.elapsed().as_secs_f64();
    let throughput_mbps = if read_secs > 0.0 {
        (collected.len() as f64 * 8.0) / (read_secs * 1_000_000.0)
    } else {
        0.0
    };

    let frames_found = count_frames(&collected);

    log::info!(
        "[probe] {} bytes in {:.3}s, {:.1} Mbps, {} frames",
        collected.len(),
        read_secs,
        throughput_mbps,
        frames_found
    );

    Ok(ProbeReport {
        connection_time_ms,
        throughput_mbps,
        frames_found,
        total_bytes_received: collected.len(),
    })
}

/// Count decodable frames in `bytes` with a scan-and-skip walk.
fn count_frames(bytes: &[u8]) -> usize {
    let mut frames = 0;
    let mut pos = 0;
    while pos + DATA_FRAME_SIZE <= bytes.len() {
        if data::decode(bytes, pos).is_ok() {
            frames += 1;
            pos += DATA_FRAME_SIZE;
        } else {
            pos += 1;
        }
    }
    frames
}

// ============================================================================
// Tests
// ============================================================================
