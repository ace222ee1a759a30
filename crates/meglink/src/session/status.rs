// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sensor-status session.
//!
//! Connects to the instrument's status port and keeps only the most recent
//! decoded [`SensorStatus`]. Same receive discipline as the data session -
//! bounded recv timeout, empty-read and error limits, validated
//! resynchronization, accumulator cap - but no fan-out: status frames
//! arrive at a few hertz and consumers only ever want the latest one.

use super::{is_read_timeout, open_stream, SessionState};
use crate::codec::status::{self, SensorStatus};
use crate::codec::DecodeErrorKind;
use crate::config::{
    ACCUMULATOR_KEEP_BYTES, LinkConfig, MAX_ACCUMULATOR_BYTES, MAX_CONSECUTIVE_RECV_ERRORS,
    MAX_EMPTY_READS,
};
use crate::error::{Error, Result};
use crate::session::accumulator::Accumulator;
use parking_lot::Mutex;
use std::io::Read;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub(crate) struct StatusShared {
    pub(crate) host: String,
    pub(crate) port: u16,
    config: LinkConfig,
    pub(crate) state: Mutex<SessionState>,
    running: AtomicBool,
    pub(crate) socket: Mutex<Option<TcpStream>>,
    latest: Mutex<Option<SensorStatus>>,
    frames_parsed: AtomicU64,
    sync_losses: AtomicU64,
    bytes_received: AtomicU64,
}

/// A streaming connection to the instrument's status port.
pub struct StatusSession {
    shared: Arc<StatusShared>,
    rx_thread: Option<JoinHandle<()>>,
    opened: bool,
}

impl StatusSession {
    /// Create a session targeting `host:port`. No I/O until [`open`](Self::open).
    pub fn new(host: impl Into<String>, port: u16, config: LinkConfig) -> Self {
        Self {
            shared: Arc::new(StatusShared {
                host: host.into(),
                port,
                config,
                state: Mutex::new(SessionState::Disconnected),
                running: AtomicBool::new(false),
                socket: Mutex::new(None),
                latest: Mutex::new(None),
                frames_parsed: AtomicU64::new(0),
                sync_losses: AtomicU64::new(0),
                bytes_received: AtomicU64::new(0),
            }),
            rx_thread: None,
            opened: false,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.shared.state.lock()
    }

    /// Most recent decoded status, or `None` before the first frame.
    pub fn latest(&self) -> Option<SensorStatus> {
        self.shared.latest.lock().clone()
    }

    /// Status frames decoded so far.
    pub fn frames_parsed(&self) -> u64 {
        self.shared.frames_parsed.load(Ordering::Relaxed)
    }

    /// Sync losses so far.
    pub fn sync_losses(&self) -> u64 {
        self.shared.sync_losses.load(Ordering::Relaxed)
    }

    /// Connect and start receiving. Valid exactly once per session.
    pub fn open(&mut self) -> Result<()> {
        if self.opened {
            return Err(Error::lifecycle("open", self.state()));
        }
        self.opened = true;

        set_status_state(&self.shared, SessionState::Connecting);
        let stream = open_stream(
            &self.shared.host,
            self.shared.port,
            self.shared.config.connect_timeout,
            Some(self.shared.config.recv_timeout),
            self.shared.config.socket_recv_buffer,
        )
        .and_then(|s| s.try_clone().map(|clone| (s, clone)));

        let (stream, rx_stream) = match stream {
            Ok(pair) => pair,
            Err(e) => {
                log::error!(
                    "[status] connect to {}:{} failed: {}",
                    self.shared.host,
                    self.shared.port,
                    e
                );
                set_status_state(&self.shared, SessionState::Error);
                return Err(e.into());
            }
        };

        set_status_state(&self.shared, SessionState::Connected);
        *self.shared.socket.lock() = Some(stream);
        self.shared.running.store(true, Ordering::Relaxed);

        let shared = Arc::clone(&self.shared);
        match thread::Builder::new()
            .name("meglink-status-rx".to_string())
            .spawn(move || status_rx_loop(&shared, rx_stream))
        {
            Ok(handle) => {
                self.rx_thread = Some(handle);
                set_status_state(&self.shared, SessionState::Streaming);
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Relaxed);
                if let Some(sock) = self.shared.socket.lock().take() {
                    let _ = sock.shutdown(Shutdown::Both);
                }
                set_status_state(&self.shared, SessionState::Error);
                Err(e.into())
            }
        }
    }

    /// Stop receiving, join the thread and close the socket.
    pub fn close(&mut self) {
        if !self.opened {
            return;
        }
        self.shared.running.store(false, Ordering::Relaxed);
        if let Some(sock) = self.shared.socket.lock().take() {
            let _ = sock.shutdown(Shutdown::Both);
        }
        if let Some(h) = self.rx_thread.take() {
            let _ = h.join();
        }
        set_status_state(&self.shared, SessionState::Disconnected);
        log::info!(
            "[status] closed: frames={} sync_losses={}",
            self.frames_parsed(),
            self.sync_losses()
        );
    }
}

impl Drop for StatusSession {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// State transitions
// ============================================================================

fn set_status_state(shared: &StatusShared, new: SessionState) {
    let mut state = shared.state.lock();
    if *state == new {
        return;
    }
    let old = std::mem::replace(&mut *state, new);
    drop(state);
    log::info!(
        "[status] {}:{} state {} -> {}",
        shared.host,
        shared.port,
        old,
        new
    );
}

/// Transition to Error and release the socket so the read unblocks.
fn fail_status(shared: &StatusShared) {
    set_status_state(shared, SessionState::Error);
    if let Some(sock) = shared.socket.lock().take() {
        let _ = sock.shutdown(Shutdown::Both);
    }
}

// ============================================================================
// Receiver thread
// ============================================================================

fn status_rx_loop(shared: &StatusShared, mut socket: TcpStream) {
    log::info!("[status] receive loop started");

    let mut chunk = vec![0u8; shared.config.status_recv_buffer];
    let mut acc = Accumulator::new();
    let mut empty_reads = 0u32;
    let mut recv_errors = 0u32;

    while shared.running.load(Ordering::Relaxed) && shared.state.lock().is_live() {
        match socket.read(&mut chunk) {
            Ok(0) => {
                empty_reads += 1;
                if empty_reads >= MAX_EMPTY_READS {
                    log::error!("[status] too many empty reads, peer is gone");
                    fail_status(shared);
                    break;
                }
                thread::sleep(shared.config.recv_timeout);
            }
            Ok(n) => {
                empty_reads = 0;
                recv_errors = 0;
                shared.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
                acc.extend(&chunk[..n]);
                drain_status_frames(shared, &mut acc);
            }
            Err(ref e) if is_read_timeout(e) => continue,
            Err(e) => {
                recv_errors += 1;
                if recv_errors > MAX_CONSECUTIVE_RECV_ERRORS {
                    log::error!("[status] too many consecutive recv errors: {}", e);
                    fail_status(shared);
                    break;
                }
                log::debug!("[status] recv error: {}", e);
                thread::sleep(Duration::from_millis(10));
            }
        }
    }

    log::info!("[status] receive loop stopped");
}

fn drain_status_frames(shared: &StatusShared, acc: &mut Accumulator) {
    loop {
        match status::decode(acc.as_slice(), 0) {
            Ok(mut decoded) => {
                let total = status::frame_size(decoded.declared_payload_size);
                decoded.timestamp = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs_f64())
                    .unwrap_or(0.0);
                log::debug!("[status] parsed frame {}", decoded.frame_number);
                shared.frames_parsed.fetch_add(1, Ordering::Relaxed);
                *shared.latest.lock() = Some(decoded);
                acc.advance(total);
            }
            Err(ref e) if e.kind == DecodeErrorKind::ShortBuffer => break,
            Err(e) => {
                log::debug!("[status] frame rejected: {}", e);
                match acc.find_sync(status::header_matches_at) {
                    Some(pos) => acc.advance(pos),
                    None => {
                        acc.skip_unsynced();
                    }
                }
                shared.sync_losses.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    acc.enforce_cap(MAX_ACCUMULATOR_BYTES, ACCUMULATOR_KEEP_BYTES);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::status::SensorFlags;

    fn test_shared() -> StatusShared {
        StatusShared {
            host: "127.0.0.1".to_string(),
            port: 0,
            config: LinkConfig::default(),
            state: Mutex::new(SessionState::Streaming),
            running: AtomicBool::new(true),
            socket: Mutex::new(None),
            latest: Mutex::new(None),
            frames_parsed: AtomicU64::new(0),
            sync_losses: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        }
    }

    fn all_active_frame(n: u32) -> Vec<u8> {
        let flags = vec![
            SensorFlags {
                act: 1,
                lls: 0,
                sls: 0,
                fls: 0
            };
            64
        ];
        status::encode(n, "OPM", &flags, 38_400)
    }

    #[test]
    fn test_drain_keeps_only_latest() {
        let shared = test_shared();
        let mut acc = Accumulator::new();
        acc.extend(&all_active_frame(1));
        acc.extend(&all_active_frame(2));
        drain_status_frames(&shared, &mut acc);

        assert_eq!(shared.frames_parsed.load(Ordering::Relaxed), 2);
        let latest = shared.latest.lock().clone().unwrap();
        assert_eq!(latest.frame_number, 2);
        assert!(latest.timestamp > 0.0);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_drain_resyncs_on_garbage_prefix() {
        let shared = test_shared();
        let mut acc = Accumulator::new();
        acc.extend(&[0x11, 0x22, 0x33]);
        acc.extend(&all_active_frame(9));
        drain_status_frames(&shared, &mut acc);

        assert_eq!(shared.sync_losses.load(Ordering::Relaxed), 1);
        assert_eq!(shared.frames_parsed.load(Ordering::Relaxed), 1);
        assert_eq!(shared.latest.lock().clone().unwrap().frame_number, 9);
    }

    #[test]
    fn test_drain_waits_for_variable_payload() {
        let shared = test_shared();
        let frame = all_active_frame(3);
        let (head, tail) = frame.split_at(10_000);

        let mut acc = Accumulator::new();
        acc.extend(head);
        drain_status_frames(&shared, &mut acc);
        assert_eq!(shared.frames_parsed.load(Ordering::Relaxed), 0);
        assert_eq!(acc.len(), 10_000);

        acc.extend(tail);
        drain_status_frames(&shared, &mut acc);
        assert_eq!(shared.frames_parsed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_latest_none_before_open() {
        let session = StatusSession::new("127.0.0.1", 1, LinkConfig::default());
        assert!(session.latest().is_none());
        assert_eq!(session.state(), SessionState::Disconnected);
    }
}
