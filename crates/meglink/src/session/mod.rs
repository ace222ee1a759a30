// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stream sessions: socket ownership, lifecycle and the receive pipeline.
//!
//! A [`StreamSession`] owns one TCP socket to the instrument's data port,
//! one receiving thread and one processing thread:
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                        StreamSession                         |
//! |                                                              |
//! |  receiver thread                                             |
//! |    recv(8192) -> accumulator -> codec -> typed frame         |
//! |                      |                     |                 |
//! |                 (resync scan)         fan-out to RingStore   |
//! |                                       + frame observers      |
//! |                                                              |
//! |  processor thread                                            |
//! |    data queue -> processed window                            |
//! +--------------------------------------------------------------+
//! ```
//!
//! # State machine
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Streaming
//!                     |             |            |
//!                     +------- (failure) ------->+--> Error
//!                                                |
//!                                          close()|--> Disconnected
//! ```
//!
//! `Error` is reachable from any live state and is sticky until `close()`.
//! `Disconnected` is terminal for a session: reconnecting means
//! constructing a fresh session.

pub mod accumulator;
pub mod stats;
pub mod status;

use crate::codec::data::{self, DataFrame};
use crate::codec::DecodeErrorKind;
use crate::config::{
    ACCUMULATOR_KEEP_BYTES, ACTIVITY_WINDOW_ROWS, DATA_FRAME_SIZE, LinkConfig,
    MAX_ACCUMULATOR_BYTES, MAX_CONSECUTIVE_RECV_ERRORS, MAX_EMPTY_READS,
    MAX_FRAMES_PER_CYCLE, MONITOR_WAIT,
};
use crate::error::{Error, Result};
use crate::store::{ChannelActivity, RingStore};
use accumulator::Accumulator;
use parking_lot::{Mutex, RwLock};
use socket2::{Domain, Protocol, Socket, Type};
use stats::{ConnectionStats, SessionStats};
use std::fmt;
use std::io::{self, Read};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

// ============================================================================
// Lifecycle states
// ============================================================================

/// Session lifecycle states.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No connection; terminal once a session has been closed.
    #[default]
    Disconnected,

    /// Connection attempt in progress.
    Connecting,

    /// Socket established, threads not yet streaming.
    Connected,

    /// Receiver and processor running.
    Streaming,

    /// Unrecoverable failure; sticky until `close()`.
    Error,
}

impl SessionState {
    /// Whether the session holds (or is establishing) a live socket.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Connected | SessionState::Streaming
        )
    }

    /// Whether the socket is established.
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected | SessionState::Streaming)
    }

    /// Whether the session can never stream again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Disconnected | SessionState::Error)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Streaming => "streaming",
            SessionState::Error => "error",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// Observers
// ============================================================================

/// Callback capability for decoded frames.
///
/// Observers run on the receiver thread in registration order; a panic in
/// one observer is isolated and the others still run.
pub trait FrameObserver: Send + Sync {
    /// Called once per decoded frame, in delivery order.
    fn on_frame(&self, frame: &Arc<DataFrame>);
}

/// Callback capability for lifecycle transitions.
pub trait StateObserver: Send + Sync {
    /// Called on every state change with the new state.
    fn on_state_change(&self, state: SessionState);
}

// ============================================================================
// Socket construction
// ============================================================================

/// Open a TCP stream with the options the instrument link requires:
/// `SO_REUSEADDR`, `TCP_NODELAY`, an enlarged `SO_RCVBUF` and a bounded
/// connect; optionally a read timeout for streaming use.
pub(crate) fn open_stream(
    host: &str,
    port: u16,
    connect_timeout: Duration,
    recv_timeout: Option<Duration>,
    recv_buffer_size: usize,
) -> io::Result<TcpStream> {
    let addr = (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "host did not resolve"))?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nodelay(true)?;
    socket.set_recv_buffer_size(recv_buffer_size)?;
    socket.connect_timeout(&addr.into(), connect_timeout)?;

    let stream: TcpStream = socket.into();
    stream.set_read_timeout(recv_timeout)?;
    Ok(stream)
}

#[inline]
fn is_read_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

// ============================================================================
// Stream session
// ============================================================================

pub(crate) struct SessionShared {
    host: String,
    port: u16,
    config: LinkConfig,
    state: Mutex<SessionState>,
    running: AtomicBool,
    socket: Mutex<Option<TcpStream>>,
    epoch: Instant,
    stats: SessionStats,
    store: RingStore,
    frame_observers: RwLock<Vec<Arc<dyn FrameObserver>>>,
    state_observers: RwLock<Vec<Arc<dyn StateObserver>>>,
}

impl SessionShared {
    fn new(host: String, port: u16, config: LinkConfig) -> Self {
        Self {
            host,
            port,
            config,
            state: Mutex::new(SessionState::Disconnected),
            running: AtomicBool::new(false),
            socket: Mutex::new(None),
            epoch: Instant::now(),
            stats: SessionStats::new(),
            store: RingStore::new(),
            frame_observers: RwLock::new(Vec::new()),
            state_observers: RwLock::new(Vec::new()),
        }
    }
}

/// A streaming connection to the instrument's data port.
///
/// Exclusively owns its socket, accumulator, statistics and threads. All
/// consumer-facing reads go through thread-safe queues and detached
/// snapshots.
pub struct StreamSession {
    shared: Arc<SessionShared>,
    rx_thread: Option<JoinHandle<()>>,
    process_thread: Option<JoinHandle<()>>,
    opened: bool,
}

impl StreamSession {
    /// Create a session targeting `host:port`. No I/O happens until
    /// [`open`](Self::open).
    pub fn new(host: impl Into<String>, port: u16, config: LinkConfig) -> Self {
        Self {
            shared: Arc::new(SessionShared::new(host.into(), port, config)),
            rx_thread: None,
            process_thread: None,
            opened: false,
        }
    }

    /// Target host.
    pub fn host(&self) -> &str {
        &self.shared.host
    }

    /// Target port.
    pub fn port(&self) -> u16 {
        self.shared.port
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.shared.state.lock()
    }

    /// Register a frame observer. Observers registered while streaming see
    /// only frames delivered after registration.
    pub fn add_frame_observer(&self, observer: Arc<dyn FrameObserver>) {
        self.shared.frame_observers.write().push(observer);
    }

    /// Register a lifecycle observer.
    pub fn add_state_observer(&self, observer: Arc<dyn StateObserver>) {
        self.shared.state_observers.write().push(observer);
    }

    /// Connect and start streaming.
    ///
    /// Valid exactly once per session; a closed session stays closed.
    pub fn open(&mut self) -> Result<()> {
        if self.opened {
            return Err(Error::lifecycle("open", self.state()));
        }
        self.opened = true;

        set_state(&self.shared, SessionState::Connecting);
        log::info!(
            "[session] connecting to {}:{}",
            self.shared.host,
            self.shared.port
        );

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
                    "[session] connect to {}:{} failed: {}",
                    self.shared.host,
                    self.shared.port,
                    e
                );
                set_state(&self.shared, SessionState::Error);
                return Err(e.into());
            }
        };

        set_state(&self.shared, SessionState::Connected);
        *self.shared.socket.lock() = Some(stream);
        self.shared.running.store(true, Ordering::Relaxed);

        let rx_shared = Arc::clone(&self.shared);
        let rx = thread::Builder::new()
            .name("meglink-rx".to_string())
            .spawn(move || rx_loop(&rx_shared, rx_stream));
        let proc_shared = Arc::clone(&self.shared);
        let processor = thread::Builder::new()
            .name("meglink-proc".to_string())
            .spawn(move || processor_loop(&proc_shared));

        match (rx, processor) {
            (Ok(rx), Ok(processor)) => {
                self.rx_thread = Some(rx);
                self.process_thread = Some(processor);
                set_state(&self.shared, SessionState::Streaming);
                log::info!("[session] streaming started");
                Ok(())
            }
            (rx, processor) => {
                self.shared.running.store(false, Ordering::Relaxed);
                if let Some(sock) = self.shared.socket.lock().take() {
                    let _ = sock.shutdown(Shutdown::Both);
                }
                if let Ok(h) = rx {
                    let _ = h.join();
                }
                if let Ok(h) = processor {
                    let _ = h.join();
                }
                set_state(&self.shared, SessionState::Error);
                Err(Error::Transport(io::Error::other(
                    "failed to spawn session threads",
                )))
            }
        }
    }

    /// Stop streaming, join both threads and close the socket.
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
        if let Some(h) = self.process_thread.take() {
            let _ = h.join();
        }
        set_state(&self.shared, SessionState::Disconnected);
        log::info!(
            "[session] closed: frames={} sync_losses={} bytes={}",
            self.shared.stats.frames_parsed(),
            self.shared.stats.sync_losses(),
            self.shared.stats.bytes_received()
        );
    }

    /// Statistics snapshot; readable in every state.
    pub fn stats(&self) -> ConnectionStats {
        let state = self.state();
        self.shared.stats.snapshot(
            state.is_connected(),
            state == SessionState::Streaming,
            self.shared.store.queue_depths(),
        )
    }

    // ========================================================================
    // Consumer views (lifecycle-gated)
    // ========================================================================

    fn ensure_live(&self, op: &'static str) -> Result<()> {
        let state = self.state();
        if state.is_live() {
            Ok(())
        } else {
            Err(Error::lifecycle(op, state))
        }
    }

    /// Drain the monitor queue into a fresh row block, waiting up to 100 ms
    /// for a first frame. `Ok(None)` when no frame arrives in time.
    pub fn monitor_data(&self, max_samples: usize) -> Result<Option<Vec<Vec<f32>>>> {
        self.ensure_live("monitor_data")?;
        Ok(self.shared.store.monitor_snapshot(max_samples, MONITOR_WAIT))
    }

    /// Copy of the last `n_samples` rows of the raw window.
    pub fn latest_data(&self, n_samples: usize) -> Result<Option<Vec<Vec<f32>>>> {
        self.ensure_live("latest_data")?;
        Ok(self.shared.store.recent_samples(n_samples))
    }

    /// Clear the prediction queue and collect frames for `duration_s`.
    pub fn start_prediction(&self, duration_s: f64) -> Result<()> {
        self.ensure_live("prediction_start")?;
        log::info!("[session] prediction collection for {:.1}s", duration_s);
        self.shared
            .store
            .start_prediction(Duration::from_secs_f64(duration_s.max(0.0)));
        Ok(())
    }

    /// Drain the collected prediction frames and close the gate.
    pub fn prediction_data(&self) -> Result<Option<Vec<Vec<f32>>>> {
        self.ensure_live("prediction_data")?;
        Ok(self.shared.store.prediction_snapshot())
    }

    /// Whether a prediction collection is active.
    pub fn prediction_active(&self) -> bool {
        self.shared.store.prediction_active()
    }

    /// Per-channel activity over the last 100 rows.
    pub fn channel_activity(&self) -> Result<Option<ChannelActivity>> {
        self.ensure_live("channel_activity")?;
        Ok(self.shared.store.channel_activity(ACTIVITY_WINDOW_ROWS))
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// State transitions
// ============================================================================

fn set_state(shared: &SessionShared, new: SessionState) {
    let old = {
        let mut state = shared.state.lock();
        if *state == new {
            return;
        }
        std::mem::replace(&mut *state, new)
    };
    log::info!(
        "[session] {}:{} state {} -> {}",
        shared.host,
        shared.port,
        old,
        new
    );

    for observer in shared.state_observers.read().iter() {
        let result = panic::catch_unwind(AssertUnwindSafe(|| observer.on_state_change(new)));
        if result.is_err() {
            log::error!("[session] state observer panicked; continuing");
        }
    }
}

// ============================================================================
// Receiver thread
// ============================================================================

fn rx_loop(shared: &SessionShared, mut socket: TcpStream) {
    log::info!("[rx] receive loop started");

    let mut chunk = vec![0u8; shared.config.recv_buffer];
    let mut acc = Accumulator::new();
    let mut empty_reads = 0u32;
    let mut recv_errors = 0u32;

    while shared.running.load(Ordering::Relaxed) && shared.state.lock().is_live() {
        match socket.read(&mut chunk) {
            Ok(0) => {
                empty_reads += 1;
                if empty_reads >= MAX_EMPTY_READS {
                    log::error!("[rx] too many empty reads, peer is gone");
                    fail_session(shared);
                    break;
                }
                // EOF returns immediately; pace the retries to the recv
                // timeout so the limit spans ~5 s.
                thread::sleep(shared.config.recv_timeout);
            }
            Ok(n) => {
                empty_reads = 0;
                recv_errors = 0;
                shared.stats.record_bytes(n as u64);
                acc.extend(&chunk[..n]);
                drain_frames(shared, &mut acc);
                shared.stats.maybe_roll_throughput();
            }
            Err(ref e) if is_read_timeout(e) => continue,
            Err(e) => {
                recv_errors += 1;
                if recv_errors > MAX_CONSECUTIVE_RECV_ERRORS {
                    log::error!("[rx] too many consecutive recv errors: {}", e);
                    fail_session(shared);
                    break;
                }
                log::debug!("[rx] recv error: {}", e);
                thread::sleep(Duration::from_millis(10));
            }
        }
    }

    log::info!("[rx] receive loop stopped");
}

/// Transition to Error and release the socket so all reads unblock.
fn fail_session(shared: &SessionShared) {
    set_state(shared, SessionState::Error);
    if let Some(sock) = shared.socket.lock().take() {
        let _ = sock.shutdown(Shutdown::Both);
    }
}

/// Drain up to [`MAX_FRAMES_PER_CYCLE`] frames from the accumulator,
/// resynchronizing past undecodable bytes, then enforce the size cap.
fn drain_frames(shared: &SessionShared, acc: &mut Accumulator) {
    let mut drained = 0;
    while drained < MAX_FRAMES_PER_CYCLE {
        match data::decode(acc.as_slice(), 0) {
            Ok(mut frame) => {
                frame.seq = shared.stats.record_frame();
                frame.timestamp = shared.epoch.elapsed().as_secs_f64();
                let frame = Arc::new(frame);

                let dropped = shared.store.dispatch(&frame);
                shared.stats.record_dropped(dropped);
                notify_frame_observers(shared, &frame);

                acc.advance(DATA_FRAME_SIZE);
                drained += 1;
            }
            Err(ref e) if e.kind == DecodeErrorKind::ShortBuffer => break,
            Err(e) => {
                log::debug!("[rx] frame rejected: {}", e);
                match acc.find_sync(data::header_matches_at) {
                    Some(pos) => acc.advance(pos),
                    None => {
                        acc.skip_unsynced();
                    }
                }
                shared.stats.record_sync_loss();
            }
        }
    }

    let truncated = acc.enforce_cap(MAX_ACCUMULATOR_BYTES, ACCUMULATOR_KEEP_BYTES);
    if truncated > 0 {
        log::debug!("[rx] accumulator truncated by {} bytes", truncated);
    }
    shared.stats.set_buffer_size(acc.len());
}

fn notify_frame_observers(shared: &SessionShared, frame: &Arc<DataFrame>) {
    for observer in shared.frame_observers.read().iter() {
        let result = panic::catch_unwind(AssertUnwindSafe(|| observer.on_frame(frame)));
        if result.is_err() {
            log::error!("[rx] frame observer panicked; continuing");
        }
    }
}

// ============================================================================
// Processor thread
// ============================================================================

/// Drain the main data queue into the processed window. Exists to decouple
/// the producer from slow downstream consumers.
fn processor_loop(shared: &SessionShared) {
    while shared.running.load(Ordering::Relaxed) && shared.state.lock().is_live() {
        match shared.store.pop_data_frame() {
            Some(frame) => shared.store.push_processed(&frame),
            None => thread::sleep(shared.config.recv_timeout),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
