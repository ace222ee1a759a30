// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-session statistics.
//!
//! Counters are written only by the receiver thread; snapshot callers read
//! them through atomics or a short lock. The frames-per-second estimate is
//! the reciprocal of the mean of the last 100 inter-frame intervals; the
//! throughput figure rolls over a 60 s byte window.

use crate::config::{FPS_WINDOW, STABLE_WINDOW, THROUGHPUT_WINDOW};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

// ============================================================================
// Snapshot types
// ============================================================================

/// Fan-out queue depths at snapshot time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueDepths {
    /// Main data queue.
    pub data: usize,
    /// Monitor queue.
    pub monitor: usize,
    /// Prediction queue.
    pub prediction: usize,
}

/// Snapshot of a data session's counters.
#[derive(Clone, Debug)]
pub struct ConnectionStats {
    /// Session holds a live socket (Connected or Streaming).
    pub connected: bool,

    /// Session is actively streaming.
    pub streaming: bool,

    /// Frames decoded since the session opened.
    pub total_frames_parsed: u64,

    /// Decoded / (decoded + sync losses), in percent.
    pub parse_success_rate: f64,

    /// Accumulator advances caused by failed decodes.
    pub sync_losses: u64,

    /// Reciprocal of the mean of the last 100 inter-frame intervals.
    pub current_fps: f64,

    /// Rolling throughput over the last 60 s window, in Mbps.
    pub current_throughput_mbps: f64,

    /// Bytes received since the session opened.
    pub total_bytes_received: u64,

    /// Accumulator size in bytes.
    pub buffer_size: usize,

    /// Frames dropped by bounded queues under backpressure.
    pub frames_dropped: u64,

    /// Depths of the fan-out queues.
    pub queue_depths: QueueDepths,

    /// Wall-clock seconds (UNIX epoch) when data last arrived; 0 if never.
    pub last_data_time: f64,

    /// Data arrived within the last second.
    pub connection_stable: bool,
}

// ============================================================================
// Live counters
// ============================================================================

struct Timing {
    last_frame: Option<Instant>,
    intervals: VecDeque<f64>,
    fps: f64,
}

struct Throughput {
    window_start: Instant,
    window_bytes: u64,
    mbps: f64,
}

/// Live statistics for one stream session.
///
/// Only the receiver thread writes; snapshots are taken from request
/// threads.
pub struct SessionStats {
    bytes_received: AtomicU64,
    frames_parsed: AtomicU64,
    sync_losses: AtomicU64,
    frames_dropped: AtomicU64,
    buffer_size: AtomicUsize,

    last_data: Mutex<Option<(Instant, f64)>>,
    timing: Mutex<Timing>,
    throughput: Mutex<Throughput>,
}

impl SessionStats {
    /// Create zeroed statistics.
    pub fn new() -> Self {
        Self {
            bytes_received: AtomicU64::new(0),
            frames_parsed: AtomicU64::new(0),
            sync_losses: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            buffer_size: AtomicUsize::new(0),
            last_data: Mutex::new(None),
            timing: Mutex::new(Timing {
                last_frame: None,
                intervals: VecDeque::with_capacity(FPS_WINDOW),
                fps: 0.0,
            }),
            throughput: Mutex::new(Throughput {
                window_start: Instant::now(),
                window_bytes: 0,
                mbps: 0.0,
            }),
        }
    }

    /// Record a received chunk.
    pub fn record_bytes(&self, n: u64) {
        self.bytes_received.fetch_add(n, Ordering::Relaxed);
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        *self.last_data.lock() = Some((Instant::now(), wall));
        self.throughput.lock().window_bytes += n;
    }

    /// Record a decoded frame; returns its sequence number.
    pub fn record_frame(&self) -> u64 {
        let seq = self.frames_parsed.fetch_add(1, Ordering::Relaxed) + 1;

        let mut timing = self.timing.lock();
        let now = Instant::now();
        if let Some(last) = timing.last_frame {
            let interval = now.duration_since(last).as_secs_f64();
            if timing.intervals.len() == FPS_WINDOW {
                timing.intervals.pop_front();
            }
            timing.intervals.push_back(interval);
            let mean = timing.intervals.iter().sum::<f64>() / timing.intervals.len() as f64;
            timing.fps = if mean > 0.0 { 1.0 / mean } else { 0.0 };
        }
        timing.last_frame = Some(now);
        seq
    }

    /// Record one sync loss.
    pub fn record_sync_loss(&self) {
        self.sync_losses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record frames dropped by a bounded queue.
    pub fn record_dropped(&self, n: u64) {
        if n > 0 {
            self.frames_dropped.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Publish the accumulator size for snapshots.
    pub fn set_buffer_size(&self, n: usize) {
        self.buffer_size.store(n, Ordering::Relaxed);
    }

    /// Roll the throughput window if 60 s have elapsed.
    pub fn maybe_roll_throughput(&self) {
        let mut tp = self.throughput.lock();
        let elapsed = tp.window_start.elapsed();
        if elapsed >= THROUGHPUT_WINDOW {
            let secs = elapsed.as_secs_f64();
            tp.mbps = (tp.window_bytes as f64 * 8.0) / (secs * 1_000_000.0);
            tp.window_start = Instant::now();
            tp.window_bytes = 0;
        }
    }

    /// Frames decoded so far.
    pub fn frames_parsed(&self) -> u64 {
        self.frames_parsed.load(Ordering::Relaxed)
    }

    /// Sync losses so far.
    pub fn sync_losses(&self) -> u64 {
        self.sync_losses.load(Ordering::Relaxed)
    }

    /// Bytes received so far.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Decoded / (decoded + sync losses), in percent.
    pub fn parse_success_rate(&self) -> f64 {
        let parsed = self.frames_parsed();
        let attempts = parsed + self.sync_losses();
        (parsed as f64 / attempts.max(1) as f64) * 100.0
    }

    /// Take a consistent snapshot.
    pub fn snapshot(&self, connected: bool, streaming: bool, depths: QueueDepths) -> ConnectionStats {
        let (stable, last_wall) = match *self.last_data.lock() {
            Some((mono, wall)) => (mono.elapsed() < STABLE_WINDOW, wall),
            None => (false, 0.0),
        };
        ConnectionStats {
            connected,
            streaming,
            total_frames_parsed: self.frames_parsed(),
            parse_success_rate: self.parse_success_rate(),
            sync_losses: self.sync_losses(),
            current_fps: self.timing.lock().fps,
            current_throughput_mbps: self.throughput.lock().mbps,
            total_bytes_received: self.bytes_received(),
            buffer_size: self.buffer_size.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            queue_depths: depths,
            last_data_time: last_wall,
            connection_stable: stable,
        }
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
