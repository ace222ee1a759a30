// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded data structures fed by a stream session.
//!
//! One [`RingStore`] per data session holds every derived view a consumer
//! can read:
//!
//! ```text
//!                      +---------------------------------------+
//!   receiver thread -> |  raw ring        (10,000 rows)        |
//!                      |  monitor queue   (cap 50, newest-wins)|
//!                      |  data queue      (cap 1,000, drop-old)|
//!                      |  prediction      (cap 200, gated)     |
//!                      +---------------------------------------+
//!  processor thread -> |  processed ring  (5,000 rows)         |
//!                      +---------------------------------------+
//! ```
//!
//! Producers never block: every queue encodes its overflow policy
//! (newest-wins for the monitor view, drop-oldest elsewhere) and drops are
//! counted, not surfaced as errors. Every snapshot reader receives a
//! detached copy - consumers never hold references into live storage.

pub mod activity;
pub mod monitor;
pub mod prediction;
pub mod ring;

pub use activity::ChannelActivity;

use crate::codec::data::DataFrame;
use crate::config::{
    DATA_QUEUE_CAP, MONITOR_DROP_WATERMARK, MONITOR_QUEUE_CAP, PREDICTION_QUEUE_CAP,
    PROCESSED_RING_ROWS, RAW_RING_ROWS,
};
use crate::session::stats::QueueDepths;
use crossbeam::queue::ArrayQueue;
use monitor::MonitorQueue;
use parking_lot::Mutex;
use prediction::PredictionWindow;
use ring::SampleRing;
use std::sync::Arc;
use std::time::Duration;

/// Derived views over one data stream.
pub struct RingStore {
    raw: Mutex<SampleRing>,
    processed: Mutex<SampleRing>,
    monitor: MonitorQueue,
    data: ArrayQueue<Arc<DataFrame>>,
    prediction: PredictionWindow,
}

impl RingStore {
    /// Create an empty store with the configured capacities.
    pub fn new() -> Self {
        Self {
            raw: Mutex::new(SampleRing::new(RAW_RING_ROWS)),
            processed: Mutex::new(SampleRing::new(PROCESSED_RING_ROWS)),
            monitor: MonitorQueue::new(MONITOR_QUEUE_CAP, MONITOR_DROP_WATERMARK),
            data: ArrayQueue::new(DATA_QUEUE_CAP),
            prediction: PredictionWindow::new(PREDICTION_QUEUE_CAP),
        }
    }

    // ========================================================================
    // Producer side (receiver thread)
    // ========================================================================

    /// Route one decoded frame to every view. Returns the number of frames
    /// dropped by bounded queues to make room. Never blocks.
    pub fn dispatch(&self, frame: &Arc<DataFrame>) -> u64 {
        {
            let mut raw = self.raw.lock();
            for row in frame.rows() {
                raw.push_row(row.to_vec());
            }
        }

        let mut dropped = self.monitor.offer(Arc::clone(frame));

        let mut pending = Arc::clone(frame);
        loop {
            match self.data.push(pending) {
                Ok(()) => break,
                Err(rejected) => {
                    self.data.pop();
                    dropped += 1;
                    pending = rejected;
                }
            }
        }

        dropped += self.prediction.offer(Arc::clone(frame));
        dropped
    }

    // ========================================================================
    // Processor side
    // ========================================================================

    /// Pop the next frame from the main data queue, if any.
    pub fn pop_data_frame(&self) -> Option<Arc<DataFrame>> {
        self.data.pop()
    }

    /// Append a frame's rows to the processed window.
    pub fn push_processed(&self, frame: &DataFrame) {
        let mut processed = self.processed.lock();
        for row in frame.rows() {
            processed.push_row(row.to_vec());
        }
    }

    // ========================================================================
    // Snapshot readers (request threads)
    // ========================================================================

    /// Drain the monitor queue into a concatenated row block, waiting up to
    /// `wait` for a first frame. `None` when nothing arrives in time.
    pub fn monitor_snapshot(&self, max_samples: usize, wait: Duration) -> Option<Vec<Vec<f32>>> {
        let first = self.monitor.pop_wait(wait)?;
        let mut rows: Vec<Vec<f32>> = first.rows().map(<[f32]>::to_vec).collect();

        while rows.len() < max_samples {
            match self.monitor.try_pop() {
                Some(frame) => rows.extend(frame.rows().map(<[f32]>::to_vec)),
                None => break,
            }
        }
        Some(rows)
    }

    /// Copy of the last `n` rows of the raw window; `None` if under-populated.
    pub fn recent_samples(&self, n: usize) -> Option<Vec<Vec<f32>>> {
        self.raw.lock().last_n(n)
    }

    /// Clear the prediction queue and open its gate for `duration`.
    pub fn start_prediction(&self, duration: Duration) {
        self.prediction.start(duration);
    }

    /// Drain the prediction queue into a concatenated row block and close
    /// the gate. `None` when nothing was collected.
    pub fn prediction_snapshot(&self) -> Option<Vec<Vec<f32>>> {
        let frames = self.prediction.snapshot();
        if frames.is_empty() {
            return None;
        }
        let mut rows = Vec::with_capacity(frames.len() * frames[0].n_samples());
        for frame in frames {
            rows.extend(frame.rows().map(<[f32]>::to_vec));
        }
        Some(rows)
    }

    /// Whether a prediction collection is currently active.
    pub fn prediction_active(&self) -> bool {
        self.prediction.is_active()
    }

    /// Activity statistics over the last `recent` raw rows; `None` if the
    /// window is under-populated.
    pub fn channel_activity(&self, recent: usize) -> Option<ChannelActivity> {
        let rows = self.raw.lock().last_n(recent)?;
        activity::channel_activity(&rows)
    }

    /// Rows currently held by the raw window.
    pub fn raw_len(&self) -> usize {
        self.raw.lock().len()
    }

    /// Rows currently held by the processed window.
    pub fn processed_len(&self) -> usize {
        self.processed.lock().len()
    }

    /// Current fan-out queue depths.
    pub fn queue_depths(&self) -> QueueDepths {
        QueueDepths {
            data: self.data.len(),
            monitor: self.monitor.len(),
            prediction: self.prediction.len(),
        }
    }
}

impl Default for RingStore {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
