// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Activation-gated prediction window.
//!
//! An operator starts a time-bounded collection; frames arriving while the
//! gate is open are queued (drop-oldest on full). The gate closes itself
//! when the configured duration elapses - checked per offered frame, so a
//! frame that crosses the deadline is skipped here while still reaching
//! every other sink.

use crate::codec::data::DataFrame;
use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Gate {
    started: Option<Instant>,
    duration: Duration,
}

/// Time-bounded frame collection for downstream inference.
pub struct PredictionWindow {
    queue: ArrayQueue<Arc<DataFrame>>,
    active: AtomicBool,
    gate: Mutex<Gate>,
}

impl PredictionWindow {
    /// Create an inactive window with the given queue capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            active: AtomicBool::new(false),
            gate: Mutex::new(Gate {
                started: None,
                duration: Duration::ZERO,
            }),
        }
    }

    /// Clear the queue and open the gate for `duration`.
    pub fn start(&self, duration: Duration) {
        while self.queue.pop().is_some() {}
        {
            let mut gate = self.gate.lock();
            gate.started = Some(Instant::now());
            gate.duration = duration;
        }
        self.active.store(true, Ordering::Release);
    }

    /// Offer a frame. Returns the number of frames dropped to make room
    /// (0 when inactive or within capacity). Auto-deactivates once the
    /// configured duration has elapsed.
    pub fn offer(&self, frame: Arc<DataFrame>) -> u64 {
        if !self.active.load(Ordering::Acquire) {
            return 0;
        }
        let expired = {
            let gate = self.gate.lock();
            match gate.started {
                Some(t0) => t0.elapsed() > gate.duration,
                None => true,
            }
        };
        if expired {
            self.active.store(false, Ordering::Release);
            return 0;
        }

        let mut dropped = 0;
        let mut frame = frame;
        loop {
            match self.queue.push(frame) {
                Ok(()) => break,
                Err(rejected) => {
                    // Full: evict the oldest and retry with the same frame.
                    self.queue.pop();
                    dropped += 1;
                    frame = rejected;
                }
            }
        }
        dropped
    }

    /// Drain all collected frames and close the gate.
    pub fn snapshot(&self) -> Vec<Arc<DataFrame>> {
        self.active.store(false, Ordering::Release);
        let mut frames = Vec::with_capacity(self.queue.len());
        while let Some(f) = self.queue.pop() {
            frames.push(f);
        }
        frames
    }

    /// Whether the gate is currently open.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Current queue depth.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::data;
    use crate::config::FLOATS_PER_FRAME;

    fn frame(n: u32) -> Arc<DataFrame> {
        let bytes = data::encode(n, &vec![0.0; FLOATS_PER_FRAME]);
        Arc::new(data::decode(&bytes, 0).unwrap())
    }

    #[test]
    fn test_inactive_ignores_frames() {
        let w = PredictionWindow::new(8);
        w.offer(frame(1));
        assert!(w.is_empty());
        assert!(!w.is_active());
    }

    #[test]
    fn test_start_clears_previous_collection() {
        let w = PredictionWindow::new(8);
        w.start(Duration::from_secs(10));
        w.offer(frame(1));
        w.offer(frame(2));
        assert_eq!(w.len(), 2);

        w.start(Duration::from_secs(10));
        assert!(w.is_empty());
        assert!(w.is_active());
    }

    #[test]
    fn test_drop_oldest_on_full() {
        let w = PredictionWindow::new(3);
        w.start(Duration::from_secs(10));
        for i in 0..5 {
            w.offer(frame(i));
        }
        assert_eq!(w.len(), 3);
        let frames = w.snapshot();
        let numbers: Vec<u32> = frames.iter().map(|f| f.wire_frame_number).collect();
        assert_eq!(numbers, vec![2, 3, 4]);
    }

    #[test]
    fn test_deadline_closes_gate() {
        let w = PredictionWindow::new(8);
        w.start(Duration::from_millis(10));
        w.offer(frame(1));
        std::thread::sleep(Duration::from_millis(25));
        // First frame past the deadline is skipped and closes the gate.
        w.offer(frame(2));
        assert!(!w.is_active());
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn test_snapshot_deactivates() {
        let w = PredictionWindow::new(8);
        w.start(Duration::from_secs(10));
        w.offer(frame(1));
        let frames = w.snapshot();
        assert_eq!(frames.len(), 1);
        assert!(!w.is_active());
        assert!(w.is_empty());
    }
}
