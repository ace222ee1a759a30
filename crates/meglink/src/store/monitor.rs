// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Newest-wins monitor queue.
//!
//! Feeds the visualization snapshot. Freshness beats completeness here:
//! once the queue reaches its high watermark, head (oldest) frames are
//! dropped to make room before the new frame is enqueued, so a slow reader
//! always sees current data. Consumers must not assume frame contiguity.
//!
//! A condvar lets a snapshot reader wait briefly for the first frame;
//! producers never block.

use crate::codec::data::DataFrame;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Bounded newest-wins frame queue with a first-frame wait.
pub struct MonitorQueue {
    inner: Mutex<VecDeque<Arc<DataFrame>>>,
    available: Condvar,
    capacity: usize,
    watermark: usize,
}

impl MonitorQueue {
    /// Create a queue with the given capacity and drop watermark.
    pub fn new(capacity: usize, watermark: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
            capacity,
            watermark,
        }
    }

    /// Enqueue a frame, dropping from the head at the watermark.
    /// Returns the number of frames dropped. Never blocks.
    pub fn offer(&self, frame: Arc<DataFrame>) -> u64 {
        let mut q = self.inner.lock();
        let mut dropped = 0;
        while q.len() >= self.watermark {
            q.pop_front();
            dropped += 1;
        }
        q.push_back(frame);
        debug_assert!(q.len() <= self.capacity);
        self.available.notify_one();
        dropped
    }

    /// Pop the oldest frame, waiting up to `timeout` for one to arrive.
    pub fn pop_wait(&self, timeout: Duration) -> Option<Arc<DataFrame>> {
        let mut q = self.inner.lock();
        if q.is_empty() {
            let _ = self.available.wait_for(&mut q, timeout);
        }
        q.pop_front()
    }

    /// Pop the oldest frame without waiting.
    pub fn try_pop(&self) -> Option<Arc<DataFrame>> {
        self.inner.lock().pop_front()
    }

    /// Current depth.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
