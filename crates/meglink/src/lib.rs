// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # meglink - real-time acquisition link for N1-class MEG instruments
//!
//! A binary framing engine over TCP: delimit, validate, decode and dispatch
//! the instrument's two stream formats - high-rate float32 sensor samples
//! on the data port and periodic sensor-status records on the status port -
//! while serving stable derived views under bounded memory and continuous
//! backpressure.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meglink::{LinkConfig, MegService};
//!
//! fn main() -> meglink::Result<()> {
//!     let service = MegService::new(LinkConfig::default())?;
//!     service.start();                    // status stream
//!     service.connect(None, None, None, None)?; // data stream
//!
//!     if let Some(rows) = service.monitor_data(100)? {
//!         println!("got {} fresh sample rows", rows.len());
//!     }
//!     service.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                          MegService facade                         |
//! |   one data session slot | one status session | one commander       |
//! +--------------------------------------------------------------------+
//! |                          StreamSession                             |
//! |   socket -> accumulator -> FrameCodec -> typed frame -> fan-out    |
//! |   lifecycle: Disconnected -> Connecting -> Connected -> Streaming  |
//! +--------------------------------------------------------------------+
//! |                            RingStore                               |
//! |   raw ring | monitor queue | data queue | prediction | processed   |
//! +--------------------------------------------------------------------+
//! |                            FrameCodec                              |
//! |   data: fixed 16,416 B frames     status: variable-size frames     |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`MegService`] | Process-scoped facade owning the three handles |
//! | [`StreamSession`] | One data-port connection with its threads |
//! | [`StatusSession`] | One status-port connection, latest-value store |
//! | [`DataFrame`] | Decoded 16 x 192 sample block |
//! | [`SensorStatus`] | Decoded sensor-health record set |
//! | [`CommanderClient`] | Length-prefixed command channel |
//!
//! ## Guarantees
//!
//! - Frames reach the data queue and both sample windows strictly in
//!   receive order; the monitor queue may drop non-adjacent frames under
//!   load (newest wins).
//! - Producers never block: every bounded queue encodes a drop policy and
//!   drops are observable via counters.
//! - Snapshot readers receive detached copies, never aliases into live
//!   storage.

/// Frame codecs for the data and status stream formats.
pub mod codec;
/// Command channel client (length-prefixed text, fire-and-forget).
pub mod commander;
/// Wire constants and runtime configuration (single source of truth).
pub mod config;
/// Error types surfaced to callers.
pub mod error;
/// Transient connection probe.
pub mod probe;
/// Stream sessions: lifecycle, receive pipeline, statistics.
pub mod session;
/// Process-scoped service facade.
pub mod service;
/// Bounded views: sample windows, monitor/data/prediction queues.
pub mod store;

pub use codec::data::DataFrame;
pub use codec::status::{SensorFlags, SensorStatus};
pub use codec::{DecodeError, DecodeErrorKind, EndMarker, HeaderField};
pub use commander::CommanderClient;
pub use config::LinkConfig;
pub use error::{Error, Result};
pub use probe::{probe, ProbeReport};
pub use service::{DataSessionStatus, LinkQuality, MegService};
pub use session::stats::{ConnectionStats, QueueDepths};
pub use session::status::StatusSession;
pub use session::{FrameObserver, SessionState, StateObserver, StreamSession};
pub use store::ChannelActivity;
