// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process-scoped service facade.
//!
//! Binds the three instrument handles - one data session slot, one status
//! session, one commander - to a process. Exactly one [`MegService`] is
//! constructed at application startup, injected into request handlers, and
//! torn down in reverse order at shutdown.
//!
//! Data sessions are single-shot: `connect` builds a fresh
//! [`StreamSession`], `disconnect` closes and discards it. Transient
//! absence of data is an explicit `Ok(None)`, never an error.

use crate::codec::status::SensorStatus;
use crate::commander::CommanderClient;
use crate::config::LinkConfig;
use crate::error::{Error, Result};
use crate::probe::{self, ProbeReport};
use crate::session::stats::ConnectionStats;
use crate::session::status::StatusSession;
use crate::session::{SessionState, StreamSession};
use crate::store::ChannelActivity;
use parking_lot::Mutex;
use std::fmt;
use std::time::Duration;

// ============================================================================
// Status reporting
// ============================================================================

/// Derived link-quality rating for the data session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkQuality {
    /// Stable and parsing cleanly.
    Excellent,
    /// Parse success below 95%.
    Good,
    /// Parse success below 90%.
    Fair,
    /// No data within the last second.
    Poor,
}

impl LinkQuality {
    fn rate(stats: &ConnectionStats) -> Self {
        if !stats.connection_stable {
            LinkQuality::Poor
        } else if stats.parse_success_rate < 90.0 {
            LinkQuality::Fair
        } else if stats.parse_success_rate < 95.0 {
            LinkQuality::Good
        } else {
            LinkQuality::Excellent
        }
    }
}

impl fmt::Display for LinkQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkQuality::Excellent => "excellent",
            LinkQuality::Good => "good",
            LinkQuality::Fair => "fair",
            LinkQuality::Poor => "poor",
        };
        write!(f, "{}", s)
    }
}

/// Data-session status as reported to hosts.
#[derive(Clone, Debug)]
pub struct DataSessionStatus {
    /// Peer address of the current session, or the configured default.
    pub host: String,
    /// Peer port of the current session, or the configured default.
    pub port: u16,
    /// Lifecycle state (`Disconnected` when no session exists).
    pub state: SessionState,
    /// Expected acquisition rate.
    pub sampling_rate: u32,
    /// Exposed channel count.
    pub n_channels: usize,
    /// Derived quality rating.
    pub quality: LinkQuality,
    /// Counter snapshot; `None` when no session exists.
    pub stats: Option<ConnectionStats>,
}

// ============================================================================
// Service
// ============================================================================

/// Process-scoped facade over the data session, status session and
/// commander.
pub struct MegService {
    config: LinkConfig,
    data: Mutex<Option<StreamSession>>,
    status: Mutex<Option<StatusSession>>,
    commander: Mutex<CommanderClient>,
}

impl MegService {
    /// Build the service from a validated configuration.
    pub fn new(config: LinkConfig) -> Result<Self> {
        if let Err(msg) = config.validate() {
            return Err(Error::Transport(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid configuration: {}", msg),
            )));
        }
        let commander = CommanderClient::new(
            config.host.clone(),
            config.command_port,
            config.command_timeout,
        );
        Ok(Self {
            config,
            data: Mutex::new(None),
            status: Mutex::new(None),
            commander: Mutex::new(commander),
        })
    }

    /// Start background acquisition: connect the status stream.
    ///
    /// The data stream stays down until [`connect`](Self::connect); a status
    /// connect failure is logged but does not fail startup.
    pub fn start(&self) {
        log::info!("[service] starting");
        let mut session = StatusSession::new(
            self.config.host.clone(),
            self.config.status_port,
            self.config.clone(),
        );
        if let Err(e) = session.open() {
            log::warn!("[service] status stream unavailable: {}", e);
        }
        *self.status.lock() = Some(session);
    }

    /// Tear everything down, newest handle first.
    pub fn shutdown(&self) {
        log::info!("[service] shutting down");
        self.commander.lock().disconnect();
        if let Some(mut session) = self.data.lock().take() {
            session.close();
        }
        if let Some(mut session) = self.status.lock().take() {
            session.close();
        }
    }

    // ========================================================================
    // Data session
    // ========================================================================

    /// Connect the data stream and start streaming.
    ///
    /// Replaces any previous (closed) session with a fresh one; a no-op when
    /// already streaming.
    pub fn connect(
        &self,
        host: Option<&str>,
        port: Option<u16>,
        sampling_rate: Option<u32>,
        n_channels: Option<usize>,
    ) -> Result<()> {
        let mut slot = self.data.lock();
        if let Some(session) = slot.as_ref() {
            if session.state().is_live() {
                log::warn!("[service] already connected");
                return Ok(());
            }
        }

        let mut config = self.config.clone();
        if let Some(rate) = sampling_rate {
            config.sampling_rate = rate;
        }
        if let Some(channels) = n_channels {
            config.n_channels = channels;
        }
        if let Err(msg) = config.validate() {
            return Err(Error::Transport(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid configuration: {}", msg),
            )));
        }

        let host = host.unwrap_or(&self.config.host).to_string();
        let port = port.unwrap_or(self.config.data_port);

        let mut session = StreamSession::new(host, port, config);
        let result = session.open();
        *slot = Some(session);
        result
    }

    /// Close and discard the data session. Idempotent.
    pub fn disconnect(&self) {
        if let Some(mut session) = self.data.lock().take() {
            session.close();
        }
    }

    /// Data-session status for hosts.
    pub fn status(&self) -> DataSessionStatus {
        let slot = self.data.lock();
        match slot.as_ref() {
            Some(session) => {
                let stats = session.stats();
                DataSessionStatus {
                    host: session.host().to_string(),
                    port: session.port(),
                    state: session.state(),
                    sampling_rate: self.config.sampling_rate,
                    n_channels: self.config.n_channels,
                    quality: LinkQuality::rate(&stats),
                    stats: Some(stats),
                }
            }
            None => DataSessionStatus {
                host: self.config.host.clone(),
                port: self.config.data_port,
                state: SessionState::Disconnected,
                sampling_rate: self.config.sampling_rate,
                n_channels: self.config.n_channels,
                quality: LinkQuality::Poor,
                stats: None,
            },
        }
    }

    /// Probe a data endpoint on a transient connection.
    ///
    /// The persistent session is never touched.
    pub fn test_connection(
        &self,
        host: Option<&str>,
        port: Option<u16>,
        timeout_ms: Option<u64>,
    ) -> Result<ProbeReport> {
        let host = host.unwrap_or(&self.config.host);
        let port = port.unwrap_or(self.config.data_port);
        let timeout = timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.test_timeout);
        probe::probe(host, port, timeout)
    }

    fn with_data<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&StreamSession) -> Result<T>,
    ) -> Result<T> {
        let slot = self.data.lock();
        match slot.as_ref() {
            Some(session) => f(session),
            None => Err(Error::lifecycle(op, SessionState::Disconnected)),
        }
    }

    /// Fresh monitor rows, or `Ok(None)` when none arrive within 100 ms.
    pub fn monitor_data(&self, max_samples: usize) -> Result<Option<Vec<Vec<f32>>>> {
        self.with_data("monitor_data", |s| s.monitor_data(max_samples))
    }

    /// Last `n_samples` rows of the raw window.
    pub fn latest_data(&self, n_samples: usize) -> Result<Option<Vec<Vec<f32>>>> {
        self.with_data("latest_data", |s| s.latest_data(n_samples))
    }

    /// Start a prediction collection window.
    pub fn prediction_start(&self, duration_s: f64) -> Result<()> {
        self.with_data("prediction_start", |s| s.start_prediction(duration_s))
    }

    /// Drain the collected prediction rows.
    pub fn prediction_data(&self) -> Result<Option<Vec<Vec<f32>>>> {
        self.with_data("prediction_data", |s| s.prediction_data())
    }

    /// Channel-activity report over the recent raw window.
    pub fn channel_activity(&self) -> Result<Option<ChannelActivity>> {
        self.with_data("channel_activity", |s| s.channel_activity())
    }

    // ========================================================================
    // Status session
    // ========================================================================

    /// Latest decoded sensor status, or `None` while not ready.
    pub fn sensor_status(&self) -> Option<SensorStatus> {
        self.status.lock().as_ref().and_then(StatusSession::latest)
    }

    // ========================================================================
    // Commander
    // ========================================================================

    /// Send an arbitrary command.
    pub fn send_command(
        &self,
        component: &str,
        command: &str,
        param1: Option<&str>,
        param2: Option<&str>,
    ) -> Result<()> {
        self.commander.lock().send(component, command, param1, param2)
    }

    /// Activate every sensor.
    pub fn activate_all(&self) -> Result<()> {
        self.commander.lock().activate_all()
    }

    /// Deactivate every sensor.
    pub fn deactivate_all(&self) -> Result<()> {
        self.commander.lock().deactivate_all()
    }

    /// Activate or deactivate one sensor's stream.
    pub fn toggle_stream(&self, sensor_id: u32, activate: bool) -> Result<()> {
        self.commander.lock().toggle_stream(sensor_id, activate)
    }
}

impl Drop for MegService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Tests
// ============================================================================
