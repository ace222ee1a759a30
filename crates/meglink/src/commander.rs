// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Command channel to the instrument.
//!
//! Fire-and-forget, length-prefixed text messages on the command port:
//!
//! ```text
//! +----------------+--------------------------------------+
//! | Length (4B LE) | UTF-8 "Component|Command[|P1[|P2]]"  |
//! +----------------+--------------------------------------+
//! ```
//!
//! The instrument sends no response. One short-lived connection is reused
//! across sends; any send failure disconnects the client so the next send
//! reconnects.

use crate::error::{Error, Result};
use crate::session::open_stream;
use std::io::Write;
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

/// Build the wire bytes for one command message.
///
/// Empty/absent parameters are omitted from the payload, matching the
/// instrument's `Component|Command|Parameter1|Parameter2` convention.
pub fn encode_command(
    component: &str,
    command: &str,
    param1: Option<&str>,
    param2: Option<&str>,
) -> Vec<u8> {
    let mut payload = format!("{}|{}", component, command);
    if let Some(p1) = param1.filter(|p| !p.is_empty()) {
        payload.push('|');
        payload.push_str(p1);
    }
    if let Some(p2) = param2.filter(|p| !p.is_empty()) {
        payload.push('|');
        payload.push_str(p2);
    }

    let bytes = payload.as_bytes();
    let mut message = Vec::with_capacity(4 + bytes.len());
    message.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    message.extend_from_slice(bytes);
    message
}

/// Client for the instrument's command port.
pub struct CommanderClient {
    host: String,
    port: u16,
    timeout: Duration,
    stream: Option<TcpStream>,
}

impl CommanderClient {
    /// Create a disconnected client.
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
            stream: None,
        }
    }

    /// Whether a command connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Establish the command connection, replacing any existing one.
    pub fn connect(&mut self) -> Result<()> {
        self.disconnect();
        let stream = open_stream(&self.host, self.port, self.timeout, None, 64 * 1024)
            .map_err(|e| {
                log::error!(
                    "[commander] connect to {}:{} failed: {}",
                    self.host,
                    self.port,
                    e
                );
                Error::Transport(e)
            })?;
        log::info!("[commander] connected to {}:{}", self.host, self.port);
        self.stream = Some(stream);
        Ok(())
    }

    /// Close the command connection.
    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            log::info!("[commander] disconnected");
        }
    }

    /// Send one command, reconnecting first if necessary.
    ///
    /// On any send failure the client disconnects before returning, so the
    /// next `send` starts from a fresh connection.
    pub fn send(
        &mut self,
        component: &str,
        command: &str,
        param1: Option<&str>,
        param2: Option<&str>,
    ) -> Result<()> {
        if self.stream.is_none() {
            log::warn!("[commander] not connected, reconnecting");
            self.connect()?;
        }

        let message = encode_command(component, command, param1, param2);
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::Command("not connected".to_string()))?;

        match stream.write_all(&message).and_then(|()| stream.flush()) {
            Ok(()) => {
                log::info!(
                    "[commander] sent: {}|{} ({} bytes)",
                    component,
                    command,
                    message.len() - 4
                );
                Ok(())
            }
            Err(e) => {
                log::error!("[commander] send failed: {}", e);
                self.disconnect();
                Err(Error::Command(format!(
                    "send of '{}|{}' failed: {}",
                    component, command, e
                )))
            }
        }
    }

    // ========================================================================
    // Convenience commands
    // ========================================================================

    /// Activate every sensor.
    pub fn activate_all(&mut self) -> Result<()> {
        self.send("Sensor", "Activate All", None, None)
    }

    /// Deactivate every sensor.
    pub fn deactivate_all(&mut self) -> Result<()> {
        self.send("Sensor", "Deactivate All", None, None)
    }

    /// Activate or deactivate a single sensor's stream.
    pub fn toggle_stream(&mut self, sensor_id: u32, activate: bool) -> Result<()> {
        let command = if activate {
            "Activate Sensor"
        } else {
            "Deactivate Sensor"
        };
        self.send("Sensor", command, Some(&sensor_id.to_string()), None)
    }
}

impl Drop for CommanderClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ============================================================================
// Tests
// ============================================================================
