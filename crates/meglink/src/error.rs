// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for acquisition-link operations.
//!
//! Decode and overrun failures are absorbed inside the receiver (counted and
//! recovered via resynchronization or truncation); the kinds here are the
//! ones that reach callers.

use crate::codec::DecodeError;
use crate::session::SessionState;
use std::fmt;
use std::io;

/// Result type for acquisition-link operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the acquisition link.
#[derive(Debug)]
pub enum Error {
    /// Socket-level failure (refused, timed out, reset).
    Transport(io::Error),

    /// A frame failed to decode (carries the reason and buffer offset).
    ///
    /// Only the transient probe surfaces these; the streaming receiver
    /// absorbs them as sync losses.
    Decode(DecodeError),

    /// Operation is illegal in the session's current state.
    Lifecycle {
        /// The attempted operation.
        op: &'static str,
        /// State the session was in.
        state: SessionState,
    },

    /// Commander send failure; the client has been disconnected.
    Command(String),
}

impl Error {
    /// Shorthand for a lifecycle violation.
    pub fn lifecycle(op: &'static str, state: SessionState) -> Self {
        Self::Lifecycle { op, state }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Transport(e) => write!(f, "transport error: {}", e),
            Error::Decode(e) => write!(f, "decode error: {}", e),
            Error::Lifecycle { op, state } => {
                write!(f, "operation '{}' not permitted in state {}", op, state)
            }
            Error::Command(msg) => write!(f, "command error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Transport(e)
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::Decode(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = Error::lifecycle("monitor_data", SessionState::Disconnected);
        let text = err.to_string();
        assert!(text.contains("monitor_data"));
        assert!(text.contains("disconnected"));

        let err = Error::from(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        assert!(err.to_string().contains("transport"));
    }

    #[test]
    fn test_io_source_preserved() {
        let err = Error::from(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
