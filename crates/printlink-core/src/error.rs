// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for printlink.

use thiserror::Error;

/// Top-level error type for all printlink operations.
#[derive(Debug, Error)]
pub enum PrintlinkError {
    // -- Link errors --
    #[error("connection to job source failed: {0}")]
    Connect(String),

    #[error("sending frame to job source failed: {0}")]
    LinkSend(String),

    #[error("link to job source closed")]
    LinkClosed,

    // -- Device errors --
    #[error("could not open printer device: {0}")]
    DeviceOpen(String),

    #[error("no matching printer device found: {0}")]
    DeviceNotFound(String),

    #[error("writing to printer device failed: {0}")]
    DeviceWrite(String),

    #[error("closing printer device failed: {0}")]
    DeviceClose(String),

    #[error("printer device reported a fault: {0}")]
    DeviceFault(String),

    #[error("printer device operation `{operation}` timed out after {millis}ms")]
    DeviceTimeout { operation: &'static str, millis: u64 },

    // -- Protocol --
    #[error("malformed frame from job source: {0}")]
    MalformedFrame(String),

    // -- Configuration --
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PrintlinkError {
    /// Whether this error means the device could not be brought up for the
    /// current attempt, so the attempt may be retried.
    ///
    /// Only a timed-out open counts.  Write failures after a successful
    /// open, timeouts included, are single-shot per attempt.
    pub fn is_device_unavailable(&self) -> bool {
        matches!(
            self,
            Self::DeviceOpen(_)
                | Self::DeviceNotFound(_)
                | Self::DeviceFault(_)
                | Self::DeviceTimeout {
                    operation: "open",
                    ..
                }
        )
    }

    /// Whether this error should move the Connection Manager out of
    /// `Connected`.
    pub fn is_link_loss(&self) -> bool {
        matches!(self, Self::LinkSend(_) | Self::LinkClosed | Self::Connect(_))
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PrintlinkError>;
