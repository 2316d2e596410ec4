// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Client configuration, persisted as JSON. Every field has a default so a
// partial file (or none at all) is valid.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PrintlinkError, Result};

/// Settle delay after closing a serial device before the next open.
const SERIAL_SETTLE_MS: u64 = 5000;

/// Top-level client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket endpoint of the job source.
    pub server_url: String,
    /// Which physical transport the printer sits on.
    pub transport: TransportConfig,
    /// Device-open retry settings.
    pub retry: RetrySettings,
    /// Connection settings.
    pub link: LinkSettings,
    /// Pause after closing the device. `None` picks the transport default
    /// (5 s for serial, none for USB).
    pub settle_delay_ms: Option<u64>,
    /// Ceiling for any single device operation.
    pub device_timeout_ms: u64,
    /// Send a `nack` to the source when a job exhausts its retries.
    pub report_failures: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:3000/print".into(),
            transport: TransportConfig::default(),
            retry: RetrySettings::default(),
            link: LinkSettings::default(),
            settle_delay_ms: None,
            device_timeout_ms: 30_000,
            report_failures: false,
        }
    }
}

/// Printer transport selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Serial port (including Bluetooth SPP ports) at a fixed baud rate.
    Serial { path: String, baud_rate: u32 },
    /// First USB device matching the filter, discovered on every attempt.
    /// With no ids set, the first device exposing a printer-class interface.
    Usb {
        #[serde(default)]
        vendor_id: Option<u16>,
        #[serde(default)]
        product_id: Option<u16>,
        /// Append an ESC/POS paper cut after each payload.
        #[serde(default)]
        append_cut: bool,
    },
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Serial {
            path: default_serial_path().into(),
            baud_rate: 9600,
        }
    }
}

fn default_serial_path() -> &'static str {
    if cfg!(windows) { "COM4" } else { "/dev/rfcomm0" }
}

/// Bounded fixed-delay retry for opening the printer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay_ms: 5000,
        }
    }
}

/// Connection Manager timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    /// Extra connection attempts in one establishment pass before falling
    /// back to the reconnect poll.
    pub max_retries: u32,
    pub keepalive_interval_ms: u64,
    pub reconnect_interval_ms: u64,
    pub connect_timeout_ms: u64,
    /// Wait between reaching `Connected` and sending the `reconnected` notice.
    pub resume_notice_delay_ms: u64,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            keepalive_interval_ms: 20_000,
            reconnect_interval_ms: 5000,
            connect_timeout_ms: 10_000,
            resume_notice_delay_ms: 0,
        }
    }
}

impl ClientConfig {
    /// Read a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)
            .map_err(|e| PrintlinkError::Config(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Write this configuration as pretty JSON, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Reject settings the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !(self.server_url.starts_with("ws://") || self.server_url.starts_with("wss://")) {
            return Err(PrintlinkError::Config(format!(
                "server_url must be a ws:// or wss:// URL, got `{}`",
                self.server_url
            )));
        }
        if let TransportConfig::Serial { path, baud_rate } = &self.transport {
            if path.trim().is_empty() {
                return Err(PrintlinkError::Config("serial path is empty".into()));
            }
            if *baud_rate == 0 {
                return Err(PrintlinkError::Config("baud_rate must be positive".into()));
            }
        }
        let intervals = [
            ("link.keepalive_interval_ms", self.link.keepalive_interval_ms),
            ("link.reconnect_interval_ms", self.link.reconnect_interval_ms),
            ("link.connect_timeout_ms", self.link.connect_timeout_ms),
            ("device_timeout_ms", self.device_timeout_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(PrintlinkError::Config(format!("{name} must be positive")));
            }
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry.retry_delay_ms)
    }

    pub fn device_timeout(&self) -> Duration {
        Duration::from_millis(self.device_timeout_ms)
    }

    /// Effective settle delay for the configured transport.
    pub fn settle_delay(&self) -> Duration {
        let ms = self.settle_delay_ms.unwrap_or(match self.transport {
            TransportConfig::Serial { .. } => SERIAL_SETTLE_MS,
            TransportConfig::Usb { .. } => 0,
        });
        Duration::from_millis(ms)
    }
}
