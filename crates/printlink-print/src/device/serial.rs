// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Serial-port printer adapter (wired RS-232 or a Bluetooth SPP port).
//
// The port is opened for exactly one attempt and dropped on close.  Windows
// in particular keeps a COM handle busy for a moment after close, which is
// what the executor's settle delay covers.

use std::io::ErrorKind;

use async_trait::async_trait;
use serial2_tokio::SerialPort;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use printlink_core::error::{PrintlinkError, Result};

use super::{DeviceFactory, FaultReporter, PrinterDevice};

/// Builds `SerialDevice`s for a fixed port and baud rate.
#[derive(Debug, Clone)]
pub struct SerialFactory {
    path: String,
    baud_rate: u32,
}

impl SerialFactory {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
        }
    }
}

impl DeviceFactory for SerialFactory {
    fn create(&self, faults: FaultReporter) -> Box<dyn PrinterDevice> {
        Box::new(SerialDevice::new(self.path.clone(), self.baud_rate, faults))
    }
}

/// One serial printer handle, valid for a single attempt.
pub struct SerialDevice {
    path: String,
    baud_rate: u32,
    port: Option<SerialPort>,
    faults: FaultReporter,
}

impl SerialDevice {
    pub fn new(path: String, baud_rate: u32, faults: FaultReporter) -> Self {
        Self {
            path,
            baud_rate,
            port: None,
            faults,
        }
    }
}

#[async_trait]
impl PrinterDevice for SerialDevice {
    fn describe(&self) -> String {
        format!("serial {} @ {} baud", self.path, self.baud_rate)
    }

    async fn open(&mut self) -> Result<()> {
        let port = SerialPort::open(&self.path, self.baud_rate)
            .map_err(|e| PrintlinkError::DeviceOpen(format!("{}: {e}", self.path)))?;
        self.port = Some(port);
        info!(path = %self.path, baud = self.baud_rate, "connected to printer");
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| PrintlinkError::DeviceWrite("serial port is not open".into()))?;

        if let Err(e) = port.write_all(bytes).await {
            if is_disconnect(e.kind()) {
                self.faults
                    .report(PrintlinkError::DeviceFault(format!("{}: {e}", self.path)));
            }
            return Err(PrintlinkError::DeviceWrite(format!("{}: {e}", self.path)));
        }
        debug!(path = %self.path, bytes = bytes.len(), "payload written");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut port) = self.port.take() else {
            return Ok(());
        };
        // The port is released when it drops, flush outcome notwithstanding.
        AsyncWriteExt::flush(&mut port)
            .await
            .map_err(|e| PrintlinkError::DeviceClose(format!("{}: {e}", self.path)))?;
        debug!(path = %self.path, "port closed");
        Ok(())
    }
}

/// I/O error kinds that mean the port itself went away.
fn is_disconnect(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotFound
    )
}

/// Serial ports present on this machine.
pub fn available_ports() -> Result<Vec<String>> {
    let ports = SerialPort::available_ports()?;
    Ok(ports.iter().map(|p| p.display().to_string()).collect())
}
