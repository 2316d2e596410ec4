// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device Driver Adapter: one capability surface over the printer transports.
//
// A device is built fresh for every attempt from a `DeviceFactory`, so no
// handle outlives the attempt that opened it.  Besides the open/write/close
// results, a device may report an out-of-band fault (e.g. the port vanished
// mid-write) through the `FaultReporter` it was built with.

pub mod serial;
pub mod usb;

#[cfg(test)]
pub(crate) mod mock;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use printlink_core::config::TransportConfig;
use printlink_core::error::{PrintlinkError, Result};

pub use serial::{SerialDevice, SerialFactory};
pub use usb::{UsbDevice, UsbFactory, UsbFilter, UsbPrinterInfo};

/// A printer that can be opened, written to and closed.
#[async_trait]
pub trait PrinterDevice: Send {
    /// Human-readable description for logs.
    fn describe(&self) -> String;

    async fn open(&mut self) -> Result<()>;

    /// Write the whole buffer. Called at most once per successful open.
    async fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Release the device. Must be a no-op when the device is not open.
    async fn close(&mut self) -> Result<()>;
}

/// Builds unopened devices, one per attempt.
pub trait DeviceFactory: Send + Sync {
    fn create(&self, faults: FaultReporter) -> Box<dyn PrinterDevice>;
}

/// Sending half of a per-attempt fault channel.
#[derive(Debug, Clone)]
pub struct FaultReporter(mpsc::UnboundedSender<PrintlinkError>);

impl FaultReporter {
    /// Report an asynchronous device fault. Ignored once the attempt is over.
    pub fn report(&self, fault: PrintlinkError) {
        let _ = self.0.send(fault);
    }
}

/// Receiving half of a per-attempt fault channel.
#[derive(Debug)]
pub struct FaultListener(mpsc::UnboundedReceiver<PrintlinkError>);

impl FaultListener {
    /// Resolve with the first reported fault. Never resolves if the device
    /// goes away without reporting one.
    pub async fn next(&mut self) -> PrintlinkError {
        match self.0.recv().await {
            Some(fault) => fault,
            None => std::future::pending().await,
        }
    }

    /// A fault reported so far, without waiting.
    pub fn try_next(&mut self) -> Option<PrintlinkError> {
        self.0.try_recv().ok()
    }
}

/// Create a fresh fault channel for one attempt.
pub fn fault_channel() -> (FaultReporter, FaultListener) {
    let (tx, rx) = mpsc::unbounded_channel();
    (FaultReporter(tx), FaultListener(rx))
}

/// Build the device factory for the configured transport.
pub fn factory_for(transport: &TransportConfig) -> Arc<dyn DeviceFactory> {
    match transport {
        TransportConfig::Serial { path, baud_rate } => {
            Arc::new(SerialFactory::new(path.clone(), *baud_rate))
        }
        TransportConfig::Usb {
            vendor_id,
            product_id,
            append_cut,
        } => Arc::new(UsbFactory::new(
            UsbFilter {
                vendor_id: *vendor_id,
                product_id: *product_id,
            },
            *append_cut,
        )),
    }
}

/// Printers visible to this machine.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceListing {
    pub serial_ports: Vec<String>,
    pub usb_printers: Vec<UsbPrinterInfo>,
    /// Enumeration problems, per transport.
    pub errors: Vec<String>,
}

/// Enumerate serial ports and USB printers. Enumeration failures are
/// collected rather than returned so one broken transport does not hide the
/// other.
pub async fn list_devices() -> DeviceListing {
    let mut listing = DeviceListing::default();

    match serial::available_ports() {
        Ok(ports) => listing.serial_ports = ports,
        Err(e) => listing.errors.push(format!("serial: {e}")),
    }

    match tokio::task::spawn_blocking(usb::list_printers).await {
        Ok(Ok(printers)) => listing.usb_printers = printers,
        Ok(Err(e)) => listing.errors.push(format!("usb: {e}")),
        Err(e) => listing.errors.push(format!("usb: enumeration task failed: {e}")),
    }

    listing
}
