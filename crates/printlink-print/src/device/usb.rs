// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// USB printer adapter.
//
// The printer is looked up by enumeration on every open, so a printer that
// was unplugged and replugged (new bus address) is picked up again.  An
// empty enumeration is reported as an open failure.  libusb calls block, so
// each one runs on the blocking pool.

use std::time::Duration;

use async_trait::async_trait;
use rusb::{DeviceHandle, Direction, GlobalContext, TransferType};
use serde::Serialize;
use tracing::{debug, info};

use printlink_core::error::{PrintlinkError, Result};

use super::{DeviceFactory, FaultReporter, PrinterDevice};
use crate::receipt::EscPos;

/// USB interface class code for printers.
const PRINTER_CLASS: u8 = 0x07;

/// Bulk transfer size; small enough for full-speed receipt printers.
const CHUNK_SIZE: usize = 4096;

/// Per-transfer timeout.
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(10);

/// Which USB device counts as "the printer".
///
/// With neither id set, the first device exposing a printer-class interface
/// wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsbFilter {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
}

impl UsbFilter {
    fn matches_ids(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id.is_none_or(|v| v == vendor_id)
            && self.product_id.is_none_or(|p| p == product_id)
    }

    fn requires_printer_class(&self) -> bool {
        self.vendor_id.is_none() && self.product_id.is_none()
    }
}

impl std::fmt::Display for UsbFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.vendor_id, self.product_id) {
            (None, None) => f.write_str("first printer-class device"),
            (v, p) => {
                let hex = |id: Option<u16>| id.map_or("*".to_string(), |id| format!("{id:04x}"));
                write!(f, "{}:{}", hex(v), hex(p))
            }
        }
    }
}

/// A USB printer found during enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsbPrinterInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus: u8,
    pub address: u8,
}

/// Builds `UsbDevice`s for a fixed filter.
#[derive(Debug, Clone)]
pub struct UsbFactory {
    filter: UsbFilter,
    append_cut: bool,
}

impl UsbFactory {
    pub fn new(filter: UsbFilter, append_cut: bool) -> Self {
        Self { filter, append_cut }
    }
}

impl DeviceFactory for UsbFactory {
    fn create(&self, faults: FaultReporter) -> Box<dyn PrinterDevice> {
        Box::new(UsbDevice::new(self.filter, self.append_cut, faults))
    }
}

/// An opened, claimed printer interface.
struct ClaimedPrinter {
    handle: DeviceHandle<GlobalContext>,
    interface: u8,
    endpoint_out: u8,
}

/// One USB printer handle, valid for a single attempt.
pub struct UsbDevice {
    filter: UsbFilter,
    append_cut: bool,
    claimed: Option<ClaimedPrinter>,
    faults: FaultReporter,
}

impl UsbDevice {
    pub fn new(filter: UsbFilter, append_cut: bool, faults: FaultReporter) -> Self {
        Self {
            filter,
            append_cut,
            claimed: None,
            faults,
        }
    }
}

#[async_trait]
impl PrinterDevice for UsbDevice {
    fn describe(&self) -> String {
        format!("usb {}", self.filter)
    }

    async fn open(&mut self) -> Result<()> {
        let filter = self.filter;
        let claimed = tokio::task::spawn_blocking(move || open_printer(&filter))
            .await
            .map_err(|e| PrintlinkError::DeviceOpen(format!("usb open task failed: {e}")))??;
        info!(
            filter = %self.filter,
            interface = claimed.interface,
            endpoint = claimed.endpoint_out,
            "connected to USB printer"
        );
        self.claimed = Some(claimed);
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let claimed = self
            .claimed
            .take()
            .ok_or_else(|| PrintlinkError::DeviceWrite("usb printer is not open".into()))?;

        let mut data = bytes.to_vec();
        if self.append_cut {
            data.extend_from_slice(&EscPos::new().feed(3).cut().build());
        }

        let (claimed, result) = tokio::task::spawn_blocking(move || {
            let result = write_bulk_all(&claimed, &data);
            (claimed, result)
        })
        .await
        .map_err(|e| PrintlinkError::DeviceWrite(format!("usb write task failed: {e}")))?;
        self.claimed = Some(claimed);

        match result {
            Ok(written) => {
                debug!(bytes = written, "payload written");
                Ok(())
            }
            Err(rusb::Error::NoDevice) => {
                self.faults
                    .report(PrintlinkError::DeviceFault("usb printer disconnected".into()));
                Err(PrintlinkError::DeviceWrite("usb printer disconnected".into()))
            }
            Err(rusb::Error::Timeout) => Err(PrintlinkError::DeviceWrite(format!(
                "usb bulk write timed out after {}ms",
                TRANSFER_TIMEOUT.as_millis()
            ))),
            Err(e) => Err(PrintlinkError::DeviceWrite(format!("usb: {e}"))),
        }
    }

    async fn close(&mut self) -> Result<()> {
        let Some(claimed) = self.claimed.take() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || {
            let mut claimed = claimed;
            claimed.handle.release_interface(claimed.interface)
        })
        .await
        .map_err(|e| PrintlinkError::DeviceClose(format!("usb close task failed: {e}")))?
        .map_err(|e| PrintlinkError::DeviceClose(format!("usb: {e}")))?;
        debug!("usb interface released");
        Ok(())
    }
}

/// Find, open and claim the first printer matching `filter`.
fn open_printer(filter: &UsbFilter) -> Result<ClaimedPrinter> {
    let devices =
        rusb::devices().map_err(|e| PrintlinkError::DeviceOpen(format!("usb enumeration: {e}")))?;

    for device in devices.iter() {
        let Ok(desc) = device.device_descriptor() else {
            continue;
        };
        if !filter.matches_ids(desc.vendor_id(), desc.product_id()) {
            continue;
        }
        let Some((interface, endpoint_out)) =
            find_out_endpoint(&device, filter.requires_printer_class())
        else {
            continue;
        };

        let mut handle = device
            .open()
            .map_err(|e| PrintlinkError::DeviceOpen(format!("usb open: {e}")))?;
        // Not supported everywhere; claiming fails later if it mattered.
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            debug!(error = %e, "kernel driver auto-detach unavailable");
        }
        handle
            .claim_interface(interface)
            .map_err(|e| PrintlinkError::DeviceOpen(format!("usb claim interface: {e}")))?;

        return Ok(ClaimedPrinter {
            handle,
            interface,
            endpoint_out,
        });
    }

    Err(PrintlinkError::DeviceNotFound(format!(
        "no USB printer matches {filter}"
    )))
}

/// First (interface, bulk OUT endpoint) pair on the active configuration.
fn find_out_endpoint(
    device: &rusb::Device<GlobalContext>,
    printer_class_only: bool,
) -> Option<(u8, u8)> {
    let config = device.active_config_descriptor().ok()?;
    for interface in config.interfaces() {
        for alt in interface.descriptors() {
            if printer_class_only && alt.class_code() != PRINTER_CLASS {
                continue;
            }
            let endpoint = alt.endpoint_descriptors().find(|ep| {
                ep.transfer_type() == TransferType::Bulk && ep.direction() == Direction::Out
            });
            if let Some(ep) = endpoint {
                return Some((alt.interface_number(), ep.address()));
            }
        }
    }
    None
}

fn write_bulk_all(claimed: &ClaimedPrinter, data: &[u8]) -> rusb::Result<usize> {
    write_chunked(data, |buf| {
        claimed
            .handle
            .write_bulk(claimed.endpoint_out, buf, TRANSFER_TIMEOUT)
    })
}

/// Write every byte, chunk by chunk, resuming short transfers.  A transfer
/// that moves nothing is an I/O error.
fn write_chunked(
    data: &[u8],
    mut transfer: impl FnMut(&[u8]) -> rusb::Result<usize>,
) -> rusb::Result<usize> {
    let mut written = 0;
    for chunk in data.chunks(CHUNK_SIZE) {
        let mut offset = 0;
        while offset < chunk.len() {
            match transfer(&chunk[offset..])? {
                0 => return Err(rusb::Error::Io),
                n => offset += n,
            }
        }
        written += chunk.len();
    }
    Ok(written)
}

/// USB devices exposing a printer-class interface.
pub fn list_printers() -> Result<Vec<UsbPrinterInfo>> {
    let devices =
        rusb::devices().map_err(|e| PrintlinkError::DeviceOpen(format!("usb enumeration: {e}")))?;
    let printers = devices
        .iter()
        .filter(|device| find_out_endpoint(device, true).is_some())
        .filter_map(|device| {
            let desc = device.device_descriptor().ok()?;
            Some(UsbPrinterInfo {
                vendor_id: desc.vendor_id(),
                product_id: desc.product_id(),
                bus: device.bus_number(),
                address: device.address(),
            })
        })
        .collect();
    Ok(printers)
}
