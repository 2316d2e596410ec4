// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Subcommand implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use printlink_core::ack::NoAck;
use printlink_core::config::ClientConfig;
use printlink_core::error::{PrintlinkError, Result};
use printlink_core::events::{EventSink, TracingSink};
use printlink_core::types::{JobOutcome, PrintJob};
use printlink_link::{ConnectionManager, WsConnector};
use printlink_print::device::{self, factory_for};
use printlink_print::receipt::sample_receipt;
use printlink_print::{Dispatcher, PrintExecutor};

/// Wire the link, queue and executor together and run until Ctrl-C.
pub async fn run_client(config: ClientConfig) -> Result<()> {
    let events: Arc<dyn EventSink> = Arc::new(TracingSink);
    let devices = factory_for(&config.transport);
    info!(
        server = %config.server_url,
        max_retries = config.retry.max_retries,
        "printlink starting"
    );

    let (intake_tx, intake_rx) = mpsc::unbounded_channel();
    let (link, manager) = ConnectionManager::new(
        Arc::new(WsConnector::new(config.server_url.clone())),
        &config.link,
        intake_tx,
        Arc::clone(&events),
    );
    let executor = PrintExecutor::from_config(
        &config,
        devices,
        Arc::new(link.clone()),
        Arc::clone(&events),
    );
    let dispatcher = Dispatcher::from_intake(intake_rx, Arc::new(executor), events);

    let manager_task = tokio::spawn(manager.run());
    let dispatcher_task = tokio::spawn(dispatcher.run());

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");

    link.shutdown();
    if let Err(e) = manager_task.await {
        warn!(error = %e, "connection manager task ended abnormally");
    }
    // Jobs are not persisted; anything still queued is resent by the source
    // after the next `reconnected`.
    dispatcher_task.abort();
    Ok(())
}

pub async fn list_devices(json: bool) -> Result<()> {
    let listing = device::list_devices().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    println!("Serial ports:");
    if listing.serial_ports.is_empty() {
        println!("  (none)");
    }
    for port in &listing.serial_ports {
        println!("  {port}");
    }

    println!("\nUSB printers:");
    if listing.usb_printers.is_empty() {
        println!("  (none)");
    }
    for printer in &listing.usb_printers {
        println!(
            "  {:04x}:{:04x}  (bus {} address {})",
            printer.vendor_id, printer.product_id, printer.bus, printer.address
        );
    }

    for error in &listing.errors {
        warn!("{error}");
    }
    Ok(())
}

/// Print `file` once, without a job source. Acknowledgments go nowhere.
pub async fn print_file(config: ClientConfig, file: &Path) -> Result<()> {
    let bytes = std::fs::read(file)?;
    info!(path = %file.display(), bytes = bytes.len(), "printing local file");

    let executor = PrintExecutor::from_config(
        &config,
        factory_for(&config.transport),
        Arc::new(NoAck),
        Arc::new(TracingSink),
    );
    let job = PrintJob::new(file.display().to_string(), bytes);

    match executor.execute(&job).await {
        JobOutcome::Printed { attempts } => {
            println!("Printed {} in {attempts} attempt(s)", file.display());
            Ok(())
        }
        JobOutcome::WriteFailed { .. } => Err(PrintlinkError::DeviceWrite(format!(
            "{} was not printed",
            file.display()
        ))),
        JobOutcome::Abandoned { attempts } => Err(PrintlinkError::DeviceOpen(format!(
            "printer unavailable after {attempts} attempts"
        ))),
    }
}

pub fn write_sample_receipt(out: &Path) -> Result<()> {
    let bytes = sample_receipt();
    std::fs::write(out, &bytes)?;
    println!("Wrote {} bytes of ESC/POS to {}", bytes.len(), out.display());
    Ok(())
}

/// Print the effective configuration; save it when `save_to` is set.
pub fn show_config(config: &ClientConfig, save_to: Option<PathBuf>) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    if let Some(path) = save_to {
        config.save(&path)?;
        println!("Saved to {}", path.display());
    }
    Ok(())
}
