// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Command-line interface and configuration overrides.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use printlink_core::config::{ClientConfig, TransportConfig};
use printlink_core::error::{PrintlinkError, Result};

use crate::data_dir;

/// printlink - receives print jobs over a WebSocket and feeds them to a
/// receipt printer
#[derive(Parser, Debug)]
#[command(name = "printlink")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Configuration file (default: <data dir>/printlink/config.json)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `printlink_link=debug` (overrides RUST_LOG)
    #[arg(long, global = true, value_name = "FILTER")]
    pub log_level: Option<String>,

    /// Also append logs to this file
    #[arg(long, global = true, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Job source WebSocket URL
    #[arg(long, global = true, value_name = "URL")]
    pub server: Option<String>,

    /// Print to this serial port
    #[arg(long, global = true, value_name = "PATH", conflicts_with = "usb")]
    pub serial: Option<String>,

    /// Serial baud rate
    #[arg(long, global = true)]
    pub baud: Option<u32>,

    /// Print to a USB printer: `auto` for the first printer-class device, or
    /// `VID:PID` in hex
    #[arg(long, global = true, value_name = "auto|VID:PID")]
    pub usb: Option<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Connect to the job source and print jobs until interrupted (default)
    Run,

    /// List serial ports and USB printers
    Devices {
        /// Emit JSON
        #[arg(long)]
        json: bool,
    },

    /// Print a file once through the configured printer, with retries
    Print {
        /// Raw bytes to send to the printer
        file: PathBuf,
    },

    /// Write a demo ESC/POS receipt to a file
    SampleReceipt {
        #[arg(long, value_name = "FILE")]
        out: PathBuf,
    },

    /// Show the effective configuration
    Config {
        /// Save it to the configuration file
        #[arg(long)]
        write: bool,
    },
}

impl Cli {
    /// Where the configuration file lives.
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(data_dir::default_config_path)
    }

    /// Load the configuration file (if any), apply flag overrides and
    /// validate the result.
    pub fn effective_config(&self) -> Result<ClientConfig> {
        let path = self.config_path();
        let mut config = if path.exists() {
            ClientConfig::load(&path)?
        } else if self.config.is_some() {
            return Err(PrintlinkError::Config(format!(
                "configuration file {} does not exist",
                path.display()
            )));
        } else {
            ClientConfig::default()
        };
        self.apply_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides(&self, config: &mut ClientConfig) -> Result<()> {
        if let Some(server) = &self.server {
            config.server_url = server.clone();
        }

        if let Some(usb) = &self.usb {
            let (vendor_id, product_id) = parse_usb_id(usb)?;
            let append_cut = match &config.transport {
                TransportConfig::Usb { append_cut, .. } => *append_cut,
                TransportConfig::Serial { .. } => false,
            };
            config.transport = TransportConfig::Usb {
                vendor_id,
                product_id,
                append_cut,
            };
        }

        if self.serial.is_some() || self.baud.is_some() {
            let (default_path, default_baud) = match &config.transport {
                TransportConfig::Serial { path, baud_rate } => (path.clone(), *baud_rate),
                TransportConfig::Usb { .. } => match TransportConfig::default() {
                    TransportConfig::Serial { path, baud_rate } => (path, baud_rate),
                    TransportConfig::Usb { .. } => (String::new(), 9600),
                },
            };
            if self.baud.is_some() && self.usb.is_some() {
                return Err(PrintlinkError::Config("--baud only applies to serial printers".into()));
            }
            config.transport = TransportConfig::Serial {
                path: self.serial.clone().unwrap_or(default_path),
                baud_rate: self.baud.unwrap_or(default_baud),
            };
        }
        Ok(())
    }
}

/// Parse `auto` or a hex `VID:PID` pair (either side may be `*`).
pub fn parse_usb_id(arg: &str) -> Result<(Option<u16>, Option<u16>)> {
    if arg.eq_ignore_ascii_case("auto") {
        return Ok((None, None));
    }
    let (vid, pid) = arg
        .split_once(':')
        .ok_or_else(|| PrintlinkError::Config(format!("expected auto or VID:PID, got `{arg}`")))?;
    let parse = |part: &str| -> Result<Option<u16>> {
        if part == "*" {
            return Ok(None);
        }
        let hex = part.trim_start_matches("0x");
        u16::from_str_radix(hex, 16)
            .map(Some)
            .map_err(|e| PrintlinkError::Config(format!("bad USB id `{part}`: {e}")))
    };
    Ok((parse(vid)?, parse(pid)?))
}
