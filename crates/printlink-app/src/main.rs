// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// printlink - print-job client
//
// Entry point. Parses the command line, initialises logging and runs the
// selected command.

mod cli;
mod commands;
mod data_dir;

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use clap::Parser;
use tracing::Subscriber;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use cli::{Cli, Command};
use printlink_core::error::Result;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.log_level.as_deref(), cli.log_file.as_deref()) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "printlink failed");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command.clone().unwrap_or(Command::Run) {
        Command::Run => commands::run_client(cli.effective_config()?).await,
        Command::Devices { json } => commands::list_devices(json).await,
        Command::Print { file } => commands::print_file(cli.effective_config()?, &file).await,
        Command::SampleReceipt { out } => commands::write_sample_receipt(&out),
        Command::Config { write } => {
            commands::show_config(&cli.effective_config()?, write.then(|| cli.config_path()))
        }
    }
}

fn init_tracing(level: Option<&str>, log_file: Option<&Path>) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let file = match log_file {
        Some(path) => Some(OpenOptions::new().create(true).append(true).open(path)?),
        None => None,
    };
    subscriber(filter, file).init();
    Ok(())
}

/// Logs always go to stderr, and to `file` as well when one is given.
fn subscriber(filter: EnvFilter, file: Option<File>) -> impl Subscriber + Send + Sync {
    let file_layer = file.map(|file| {
        fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(file))
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_receives_records_alongside_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("printlink.log");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .unwrap();

        tracing::subscriber::with_default(subscriber(EnvFilter::new("info"), Some(file)), || {
            tracing::info!(job_id = 7, "job printed");
            tracing::debug!("filtered out");
        });

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("job printed"), "{written}");
        assert!(written.contains("job_id=7"), "{written}");
        assert!(!written.contains("filtered out"));
        assert!(!written.contains('\x1b'));
    }
}
