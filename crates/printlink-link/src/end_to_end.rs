// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Link, queue and executor wired together against in-memory fakes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use printlink_core::config::LinkSettings;
use printlink_core::error::Result;
use printlink_core::events::RecordingSink;
use printlink_core::types::ConnectionState;
use printlink_print::device::{DeviceFactory, FaultReporter, PrinterDevice};
use printlink_print::{Dispatcher, PrintExecutor};

use crate::manager::ConnectionManager;
use crate::testing::FakeSource;

/// Printer whose writes take a while.
#[derive(Clone, Default)]
struct SlowPrinter {
    written: Arc<Mutex<Vec<Vec<u8>>>>,
}

#[async_trait]
impl PrinterDevice for SlowPrinter {
    fn describe(&self) -> String {
        "slow printer".into()
    }

    async fn open(&mut self) -> Result<()> {
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        tokio::time::sleep(Duration::from_secs(3)).await;
        self.written.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl DeviceFactory for SlowPrinter {
    fn create(&self, _faults: FaultReporter) -> Box<dyn PrinterDevice> {
        Box::new(self.clone())
    }
}

#[tokio::test(start_paused = true)]
async fn link_loss_mid_job_neither_drops_nor_duplicates_it() {
    let source = FakeSource::default();
    let printer = SlowPrinter::default();
    let events = RecordingSink::new();

    // The link handle doubles as the executor's ack sink.
    let (intake_tx, intake_rx) = tokio::sync::mpsc::unbounded_channel();
    let (handle, manager) = ConnectionManager::new(
        Arc::new(source.clone()),
        &LinkSettings::default(),
        intake_tx,
        Arc::new(events.clone()),
    );
    let executor = PrintExecutor::new(
        Arc::new(printer.clone()),
        Arc::new(handle.clone()),
        Arc::new(events.clone()),
    );
    let dispatcher =
        Dispatcher::from_intake(intake_rx, Arc::new(executor), Arc::new(events.clone()));
    tokio::spawn(dispatcher.run());
    tokio::spawn(manager.run());

    let mut state = handle.subscribe();
    state
        .wait_for(|s| *s == ConnectionState::Connected)
        .await
        .unwrap();

    source.push(r#"{"jobId":1,"data":"A"}"#);
    tokio::time::sleep(Duration::from_secs(1)).await;
    source.set_reachable(false);
    source.drop_link();
    state
        .wait_for(|s| *s == ConnectionState::Reconnecting)
        .await
        .unwrap();

    // The job finishes printing while the link is down.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(*printer.written.lock().unwrap(), vec![b"A".to_vec()]);

    source.set_reachable(true);
    state
        .wait_for(|s| *s == ConnectionState::Connected)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let active = source.link_count() - 1;
    assert_eq!(
        source.received(active),
        vec![r#"{"type":"ack","jobId":1}"#, r#"{"type":"reconnected"}"#]
    );

    source.push(r#"{"jobId":2,"data":"B"}"#);
    tokio::time::sleep(Duration::from_secs(4)).await;

    assert_eq!(
        *printer.written.lock().unwrap(),
        vec![b"A".to_vec(), b"B".to_vec()]
    );
    assert_eq!(
        source.received(active),
        vec![
            r#"{"type":"ack","jobId":1}"#,
            r#"{"type":"reconnected"}"#,
            r#"{"type":"ack","jobId":2}"#,
        ]
    );
}
