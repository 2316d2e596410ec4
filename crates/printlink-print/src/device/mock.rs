// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scripted in-memory printer for tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use printlink_core::ack::AckSink;
use printlink_core::error::{PrintlinkError, Result};
use printlink_core::types::JobId;

use super::{DeviceFactory, FaultReporter, PrinterDevice};

/// Something observable that happened to the fake printer or the ack sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Entry {
    OpenAttempt,
    Opened,
    Write(Vec<u8>),
    Closed,
    Ack(JobId),
    Nack(JobId),
}

#[derive(Debug, Default)]
struct TimelineInner {
    entries: Vec<(Instant, Entry)>,
    open_now: usize,
    max_open: usize,
}

/// Shared, ordered record of device operations and acknowledgments.
#[derive(Debug, Clone, Default)]
pub(crate) struct Timeline(Arc<Mutex<TimelineInner>>);

impl Timeline {
    fn push(&self, entry: Entry) {
        let mut inner = self.0.lock().unwrap();
        match entry {
            Entry::Opened => {
                inner.open_now += 1;
                inner.max_open = inner.max_open.max(inner.open_now);
            }
            Entry::Closed => inner.open_now = inner.open_now.saturating_sub(1),
            _ => {}
        }
        inner.entries.push((Instant::now(), entry));
    }

    pub(crate) fn entries(&self) -> Vec<Entry> {
        self.0.lock().unwrap().entries.iter().map(|(_, e)| e.clone()).collect()
    }

    pub(crate) fn timed(&self) -> Vec<(Instant, Entry)> {
        self.0.lock().unwrap().entries.clone()
    }

    pub(crate) fn writes(&self) -> Vec<Vec<u8>> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                Entry::Write(bytes) => Some(bytes),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn acks(&self) -> Vec<JobId> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                Entry::Ack(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn nacks(&self) -> Vec<JobId> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                Entry::Nack(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn count(&self, wanted: &Entry) -> usize {
        self.entries().iter().filter(|e| *e == wanted).count()
    }

    /// Highest number of devices that were open at the same time.
    pub(crate) fn max_open(&self) -> usize {
        self.0.lock().unwrap().max_open
    }
}

/// Failure script consumed by every device the factory builds.
#[derive(Debug, Default)]
struct Script {
    fail_opens: u32,
    hang_opens: u32,
    fault_during_open: u32,
    fail_writes: u32,
    fault_on_write: u32,
    fail_closes: u32,
    panic_writes: u32,
    write_delay: Duration,
}

fn take(counter: &mut u32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

/// Builds `ScriptedDevice`s that fail as scripted, then succeed.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptedFactory {
    script: Arc<Mutex<Script>>,
    timeline: Timeline,
}

impl ScriptedFactory {
    pub(crate) fn new(timeline: Timeline) -> Self {
        Self {
            script: Arc::default(),
            timeline,
        }
    }

    /// The next `n` opens return an error.
    pub(crate) fn fail_opens(self, n: u32) -> Self {
        self.script.lock().unwrap().fail_opens = n;
        self
    }

    /// The next `n` opens never complete.
    pub(crate) fn hang_opens(self, n: u32) -> Self {
        self.script.lock().unwrap().hang_opens = n;
        self
    }

    /// The next `n` opens report an asynchronous fault and never complete.
    pub(crate) fn fault_during_open(self, n: u32) -> Self {
        self.script.lock().unwrap().fault_during_open = n;
        self
    }

    /// The next `n` writes return an error.
    pub(crate) fn fail_writes(self, n: u32) -> Self {
        self.script.lock().unwrap().fail_writes = n;
        self
    }

    /// The next `n` writes both report a fault and return an error, the way
    /// a port that disappears mid-write behaves.
    pub(crate) fn fault_on_write(self, n: u32) -> Self {
        self.script.lock().unwrap().fault_on_write = n;
        self
    }

    /// The next `n` closes return an error.
    pub(crate) fn fail_closes(self, n: u32) -> Self {
        self.script.lock().unwrap().fail_closes = n;
        self
    }

    /// The next `n` writes panic.
    pub(crate) fn panic_writes(self, n: u32) -> Self {
        self.script.lock().unwrap().panic_writes = n;
        self
    }

    /// Every write takes this long.
    pub(crate) fn write_delay(self, delay: Duration) -> Self {
        self.script.lock().unwrap().write_delay = delay;
        self
    }
}

impl DeviceFactory for ScriptedFactory {
    fn create(&self, faults: FaultReporter) -> Box<dyn PrinterDevice> {
        Box::new(ScriptedDevice {
            script: Arc::clone(&self.script),
            timeline: self.timeline.clone(),
            faults,
            open: false,
        })
    }
}

struct ScriptedDevice {
    script: Arc<Mutex<Script>>,
    timeline: Timeline,
    faults: FaultReporter,
    open: bool,
}

#[async_trait]
impl PrinterDevice for ScriptedDevice {
    fn describe(&self) -> String {
        "scripted printer".into()
    }

    async fn open(&mut self) -> Result<()> {
        self.timeline.push(Entry::OpenAttempt);
        let (hang, fault, fail) = {
            let mut script = self.script.lock().unwrap();
            (
                take(&mut script.hang_opens),
                take(&mut script.fault_during_open),
                take(&mut script.fail_opens),
            )
        };
        if fault {
            self.faults
                .report(PrintlinkError::DeviceFault("port vanished during open".into()));
        }
        if hang || fault {
            std::future::pending::<()>().await;
        }
        if fail {
            return Err(PrintlinkError::DeviceOpen("scripted open failure".into()));
        }
        self.open = true;
        self.timeline.push(Entry::Opened);
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let (delay, fault, fail, explode) = {
            let mut script = self.script.lock().unwrap();
            (
                script.write_delay,
                take(&mut script.fault_on_write),
                take(&mut script.fail_writes),
                take(&mut script.panic_writes),
            )
        };
        if explode {
            panic!("scripted write panic");
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fault {
            self.faults
                .report(PrintlinkError::DeviceFault("port vanished during write".into()));
            return Err(PrintlinkError::DeviceWrite("broken pipe".into()));
        }
        if fail {
            return Err(PrintlinkError::DeviceWrite("scripted write failure".into()));
        }
        self.timeline.push(Entry::Write(bytes.to_vec()));
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.timeline.push(Entry::Closed);
        if take(&mut self.script.lock().unwrap().fail_closes) {
            return Err(PrintlinkError::DeviceClose("scripted close failure".into()));
        }
        Ok(())
    }
}

/// Ack sink writing into a `Timeline`, so acks can be ordered against
/// device operations.
#[derive(Debug, Clone)]
pub(crate) struct RecordingAcks(pub(crate) Timeline);

impl AckSink for RecordingAcks {
    fn acknowledge(&self, job_id: &JobId) {
        self.0.push(Entry::Ack(job_id.clone()));
    }

    fn reject(&self, job_id: &JobId, _reason: &str) {
        self.0.push(Entry::Nack(job_id.clone()));
    }
}
