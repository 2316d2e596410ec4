// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Structured client events.
//
// Components report what happened through an `EventSink` handed to them at
// construction instead of writing to a process-wide logger. The default sink
// renders events as `tracing` records; tests plug in a recorder.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Local;
use tracing::{debug, error, info, warn};

use crate::types::{ConnectionState, JobId};

/// Everything observable the client does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    // -- Queue --
    JobReceived { job_id: JobId, bytes: usize, queued: usize },
    JobDispatched { job_id: JobId, remaining: usize },
    QueueIdle,

    // -- Executor --
    AttemptFailed { job_id: JobId, attempt: u32, error: String },
    RetryScheduled { job_id: JobId, retry: u32, max_retries: u32, delay: Duration },
    JobPrinted { job_id: JobId, attempts: u32 },
    WriteFailed { job_id: JobId, error: String },
    CloseFailed { job_id: JobId, error: String },
    JobAbandoned { job_id: JobId, attempts: u32 },
    AckRequested { job_id: JobId },

    // -- Link --
    StateChanged { from: ConnectionState, to: ConnectionState },
    ConnectFailed { error: String },
    TrialLinkFailed { error: String },
    FrameSent { kind: &'static str },
    FrameDropped { kind: &'static str, error: String },
    KeepaliveSent,
    KeepaliveSkipped,
    MalformedFrame { error: String },
}

/// Receives client events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ClientEvent);
}

/// Renders events as `tracing` records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: ClientEvent) {
        match event {
            ClientEvent::JobReceived { job_id, bytes, queued } => {
                info!(job_id = %job_id, bytes, queued, "received a print job");
            }
            ClientEvent::JobDispatched { job_id, remaining } => {
                info!(job_id = %job_id, remaining, "dispatching job to printer");
            }
            ClientEvent::QueueIdle => debug!("job queue idle"),
            ClientEvent::AttemptFailed { job_id, attempt, error } => {
                warn!(job_id = %job_id, attempt, error = %error, "printer attempt failed");
            }
            ClientEvent::RetryScheduled { job_id, retry, max_retries, delay } => {
                info!(
                    job_id = %job_id,
                    delay_ms = delay.as_millis() as u64,
                    "retrying to connect to printer ({retry}/{max_retries})"
                );
            }
            ClientEvent::JobPrinted { job_id, attempts } => {
                info!(job_id = %job_id, attempts, "print job sent successfully");
            }
            ClientEvent::WriteFailed { job_id, error } => {
                error!(job_id = %job_id, error = %error, "error sending data to printer");
            }
            ClientEvent::CloseFailed { job_id, error } => {
                warn!(job_id = %job_id, error = %error, "error closing printer device");
            }
            ClientEvent::JobAbandoned { job_id, attempts } => {
                error!(
                    job_id = %job_id,
                    attempts,
                    "max retries reached, could not reach the printer; moving to next job"
                );
            }
            ClientEvent::AckRequested { job_id } => {
                info!(job_id = %job_id, "acknowledgment queued for the job source");
            }
            ClientEvent::StateChanged { from, to } => {
                info!(from = %from, to = %to, "connection state changed");
            }
            ClientEvent::ConnectFailed { error } => {
                warn!(error = %error, "connection to job source failed");
            }
            ClientEvent::TrialLinkFailed { error } => {
                warn!(error = %error, "reconnection attempt failed");
            }
            ClientEvent::FrameSent { kind } => debug!(kind, "frame sent"),
            ClientEvent::FrameDropped { kind, error } => {
                warn!(kind, error = %error, "frame could not be sent");
            }
            ClientEvent::KeepaliveSent => {
                info!(
                    at = %Local::now().format("%H:%M:%S"),
                    "sending ping to keep the link alive"
                );
            }
            ClientEvent::KeepaliveSkipped => {
                warn!("link is not open; skipping ping, reconnection in progress");
            }
            ClientEvent::MalformedFrame { error } => {
                warn!(error = %error, "dropping malformed frame");
            }
        }
    }
}

/// Keeps every event in memory, in emission order.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<ClientEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events recorded so far.
    pub fn events(&self) -> Vec<ClientEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Count of recorded events matching `pred`.
    pub fn count(&self, pred: impl Fn(&ClientEvent) -> bool) -> usize {
        self.events
            .lock()
            .map(|e| e.iter().filter(|ev| pred(ev)).count())
            .unwrap_or(0)
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: ClientEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
