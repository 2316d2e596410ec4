// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Sequential job queue.
//
// Jobs are released strictly in arrival order with at most one in flight.
// `JobQueue` is the bookkeeping; `Dispatcher` is the task that owns it,
// pulls new jobs from the link's intake channel and runs each released job
// on the print executor.  The queue lives only in memory.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use chrono::Utc;
use tracing::{debug, error, info, instrument};

use printlink_core::events::{ClientEvent, EventSink};
use printlink_core::types::{JobId, JobOutcome, PrintJob};

use crate::executor::PrintExecutor;

/// FIFO of pending jobs plus the single in-flight slot.
#[derive(Debug, Default)]
pub struct JobQueue {
    pending: VecDeque<PrintJob>,
    in_flight: Option<JobId>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `job`. Returns the job to dispatch right away when nothing is
    /// in flight.
    pub fn enqueue(&mut self, job: PrintJob) -> Option<PrintJob> {
        self.pending.push_back(job);
        if self.in_flight.is_none() {
            self.release()
        } else {
            None
        }
    }

    /// The in-flight job finished (printed, failed or abandoned). Returns the
    /// next job to dispatch, if any.
    pub fn on_job_complete(&mut self) -> Option<PrintJob> {
        self.in_flight = None;
        self.release()
    }

    fn release(&mut self) -> Option<PrintJob> {
        let job = self.pending.pop_front()?;
        self.in_flight = Some(job.id.clone());
        Some(job)
    }

    /// Jobs waiting behind the in-flight one.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Nothing in flight and nothing pending.
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.pending.is_empty()
    }

    pub fn in_flight(&self) -> Option<&JobId> {
        self.in_flight.as_ref()
    }
}

type Running = Option<(JobId, JoinHandle<JobOutcome>)>;

/// Owns the job queue and feeds the print executor one job at a time.
pub struct Dispatcher {
    intake: mpsc::UnboundedReceiver<PrintJob>,
    queue: JobQueue,
    executor: Arc<PrintExecutor>,
    events: Arc<dyn EventSink>,
    outcomes: Option<mpsc::UnboundedSender<(JobId, JobOutcome)>>,
}

impl Dispatcher {
    /// Create a dispatcher and the sender jobs are submitted through.
    pub fn new(
        executor: Arc<PrintExecutor>,
        events: Arc<dyn EventSink>,
    ) -> (mpsc::UnboundedSender<PrintJob>, Self) {
        let (tx, intake) = mpsc::unbounded_channel();
        (tx, Self::from_intake(intake, executor, events))
    }

    /// Create a dispatcher reading jobs from an existing channel.
    pub fn from_intake(
        intake: mpsc::UnboundedReceiver<PrintJob>,
        executor: Arc<PrintExecutor>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            intake,
            queue: JobQueue::new(),
            executor,
            events,
            outcomes: None,
        }
    }

    /// Receive every finished job's outcome.
    pub fn outcomes(&mut self) -> mpsc::UnboundedReceiver<(JobId, JobOutcome)> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.outcomes = Some(tx);
        rx
    }

    /// Run until every submitter has gone away and the queue has drained.
    #[instrument(skip_all)]
    pub async fn run(mut self) {
        let mut running: Running = None;
        let mut intake_open = true;

        loop {
            tokio::select! {
                job = self.intake.recv(), if intake_open => match job {
                    Some(job) => {
                        let (job_id, bytes) = (job.id.clone(), job.payload.len());
                        let released = self.queue.enqueue(job);
                        self.events.emit(ClientEvent::JobReceived {
                            job_id,
                            bytes,
                            queued: self.queue.len(),
                        });
                        if let Some(next) = released {
                            running = Some(self.dispatch(next));
                        }
                    }
                    None => intake_open = false,
                },
                (job_id, result) = join_running(&mut running) => {
                    running = None;
                    self.finish(job_id, result);
                    match self.queue.on_job_complete() {
                        Some(next) => running = Some(self.dispatch(next)),
                        None => self.events.emit(ClientEvent::QueueIdle),
                    }
                }
            }

            if !intake_open && running.is_none() && self.queue.is_idle() {
                info!("job intake closed and queue drained");
                break;
            }
        }
    }

    fn dispatch(&self, job: PrintJob) -> (JobId, JoinHandle<JobOutcome>) {
        let waited = Utc::now() - job.received_at;
        debug!(job_id = %job.id, waited_ms = waited.num_milliseconds(), "job left the queue");
        self.events.emit(ClientEvent::JobDispatched {
            job_id: job.id.clone(),
            remaining: self.queue.len(),
        });
        let executor = Arc::clone(&self.executor);
        let job_id = job.id.clone();
        let handle = tokio::spawn(async move { executor.execute(&job).await });
        (job_id, handle)
    }

    fn finish(&self, job_id: JobId, result: Result<JobOutcome, JoinError>) {
        match result {
            Ok(outcome) => {
                if let Some(tx) = &self.outcomes {
                    let _ = tx.send((job_id, outcome));
                }
            }
            // The slot is freed either way so the queue keeps moving.
            Err(e) => error!(job_id = %job_id, error = %e, "print task failed"),
        }
    }
}

/// Wait for the running job, or forever when there is none.
async fn join_running(running: &mut Running) -> (JobId, Result<JobOutcome, JoinError>) {
    match running {
        Some((job_id, handle)) => {
            let result = handle.await;
            (job_id.clone(), result)
        }
        None => std::future::pending().await,
    }
}
