// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print executor: drives one job through the printer with bounded retry.
//
// Each attempt builds a fresh device, opens it, writes the payload once and
// closes it.  Failing to bring the device up (open error, missing device,
// open timeout, or a fault reported by the device) is retried on a fixed delay
// up to the policy's ceiling.  A write failure after a successful open, a
// write timeout included, is not retried.  On success the acknowledgment is requested only after close has
// finished, and the settle delay runs before the executor returns so the OS
// has released the handle before the next job opens it.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use printlink_core::ack::AckSink;
use printlink_core::config::ClientConfig;
use printlink_core::error::{PrintlinkError, Result};
use printlink_core::events::{ClientEvent, EventSink};
use printlink_core::types::{JobId, JobOutcome, PrintJob};

use crate::device::{DeviceFactory, PrinterDevice, fault_channel};
use crate::retry::{RetryDecision, RetryPolicy};

/// Default ceiling for a single open, write or close.
const DEFAULT_DEVICE_TIMEOUT: Duration = Duration::from_secs(30);

/// How a single attempt ended.
#[derive(Debug)]
enum Attempt {
    Printed,
    WriteFailed(PrintlinkError),
    Unavailable(PrintlinkError),
}

/// Runs print jobs against a device factory.
pub struct PrintExecutor {
    devices: Arc<dyn DeviceFactory>,
    acks: Arc<dyn AckSink>,
    events: Arc<dyn EventSink>,
    policy: RetryPolicy,
    settle_delay: Duration,
    device_timeout: Duration,
    report_failures: bool,
}

impl PrintExecutor {
    pub fn new(
        devices: Arc<dyn DeviceFactory>,
        acks: Arc<dyn AckSink>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            devices,
            acks,
            events,
            policy: RetryPolicy::default(),
            settle_delay: Duration::ZERO,
            device_timeout: DEFAULT_DEVICE_TIMEOUT,
            report_failures: false,
        }
    }

    /// Executor with retry, settle, timeout and failure-report settings taken
    /// from `config`.
    pub fn from_config(
        config: &ClientConfig,
        devices: Arc<dyn DeviceFactory>,
        acks: Arc<dyn AckSink>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self::new(devices, acks, events)
            .with_policy(RetryPolicy::from_config(config))
            .with_settle_delay(config.settle_delay())
            .with_device_timeout(config.device_timeout())
            .with_failure_reports(config.report_failures)
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_device_timeout(mut self, timeout: Duration) -> Self {
        self.device_timeout = timeout;
        self
    }

    /// Send a negative acknowledgment when a job is abandoned.
    pub fn with_failure_reports(mut self, enabled: bool) -> Self {
        self.report_failures = enabled;
        self
    }

    /// Run `job` to completion: printed, write failed, or abandoned.
    ///
    /// Never fails; every error is handled here and reported as an event.
    #[instrument(skip_all, fields(job_id = %job.id))]
    pub async fn execute(&self, job: &PrintJob) -> JobOutcome {
        let mut attempt = 0u32;
        loop {
            let attempts = attempt + 1;
            match self.attempt(job).await {
                Attempt::Printed => {
                    self.emit(ClientEvent::JobPrinted {
                        job_id: job.id.clone(),
                        attempts,
                    });
                    self.acks.acknowledge(&job.id);
                    self.emit(ClientEvent::AckRequested {
                        job_id: job.id.clone(),
                    });
                    self.settle().await;
                    return JobOutcome::Printed { attempts };
                }
                Attempt::WriteFailed(error) => {
                    self.emit(ClientEvent::WriteFailed {
                        job_id: job.id.clone(),
                        error: error.to_string(),
                    });
                    self.settle().await;
                    return JobOutcome::WriteFailed { attempts };
                }
                Attempt::Unavailable(error) => {
                    self.emit(ClientEvent::AttemptFailed {
                        job_id: job.id.clone(),
                        attempt: attempts,
                        error: error.to_string(),
                    });
                    match self.policy.decide(attempt) {
                        RetryDecision::RetryAfter(delay) => {
                            attempt += 1;
                            self.emit(ClientEvent::RetryScheduled {
                                job_id: job.id.clone(),
                                retry: attempt,
                                max_retries: self.policy.max_retries,
                                delay,
                            });
                            tokio::time::sleep(delay).await;
                        }
                        RetryDecision::Exhausted => {
                            self.abandon(&job.id, attempts, &error);
                            return JobOutcome::Abandoned { attempts };
                        }
                    }
                }
            }
        }
    }

    /// One open/write/close pass on a fresh device.
    ///
    /// The pass races the device's fault channel, so a fault and the error
    /// it causes in the pending operation yield a single failed attempt.
    async fn attempt(&self, job: &PrintJob) -> Attempt {
        let (reporter, mut faults) = fault_channel();
        let mut device = self.devices.create(reporter);
        debug!(device = %device.describe(), "opening printer");

        let outcome = tokio::select! {
            biased;
            fault = faults.next() => Err(fault),
            outcome = self.run_device(device.as_mut(), job) => Ok(outcome),
        };

        match outcome {
            Err(fault) => {
                if let Err(e) = device.close().await {
                    debug!(error = %e, "close after device fault failed");
                }
                Attempt::Unavailable(fault)
            }
            Ok(Attempt::WriteFailed(error)) => match faults.try_next() {
                Some(fault) => Attempt::Unavailable(fault),
                None => Attempt::WriteFailed(error),
            },
            Ok(outcome) => outcome,
        }
    }

    async fn run_device(&self, device: &mut dyn PrinterDevice, job: &PrintJob) -> Attempt {
        if let Err(e) = self.bounded("open", device.open()).await {
            if !e.is_device_unavailable() {
                warn!(error = %e, "unexpected open error, treating the printer as unavailable");
            }
            return Attempt::Unavailable(e);
        }

        if let Err(e) = self
            .bounded("write", device.write(job.payload.as_bytes()))
            .await
        {
            if let Err(close_err) = self.bounded("close", device.close()).await {
                debug!(error = %close_err, "close after failed write also failed");
            }
            // Even a timed-out write may have reached the printer, so it is
            // never repeated. Faults are picked up by the caller.
            return Attempt::WriteFailed(e);
        }

        if let Err(e) = self.bounded("close", device.close()).await {
            // Best effort: the payload is already on the printer.
            self.emit(ClientEvent::CloseFailed {
                job_id: job.id.clone(),
                error: e.to_string(),
            });
        }
        Attempt::Printed
    }

    async fn bounded<F>(&self, operation: &'static str, fut: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        match tokio::time::timeout(self.device_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(PrintlinkError::DeviceTimeout {
                operation,
                millis: self.device_timeout.as_millis() as u64,
            }),
        }
    }

    fn abandon(&self, job_id: &JobId, attempts: u32, error: &PrintlinkError) {
        self.emit(ClientEvent::JobAbandoned {
            job_id: job_id.clone(),
            attempts,
        });
        if self.report_failures {
            let reason = format!("printer unavailable after {attempts} attempts: {error}");
            warn!(job_id = %job_id, "reporting abandoned job to the source");
            self.acks.reject(job_id, &reason);
        }
    }

    async fn settle(&self) {
        if !self.settle_delay.is_zero() {
            debug!(delay_ms = self.settle_delay.as_millis() as u64, "waiting for device to settle");
            tokio::time::sleep(self.settle_delay).await;
        }
    }

    fn emit(&self, event: ClientEvent) {
        self.events.emit(event);
    }
}
