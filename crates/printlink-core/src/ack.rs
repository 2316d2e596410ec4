// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The seam through which the print side asks the link side to report job
// completion. The link owns the connection; callers only request sends.

use crate::types::JobId;

/// Accepts acknowledgment requests for finished jobs.
///
/// Implementations must not block: the executor calls these from its own
/// task between closing the device and signalling completion.
pub trait AckSink: Send + Sync {
    /// The job's device attempt sequence completed and the payload was written.
    fn acknowledge(&self, job_id: &JobId);

    /// The job was abandoned after exhausting its retries.
    fn reject(&self, job_id: &JobId, reason: &str);
}

/// Discards every request. Used for one-shot local prints.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAck;

impl AckSink for NoAck {
    fn acknowledge(&self, _job_id: &JobId) {}

    fn reject(&self, _job_id: &JobId, _reason: &str) {}
}
