// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// JSON text frames exchanged with the job source.
//
//   source -> client   { "jobId": <id>, "data": <payload> }
//   client -> source   { "type": "reconnected" }
//                      { "type": "ack",  "jobId": <id> }
//                      { "type": "nack", "jobId": <id>, "reason": "..." }
//                      { "type": "ping" }

use serde::{Deserialize, Serialize};

use crate::error::{PrintlinkError, Result};
use crate::types::{JobId, Payload, PrintJob};

/// A decoded frame from the job source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// A new print job.
    Job(PrintJob),
    /// A typed control frame the client has no use for (e.g. a pong).
    Control(String),
}

#[derive(Deserialize)]
struct JobFrame {
    #[serde(rename = "jobId")]
    job_id: JobId,
    data: Payload,
}

/// Decode one text frame received from the job source.
///
/// Anything carrying a `jobId` must decode as a full job; frames with only a
/// `type` are control frames; everything else is malformed.
pub fn decode_inbound(text: &str) -> Result<InboundFrame> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| PrintlinkError::MalformedFrame(format!("not JSON: {e}")))?;

    if value.get("jobId").is_some() {
        let frame: JobFrame = serde_json::from_value(value)
            .map_err(|e| PrintlinkError::MalformedFrame(format!("bad job frame: {e}")))?;
        return Ok(InboundFrame::Job(PrintJob::new(frame.job_id, frame.data)));
    }

    match value.get("type").and_then(|t| t.as_str()) {
        Some(kind) => Ok(InboundFrame::Control(kind.to_string())),
        None => Err(PrintlinkError::MalformedFrame(
            "frame carries neither `jobId` nor `type`".into(),
        )),
    }
}

/// Frames the client sends to the job source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundFrame {
    /// Sent once per successful (re)connection; asks the source to flush its
    /// backlog of unacknowledged jobs.
    Reconnected,
    Ack {
        #[serde(rename = "jobId")]
        job_id: JobId,
    },
    Nack {
        #[serde(rename = "jobId")]
        job_id: JobId,
        reason: String,
    },
    Ping,
}

impl OutboundFrame {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Reconnected => "reconnected",
            Self::Ack { .. } => "ack",
            Self::Nack { .. } => "nack",
            Self::Ping => "ping",
        }
    }
}
