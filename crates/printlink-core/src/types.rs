// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the printlink client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a print job, assigned by the job source.
///
/// Kept in the shape the source sent it (number or string) so that the
/// acknowledgment echoes it back byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobId {
    Number(serde_json::Number),
    Text(String),
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<u64> for JobId {
    fn from(n: u64) -> Self {
        Self::Number(n.into())
    }
}

impl From<i64> for JobId {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

/// Opaque device-format bytes carried by a job. Written to the printer
/// verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "PayloadRepr")]
pub struct Payload(Vec<u8>);

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self(text.as_bytes().to_vec())
    }
}

/// The JSON shapes a job source uses for the `data` field.
#[derive(Deserialize)]
#[serde(untagged)]
enum PayloadRepr {
    /// Plain string; its UTF-8 bytes are the payload.
    Text(String),
    /// Array of byte values.
    Bytes(Vec<u8>),
    /// A serialized Node.js buffer: `{"type":"Buffer","data":[..]}`.
    Buffer {
        #[serde(rename = "type")]
        kind: String,
        data: Vec<u8>,
    },
}

impl TryFrom<PayloadRepr> for Payload {
    type Error = String;

    fn try_from(repr: PayloadRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            PayloadRepr::Text(text) => Ok(Self(text.into_bytes())),
            PayloadRepr::Bytes(bytes) => Ok(Self(bytes)),
            PayloadRepr::Buffer { kind, data } if kind == "Buffer" => Ok(Self(data)),
            PayloadRepr::Buffer { kind, .. } => {
                Err(format!("unsupported payload object type `{kind}`"))
            }
        }
    }
}

/// One unit of work received from the job source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintJob {
    pub id: JobId,
    pub payload: Payload,
    pub received_at: DateTime<Utc>,
}

impl PrintJob {
    pub fn new(id: impl Into<JobId>, payload: impl Into<Payload>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }
}

/// States of the link to the job source. There is no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// How one job's attempt sequence ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Payload written and device closed; acknowledgment requested.
    Printed { attempts: u32 },
    /// Device opened but the single write failed. Not retried, not acked.
    WriteFailed { attempts: u32 },
    /// Device never came up within the retry ceiling. Job dropped.
    Abandoned { attempts: u32 },
}

impl JobOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Printed { attempts }
            | Self::WriteFailed { attempts }
            | Self::Abandoned { attempts } => *attempts,
        }
    }

    pub fn is_printed(&self) -> bool {
        matches!(self, Self::Printed { .. })
    }
}
