// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// printlink core: types, wire frames and error definitions shared by the
// device, link and application crates.

pub mod ack;
pub mod config;
pub mod error;
pub mod events;
pub mod types;
pub mod wire;

pub use ack::AckSink;
pub use config::ClientConfig;
pub use error::PrintlinkError;
pub use events::{ClientEvent, EventSink, RecordingSink, TracingSink};
pub use types::*;
