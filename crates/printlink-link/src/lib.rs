// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// printlink link: the persistent connection to the job source.  One task
// owns the active WebSocket, runs the reconnect state machine and keepalive,
// hands received jobs to the queue and sends the acknowledgments the print
// side asks for.

pub mod link;
pub mod manager;

pub use link::{Connector, Link, WsConnector};
pub use manager::{ConnectionManager, LinkHandle};

#[cfg(test)]
mod testing;

#[cfg(test)]
mod end_to_end;
