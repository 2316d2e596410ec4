// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// printlink print: the device side of the client.  Serial and USB printer
// adapters behind one capability, the bounded-retry print executor, and the
// sequential job queue that feeds it one job at a time.

pub mod device;
pub mod executor;
pub mod queue;
pub mod receipt;
pub mod retry;

pub use device::{DeviceFactory, PrinterDevice};
pub use executor::PrintExecutor;
pub use queue::{Dispatcher, JobQueue};
pub use receipt::EscPos;
pub use retry::RetryPolicy;
