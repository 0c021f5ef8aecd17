// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//! # Relay lifecycle
//!
//! ```text
//!   Initializing -> BackendVerified -> PoolStarted -> BusConnected -> Ready
//!        |                                  |              |           |
//!        +---------- startup failure -------+--------------+           | interrupt
//!                          |                                           |
//!                          v                                           v
//!                      Draining  <-------------------------------------+
//!                          |   1. halt bus link
//!                          |   2. stop request queue
//!                          |   3. wait on completion barrier
//!                          v
//!                     Terminated
//! ```
//!
//! Every path ends in `Draining`, so a failed startup releases exactly what
//! it had started. The process exit status tells the failure classes apart.

pub mod coordinator;
pub mod exit_status;
pub mod signals;
pub mod state;

pub use coordinator::{Coordinator, StartupError};
pub use exit_status::RelayExit;
pub use signals::{InterruptSignal, ShutdownSignal};
pub use state::{Lifecycle, LifecycleState};
