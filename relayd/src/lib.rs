// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! relayd: relays chat-ops bus requests into isolated container runs.
//!
//! The orchestration core lives in [`work_queue`] (bounded request queue,
//! workers, completion barrier) and [`lifecycle`] (startup/shutdown
//! coordinator). [`bus`] and [`backend`] hold the collaborator contracts
//! together with the concrete implementations the daemon ships with.

pub mod backend;
pub mod bus;
pub mod config;
pub mod lifecycle;
pub mod logging;
pub mod work_queue;

mod serde_base64;

#[cfg(test)]
mod test_doubles;
