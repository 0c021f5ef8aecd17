// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

pub mod doubles;
pub mod ipc;
pub mod run_relayd;
