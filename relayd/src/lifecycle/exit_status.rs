// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::process::ExitCode;

/// Process exit statuses. Each startup failure class has its own code.
#[derive(Clone, Debug, Copy, PartialEq, Eq)]
pub enum RelayExit {
    Clean = 0,
    BadConfig = 1,
    BackendError = 2,
    BusError = 3,
}

impl RelayExit {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<RelayExit> for ExitCode {
    fn from(exit: RelayExit) -> Self {
        ExitCode::from(exit.code())
    }
}
