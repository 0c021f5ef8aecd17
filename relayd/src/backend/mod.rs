// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! Container backend contract.
//!
//! The core treats the backend as an opaque capability: verify once at
//! startup, then acquire one [`Session`] per request and let it run exactly
//! one payload.

use thiserror::Error;

pub mod cli_engine;
pub mod exec_spec;

/// What a finished container run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("container backend configuration is invalid: {0}")]
    Verify(String),
    #[error("container backend is unavailable: {0}")]
    Unavailable(String),
    #[error("invalid execution payload: {0}")]
    InvalidPayload(String),
    #[error("container execution failed: {0}")]
    Execution(String),
}

pub trait ContainerBackend: Send + Sync {
    /// Called once during startup, before any worker exists.
    fn verify_configuration(&self) -> Result<(), BackendError>;

    /// Called once per request by the worker that processes it.
    fn acquire_session(&self) -> Result<Box<dyn Session>, BackendError>;
}

/// A request-scoped execution context. Consumed by its single run.
pub trait Session: Send {
    fn execute(self: Box<Self>, payload: &[u8]) -> Result<ExecOutput, BackendError>;
}

impl std::fmt::Debug for dyn ContainerBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ContainerBackend")
    }
}

impl std::fmt::Debug for dyn Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Session")
    }
}
