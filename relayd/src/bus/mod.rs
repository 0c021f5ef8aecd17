// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! Message bus contract.
//!
//! A [`BusLink`] owns the receive path. It is constructed by a
//! [`LinkConnector`] that hands it one [`InboundHandler`]; the handler is the
//! only way messages reach the core. Every delivered message carries its own
//! [`MessageBus`] handle so the worker that processes it can post the outcome
//! back to the right place.

use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::ExecOutput;
use crate::work_queue::queue::QueueStopped;

pub mod datagram_link;
pub mod envelope;

/// Message class a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    /// A fresh command invocation.
    Command,
    /// Continuation of a previously started execution.
    Execution,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Command => "command",
            Topic::Execution => "execution",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown topic '{0}'")]
pub struct UnknownTopic(pub String);

impl FromStr for Topic {
    type Err = UnknownTopic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "command" => Ok(Topic::Command),
            "execution" => Ok(Topic::Execution),
            other => Err(UnknownTopic(other.to_string())),
        }
    }
}

/// What a worker posts back for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The container ran; its exit code may still be nonzero.
    Completed(ExecOutput),
    /// The payload could not be executed.
    Failed(String),
    /// No backend session could be acquired for the request.
    BackendUnavailable(String),
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("failed to connect to the message bus: {0}")]
    Connect(#[source] io::Error),
    #[error("failed to subscribe to message topics: {0}")]
    Subscribe(String),
    #[error("failed to publish reply: {0}")]
    Publish(#[source] io::Error),
    #[error("failed to encode reply: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Reply handle attached to every inbound message.
pub trait MessageBus: Send + Sync {
    fn reply(&self, topic: Topic, outcome: &Outcome) -> Result<(), BusError>;
}

/// The single entry point from a bus link into the core. Returns
/// [`QueueStopped`] when the message was not accepted; redelivery is then up
/// to the link.
pub type InboundHandler =
    Arc<dyn Fn(Arc<dyn MessageBus>, Topic, Vec<u8>) -> Result<(), QueueStopped> + Send + Sync>;

pub trait BusLink: Send {
    /// Begin delivering messages to the handler.
    fn run(&mut self) -> Result<(), BusError>;

    /// Stop delivering messages. Idempotent, and valid even if [`run`](Self::run)
    /// never succeeded. Once it returns, the handler is not invoked again.
    fn halt(&mut self);
}

pub trait LinkConnector {
    fn connect(
        &self,
        relay_id: &str,
        handler: InboundHandler,
    ) -> Result<Box<dyn BusLink>, BusError>;
}
