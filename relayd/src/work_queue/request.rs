// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::fmt;
use std::sync::Arc;

use crate::backend::ContainerBackend;
use crate::bus::{MessageBus, Topic};

/// One inbound message on its way to a worker.
///
/// Owned by exactly one party at a time: the queue, then the worker that
/// dequeued it. Dropped once its outcome has been posted.
pub struct Request {
    pub topic: Topic,
    /// Opaque to the core; only the backend session interprets it.
    pub message: Vec<u8>,
    /// Where the outcome goes.
    pub bus: Arc<dyn MessageBus>,
    /// Source of the request's session. `None` if the backend is disabled.
    pub backend: Option<Arc<dyn ContainerBackend>>,
}

impl Request {
    pub fn new(
        topic: Topic,
        message: Vec<u8>,
        bus: Arc<dyn MessageBus>,
        backend: Option<Arc<dyn ContainerBackend>>,
    ) -> Self {
        Self {
            topic,
            message,
            bus,
            backend,
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("topic", &self.topic)
            .field("message_len", &self.message.len())
            .field("backend", &self.backend.is_some())
            .finish()
    }
}
