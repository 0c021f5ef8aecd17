// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::panic::{self, AssertUnwindSafe};

use log::{debug, warn};

use super::barrier::CompletionToken;
use super::queue::RequestQueue;
use super::request::Request;
use crate::backend::ContainerBackend;
use crate::bus::Outcome;

/// Pulls requests one at a time until the queue reports it is closed.
#[derive(Debug)]
pub struct Worker {
    id: usize,
    queue: RequestQueue,
    done: CompletionToken,
}

impl Worker {
    pub fn new(id: usize, queue: RequestQueue, done: CompletionToken) -> Self {
        Self { id, queue, done }
    }

    pub fn run(self) {
        debug!("Worker {} started", self.id);
        while let Some(request) = self.queue.dequeue() {
            self.process(request);
        }
        debug!("Worker {} exiting, request queue closed", self.id);
        drop(self.done);
    }

    fn process(&self, request: Request) {
        let Request {
            topic,
            message,
            bus,
            backend,
        } = request;

        debug!("Worker {} processing {topic} request", self.id);
        let outcome = execute(backend.as_deref(), &message);
        match &outcome {
            Outcome::Completed(output) => debug!(
                "Worker {} finished {topic} request, exit code {}",
                self.id, output.exit_code
            ),
            Outcome::Failed(reason) => warn!("Worker {}: {topic} request failed: {reason}", self.id),
            Outcome::BackendUnavailable(reason) => {
                warn!("Worker {}: no backend session for {topic} request: {reason}", self.id)
            }
        }

        if let Err(e) = bus.reply(topic, &outcome) {
            warn!("Worker {} could not post {topic} result: {e}", self.id);
        }
    }
}

/// Acquire a session and run one payload in it. Never panics and never
/// retries; every failure becomes an [`Outcome`].
pub fn execute(backend: Option<&dyn ContainerBackend>, payload: &[u8]) -> Outcome {
    let Some(backend) = backend else {
        return Outcome::BackendUnavailable("container backend is disabled".into());
    };

    let ran = panic::catch_unwind(AssertUnwindSafe(|| {
        let session = match backend.acquire_session() {
            Ok(session) => session,
            Err(e) => return Outcome::BackendUnavailable(e.to_string()),
        };
        match session.execute(payload) {
            Ok(output) => Outcome::Completed(output),
            Err(e) => Outcome::Failed(e.to_string()),
        }
    }));
    ran.unwrap_or_else(|_| Outcome::Failed("container backend panicked".into()))
}
