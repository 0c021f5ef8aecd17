// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use async_channel::{Receiver, Sender};
use log::debug;
use thiserror::Error;

use super::request::Request;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("request queue has been stopped")]
pub struct QueueStopped;

/// Bounded FIFO of pending requests, shared by the bus link and all workers.
///
/// Clones share the same underlying buffer.
#[derive(Debug, Clone)]
pub struct RequestQueue {
    tx: Sender<Request>,
    rx: Receiver<Request>,
}

impl RequestQueue {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "request queue capacity must be positive");
        let (tx, rx) = async_channel::bounded(capacity);
        Self { tx, rx }
    }

    /// Queue sized for `concurrency` workers plus the same again as burst headroom.
    pub fn for_workers(concurrency: usize) -> Self {
        Self::new(concurrency * 2)
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(usize::MAX)
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn is_stopped(&self) -> bool {
        self.tx.is_closed()
    }

    /// Blocks while the queue is full. Fails without inserting once the queue
    /// is stopped, including for callers that were already blocked.
    pub fn enqueue(&self, request: Request) -> Result<(), QueueStopped> {
        self.tx.send_blocking(request).map_err(|_| QueueStopped)
    }

    /// Blocks while the queue is empty. Returns `None` once the queue is
    /// stopped and every accepted request has been handed out.
    pub fn dequeue(&self) -> Option<Request> {
        self.rx.recv_blocking().ok()
    }

    /// Stop accepting requests and wake every blocked caller. Idempotent.
    /// Requests already queued stay available to [`dequeue`](Self::dequeue).
    pub fn stop(&self) {
        if self.tx.close() {
            debug!("Request queue stopped with {} pending requests", self.len());
        }
    }
}
