// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::Arc;

use log::{debug, error, info};
use thiserror::Error;

use super::exit_status::RelayExit;
use super::signals::ShutdownSignal;
use super::state::{Lifecycle, LifecycleState};
use crate::backend::{BackendError, ContainerBackend};
use crate::bus::{BusError, BusLink, InboundHandler, LinkConnector, MessageBus, Topic};
use crate::work_queue::pool::WorkerPool;
use crate::work_queue::queue::{QueueStopped, RequestQueue};
use crate::work_queue::request::Request;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Backend(BackendError),
    #[error(transparent)]
    Connect(BusError),
    #[error(transparent)]
    Subscribe(BusError),
}

impl StartupError {
    pub fn exit_status(&self) -> RelayExit {
        match self {
            StartupError::Backend(_) => RelayExit::BackendError,
            StartupError::Connect(_) | StartupError::Subscribe(_) => RelayExit::BusError,
        }
    }
}

/// Owns every long-lived part of a relay and sequences startup and shutdown.
pub struct Coordinator {
    relay_id: String,
    concurrency: usize,
    backend: Option<Arc<dyn ContainerBackend>>,
    lifecycle: Lifecycle,
    queue: Option<RequestQueue>,
    pool: Option<WorkerPool>,
    link: Option<Box<dyn BusLink>>,
}

impl Coordinator {
    /// `backend` is `None` when the container backend is disabled; requests
    /// are then answered with a backend-unavailable notice.
    pub fn new(
        relay_id: &str,
        concurrency: usize,
        backend: Option<Arc<dyn ContainerBackend>>,
    ) -> Self {
        assert!(concurrency > 0, "a relay needs at least one worker");
        Self {
            relay_id: relay_id.to_string(),
            concurrency,
            backend,
            lifecycle: Lifecycle::new(),
            queue: None,
            pool: None,
            link: None,
        }
    }

    pub fn relay_id(&self) -> &str {
        &self.relay_id
    }

    /// A handle that stays valid after the coordinator has been moved into [`run`](Self::run).
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.clone()
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.current()
    }

    /// Requests accepted but not yet picked up by a worker.
    pub fn pending_requests(&self) -> usize {
        self.queue.as_ref().map_or(0, RequestQueue::len)
    }

    pub fn running_workers(&self) -> usize {
        self.pool.as_ref().map_or(0, WorkerPool::running)
    }

    /// Runs the relay until `signal` fires and returns the exit status.
    /// Startup failures skip the wait but still go through [`drain`](Self::drain).
    pub fn run(mut self, connector: &dyn LinkConnector, signal: &mut dyn ShutdownSignal) -> RelayExit {
        let status = match self.start(connector) {
            Ok(()) => {
                signal.wait();
                RelayExit::Clean
            }
            Err(e) => {
                error!("Relay {} failed to start: {e}", self.relay_id);
                e.exit_status()
            }
        };
        self.drain();
        status
    }

    /// Initializing through Ready. On error the relay is left in whatever
    /// state it reached; call [`drain`](Self::drain) to release what was started.
    pub fn start(&mut self, connector: &dyn LinkConnector) -> Result<(), StartupError> {
        info!("Relay {} is initializing.", self.relay_id);

        match &self.backend {
            Some(backend) => {
                backend
                    .verify_configuration()
                    .map_err(StartupError::Backend)?;
                info!("Container backend configuration verified.");
            }
            None => info!("Container backend disabled."),
        }
        self.lifecycle.advance(LifecycleState::BackendVerified);

        let queue = RequestQueue::for_workers(self.concurrency);
        self.pool = Some(WorkerPool::start(&queue, self.concurrency));
        self.queue = Some(queue.clone());
        info!("Started {} workers.", self.concurrency);
        self.lifecycle.advance(LifecycleState::PoolStarted);

        let handler = inbound_handler(queue, self.backend.clone());
        let link = connector
            .connect(&self.relay_id, handler)
            .map_err(StartupError::Connect)?;
        self.lifecycle.advance(LifecycleState::BusConnected);

        // kept even if run fails so drain can halt it
        let link = self.link.insert(link);
        link.run().map_err(StartupError::Subscribe)?;
        info!("Connected to the message bus.");

        self.lifecycle.advance(LifecycleState::Ready);
        info!("Relay {} is ready.", self.relay_id);
        Ok(())
    }

    /// Halt the bus link, stop the queue, then wait for every worker.
    /// Idempotent. Valid from any state.
    pub fn drain(&mut self) {
        if !self.lifecycle.advance(LifecycleState::Draining) {
            return;
        }
        info!("Starting shut down.");

        if let Some(link) = self.link.as_mut() {
            link.halt();
            debug!("Bus link halted");
        }
        if let Some(queue) = &self.queue {
            queue.stop();
        }
        if let Some(pool) = self.pool.take() {
            pool.wait_until_finished();
            debug!("All workers exited");
        }

        self.lifecycle.advance(LifecycleState::Terminated);
        info!("Relay {} shut down complete.", self.relay_id);
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.drain();
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("relay_id", &self.relay_id)
            .field("concurrency", &self.concurrency)
            .field("state", &self.lifecycle.current())
            .finish()
    }
}

/// Turns each delivered message into a [`Request`] and offers it to the queue.
fn inbound_handler(
    queue: RequestQueue,
    backend: Option<Arc<dyn ContainerBackend>>,
) -> InboundHandler {
    Arc::new(
        move |bus: Arc<dyn MessageBus>, topic: Topic, message: Vec<u8>| -> Result<(), QueueStopped> {
            let request = Request::new(topic, message, bus, backend.clone());
            queue
                .enqueue(request)
                .inspect_err(|_| debug!("Dropping {topic} message, request queue is stopped"))
        },
    )
}
