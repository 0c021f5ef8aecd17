// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! Stand-ins for the bus, the backend and the interrupt signal, shared by
//! the unit tests of every module.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use async_channel::{Receiver, Sender};

use crate::backend::{BackendError, ContainerBackend, ExecOutput, Session};
use crate::bus::{BusError, BusLink, InboundHandler, LinkConnector, MessageBus, Outcome, Topic};
use crate::lifecycle::ShutdownSignal;

//
// Bus
//

/// Bus that keeps every reply it is given.
#[derive(Default)]
pub struct RecordingBus {
    replies: Mutex<Vec<(Topic, Outcome)>>,
    cvar: Condvar,
}

impl RecordingBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns once `count` replies arrived, or whatever arrived by `timeout`.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> Vec<(Topic, Outcome)> {
        let deadline = Instant::now() + timeout;
        let mut replies = self.replies.lock().unwrap();
        while replies.len() < count {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            replies = self.cvar.wait_timeout(replies, deadline - now).unwrap().0;
        }
        replies.clone()
    }

    pub fn replies(&self) -> Vec<(Topic, Outcome)> {
        self.replies.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

impl MessageBus for RecordingBus {
    fn reply(&self, topic: Topic, outcome: &Outcome) -> Result<(), BusError> {
        self.replies.lock().unwrap().push((topic, outcome.clone()));
        self.cvar.notify_all();
        Ok(())
    }
}

pub fn as_bus(bus: &Arc<RecordingBus>) -> Arc<dyn MessageBus> {
    bus.clone()
}

//
// Link
//

pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Link whose `halt` sends one more message, to see whether the queue still takes it.
pub struct CheckingLink {
    handler: InboundHandler,
    events: EventLog,
    halt_bus: Arc<RecordingBus>,
    run_fails: bool,
}

impl BusLink for CheckingLink {
    fn run(&mut self) -> Result<(), BusError> {
        self.events.lock().unwrap().push("run".into());
        if self.run_fails {
            return Err(BusError::Subscribe("topic denied".into()));
        }
        Ok(())
    }

    fn halt(&mut self) {
        let accepted = (self.handler)(as_bus(&self.halt_bus), Topic::Command, b"at-halt".to_vec());
        self.events
            .lock()
            .unwrap()
            .push(format!("halt (queue open: {})", accepted.is_ok()));
    }
}

#[derive(Default)]
pub struct CheckingConnector {
    pub connect_fails: bool,
    pub run_fails: bool,
    pub connects: AtomicUsize,
    pub halt_bus: Arc<RecordingBus>,
    pub(crate) events: EventLog,
    pub(crate) handler: Mutex<Option<InboundHandler>>,
}

impl CheckingConnector {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// The handler the coordinator injected on connect.
    pub fn handler(&self) -> InboundHandler {
        self.handler.lock().unwrap().clone().unwrap()
    }
}

impl LinkConnector for CheckingConnector {
    fn connect(&self, _relay_id: &str, handler: InboundHandler) -> Result<Box<dyn BusLink>, BusError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.connect_fails {
            return Err(BusError::Connect(io::Error::from(io::ErrorKind::ConnectionRefused)));
        }
        *self.handler.lock().unwrap() = Some(handler.clone());
        Ok(Box::new(CheckingLink {
            handler,
            events: self.events.clone(),
            halt_bus: self.halt_bus.clone(),
            run_fails: self.run_fails,
        }))
    }
}

//
// Backend
//

#[derive(Default)]
struct EchoState {
    verify_fails: AtomicBool,
    verified: AtomicBool,
    running: AtomicUsize,
    max_running: AtomicUsize,
    failing_acquires: AtomicUsize,
    gate: Mutex<Option<Receiver<()>>>,
}

/// Backend whose sessions echo the payload back on stdout. `b"fail"`
/// produces an execution error, `b"panic"` panics inside the session.
#[derive(Default, Clone)]
pub struct EchoBackend(Arc<EchoState>);

impl EchoBackend {
    pub fn failing_verification() -> Self {
        let backend = Self::default();
        backend.0.verify_fails.store(true, Ordering::SeqCst);
        backend
    }

    pub fn failing_first(acquires: usize) -> Self {
        let backend = Self::default();
        backend.0.failing_acquires.store(acquires, Ordering::SeqCst);
        backend
    }

    /// Sessions block until the returned sender is closed.
    pub fn gated() -> (Self, Sender<()>) {
        let (tx, rx) = async_channel::unbounded();
        let backend = Self::default();
        *backend.0.gate.lock().unwrap() = Some(rx);
        (backend, tx)
    }

    pub fn shared(&self) -> Arc<dyn ContainerBackend> {
        Arc::new(self.clone())
    }

    pub fn verified(&self) -> bool {
        self.0.verified.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.0.running.load(Ordering::SeqCst)
    }

    pub fn max_running(&self) -> usize {
        self.0.max_running.load(Ordering::SeqCst)
    }
}

impl ContainerBackend for EchoBackend {
    fn verify_configuration(&self) -> Result<(), BackendError> {
        self.0.verified.store(true, Ordering::SeqCst);
        if self.0.verify_fails.load(Ordering::SeqCst) {
            Err(BackendError::Verify("no such image".into()))
        } else {
            Ok(())
        }
    }

    fn acquire_session(&self) -> Result<Box<dyn Session>, BackendError> {
        let failing = &self.0.failing_acquires;
        if failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BackendError::Unavailable("engine unreachable".into()));
        }
        Ok(Box::new(EchoSession(self.0.clone())))
    }
}

struct EchoSession(Arc<EchoState>);

impl Session for EchoSession {
    fn execute(self: Box<Self>, payload: &[u8]) -> Result<ExecOutput, BackendError> {
        let now_running = self.0.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.0.max_running.fetch_max(now_running, Ordering::SeqCst);
        let gate = self.0.gate.lock().unwrap().clone();
        match gate {
            Some(gate) => {
                let _ = gate.recv_blocking();
            }
            None => thread::sleep(Duration::from_millis(20)),
        }
        self.0.running.fetch_sub(1, Ordering::SeqCst);

        if payload == b"panic" {
            panic!("session blew up");
        }
        if payload == b"fail" {
            return Err(BackendError::Execution("exit status 125".into()));
        }
        Ok(ExecOutput {
            exit_code: 0,
            stdout: payload.to_vec(),
            stderr: Vec::new(),
        })
    }
}

//
// Signal
//

/// Returns from `wait` at once, as if the interrupt had already arrived.
#[derive(Default)]
pub struct ImmediateShutdown {
    pub waited: bool,
}

impl ShutdownSignal for ImmediateShutdown {
    fn wait(&mut self) {
        self.waited = true;
    }
}
