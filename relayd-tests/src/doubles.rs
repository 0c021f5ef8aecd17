// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! In-process stand-ins for the bus, the container backend and the
//! interrupt signal, so relay scenarios can run without sockets or engines.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::{Duration, Instant};

use async_channel::{Receiver, Sender};

use relayd::backend::{BackendError, ContainerBackend, ExecOutput, Session};
use relayd::bus::{BusError, BusLink, InboundHandler, LinkConnector, MessageBus, Outcome, Topic};
use relayd::lifecycle::ShutdownSignal;
use relayd::work_queue::queue::QueueStopped;

/// Wait on `cvar` until `done` holds or `timeout` passes.
fn wait_while<'a, T>(
    lock: &'a Mutex<T>,
    cvar: &Condvar,
    timeout: Duration,
    mut done: impl FnMut(&T) -> bool,
) -> std::sync::MutexGuard<'a, T> {
    let deadline = Instant::now() + timeout;
    let mut guard = lock.lock().unwrap();
    while !done(&guard) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        guard = cvar.wait_timeout(guard, deadline - now).unwrap().0;
    }
    guard
}

//
// Bus
//

/// Reply handle that records every outcome posted to it.
#[derive(Default)]
pub struct RecordingBus {
    replies: Mutex<Vec<(Topic, Outcome)>>,
    cvar: Condvar,
}

impl RecordingBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn replies(&self) -> Vec<(Topic, Outcome)> {
        self.replies.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.replies.lock().unwrap().len()
    }

    /// Returns once `count` replies arrived, or whatever arrived by `timeout`.
    pub fn wait_for_count(&self, count: usize, timeout: Duration) -> Vec<(Topic, Outcome)> {
        wait_while(&self.replies, &self.cvar, timeout, |r| r.len() >= count).clone()
    }

    /// Stdout of every completed reply, sorted.
    pub fn completed_payloads(&self) -> Vec<String> {
        let mut payloads: Vec<String> = self
            .replies()
            .into_iter()
            .filter_map(|(_, outcome)| match outcome {
                Outcome::Completed(output) => Some(String::from_utf8_lossy(&output.stdout).into_owned()),
                _ => None,
            })
            .collect();
        payloads.sort();
        payloads
    }
}

impl MessageBus for RecordingBus {
    fn reply(&self, topic: Topic, outcome: &Outcome) -> Result<(), BusError> {
        self.replies.lock().unwrap().push((topic, outcome.clone()));
        self.cvar.notify_all();
        Ok(())
    }
}

/// What a [`FakeLink`] went through, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Running,
    /// Whether the queue still accepted a message sent as halt began.
    Halted { accepted_at_halt: Option<bool> },
}

#[derive(Default)]
struct LinkState {
    handler: Mutex<Option<InboundHandler>>,
    halted: RwLock<bool>,
    events: Mutex<Vec<LinkEvent>>,
    fail_connect: bool,
    fail_run: bool,
    send_on_halt: bool,
    halt_bus: Arc<RecordingBus>,
}

/// Connector producing a single [`FakeLink`]. Clones share that link, so a
/// test can keep one clone to inject messages while the relay owns another.
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<LinkState>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum DeliveryError {
    /// Never connected, or already halted; the handler was not called.
    LinkDown,
    /// The handler was called and refused the message.
    Rejected(QueueStopped),
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_connect() -> Self {
        Self::with(|s| s.fail_connect = true)
    }

    pub fn failing_run() -> Self {
        Self::with(|s| s.fail_run = true)
    }

    /// On halt, offer one more message to the handler and record whether
    /// the queue took it.
    pub fn sending_on_halt() -> Self {
        Self::with(|s| s.send_on_halt = true)
    }

    fn with(configure: impl FnOnce(&mut LinkState)) -> Self {
        let mut state = LinkState::default();
        configure(&mut state);
        Self {
            state: Arc::new(state),
        }
    }

    /// Deliver a message the way the link's receive path would. Blocks while
    /// the relay's queue is full.
    pub fn deliver(
        &self,
        bus: Arc<dyn MessageBus>,
        topic: Topic,
        payload: &[u8],
    ) -> Result<(), DeliveryError> {
        let halted = self.state.halted.read().unwrap();
        if *halted {
            return Err(DeliveryError::LinkDown);
        }
        let handler = self
            .state
            .handler
            .lock()
            .unwrap()
            .clone()
            .ok_or(DeliveryError::LinkDown)?;
        handler(bus, topic, payload.to_vec()).map_err(DeliveryError::Rejected)
    }

    pub fn is_halted(&self) -> bool {
        *self.state.halted.read().unwrap()
    }

    pub fn events(&self) -> Vec<LinkEvent> {
        self.state.events.lock().unwrap().clone()
    }

    /// Replies to the message sent on halt end up here.
    pub fn halt_bus(&self) -> Arc<RecordingBus> {
        self.state.halt_bus.clone()
    }
}

impl LinkConnector for FakeConnector {
    fn connect(&self, _relay_id: &str, handler: InboundHandler) -> Result<Box<dyn BusLink>, BusError> {
        if self.state.fail_connect {
            return Err(BusError::Connect(std::io::Error::from(
                std::io::ErrorKind::ConnectionRefused,
            )));
        }
        *self.state.handler.lock().unwrap() = Some(handler);
        self.state.events.lock().unwrap().push(LinkEvent::Connected);
        Ok(Box::new(FakeLink {
            state: self.state.clone(),
        }))
    }
}

pub struct FakeLink {
    state: Arc<LinkState>,
}

impl BusLink for FakeLink {
    fn run(&mut self) -> Result<(), BusError> {
        if self.state.fail_run {
            return Err(BusError::Subscribe("subscription refused".into()));
        }
        self.state.events.lock().unwrap().push(LinkEvent::Running);
        Ok(())
    }

    fn halt(&mut self) {
        // waits for deliveries in progress
        let mut halted = self.state.halted.write().unwrap();
        if *halted {
            return;
        }

        let accepted_at_halt = if self.state.send_on_halt {
            let handler = self.state.handler.lock().unwrap().clone();
            handler.map(|handler| {
                let bus: Arc<dyn MessageBus> = self.state.halt_bus.clone();
                handler(bus, Topic::Command, b"at-halt".to_vec()).is_ok()
            })
        } else {
            None
        };
        *halted = true;
        self.state
            .events
            .lock()
            .unwrap()
            .push(LinkEvent::Halted { accepted_at_halt });
    }
}

//
// Backends
//

/// Echoes each payload back as stdout. `b"fail"` produces an execution
/// error, `b"panic"` panics inside the session.
#[derive(Default)]
pub struct EchoBackend {
    pub verify_fails: bool,
    failing_acquires: AtomicUsize,
    sessions: AtomicUsize,
}

impl EchoBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_verification() -> Arc<Self> {
        Arc::new(Self {
            verify_fails: true,
            ..Default::default()
        })
    }

    /// The first `count` session acquisitions fail.
    pub fn failing_acquires(count: usize) -> Arc<Self> {
        Arc::new(Self {
            failing_acquires: AtomicUsize::new(count),
            ..Default::default()
        })
    }

    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }
}

impl ContainerBackend for EchoBackend {
    fn verify_configuration(&self) -> Result<(), BackendError> {
        if self.verify_fails {
            return Err(BackendError::Verify("image relay/echo not found".into()));
        }
        Ok(())
    }

    fn acquire_session(&self) -> Result<Box<dyn Session>, BackendError> {
        if self
            .failing_acquires
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BackendError::Unavailable("engine not responding".into()));
        }
        self.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(EchoSession))
    }
}

struct EchoSession;

impl Session for EchoSession {
    fn execute(self: Box<Self>, payload: &[u8]) -> Result<ExecOutput, BackendError> {
        match payload {
            b"fail" => Err(BackendError::Execution("exit status 125".into())),
            b"panic" => panic!("echo session asked to panic"),
            _ => Ok(ExecOutput {
                exit_code: 0,
                stdout: payload.to_vec(),
                stderr: Vec::new(),
            }),
        }
    }
}

/// Echo backend whose sessions hold until [`Gate::open`] is called.
pub struct GatedBackend {
    started: Arc<(Mutex<Vec<Vec<u8>>>, Condvar)>,
    gate: Receiver<()>,
}

/// Test-side handle of a [`GatedBackend`].
pub struct Gate {
    started: Arc<(Mutex<Vec<Vec<u8>>>, Condvar)>,
    gate: Sender<()>,
}

impl GatedBackend {
    pub fn new() -> (Arc<Self>, Gate) {
        let started = Arc::new((Mutex::new(Vec::new()), Condvar::new()));
        let (tx, rx) = async_channel::unbounded();
        let backend = Arc::new(Self {
            started: started.clone(),
            gate: rx,
        });
        (backend, Gate { started, gate: tx })
    }
}

impl Gate {
    /// Payloads whose sessions have started executing.
    pub fn started(&self) -> Vec<Vec<u8>> {
        self.started.0.lock().unwrap().clone()
    }

    pub fn wait_started(&self, count: usize, timeout: Duration) -> usize {
        let (lock, cvar) = &*self.started;
        wait_while(lock, cvar, timeout, |s| s.len() >= count).len()
    }

    /// Releases every held session, now and later.
    pub fn open(&self) {
        self.gate.close();
    }
}

impl ContainerBackend for GatedBackend {
    fn verify_configuration(&self) -> Result<(), BackendError> {
        Ok(())
    }

    fn acquire_session(&self) -> Result<Box<dyn Session>, BackendError> {
        Ok(Box::new(GatedSession {
            started: self.started.clone(),
            gate: self.gate.clone(),
        }))
    }
}

struct GatedSession {
    started: Arc<(Mutex<Vec<Vec<u8>>>, Condvar)>,
    gate: Receiver<()>,
}

impl Session for GatedSession {
    fn execute(self: Box<Self>, payload: &[u8]) -> Result<ExecOutput, BackendError> {
        {
            let (lock, cvar) = &*self.started;
            lock.lock().unwrap().push(payload.to_vec());
            cvar.notify_all();
        }
        // returns Err once the gate is closed
        let _ = self.gate.recv_blocking();
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

/// Shutdown signal fired by the test through a [`ShutdownTrigger`].
pub struct ManualShutdown {
    rx: Receiver<()>,
}

#[derive(Clone)]
pub struct ShutdownTrigger {
    tx: Sender<()>,
}

impl ManualShutdown {
    pub fn new() -> (Self, ShutdownTrigger) {
        let (tx, rx) = async_channel::bounded(1);
        (Self { rx }, ShutdownTrigger { tx })
    }
}

impl ShutdownTrigger {
    pub fn fire(&self) {
        self.tx.close();
    }
}

impl ShutdownSignal for ManualShutdown {
    fn wait(&mut self) {
        let _ = self.rx.recv_blocking();
    }
}
