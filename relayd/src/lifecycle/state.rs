// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use log::debug;

/// Relay lifecycle. Ordered: the relay only ever moves forward.
#[derive(Clone, Debug, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    Initializing,
    BackendVerified,
    PoolStarted,
    BusConnected,
    Ready,
    Draining,
    Terminated,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug)]
struct Progress {
    current: LifecycleState,
    history: Vec<LifecycleState>,
}

/// Shared view of the coordinator's state. Clones observe the same relay;
/// only the coordinator advances it.
#[derive(Clone, Debug)]
pub struct Lifecycle {
    sync_state: Arc<(Mutex<Progress>, Condvar)>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let progress = Progress {
            current: LifecycleState::Initializing,
            history: vec![LifecycleState::Initializing],
        };
        Self {
            sync_state: Arc::new((Mutex::new(progress), Condvar::new())),
        }
    }

    pub fn current(&self) -> LifecycleState {
        let (lock, _) = &*self.sync_state;
        lock.lock().unwrap().current
    }

    /// Every state entered so far, in order.
    pub fn history(&self) -> Vec<LifecycleState> {
        let (lock, _) = &*self.sync_state;
        lock.lock().unwrap().history.clone()
    }

    /// Moves to `next` if it lies ahead of the current state. States may be
    /// skipped (a failed startup goes straight to `Draining`), never revisited.
    /// Returns whether the state changed.
    pub(crate) fn advance(&self, next: LifecycleState) -> bool {
        let (lock, cvar) = &*self.sync_state;
        let mut progress = lock.lock().unwrap();
        if next <= progress.current {
            return false;
        }
        debug!("Lifecycle {} -> {}", progress.current, next);
        progress.current = next;
        progress.history.push(next);
        cvar.notify_all();
        true
    }

    /// Blocks until the relay has reached `state` or any later one.
    pub fn wait_for(&self, state: LifecycleState) -> LifecycleState {
        let (lock, cvar) = &*self.sync_state;
        let mut progress = lock.lock().unwrap();
        while progress.current < state {
            progress = cvar.wait(progress).unwrap();
        }
        progress.current
    }

    pub fn wait_for_timeout(&self, state: LifecycleState, timeout: Duration) -> Option<LifecycleState> {
        let deadline = Instant::now() + timeout;
        let (lock, cvar) = &*self.sync_state;
        let mut progress = lock.lock().unwrap();
        while progress.current < state {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            progress = cvar.wait_timeout(progress, deadline - now).unwrap().0;
        }
        Some(progress.current)
    }
}
