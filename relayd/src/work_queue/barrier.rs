// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Counts outstanding participants and releases waiters when the count hits zero.
///
/// Each participant holds a [`CompletionToken`]; dropping the token is its one
/// and only completion signal, so a participant that unwinds still counts down.
#[derive(Debug, Clone, Default)]
pub struct CompletionBarrier {
    sync_state: Arc<(Mutex<usize>, Condvar)>,
}

#[derive(Debug)]
pub struct CompletionToken {
    sync_state: Arc<(Mutex<usize>, Condvar)>,
}

impl CompletionBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self) -> CompletionToken {
        let (lock, _) = &*self.sync_state;
        *lock.lock().unwrap() += 1;
        CompletionToken {
            sync_state: self.sync_state.clone(),
        }
    }

    pub fn outstanding(&self) -> usize {
        let (lock, _) = &*self.sync_state;
        *lock.lock().unwrap()
    }

    /// Block until every token has been dropped. Consumes the barrier so it
    /// cannot be waited on again.
    pub fn wait(self) {
        let (lock, cvar) = &*self.sync_state;
        let mut outstanding = lock.lock().unwrap();
        while *outstanding > 0 {
            outstanding = cvar.wait(outstanding).unwrap();
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`. Returns whether
    /// the barrier was released.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (lock, cvar) = &*self.sync_state;
        let mut outstanding = lock.lock().unwrap();
        while *outstanding > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            outstanding = cvar.wait_timeout(outstanding, deadline - now).unwrap().0;
        }
        true
    }
}

impl Drop for CompletionToken {
    fn drop(&mut self) {
        let (lock, cvar) = &*self.sync_state;
        // a poisoned lock must not turn into a double panic during unwinding
        let mut outstanding = match lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *outstanding -= 1;
        if *outstanding == 0 {
            cvar.notify_all();
        }
    }
}
