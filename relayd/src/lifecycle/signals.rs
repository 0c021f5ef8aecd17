// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use log::{debug, warn};
use nix::sys::signal::{self, SigHandler, SigSet, Signal};

/// Source of the one shutdown request a relay honours.
pub trait ShutdownSignal {
    /// Blocks until shutdown is requested. Called at most once.
    fn wait(&mut self);
}

/// SIGINT/SIGTERM, received synchronously with `sigwait`.
///
/// [`install`](Self::install) must run on the main thread before any other
/// thread is spawned, so every thread inherits the blocked mask and the signal
/// can only be picked up by [`wait`](ShutdownSignal::wait).
#[derive(Debug)]
pub struct InterruptSignal {
    mask: SigSet,
}

impl InterruptSignal {
    pub fn install() -> nix::Result<Self> {
        let mut mask = SigSet::empty();
        mask.add(Signal::SIGINT);
        mask.add(Signal::SIGTERM);
        mask.thread_block()?;
        Ok(Self { mask })
    }

    /// Default dispositions back, mask lifted. A second signal now ends the process.
    fn disarm(&self) {
        for sig in self.mask.iter() {
            // SAFETY: restoring the default disposition installs no handler code
            if let Err(e) = unsafe { signal::signal(sig, SigHandler::SigDfl) } {
                warn!("Failed to reset {sig}: {e}");
            }
        }
        if let Err(e) = self.mask.thread_unblock() {
            warn!("Failed to unblock interrupt signals: {e}");
        }
    }
}

impl ShutdownSignal for InterruptSignal {
    fn wait(&mut self) {
        match self.mask.wait() {
            Ok(sig) => debug!("Received {sig}"),
            Err(e) => warn!("Waiting for interrupt failed: {e}"),
        }
        self.disarm();
    }
}
