// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};

use super::barrier::CompletionBarrier;
use super::queue::RequestQueue;
use super::worker::Worker;

/// Fixed set of workers sharing one queue.
///
/// There is no stop operation: workers exit when the queue is stopped and
/// drained. The pool only makes sure every worker it launched is tracked by
/// the completion barrier.
#[derive(Debug)]
pub struct WorkerPool {
    barrier: CompletionBarrier,
    thread_handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(queue: &RequestQueue, concurrency: usize) -> Self {
        let barrier = CompletionBarrier::new();
        let thread_handles = (0..concurrency)
            .map(|id| {
                // register before spawning so the barrier never undercounts
                let worker = Worker::new(id, queue.clone(), barrier.register());
                thread::spawn(move || worker.run())
            })
            .collect();
        debug!("Worker pool started with {concurrency} workers");

        Self {
            barrier,
            thread_handles,
        }
    }

    pub fn size(&self) -> usize {
        self.thread_handles.len()
    }

    /// Workers that have not exited yet.
    pub fn running(&self) -> usize {
        self.barrier.outstanding()
    }

    /// Waits up to `timeout` for every worker to exit, without consuming the pool.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.barrier.wait_timeout(timeout)
    }

    /// Block until every worker has exited. Only returns after the queue has
    /// been stopped and drained.
    pub fn wait_until_finished(self) {
        self.barrier.wait();
        for handle in self.thread_handles {
            if handle.join().is_err() {
                warn!("A worker thread panicked");
            }
        }
    }
}
