//! Delegated-task execution: a small fixed-size worker pool.
//!
//! The spec asks for "an executor" to run CPU-bound delegated tasks off the
//! I/O thread (§5). Since nothing else in this crate is `async`/await-shaped
//! (the reactor is a synchronous readiness loop), a plain `std::thread`
//! worker pool fits better than pulling in an async runtime — there is no
//! ecosystem convention in this corpus for a bare blocking thread pool
//! beyond the standard library, so this is written directly rather than
//! reached for as a dependency.

use crate::engine::Task;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Runs submitted [`Task`]s on a fixed pool of worker threads.
pub struct ThreadPoolExecutor {
    tx: mpsc::Sender<Box<dyn Task>>,
    _workers: Vec<JoinHandle<()>>,
}

impl ThreadPoolExecutor {
    /// Spin up `num_threads` workers pulling from a shared queue.
    pub fn new(num_threads: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Box<dyn Task>>();
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = Vec::with_capacity(num_threads);
        for id in 0..num_threads.max(1) {
            let rx = Arc::clone(&rx);
            workers.push(
                thread::Builder::new()
                    .name(format!("nbio-tls-task-{id}"))
                    .spawn(move || loop {
                        let task = {
                            let rx = rx.lock().expect("executor queue poisoned");
                            rx.recv()
                        };
                        match task {
                            Ok(task) => task.run(),
                            Err(_) => break, // sender dropped, pool is shutting down
                        }
                    })
                    .expect("failed to spawn delegated-task worker"),
            );
        }
        Self {
            tx,
            _workers: workers,
        }
    }

    /// Queue a task for execution on the pool. Never blocks the caller.
    pub fn submit(&self, task: Box<dyn Task>) {
        // The only way this fails is if every worker panicked and dropped
        // its receiver; there is nothing a caller could usefully do with
        // that beyond dropping the task, so we log and move on.
        if self.tx.send(task).is_err() {
            log::error!("delegated task dropped: executor pool is gone");
        }
    }
}

impl Default for ThreadPoolExecutor {
    fn default() -> Self {
        Self::new(2)
    }
}
