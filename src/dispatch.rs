//! Bounded worker pool for native-backend calls
//!
//! Calls into native libraries (the embedded database, the graph-index
//! library) are potentially blocking at the FFI boundary. Dispatching them
//! through a fixed pool keeps one slow call from stalling unrelated
//! collections, and the result-channel timeout enforces an engine-side
//! deadline even when the native library has no timeout primitive.

use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::errors::{EngineError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size worker pool with per-call timeouts
pub struct NativeCallPool {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl NativeCallPool {
    pub fn new(workers: usize) -> Arc<Self> {
        let (sender, receiver) = channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut handles = Vec::with_capacity(workers.max(1));
        for i in 0..workers.max(1) {
            let receiver = Arc::clone(&receiver);
            let worker = thread::Builder::new()
                .name(format!("smriti-native-{i}"))
                .spawn(move || loop {
                    let job = {
                        let guard = match receiver.lock() {
                            Ok(guard) => guard,
                            Err(_) => return,
                        };
                        guard.recv()
                    };
                    match job {
                        Ok(job) => job(),
                        Err(_) => return, // pool dropped
                    }
                });
            match worker {
                Ok(handle) => handles.push(handle),
                Err(err) => tracing::warn!(error = %err, "failed to spawn dispatch worker"),
            }
        }

        Arc::new(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
        })
    }

    /// Run a closure on the pool, waiting at most `timeout` for its result
    ///
    /// On timeout the call keeps running on its worker (native code cannot
    /// be killed safely) but the caller gets `SearchCancelled` immediately;
    /// cooperative tokens inside the closure observe the same deadline and
    /// abort the abandoned work.
    pub fn run<T, F>(&self, timeout: Duration, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx): (Sender<T>, Receiver<T>) = channel();
        let job: Job = Box::new(move || {
            let _ = tx.send(f());
        });

        {
            let guard = self
                .sender
                .lock()
                .map_err(|_| EngineError::Internal(anyhow::anyhow!("dispatch pool poisoned")))?;
            let Some(sender) = guard.as_ref() else {
                return Err(EngineError::Internal(anyhow::anyhow!(
                    "dispatch pool shut down"
                )));
            };
            sender
                .send(job)
                .map_err(|_| EngineError::Internal(anyhow::anyhow!("dispatch pool closed")))?;
        }

        match rx.recv_timeout(timeout) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => Err(EngineError::SearchCancelled),
            Err(RecvTimeoutError::Disconnected) => Err(EngineError::Internal(anyhow::anyhow!(
                "dispatch worker dropped the result channel"
            ))),
        }
    }
}

impl Drop for NativeCallPool {
    fn drop(&mut self) {
        // Closing the channel lets idle workers exit their recv loop.
        if let Ok(mut guard) = self.sender.lock() {
            guard.take();
        }
        if let Ok(mut workers) = self.workers.lock() {
            for handle in workers.drain(..) {
                let _ = handle.join();
            }
        }
    }
}
