//! Named OS thread with a cooperative stop flag

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info};

use crate::error::{Error, Result};

/// A loop thread. The body receives the stop flag and is expected to check
/// it at every iteration boundary. Dropping the handle stops and joins.
pub struct WorkerThread {
    name: String,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerThread {
    pub fn spawn<F>(name: &str, body: F) -> Result<Self>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(flag))
            .map_err(Error::Spawn)?;
        info!(name, "Worker started");
        Ok(Self {
            name: name.to_string(),
            stop,
            handle: Some(handle),
        })
    }

    /// Set the stop flag without waiting.
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Stop requested");
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Wait for the body to return. A panicking body is logged, not
    /// propagated.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(name = %self.name, "Worker panicked");
            } else {
                info!(name = %self.name, "Worker joined");
            }
        }
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        self.request_stop();
        self.join();
    }
}
