use crate::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A long-running engine operation executing on its own thread.
///
/// Dropping the handle detaches the thread; the operation still runs to completion or
/// until cancelled through a clone of [`TaskHandle::cancel_token`].
pub struct TaskHandle<T> {
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<Result<T, Error>>,
}

impl<T: Send + 'static> TaskHandle<T> {
    pub(crate) fn spawn<F>(name: &str, cancel: Arc<AtomicBool>, work: F) -> Result<Self, Error>
    where
        F: FnOnce() -> Result<T, Error> + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(work)?;
        Ok(Self { cancel, handle })
    }

    /// Request cancellation. The operation stops at its next check and rolls back
    /// whatever it had not committed.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Block until the operation finishes.
    pub fn join(self) -> Result<T, Error> {
        match self.handle.join() {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(Error::Other(format!("background task panicked: {}", message)))
            }
        }
    }
}
