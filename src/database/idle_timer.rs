//! Cancellable single-shot scheduled task.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Holds at most one pending delayed task.
///
/// Arming replaces (and aborts) any task already pending; disarming aborts it.
#[derive(Debug, Default)]
pub struct IdleTimer {
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl IdleTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `action` to run once after `delay`.
    pub fn arm<F>(&self, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        });

        let previous = self.lock().replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Cancel the pending task, if any. Returns true when one was pending.
    pub fn disarm(&self) -> bool {
        match self.lock().take() {
            Some(handle) => {
                let was_pending = !handle.is_finished();
                handle.abort();
                was_pending
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        // A panic while holding this lock leaves only a JoinHandle behind.
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for IdleTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}
