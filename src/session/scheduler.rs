//! Cancellable one-shot timer for the proactive refresh.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Default)]
struct Slot {
    /// Bumped on every arm and cancel. A task only runs its body if the
    /// epoch it was armed with is still current.
    epoch: u64,
    handle: Option<JoinHandle<()>>,
}

/// At most one pending timer at a time. Arming replaces the previous timer,
/// cancelling aborts it. Dropping the scheduler cancels too.
#[derive(Debug, Default)]
pub struct RefreshScheduler {
    slot: Mutex<Slot>,
}

impl RefreshScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task(epoch)` after `delay`, replacing any pending timer.
    ///
    /// The task should call [`release`](Self::release) with its epoch before
    /// doing work, and stop if that returns `false`. Must be called from
    /// within a Tokio runtime.
    pub fn arm<F, Fut>(&self, delay: Duration, task: F) -> u64
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.epoch += 1;
        let epoch = slot.epoch;
        let body = task(epoch);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            body.await;
        });
        if let Some(previous) = slot.handle.replace(handle) {
            previous.abort();
        }
        debug!(epoch, delay_secs = delay.as_secs(), "Proactive refresh armed");
        epoch
    }

    /// Called by a fired task. Detaches it from the scheduler so a re-arm
    /// from inside the task does not abort the task itself.
    ///
    /// Returns `false` if the timer was cancelled or replaced meanwhile.
    pub fn release(&self, epoch: u64) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.epoch != epoch {
            return false;
        }
        slot.handle = None;
        true
    }

    /// Abort the pending timer, if any.
    pub fn cancel(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.epoch += 1;
        if let Some(handle) = slot.handle.take() {
            handle.abort();
            debug!("Proactive refresh cancelled");
        }
    }

    /// Whether a timer is pending.
    pub fn is_armed(&self) -> bool {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        let slot = self.slot.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.handle.take() {
            handle.abort();
        }
    }
}
