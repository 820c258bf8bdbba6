//! Cancellable recurring background tasks.
//!
//! Each task owns exactly one tokio task driving a fixed-interval timer.
//! Cancellation is cooperative: an invocation already in progress runs to
//! completion, no later invocation starts.

use core::{future::Future, time::Duration};
use std::sync::Mutex;

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, warn};

/// Handle to a running recurring task. Dropping the handle cancels the task.
pub struct RecurringTask {
    name: String,
    cancel_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Starts a background timer invoking `action` every `period`.
///
/// The first invocation happens one full period after creation. Failures
/// inside `action` are the action's own concern; the timer keeps ticking.
pub fn create_recurring_task<F, Fut>(name: &str, period: Duration, mut action: F) -> RecurringTask
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let (cancel_tx, mut cancel_rx) = watch::channel(false);
    let task_name = name.to_string();

    let handle = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first interval tick completes immediately; consume it so the
        // action only runs after a full period has elapsed.
        ticker.tick().await;
        loop {
            tokio::select! {
                biased;
                _ = cancel_rx.changed() => {
                    debug!(task = %task_name, "Recurring task cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    action().await;
                }
            }
        }
    });

    RecurringTask {
        name: name.to_string(),
        cancel_tx,
        handle: Mutex::new(Some(handle)),
    }
}

impl RecurringTask {
    /// Stops future invocations and waits for the driving task to exit. An
    /// in-flight invocation completes first. Calling this on an
    /// already-cancelled task is a no-op.
    pub async fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
        let handle = {
            let mut guard = self.handle.lock().unwrap_or_else(|e| e.into_inner());
            guard.take()
        };
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(task = %self.name, "Recurring task panicked: {e}");
        }
    }
}
