//! Notification dispatch trigger for the Sallaty client core.
//!
//! The backend owns actual push delivery; this coordinator is a client-side
//! convenience trigger that periodically asks it to flush whatever is
//! pending. At most one dispatch cycle runs at a time, guarded by a single
//! in-process flag — deliberately not a distributed lock, since the backend
//! delivery job guards against double-send on its own. Notifications the
//! backend marks `failed` stay failed; re-queuing is a human or backend
//! concern, never this client's.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ApiError, DeliveryStats, RemoteStore};

/// Default spacing between automatic dispatch cycles.
pub const DEFAULT_PROCESS_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum DispatchError {
    /// A cycle is already running; this invocation did nothing.
    #[error("Already processing")]
    AlreadyProcessing,
    #[error(transparent)]
    Network(#[from] ApiError),
}

struct TimerHandle {
    cancel: CancellationToken,
    _task: JoinHandle<()>,
}

/// Periodically triggers backend delivery of pending notifications.
/// Constructed once per process and shared via `Arc`.
pub struct DispatchCoordinator {
    store: Arc<dyn RemoteStore>,
    processing: AtomicBool,
    timer: Mutex<Option<TimerHandle>>,
}

impl DispatchCoordinator {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            processing: AtomicBool::new(false),
            timer: Mutex::new(None),
        }
    }

    /// Run one dispatch cycle now.
    ///
    /// Mutual exclusion: if a cycle is in flight this returns
    /// [`DispatchError::AlreadyProcessing`] immediately instead of queueing
    /// a second one.
    pub async fn process_pending(&self) -> Result<DeliveryStats, DispatchError> {
        if self
            .processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("dispatch cycle already running, skipping");
            return Err(DispatchError::AlreadyProcessing);
        }

        let result = self.store.process_pending_notifications().await;
        self.processing.store(false, Ordering::SeqCst);

        match result {
            Ok(stats) => {
                info!(sent = stats.sent, failed = stats.failed, "dispatch cycle complete");
                Ok(stats)
            }
            Err(e) => {
                warn!(error = %e, "dispatch cycle failed");
                Err(e.into())
            }
        }
    }

    /// Start the auto-processing timer: one cycle immediately, then one
    /// every `interval`. Calling again restarts the timer with the new
    /// interval.
    pub fn start_auto_processing(self: &Arc<Self>, interval: Duration) {
        let mut slot = match self.timer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(old) = slot.take() {
            old.cancel.cancel();
        }

        let cancel = CancellationToken::new();
        let child = cancel.clone();
        let coordinator = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                // First tick fires immediately; stopping cancels future
                // cycles but lets an in-flight one complete naturally.
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match coordinator.process_pending().await {
                    Ok(_) | Err(DispatchError::AlreadyProcessing) => {}
                    Err(e) => debug!(error = %e, "scheduled dispatch cycle failed"),
                }
            }
            debug!("dispatch timer stopped");
        });

        info!(interval_secs = interval.as_secs(), "dispatch auto-processing started");
        *slot = Some(TimerHandle {
            cancel,
            _task: task,
        });
    }

    /// Cancel the auto-processing timer. No-op when not running.
    pub fn stop_auto_processing(&self) {
        let mut slot = match self.timer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(handle) = slot.take() {
            handle.cancel.cancel();
            info!("dispatch auto-processing stopped");
        }
    }

    pub fn is_auto_processing(&self) -> bool {
        match self.timer.lock() {
            Ok(guard) => guard.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }

    /// Read-only introspection over the pending queue. Returns 0 on any
    /// read failure — callers use this for diagnostics, and a diagnostic
    /// must never throw.
    pub async fn pending_count(&self) -> u64 {
        match self.store.pending_notification_count().await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "pending count read failed, reporting 0");
                0
            }
        }
    }
}

impl Drop for DispatchCoordinator {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.timer.lock() {
            if let Some(handle) = slot.take() {
                handle.cancel.cancel();
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
