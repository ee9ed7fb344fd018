//! Push registration and push-event fan-out for the Sallaty client core.
//!
//! Registration is two steps: ask the device subsystem for a platform
//! token, then write it against the signed-in user's profile. The write
//! races profile propagation on fresh accounts — the profile row may not
//! exist yet, or row-level auth may not admit the key — so the save is
//! retried on a short fixed cadence before giving up. The cause resolves
//! quickly and predictably, which is why there is no backoff.
//!
//! Delivered-while-foregrounded messages and notification taps flow back
//! into the core through [`PushEventHub`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::{ApiError, RemoteStore};
use crate::device::{DeviceError, DeviceNotifications};
use crate::inbox::Notification;

/// Maximum profile-save attempts before reporting `ProfileNotReady`.
pub const MAX_SAVE_ATTEMPTS: u32 = 5;
/// Fixed spacing between save attempts.
pub const SAVE_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum RegistrationError {
    /// The profile row never became writable within the retry budget.
    /// Any previous registration is left untouched.
    #[error("user profile not ready after {MAX_SAVE_ATTEMPTS} save attempts")]
    ProfileNotReady,
    #[error(transparent)]
    Device(DeviceError),
    #[error(transparent)]
    Network(ApiError),
}

// ---------------------------------------------------------------------------
// Token registrar
// ---------------------------------------------------------------------------

/// Obtains the device push token and persists it against the user.
/// Constructed once per process; re-registration overwrites idempotently.
pub struct TokenRegistrar {
    store: Arc<dyn RemoteStore>,
    device: Arc<dyn DeviceNotifications>,
}

impl TokenRegistrar {
    pub fn new(store: Arc<dyn RemoteStore>, device: Arc<dyn DeviceNotifications>) -> Self {
        Self { store, device }
    }

    /// Register this device's push token for `user_id`.
    ///
    /// A save that matches zero rows or bounces off row-level auth means
    /// the profile has not propagated yet; both are retried sequentially,
    /// at most [`MAX_SAVE_ATTEMPTS`] times, [`SAVE_RETRY_DELAY`] apart.
    /// Any other failure aborts immediately.
    pub async fn register_for_user(&self, user_id: &str) -> Result<String, RegistrationError> {
        let token = self
            .device
            .push_token()
            .await
            .map_err(RegistrationError::Device)?;

        for attempt in 1..=MAX_SAVE_ATTEMPTS {
            match self.store.save_push_token(user_id, &token).await {
                Ok(true) => {
                    info!(user_id, attempt, "push token registered");
                    return Ok(token);
                }
                Ok(false) => {
                    debug!(user_id, attempt, "push token save matched no profile row");
                }
                Err(ApiError::Unauthorized) => {
                    debug!(
                        user_id,
                        attempt, "push token save rejected at row level, profile still propagating"
                    );
                }
                Err(e) => {
                    warn!(user_id, attempt, error = %e, "push token save failed");
                    return Err(RegistrationError::Network(e));
                }
            }

            if attempt < MAX_SAVE_ATTEMPTS {
                tokio::time::sleep(SAVE_RETRY_DELAY).await;
            }
        }

        warn!(
            user_id,
            "push token registration exhausted its retry budget"
        );
        Err(RegistrationError::ProfileNotReady)
    }

    /// Drop the stored token on sign-out. Last write wins server-side, so
    /// writing the empty token is the clear operation. Single attempt;
    /// sign-out does not wait on profile propagation.
    pub async fn clear_for_user(&self, user_id: &str) -> Result<(), RegistrationError> {
        self.store
            .save_push_token(user_id, "")
            .await
            .map(|_| ())
            .map_err(RegistrationError::Network)
    }
}

// ---------------------------------------------------------------------------
// Push event fan-out
// ---------------------------------------------------------------------------

/// Events surfaced by the platform push channel.
#[derive(Debug, Clone)]
pub enum PushEvent {
    /// A notification was delivered while the app was foregrounded.
    ForegroundMessage(Notification),
    /// The user tapped a delivered notification banner.
    Opened {
        notification_id: String,
        order_id: Option<String>,
    },
}

type Listener = Arc<dyn Fn(&PushEvent) + Send + Sync>;

/// Explicit listener registry for push events.
///
/// Listeners are invoked in registration order, each at most once per
/// event. Subscribing returns a guard; dropping the guard detaches the
/// listener.
#[derive(Default)]
pub struct PushEventHub {
    listeners: Arc<Mutex<Vec<(u64, Listener)>>>,
    next_id: AtomicU64,
}

/// Disposer for a registered push listener.
#[must_use = "dropping the subscription detaches the listener"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<Vec<(u64, Listener)>>>,
}

impl PushEventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&PushEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push((id, Arc::new(listener)));
        }
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Deliver `event` to every live listener, in registration order.
    pub fn emit(&self, event: &PushEvent) {
        // Snapshot outside the lock so a listener may subscribe/unsubscribe
        // without deadlocking.
        let snapshot: Vec<Listener> = match self.listeners.lock() {
            Ok(listeners) => listeners.iter().map(|(_, l)| Arc::clone(l)).collect(),
            Err(_) => return,
        };
        for listener in snapshot {
            listener(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            if let Ok(mut listeners) = listeners.lock() {
                listeners.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
