//! Sallaty client core.
//!
//! The order-fulfillment and notification engine embedded in the Sallaty
//! grocery-delivery apps. The host shell (customer, picker, and courier
//! frontends) owns all presentation; this crate owns the order status
//! state machine, the picker verification checklist, push registration
//! and dispatch, the notification inbox, and the working-hours admission
//! policy. Everything talks to the backend through the [`api::RemoteStore`]
//! contract and to the platform through [`device::DeviceNotifications`].

use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod api;
pub mod db;
pub mod device;
pub mod dispatch;
pub mod hours;
pub mod inbox;
pub mod orders;
pub mod picker;
pub mod push;

#[cfg(test)]
pub(crate) mod testutil;

use api::RemoteStore;
use db::DbState;
use device::DeviceNotifications;
use dispatch::DispatchCoordinator;
use inbox::Inbox;
use orders::OrderLifecycle;
use push::{PushEventHub, Subscription, TokenRegistrar};

/// Initialize structured logging. Safe to call more than once; only the
/// first call installs the subscriber.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sallaty_core=debug"));
    let console_layer = fmt::layer().with_target(true);
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .try_init();
}

/// Composition root: one of everything, built at sign-in and passed by
/// reference through the host. No component here is a global; tearing
/// the context down (sign-out) drops all of its state.
pub struct CoreContext {
    pub db: Arc<DbState>,
    pub store: Arc<dyn RemoteStore>,
    pub device: Arc<dyn DeviceNotifications>,
    pub lifecycle: OrderLifecycle,
    pub registrar: TokenRegistrar,
    pub dispatcher: Arc<DispatchCoordinator>,
    pub inbox: Arc<Inbox>,
    pub push_events: PushEventHub,
}

impl CoreContext {
    pub fn new(
        db: Arc<DbState>,
        store: Arc<dyn RemoteStore>,
        device: Arc<dyn DeviceNotifications>,
        user_id: &str,
    ) -> Self {
        let lifecycle =
            OrderLifecycle::new(Arc::clone(&store), Arc::clone(&db)).with_actor(user_id);
        let registrar = TokenRegistrar::new(Arc::clone(&store), Arc::clone(&device));
        let dispatcher = Arc::new(DispatchCoordinator::new(Arc::clone(&store)));
        let inbox = Arc::new(Inbox::new(Arc::clone(&store), Arc::clone(&device), user_id));

        Self {
            db,
            store,
            device,
            lifecycle,
            registrar,
            dispatcher,
            inbox,
            push_events: PushEventHub::new(),
        }
    }

    /// Wire the inbox into push events and start the dispatch timer.
    /// The returned subscriptions must be kept alive for the listeners
    /// to stay attached.
    pub fn start(&self, dispatch_interval: Duration) -> Vec<Subscription> {
        let subscriptions = self.inbox.attach(&self.push_events);
        self.dispatcher.start_auto_processing(dispatch_interval);
        info!("core context started");
        subscriptions
    }

    /// Stop background work. In-flight calls complete naturally.
    pub fn shutdown(&self) {
        self.dispatcher.stop_auto_processing();
        info!("core context stopped");
    }
}

// ===========================================================================
// Tests
// ===========================================================================
