//! Client-side notification inbox for the Sallaty client core.
//!
//! Holds the in-memory notification list, its read/unread state, and the
//! projection of the unread count onto the device badge. Marking read is
//! optimistic: local state flips immediately and a late-arriving backend
//! failure is logged, never rolled back — a read marker is low-stakes and
//! eventual consistency is the intended behaviour here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::api::{ApiError, RemoteStore};
use crate::device::DeviceNotifications;
use crate::push::{PushEvent, PushEventHub, Subscription};

/// How many notifications one load pulls from the store.
pub const FETCH_LIMIT: u32 = 50;

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderCreated,
    OrderStatus,
    Delivery,
    Promotional,
    Coupon,
    Reminder,
    Welcome,
    Achievement,
    /// The backend grew a type this client build does not know. Kept so
    /// one unknown row cannot fail a whole fetch.
    #[serde(other)]
    Other,
}

/// Backend delivery state. Moves `pending -> sent` or `pending -> failed`,
/// never backwards; independent of the client-side read marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Sent,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    #[serde(alias = "user_id")]
    pub user_id: String,
    pub title: String,
    pub body: String,
    /// Free-form payload; an order-related notification carries `orderId`.
    #[serde(default)]
    pub data: Value,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub status: DeliveryState,
    #[serde(default, alias = "read_at")]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(alias = "created_at")]
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }

    pub fn order_id(&self) -> Option<&str> {
        self.data.get("orderId").and_then(Value::as_str)
    }
}

// ---------------------------------------------------------------------------
// Inbox
// ---------------------------------------------------------------------------

/// Per-user notification inbox. Constructed once per signed-in user and
/// shared via `Arc`.
pub struct Inbox {
    store: Arc<dyn RemoteStore>,
    device: Arc<dyn DeviceNotifications>,
    user_id: String,
    items: Mutex<Vec<Notification>>,
}

impl Inbox {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        device: Arc<dyn DeviceNotifications>,
        user_id: &str,
    ) -> Self {
        Self {
            store,
            device,
            user_id: user_id.to_string(),
            items: Mutex::new(Vec::new()),
        }
    }

    fn items(&self) -> MutexGuard<'_, Vec<Notification>> {
        match self.items.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Replace the whole list from the store and re-project the badge.
    pub async fn load(&self) -> Result<usize, ApiError> {
        let fetched = self
            .store
            .get_user_notifications(&self.user_id, FETCH_LIMIT)
            .await?;
        let total = fetched.len();

        let unread = {
            let mut items = self.items();
            *items = fetched;
            items.iter().filter(|n| !n.is_read()).count()
        };
        self.device.set_badge_count(unread as u32);

        debug!(total, unread, "inbox loaded");
        Ok(total)
    }

    /// Snapshot of the current list, newest first as the store returns it.
    pub fn notifications(&self) -> Vec<Notification> {
        self.items().clone()
    }

    /// Count of entries with no read marker.
    pub fn unread_count(&self) -> usize {
        self.items().iter().filter(|n| !n.is_read()).count()
    }

    /// Mark one notification read.
    ///
    /// Optimistic: the local marker flips (and the badge re-projects)
    /// before the backend call, and a backend failure is logged rather
    /// than rolled back. Idempotent — a second call on the same id
    /// changes nothing and skips the backend entirely.
    pub async fn mark_read(&self, id: &str) {
        let flipped = {
            let mut items = self.items();
            match items.iter_mut().find(|n| n.id == id) {
                Some(n) if n.read_at.is_none() => {
                    n.read_at = Some(Utc::now());
                    true
                }
                _ => false,
            }
        };
        if !flipped {
            return;
        }
        self.sync_badge();

        match self.store.mark_notification_read(id).await {
            Ok(true) => debug!(id, "notification marked read"),
            Ok(false) => warn!(id, "mark-read matched no row; keeping local marker"),
            Err(e) => warn!(id, error = %e, "mark-read failed; keeping local marker"),
        }
    }

    /// Dismiss on-device banners and zero the unread view. Server-side
    /// history is untouched — this is a local/visible-state operation.
    pub async fn clear_all(&self) {
        self.device.dismiss_all_banners();

        let now = Utc::now();
        {
            let mut items = self.items();
            for n in items.iter_mut().filter(|n| n.read_at.is_none()) {
                n.read_at = Some(now);
            }
        }
        self.device.set_badge_count(0);
        info!("inbox cleared");
    }

    fn sync_badge(&self) {
        let unread = self.unread_count();
        self.device.set_badge_count(unread as u32);
    }

    /// Prepend a notification that arrived while the app was foregrounded.
    /// Duplicates (already-loaded ids) are ignored.
    pub fn receive_foreground(&self, notification: Notification) {
        {
            let mut items = self.items();
            if items.iter().any(|n| n.id == notification.id) {
                return;
            }
            items.insert(0, notification);
        }
        self.sync_badge();
    }

    /// Wire this inbox into the push event hub: foreground deliveries
    /// prepend to the list, and tapping a banner marks it read. Keep the
    /// returned subscriptions alive for as long as the inbox should listen.
    pub fn attach(self: &Arc<Self>, hub: &PushEventHub) -> Vec<Subscription> {
        let inbox = Arc::clone(self);
        let foreground = hub.subscribe(move |event| {
            if let PushEvent::ForegroundMessage(notification) = event {
                inbox.receive_foreground(notification.clone());
            }
        });

        let inbox = Arc::clone(self);
        let opened = hub.subscribe(move |event| {
            if let PushEvent::Opened {
                notification_id, ..
            } = event
            {
                let inbox = Arc::clone(&inbox);
                let id = notification_id.clone();
                tokio::spawn(async move {
                    inbox.mark_read(&id).await;
                });
            }
        });

        vec![foreground, opened]
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{notification, read_notification, MockDevice, MockStore};

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_load_replaces_list_and_projects_badge() {
        let store = MockStore::arc();
        store.set_notifications(vec![
            notification("n-1"),
            read_notification("n-2"),
            notification("n-3"),
        ]);
        let device = MockDevice::arc("tok");
        let inbox = Inbox::new(store.clone(), device.clone(), "user-1");

        assert_eq!(inbox.load().await.unwrap(), 3);
        assert_eq!(inbox.unread_count(), 2);
        assert_eq!(device.badge_history(), vec![2]);

        // A second load replaces, never appends.
        store.set_notifications(vec![read_notification("n-9")]);
        assert_eq!(inbox.load().await.unwrap(), 1);
        assert_eq!(inbox.unread_count(), 0);
        assert_eq!(device.badge_history(), vec![2, 0]);
    }

    #[tokio::test]
    async fn test_mark_read_is_optimistic_and_idempotent() {
        let store = MockStore::arc();
        store.set_notifications(vec![notification("n-1"), notification("n-2")]);
        let device = MockDevice::arc("tok");
        let inbox = Inbox::new(store.clone(), device.clone(), "user-1");
        inbox.load().await.unwrap();

        inbox.mark_read("n-1").await;
        let after_first = inbox.notifications();
        let read_at = after_first[0].read_at;
        assert!(read_at.is_some());
        assert_eq!(inbox.unread_count(), 1);

        // Second call: no state change, no second backend call.
        inbox.mark_read("n-1").await;
        assert_eq!(inbox.notifications()[0].read_at, read_at);
        assert_eq!(inbox.unread_count(), 1);
        assert_eq!(store.mark_read_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mark_read_keeps_local_marker_on_backend_failure() {
        let store = MockStore::arc();
        store.set_notifications(vec![notification("n-1")]);
        store.push_mark_read_result(Err(ApiError::Network("offline".to_string())));
        let device = MockDevice::arc("tok");
        let inbox = Inbox::new(store.clone(), device.clone(), "user-1");
        inbox.load().await.unwrap();

        inbox.mark_read("n-1").await;
        // Deliberately not rolled back.
        assert_eq!(inbox.unread_count(), 0);
        assert!(inbox.notifications()[0].is_read());
    }

    #[tokio::test]
    async fn test_clear_all_dismisses_banners_and_zeroes_badge() {
        let store = MockStore::arc();
        store.set_notifications(vec![notification("n-1"), notification("n-2")]);
        let device = MockDevice::arc("tok");
        let inbox = Inbox::new(store.clone(), device.clone(), "user-1");
        inbox.load().await.unwrap();

        inbox.clear_all().await;
        assert_eq!(inbox.unread_count(), 0);
        assert_eq!(device.dismissed(), 1);
        assert_eq!(device.badge_history().last(), Some(&0));
        // History itself is kept.
        assert_eq!(inbox.notifications().len(), 2);
    }

    #[tokio::test]
    async fn test_foreground_delivery_prepends_and_deduplicates() {
        let store = MockStore::arc();
        store.set_notifications(vec![notification("n-1")]);
        let device = MockDevice::arc("tok");
        let inbox = Arc::new(Inbox::new(store.clone(), device.clone(), "user-1"));
        inbox.load().await.unwrap();

        let hub = PushEventHub::new();
        let _subs = inbox.attach(&hub);

        hub.emit(&PushEvent::ForegroundMessage(notification("n-2")));
        assert_eq!(inbox.notifications()[0].id, "n-2");
        assert_eq!(inbox.unread_count(), 2);

        // Same id again: ignored.
        hub.emit(&PushEvent::ForegroundMessage(notification("n-2")));
        assert_eq!(inbox.notifications().len(), 2);
    }

    #[tokio::test]
    async fn test_tap_through_marks_read() {
        let store = MockStore::arc();
        store.set_notifications(vec![notification("n-1")]);
        let device = MockDevice::arc("tok");
        let inbox = Arc::new(Inbox::new(store.clone(), device.clone(), "user-1"));
        inbox.load().await.unwrap();

        let hub = PushEventHub::new();
        let _subs = inbox.attach(&hub);

        hub.emit(&PushEvent::Opened {
            notification_id: "n-1".to_string(),
            order_id: None,
        });
        settle().await;
        assert_eq!(inbox.unread_count(), 0);
    }

    #[test]
    fn test_unknown_notification_type_decodes_as_other() {
        let n: Notification = serde_json::from_value(serde_json::json!({
            "id": "n-1",
            "userId": "user-1",
            "title": "t",
            "body": "b",
            "type": "flash_sale_v2",
            "status": "sent",
            "createdAt": "2026-01-01T00:00:00Z"
        }))
        .expect("unknown type must not fail the decode");
        assert_eq!(n.kind, NotificationKind::Other);
        assert!(!n.is_read());
    }

    #[test]
    fn test_order_id_comes_from_data_payload() {
        let mut n = notification("n-1");
        n.data = serde_json::json!({ "orderId": "ord-9" });
        assert_eq!(n.order_id(), Some("ord-9"));
    }
}
