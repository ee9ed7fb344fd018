//! Shared test doubles: an in-memory database, a scriptable store API
//! mock, and a fake device notification subsystem.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::Connection;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::api::{ApiError, DeliveryStats, RemoteStore};
use crate::db::{self, DbState};
use crate::device::{DeviceError, DeviceNotifications};
use crate::inbox::{DeliveryState, Notification, NotificationKind};
use crate::orders::{Order, OrderItem, OrderPartition, OrderStatus};

/// Open an in-memory database with all migrations applied.
pub fn test_db() -> Arc<DbState> {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .expect("pragma setup");
    db::run_migrations_for_test(&conn);
    Arc::new(DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    })
}

pub fn order(id: &str, status: OrderStatus) -> Order {
    order_with_items(id, status, &[1])
}

pub fn order_with_items(id: &str, status: OrderStatus, quantities: &[u32]) -> Order {
    Order {
        id: id.to_string(),
        customer_id: "cust-1".to_string(),
        status,
        items: quantities
            .iter()
            .enumerate()
            .map(|(i, q)| OrderItem {
                product_id: format!("prod-{i}"),
                name: format!("item-{i}"),
                unit_price: 2.5,
                quantity: *q,
                image_ref: None,
            })
            .collect(),
        total_amount: 10.0,
        payment_method: Some("cash".to_string()),
        shipping_address: Some("12 Corniche St".to_string()),
        delivery_note: None,
        created_at: Utc::now(),
    }
}

pub fn notification(id: &str) -> Notification {
    Notification {
        id: id.to_string(),
        user_id: "user-1".to_string(),
        title: "Order update".to_string(),
        body: "Your order is on its way".to_string(),
        data: serde_json::json!({}),
        kind: NotificationKind::OrderStatus,
        status: DeliveryState::Sent,
        read_at: None,
        created_at: Utc::now(),
    }
}

pub fn read_notification(id: &str) -> Notification {
    Notification {
        read_at: Some(Utc::now()),
        ..notification(id)
    }
}

// ---------------------------------------------------------------------------
// Scriptable store mock
// ---------------------------------------------------------------------------

/// Records every call and plays back queued responses. Queues fall back
/// to benign defaults when empty (status updates echo the requested
/// status, saves succeed, fetches return the configured pages).
pub struct MockStore {
    orders_pages: Mutex<HashMap<(OrderPartition, u32), Vec<Order>>>,
    pub fetch_calls: Mutex<Vec<(OrderPartition, u32, u32)>>,
    pub status_calls: Mutex<Vec<(String, OrderStatus, Option<String>)>>,
    status_results: Mutex<VecDeque<Result<Order, ApiError>>>,
    pub save_token_calls: Mutex<Vec<(String, String)>>,
    save_token_results: Mutex<VecDeque<Result<bool, ApiError>>>,
    notifications: Mutex<Vec<Notification>>,
    pub mark_read_calls: Mutex<Vec<String>>,
    mark_read_results: Mutex<VecDeque<Result<bool, ApiError>>>,
    pub process_calls: Mutex<Vec<()>>,
    process_results: Mutex<VecDeque<Result<DeliveryStats, ApiError>>>,
    process_delay: Mutex<Option<Duration>>,
    pending_count: Mutex<Result<u64, String>>,
}

impl MockStore {
    pub fn arc() -> Arc<Self> {
        Arc::new(Self {
            orders_pages: Mutex::new(HashMap::new()),
            fetch_calls: Mutex::new(Vec::new()),
            status_calls: Mutex::new(Vec::new()),
            status_results: Mutex::new(VecDeque::new()),
            save_token_calls: Mutex::new(Vec::new()),
            save_token_results: Mutex::new(VecDeque::new()),
            notifications: Mutex::new(Vec::new()),
            mark_read_calls: Mutex::new(Vec::new()),
            mark_read_results: Mutex::new(VecDeque::new()),
            process_calls: Mutex::new(Vec::new()),
            process_results: Mutex::new(VecDeque::new()),
            process_delay: Mutex::new(None),
            pending_count: Mutex::new(Ok(0)),
        })
    }

    pub fn set_orders_page(&self, partition: OrderPartition, page: u32, orders: Vec<Order>) {
        self.orders_pages
            .lock()
            .unwrap()
            .insert((partition, page), orders);
    }

    pub fn fail_next_status_with_conflict(&self) {
        self.status_results
            .lock()
            .unwrap()
            .push_back(Err(ApiError::Conflict));
    }

    pub fn push_save_token_result(&self, result: Result<bool, ApiError>) {
        self.save_token_results.lock().unwrap().push_back(result);
    }

    pub fn set_notifications(&self, notifications: Vec<Notification>) {
        *self.notifications.lock().unwrap() = notifications;
    }

    pub fn push_mark_read_result(&self, result: Result<bool, ApiError>) {
        self.mark_read_results.lock().unwrap().push_back(result);
    }

    pub fn push_process_result(&self, result: Result<DeliveryStats, ApiError>) {
        self.process_results.lock().unwrap().push_back(result);
    }

    /// Make each dispatch cycle park inside the store call for `delay`
    /// (paired with a paused tokio clock in tests).
    pub fn set_process_delay(&self, delay: Duration) {
        *self.process_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_pending_count(&self, result: Result<u64, ApiError>) {
        *self.pending_count.lock().unwrap() = result.map_err(|e| e.to_string());
    }
}

#[async_trait]
impl RemoteStore for MockStore {
    async fn update_order_status(
        &self,
        order_id: &str,
        new_status: OrderStatus,
        actor_id: Option<&str>,
    ) -> Result<Order, ApiError> {
        self.status_calls.lock().unwrap().push((
            order_id.to_string(),
            new_status,
            actor_id.map(str::to_string),
        ));
        match self.status_results.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(order(order_id, new_status)),
        }
    }

    async fn fetch_orders(
        &self,
        partition: OrderPartition,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Order>, ApiError> {
        self.fetch_calls
            .lock()
            .unwrap()
            .push((partition, page, page_size));
        Ok(self
            .orders_pages
            .lock()
            .unwrap()
            .get(&(partition, page))
            .cloned()
            .unwrap_or_default())
    }

    async fn save_push_token(&self, user_id: &str, token: &str) -> Result<bool, ApiError> {
        self.save_token_calls
            .lock()
            .unwrap()
            .push((user_id.to_string(), token.to_string()));
        match self.save_token_results.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(true),
        }
    }

    async fn get_user_notifications(
        &self,
        _user_id: &str,
        _limit: u32,
    ) -> Result<Vec<Notification>, ApiError> {
        Ok(self.notifications.lock().unwrap().clone())
    }

    async fn mark_notification_read(&self, id: &str) -> Result<bool, ApiError> {
        self.mark_read_calls.lock().unwrap().push(id.to_string());
        match self.mark_read_results.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(true),
        }
    }

    async fn process_pending_notifications(&self) -> Result<DeliveryStats, ApiError> {
        self.process_calls.lock().unwrap().push(());
        let delay = *self.process_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.process_results.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(DeliveryStats::default()),
        }
    }

    async fn pending_notification_count(&self) -> Result<u64, ApiError> {
        self.pending_count
            .lock()
            .unwrap()
            .clone()
            .map_err(ApiError::Network)
    }
}

// ---------------------------------------------------------------------------
// Fake device subsystem
// ---------------------------------------------------------------------------

pub struct MockDevice {
    token: String,
    badges: Mutex<Vec<u32>>,
    dismiss_count: AtomicU32,
}

impl MockDevice {
    pub fn arc(token: &str) -> Arc<Self> {
        Arc::new(Self {
            token: token.to_string(),
            badges: Mutex::new(Vec::new()),
            dismiss_count: AtomicU32::new(0),
        })
    }

    /// Every badge value set, in order.
    pub fn badge_history(&self) -> Vec<u32> {
        self.badges.lock().unwrap().clone()
    }

    pub fn dismissed(&self) -> u32 {
        self.dismiss_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceNotifications for MockDevice {
    async fn push_token(&self) -> Result<String, DeviceError> {
        Ok(self.token.clone())
    }

    fn set_badge_count(&self, count: u32) {
        self.badges.lock().unwrap().push(count);
    }

    fn dismiss_all_banners(&self) {
        self.dismiss_count.fetch_add(1, Ordering::SeqCst);
    }
}
