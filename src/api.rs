//! Store API client for the Sallaty backend.
//!
//! Provides authenticated HTTP communication with the order store: the
//! atomic status-update procedure, paginated order fetches, push-token
//! saves, and the notification endpoints. Everything here is an opaque
//! RPC contract — the backend owns the data; this client never interprets
//! more of a response than it needs.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::inbox::Notification;
use crate::orders::{Order, OrderPartition, OrderStatus};

/// Default timeout for API requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure talking to the store API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport-level failure (unreachable, timeout, TLS, ...).
    #[error("{0}")]
    Network(String),
    /// The record was mutated concurrently; the caller must refresh
    /// before retrying.
    #[error("record was modified concurrently")]
    Conflict,
    /// The store rejected the write at the row level (auth not yet
    /// propagated, or the key is simply not allowed to touch the row).
    #[error("not authorized for this record")]
    Unauthorized,
    /// Any other non-success HTTP status.
    #[error("{0}")]
    Server(String),
    /// The response decoded as JSON but not into the expected shape.
    #[error("unexpected response payload: {0}")]
    Payload(String),
}

/// Convert a `reqwest::Error` into a user-friendly message.
fn friendly_error(url: &str, err: &reqwest::Error) -> ApiError {
    if err.is_connect() {
        return ApiError::Network(format!("Cannot reach the store API at {url}"));
    }
    if err.is_timeout() {
        return ApiError::Network(format!("Connection to {url} timed out"));
    }
    if err.is_builder() {
        return ApiError::Network(format!("Invalid store API URL: {url}"));
    }
    ApiError::Network(format!("Network error communicating with {url}: {err}"))
}

/// Convert a non-success HTTP status into the error taxonomy.
fn status_error(status: StatusCode) -> ApiError {
    match status.as_u16() {
        401 | 403 => ApiError::Unauthorized,
        409 => ApiError::Conflict,
        404 => ApiError::Server("Store API endpoint not found".to_string()),
        s if s >= 500 => ApiError::Server(format!("Store API server error (HTTP {s})")),
        s => ApiError::Server(format!("Unexpected response from store API (HTTP {s})")),
    }
}

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the store base URL:
/// - strip trailing slashes
/// - strip a trailing `/api` segment
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_store_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    // Ensure scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    // Strip trailing slashes
    while url.ends_with('/') {
        url.pop();
    }

    // Strip trailing /api
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Store contract
// ---------------------------------------------------------------------------

/// Result of a backend delivery pass over pending notifications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, serde::Serialize)]
pub struct DeliveryStats {
    pub sent: u32,
    pub failed: u32,
}

/// The remote order store, seen as the set of RPC calls this core makes.
///
/// The HTTP implementation is [`HttpRemoteStore`]; tests substitute mocks.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Atomic status-update procedure. A concurrent mutation surfaces as
    /// [`ApiError::Conflict`].
    async fn update_order_status(
        &self,
        order_id: &str,
        new_status: OrderStatus,
        actor_id: Option<&str>,
    ) -> Result<Order, ApiError>;

    /// Fetch one page of a partition. A page shorter than `page_size`
    /// means there are no further pages.
    async fn fetch_orders(
        &self,
        partition: OrderPartition,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Order>, ApiError>;

    /// Associate a device push token with the user's profile. `Ok(false)`
    /// means the write matched zero rows (profile not materialised yet).
    async fn save_push_token(&self, user_id: &str, token: &str) -> Result<bool, ApiError>;

    async fn get_user_notifications(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<Notification>, ApiError>;

    /// Mark a notification read server-side. `Ok(false)` means no row matched.
    async fn mark_notification_read(&self, id: &str) -> Result<bool, ApiError>;

    /// Ask the backend to deliver whatever is pending. Invoked with no body;
    /// the backend is the delivery system of record.
    async fn process_pending_notifications(&self) -> Result<DeliveryStats, ApiError>;

    async fn pending_notification_count(&self) -> Result<u64, ApiError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// HTTP client for the store API.
pub struct HttpRemoteStore {
    base_url: String,
    api_key: String,
    client: Client,
}

impl HttpRemoteStore {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: normalize_store_url(base_url),
            api_key: api_key.trim().to_string(),
            client,
        })
    }

    /// Perform an authenticated request against the store API.
    ///
    /// `path` should include the leading slash, e.g. `/api/client/orders`.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ApiError> {
        let full_url = format!("{}{}", self.base_url, path);

        let mut req = self
            .client
            .request(method, &full_url)
            .header("X-Client-Key", &self.api_key)
            .header("Content-Type", "application/json");
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;

        let status = resp.status();
        if !status.is_success() {
            debug!(%status, path, "store API returned non-success");
            return Err(status_error(status));
        }

        resp.json::<Value>()
            .await
            .map_err(|e| ApiError::Payload(format!("invalid JSON from {path}: {e}")))
    }
}

fn decode<T: serde::de::DeserializeOwned>(path: &str, value: Value) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(|e| ApiError::Payload(format!("{path}: {e}")))
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn update_order_status(
        &self,
        order_id: &str,
        new_status: OrderStatus,
        actor_id: Option<&str>,
    ) -> Result<Order, ApiError> {
        // requestId lets the backend de-duplicate a resubmitted call.
        let body = serde_json::json!({
            "status": new_status,
            "actorId": actor_id,
            "requestId": Uuid::new_v4().to_string(),
        });
        let path = format!("/api/client/orders/{order_id}/status");
        let resp = self.request(Method::POST, &path, Some(body)).await?;

        // The procedure reports conflicts in-band as well as via HTTP 409.
        if resp.get("success").and_then(Value::as_bool) == Some(false) {
            let code = resp
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            if code == "conflict" {
                return Err(ApiError::Conflict);
            }
            return Err(ApiError::Server(format!("updateOrderStatus failed: {code}")));
        }

        let order = resp
            .get("order")
            .cloned()
            .ok_or_else(|| ApiError::Payload("updateOrderStatus: missing order".to_string()))?;
        decode(&path, order)
    }

    async fn fetch_orders(
        &self,
        partition: OrderPartition,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Order>, ApiError> {
        let path = format!(
            "/api/client/orders?scope={}&page={page}&pageSize={page_size}",
            partition.as_str()
        );
        let resp = self.request(Method::GET, &path, None).await?;
        let orders = resp
            .get("orders")
            .cloned()
            .ok_or_else(|| ApiError::Payload("fetch_orders: missing orders".to_string()))?;
        decode(&path, orders)
    }

    async fn save_push_token(&self, user_id: &str, token: &str) -> Result<bool, ApiError> {
        let body = serde_json::json!({ "userId": user_id, "token": token });
        let resp = self
            .request(Method::POST, "/api/client/push-token", Some(body))
            .await?;
        Ok(resp.get("saved").and_then(Value::as_bool).unwrap_or(false))
    }

    async fn get_user_notifications(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<Notification>, ApiError> {
        let path = format!("/api/client/notifications?userId={user_id}&limit={limit}");
        let resp = self.request(Method::GET, &path, None).await?;
        let items = resp.get("notifications").cloned().ok_or_else(|| {
            ApiError::Payload("get_user_notifications: missing notifications".to_string())
        })?;
        decode(&path, items)
    }

    async fn mark_notification_read(&self, id: &str) -> Result<bool, ApiError> {
        let path = format!("/api/client/notifications/{id}/read");
        let resp = self.request(Method::POST, &path, None).await?;
        Ok(resp.get("updated").and_then(Value::as_bool).unwrap_or(false))
    }

    async fn process_pending_notifications(&self) -> Result<DeliveryStats, ApiError> {
        let resp = self
            .request(Method::POST, "/api/client/notifications/process", None)
            .await?;
        let stats: DeliveryStats = decode("/api/client/notifications/process", resp)?;
        if stats.failed > 0 {
            warn!(
                sent = stats.sent,
                failed = stats.failed,
                "backend reported delivery failures"
            );
        }
        Ok(stats)
    }

    async fn pending_notification_count(&self) -> Result<u64, ApiError> {
        let resp = self
            .request(Method::GET, "/api/client/notifications/pending-count", None)
            .await?;
        resp.get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| ApiError::Payload("pending-count: missing count".to_string()))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
