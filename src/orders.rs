//! Order lifecycle for the Sallaty client core.
//!
//! An order moves `pending -> preparing -> prepared -> shipping ->
//! delivered`, one step at a time, with `cancelled` reachable from any
//! non-terminal state. Every edge is gated by the actor's role, and the
//! picker's `prepared` edge additionally requires the item checklist to
//! reconcile. The actual mutation happens in the store's atomic
//! status-update procedure; this controller only decides whether the call
//! may be made and how its failures are classified.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::{ApiError, RemoteStore};
use crate::db::DbState;
use crate::picker::{self, ValidationError};

/// Fixed page size for both order partitions.
pub const ORDER_PAGE_SIZE: u32 = 20;

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Preparing,
    Prepared,
    Shipping,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Pending,
        OrderStatus::Preparing,
        OrderStatus::Prepared,
        OrderStatus::Shipping,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    /// Terminal states accept no further transitions, including cancellation.
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Prepared => "prepared",
            OrderStatus::Shipping => "shipping",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is asking for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Admin,
    Picker,
    Courier,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Customer, Role::Admin, Role::Picker, Role::Courier];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Admin => "admin",
            Role::Picker => "picker",
            Role::Courier => "courier",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of an order. Immutable once the order leaves `pending`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    #[serde(alias = "product_id")]
    pub product_id: String,
    pub name: String,
    #[serde(alias = "unit_price", alias = "price")]
    pub unit_price: f64,
    pub quantity: u32,
    #[serde(default, alias = "image_ref", alias = "image")]
    pub image_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    #[serde(alias = "customer_id")]
    pub customer_id: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub items: Vec<OrderItem>,
    #[serde(alias = "total_amount")]
    pub total_amount: f64,
    #[serde(default, alias = "payment_method")]
    pub payment_method: Option<String>,
    #[serde(default, alias = "shipping_address")]
    pub shipping_address: Option<String>,
    #[serde(default, alias = "delivery_note")]
    pub delivery_note: Option<String>,
    #[serde(alias = "created_at")]
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Transition table
// ---------------------------------------------------------------------------

/// Forward edges and the roles allowed to take them. Cancellation is
/// special-cased below: admin only, from any non-terminal state.
const TRANSITIONS: &[(OrderStatus, OrderStatus, &[Role])] = &[
    (
        OrderStatus::Pending,
        OrderStatus::Preparing,
        &[Role::Admin, Role::Picker],
    ),
    (OrderStatus::Preparing, OrderStatus::Prepared, &[Role::Picker]),
    (
        OrderStatus::Prepared,
        OrderStatus::Shipping,
        &[Role::Admin, Role::Courier],
    ),
    (
        OrderStatus::Shipping,
        OrderStatus::Delivered,
        &[Role::Admin, Role::Courier],
    ),
];

/// Whether `(from, to, role)` is in the legal transition table.
pub fn is_legal_transition(from: OrderStatus, to: OrderStatus, role: Role) -> bool {
    if to == OrderStatus::Cancelled {
        return !from.is_terminal() && role == Role::Admin;
    }
    TRANSITIONS
        .iter()
        .any(|(f, t, roles)| *f == from && *t == to && roles.contains(&role))
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TransitionError {
    /// The attempted edge is not in the transition table. A programmer or
    /// UI error; never retried.
    #[error("illegal transition {from} -> {to} for role {role}")]
    Illegal {
        from: OrderStatus,
        to: OrderStatus,
        role: Role,
    },
    /// The order was mutated concurrently (e.g. already cancelled). The
    /// caller must refresh order state before retrying.
    #[error("order changed concurrently; refresh before retrying")]
    Conflict,
    /// The picker checklist does not reconcile with the ordered quantities.
    #[error("picker verification failed for {} item(s)", .0.len())]
    Verification(Vec<ValidationError>),
    /// Reading or purging the local checklist failed.
    #[error("checklist storage: {0}")]
    Storage(String),
    #[error(transparent)]
    Network(ApiError),
}

// ---------------------------------------------------------------------------
// Lifecycle controller
// ---------------------------------------------------------------------------

/// Enforces legal, role-gated status transitions and issues the store's
/// atomic status-update call. Constructed once per process and shared.
pub struct OrderLifecycle {
    store: Arc<dyn RemoteStore>,
    db: Arc<DbState>,
    actor_id: Option<String>,
}

impl OrderLifecycle {
    pub fn new(store: Arc<dyn RemoteStore>, db: Arc<DbState>) -> Self {
        Self {
            store,
            db,
            actor_id: None,
        }
    }

    /// Attach the signed-in actor's id, forwarded to the status procedure
    /// for audit purposes.
    pub fn with_actor(mut self, actor_id: &str) -> Self {
        self.actor_id = Some(actor_id.to_string());
        self
    }

    /// Advance `order` to `target` on behalf of `role`.
    ///
    /// The picker's `prepared` edge is additionally gated on the item
    /// checklist: every entered count must equal the ordered quantity.
    /// On success the store returns the updated order, and checklist rows
    /// are purged once the order has left preparation.
    pub async fn transition(
        &self,
        order: &Order,
        target: OrderStatus,
        role: Role,
    ) -> Result<Order, TransitionError> {
        if !is_legal_transition(order.status, target, role) {
            warn!(
                order_id = %order.id,
                from = %order.status,
                to = %target,
                %role,
                "rejected illegal status transition"
            );
            return Err(TransitionError::Illegal {
                from: order.status,
                to: target,
                role,
            });
        }

        if target == OrderStatus::Prepared {
            let checklist =
                picker::checklist(&self.db, &order.id).map_err(TransitionError::Storage)?;
            picker::validate(order, &checklist).map_err(TransitionError::Verification)?;
        }

        let updated = self
            .store
            .update_order_status(&order.id, target, self.actor_id.as_deref())
            .await
            .map_err(|e| match e {
                ApiError::Conflict => TransitionError::Conflict,
                other => TransitionError::Network(other),
            })?;

        // Checklist rows are only meaningful while the order sits in
        // preparation; drop them as soon as it moves past (or out of) it.
        if matches!(
            target,
            OrderStatus::Prepared
                | OrderStatus::Shipping
                | OrderStatus::Delivered
                | OrderStatus::Cancelled
        ) {
            if let Err(e) = picker::clear(&self.db, &order.id) {
                warn!(order_id = %order.id, error = %e, "failed to purge picker checklist");
            }
        }

        info!(
            order_id = %order.id,
            from = %order.status,
            to = %target,
            %role,
            "order status updated"
        );
        Ok(updated)
    }
}

// ---------------------------------------------------------------------------
// Paged order lists
// ---------------------------------------------------------------------------

/// The two logical partitions the order screens show. "Pending" is every
/// order that has not been delivered yet (cancelled orders included, so
/// the customer can still see what happened to them).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderPartition {
    Pending,
    Completed,
}

impl OrderPartition {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderPartition::Pending => "pending",
            OrderPartition::Completed => "completed",
        }
    }
}

/// One partition's incrementally loaded, de-duplicated order list.
///
/// Loading the next page is idempotent in the merged view: a page that
/// overlaps an earlier one (concurrent writes shift pagination windows)
/// is filtered by order id before appending.
pub struct OrderFeed {
    partition: OrderPartition,
    orders: Vec<Order>,
    next_page: u32,
    has_more: bool,
}

impl OrderFeed {
    pub fn new(partition: OrderPartition) -> Self {
        Self {
            partition,
            orders: Vec::new(),
            next_page: 0,
            has_more: true,
        }
    }

    pub fn partition(&self) -> OrderPartition {
        self.partition
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Load the next page and append it, skipping ids already present.
    /// Returns the number of orders actually added. A page shorter than
    /// [`ORDER_PAGE_SIZE`] marks the end of the partition.
    pub async fn load_next(&mut self, store: &dyn RemoteStore) -> Result<usize, ApiError> {
        if !self.has_more {
            return Ok(0);
        }

        let page = store
            .fetch_orders(self.partition, self.next_page, ORDER_PAGE_SIZE)
            .await?;
        self.has_more = page.len() as u32 == ORDER_PAGE_SIZE;
        self.next_page += 1;

        let seen: HashSet<String> = self.orders.iter().map(|o| o.id.clone()).collect();
        let mut added = 0;
        for order in page {
            if !seen.contains(&order.id) {
                self.orders.push(order);
                added += 1;
            }
        }

        debug!(
            partition = self.partition.as_str(),
            page = self.next_page - 1,
            added,
            total = self.orders.len(),
            "order page loaded"
        );
        Ok(added)
    }

    /// Replace the whole view starting from page 0.
    ///
    /// Used when a real-time change notification arrives: restarting
    /// avoids interleaving stale pages with fresh ones. The old view is
    /// kept if the fetch fails.
    pub async fn refresh(&mut self, store: &dyn RemoteStore) -> Result<(), ApiError> {
        let page = store
            .fetch_orders(self.partition, 0, ORDER_PAGE_SIZE)
            .await?;
        self.has_more = page.len() as u32 == ORDER_PAGE_SIZE;
        self.next_page = 1;

        let mut seen = HashSet::new();
        self.orders = page
            .into_iter()
            .filter(|o| seen.insert(o.id.clone()))
            .collect();
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
