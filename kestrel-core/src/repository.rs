use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;
use kestrel_shared::PaymentSucceededEvent;
use crate::models::{NewOrder, Order, OrderStatus};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Corrupt stored record: {0}")]
    Corrupt(String),

    #[error("Value out of range: {0}")]
    OutOfRange(String),
}

/// One page of orders plus the number of orders matching the filter.
#[derive(Debug, Clone)]
pub struct OrderPage {
    pub orders: Vec<Order>,
    pub count: u64,
}

/// Payment-completion data to apply to an order.
#[derive(Debug, Clone)]
pub struct PaymentConfirmation {
    pub order_id: Uuid,
    pub payment_charge_id: String,
    pub receipt_url: String,
    pub paid_at: DateTime<Utc>,
}

impl PaymentConfirmation {
    pub fn from_event(event: PaymentSucceededEvent, paid_at: DateTime<Utc>) -> Self {
        Self {
            order_id: event.order_id,
            payment_charge_id: event.payment_charge_id,
            receipt_url: event.receipt_url.into_exposed(),
            paid_at,
        }
    }
}

#[derive(Debug, Clone)]
pub enum MarkPaidOutcome {
    /// The order moved to PAID and a receipt was recorded.
    Applied(Order),
    /// The same charge was already applied; nothing changed.
    AlreadyApplied(Order),
    /// The order was paid by another charge; nothing changed.
    ConflictingCharge { order: Order, existing_charge_id: String },
}

/// Result of a compare-and-set status change.
#[derive(Debug, Clone)]
pub enum StatusUpdate {
    Updated(Order),
    /// Another write changed the status first; nothing was written.
    Stale { current: OrderStatus },
}

/// Durable storage for orders, their items and payment receipts.
///
/// Every method is atomic for the order row it touches.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persist an order and all of its items in one write.
    async fn create(&self, order: NewOrder) -> Result<Order, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, StoreError>;

    /// Orders matching `status` in a stable store-defined order.
    async fn find_many(
        &self,
        status: Option<OrderStatus>,
        offset: u64,
        limit: u32,
    ) -> Result<OrderPage, StoreError>;

    /// Set the status only if it is still `expected`.
    ///
    /// Returns `None` if the order does not exist.
    async fn update_status(
        &self,
        id: Uuid,
        expected: OrderStatus,
        status: OrderStatus,
    ) -> Result<Option<StatusUpdate>, StoreError>;

    /// Apply a payment confirmation exactly once per `(order, charge)` pair.
    ///
    /// Returns `None` if the order does not exist.
    async fn mark_paid(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<Option<MarkPaidOutcome>, StoreError>;
}
