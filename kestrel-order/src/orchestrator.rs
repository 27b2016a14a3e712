use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;
use kestrel_catalog::{distinct_ids, PriceSheet};
use kestrel_core::catalog::{CatalogClient, CatalogError};
use kestrel_core::payment::{
    to_minor_units, GatewayError, PaymentGateway, PaymentLineItem, PaymentMetadata,
    PaymentSession, PaymentSessionRequest,
};
use kestrel_core::repository::{
    MarkPaidOutcome, OrderStore, PaymentConfirmation, StatusUpdate, StoreError,
};
use kestrel_core::{
    NewOrder, Order, OrderError, OrderLine, OrderResult, OrderStatus, ProductId, RpcError,
};
use kestrel_shared::PaymentSucceededEvent;
use crate::transitions::{PermissiveTransitions, TransitionPolicy};

const STATUS_CHANGE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound for one catalog round trip.
    pub catalog_timeout: Duration,
    /// Upper bound for one payment gateway round trip.
    pub payment_timeout: Duration,
    pub currency: String,
    pub default_page_size: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            catalog_timeout: Duration::from_secs(3),
            payment_timeout: Duration::from_secs(5),
            currency: "usd".to_string(),
            default_page_size: 10,
        }
    }
}

/// Result of the `createOrder` operation.
///
/// The order is committed before the payment session is requested. If the
/// gateway fails the order stays PENDING, `payment_session` is empty and
/// `payment_error` says why; the caller can ask for a new session later.
#[derive(Debug, Clone, Serialize)]
pub struct PlacedOrder {
    pub order: Order,
    pub payment_session: Option<PaymentSession>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_error: Option<RpcError>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageMeta {
    pub count: u64,
    pub total_pages: u64,
    pub page: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub meta: PageMeta,
}

/// What happened when a payment confirmation was applied.
#[derive(Debug, Clone)]
pub enum PaymentApplied {
    Applied(Order),
    /// Redelivery of a confirmation that was already applied.
    Duplicate(Order),
}

impl PaymentApplied {
    pub fn order(&self) -> &Order {
        match self {
            PaymentApplied::Applied(order) | PaymentApplied::Duplicate(order) => order,
        }
    }
}

/// Coordinates order creation, lookup, status changes and payment completion
/// across the order store, the catalog and the payment gateway.
pub struct OrderOrchestrator {
    store: Arc<dyn OrderStore>,
    catalog: Arc<dyn CatalogClient>,
    payments: Arc<dyn PaymentGateway>,
    transitions: Arc<dyn TransitionPolicy>,
    config: OrchestratorConfig,
}

impl OrderOrchestrator {
    pub fn new(
        store: Arc<dyn OrderStore>,
        catalog: Arc<dyn CatalogClient>,
        payments: Arc<dyn PaymentGateway>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            payments,
            transitions: Arc::new(PermissiveTransitions),
            config,
        }
    }

    pub fn with_transitions(mut self, transitions: Arc<dyn TransitionPolicy>) -> Self {
        self.transitions = transitions;
        self
    }

    /// Create an order and open a payment session for it.
    pub async fn place_order(&self, lines: Vec<OrderLine>) -> OrderResult<PlacedOrder> {
        let order = self.create(lines).await?;

        match self.create_payment_session(&order).await {
            Ok(session) => Ok(PlacedOrder {
                order,
                payment_session: Some(session),
                payment_error: None,
            }),
            Err(err) => Ok(PlacedOrder {
                payment_error: Some(RpcError::from(&err)),
                order,
                payment_session: None,
            }),
        }
    }

    /// Validate and price the requested lines against the catalog, then
    /// persist the order with its items in one write.
    pub async fn create(&self, lines: Vec<OrderLine>) -> OrderResult<Order> {
        validate_lines(&lines)?;

        let ids = distinct_ids(&lines);
        let sheet = self
            .resolve_products(&ids)
            .await
            .map_err(classify_catalog)?;

        let items = sheet.price_lines(&lines).map_err(|err| {
            if err.is_catalog_fault() {
                error!(operation = "create order", error = %err, "Catalog returned unusable prices");
                OrderError::ServerFault("Product catalog returned an invalid price".to_string())
            } else {
                warn!(operation = "create order", error = %err, "Order references unknown products");
                OrderError::ClientFault(err.to_string())
            }
        })?;

        let new_order = NewOrder::priced(items).map_err(|err| {
            error!(operation = "create order", error = %err, "Order totals out of range");
            OrderError::ServerFault("Order total is out of range".to_string())
        })?;
        let order_id = new_order.id;
        let names: Vec<Option<String>> = new_order.items.iter().map(|i| i.name.clone()).collect();

        let mut order = self
            .store
            .create(new_order)
            .await
            .map_err(store_fault("create order", Some(order_id)))?;

        for (item, name) in order.items.iter_mut().zip(names) {
            item.name = name;
        }

        info!(
            order_id = %order.id,
            total_amount = %order.total_amount,
            total_items = order.total_items,
            "Order created"
        );
        Ok(order)
    }

    /// Ask the payment gateway for a session covering the order's items.
    ///
    /// Not retried here. A failure leaves the stored order untouched.
    pub async fn create_payment_session(&self, order: &Order) -> OrderResult<PaymentSession> {
        let line_items = order
            .items
            .iter()
            .map(|item| {
                let unit_amount = to_minor_units(item.price).ok_or_else(|| {
                    error!(order_id = %order.id, price = %item.price, "Unit price does not fit minor units");
                    OrderError::ServerFault("Failed to create payment session".to_string())
                })?;
                Ok(PaymentLineItem {
                    name: item.name.clone().unwrap_or_else(|| item.product_id.clone()),
                    unit_amount,
                    quantity: item.quantity,
                })
            })
            .collect::<OrderResult<Vec<_>>>()?;

        let request = PaymentSessionRequest {
            metadata: PaymentMetadata { order_id: order.id },
            line_items,
            currency: self.config.currency.clone(),
        };

        let result = tokio::time::timeout(
            self.config.payment_timeout,
            self.payments.create_session(&request),
        )
        .await
        .unwrap_or_else(|_| {
            Err(GatewayError::Unavailable(format!(
                "timed out after {:?}",
                self.config.payment_timeout
            )))
        });

        match result {
            Ok(session) => {
                info!(order_id = %order.id, "Payment session created");
                Ok(session)
            }
            Err(GatewayError::Rejected(msg)) => {
                warn!(order_id = %order.id, error = %msg, "Payment gateway rejected session");
                Err(OrderError::ClientFault(format!("Payment session rejected: {}", msg)))
            }
            Err(err) => {
                error!(order_id = %order.id, error = %err, "Payment session creation failed");
                Err(OrderError::ServerFault(
                    "Payment gateway unavailable, order remains pending".to_string(),
                ))
            }
        }
    }

    /// Open a new payment session for an existing, unpaid order.
    pub async fn renew_payment_session(&self, id: Uuid) -> OrderResult<PaymentSession> {
        let order = self.find_one(id).await?;
        if order.paid {
            return Err(OrderError::ClientFault(format!("Order with id {} is already paid", id)));
        }
        self.create_payment_session(&order).await
    }

    pub async fn find_all(&self, query: PageQuery) -> OrderResult<Paginated<Order>> {
        let page = query.page.unwrap_or(1);
        let limit = query.limit.unwrap_or(self.config.default_page_size);
        if page == 0 || limit == 0 {
            return Err(OrderError::ClientFault(
                "page and limit must be greater than zero".to_string(),
            ));
        }

        let offset = u64::from(page - 1) * u64::from(limit);
        let result = self
            .store
            .find_many(query.status, offset, limit)
            .await
            .map_err(store_fault("find orders", None))?;

        Ok(Paginated {
            data: result.orders,
            meta: PageMeta {
                count: result.count,
                total_pages: result.count.div_ceil(u64::from(limit)),
                page,
            },
        })
    }

    /// Fetch one order with its items.
    ///
    /// Product names are looked up again for display. If the catalog cannot
    /// answer, the order is returned without names.
    pub async fn find_one(&self, id: Uuid) -> OrderResult<Order> {
        let order = self
            .store
            .find_by_id(id)
            .await
            .map_err(store_fault("find order", Some(id)))?
            .ok_or_else(|| {
                warn!(order_id = %id, "Order not found");
                OrderError::order_not_found(id)
            })?;

        Ok(self.with_product_names(order).await)
    }

    /// Move an order to `status` if the transition policy allows it.
    ///
    /// The store only writes when the status is still the one the policy
    /// checked. A concurrent change is re-checked against the new status.
    pub async fn change_order_status(&self, id: Uuid, status: OrderStatus) -> OrderResult<Order> {
        let mut current = self
            .store
            .find_by_id(id)
            .await
            .map_err(store_fault("change order status", Some(id)))?
            .ok_or_else(|| {
                warn!(order_id = %id, "Order not found");
                OrderError::order_not_found(id)
            })?
            .status;

        for _ in 0..STATUS_CHANGE_ATTEMPTS {
            self.transitions
                .check(current, status)
                .map_err(|err| OrderError::ClientFault(err.to_string()))?;

            let update = self
                .store
                .update_status(id, current, status)
                .await
                .map_err(store_fault("change order status", Some(id)))?
                .ok_or_else(|| OrderError::order_not_found(id))?;

            match update {
                StatusUpdate::Updated(order) => {
                    info!(order_id = %id, from = %current, to = %status, "Order status changed");
                    return Ok(order);
                }
                StatusUpdate::Stale { current: actual } => {
                    warn!(order_id = %id, expected = %current, actual = %actual, "Order status changed concurrently");
                    current = actual;
                }
            }
        }

        Err(OrderError::ClientFault(format!(
            "Order with id {} was modified concurrently",
            id
        )))
    }

    /// Apply a `payment.succeeded` notification.
    ///
    /// Safe to call repeatedly with the same notification: only the first
    /// call changes the order or records a receipt.
    pub async fn mark_order_as_paid(&self, event: PaymentSucceededEvent) -> OrderResult<PaymentApplied> {
        let order_id = event.order_id;
        if event.payment_charge_id.trim().is_empty() {
            return Err(OrderError::ClientFault("paymentChargeId must not be empty".to_string()));
        }

        let confirmation = PaymentConfirmation::from_event(event, Utc::now());
        let outcome = self
            .store
            .mark_paid(&confirmation)
            .await
            .map_err(store_fault("mark order as paid", Some(order_id)))?;

        match outcome {
            None => {
                error!(order_id = %order_id, "Payment received for unknown order");
                Err(OrderError::order_not_found(order_id))
            }
            Some(MarkPaidOutcome::Applied(order)) => {
                info!(order_id = %order_id, charge_id = %confirmation.payment_charge_id, "Order marked as paid");
                Ok(PaymentApplied::Applied(order))
            }
            Some(MarkPaidOutcome::AlreadyApplied(order)) => {
                info!(order_id = %order_id, charge_id = %confirmation.payment_charge_id, "Duplicate payment notification ignored");
                Ok(PaymentApplied::Duplicate(order))
            }
            Some(MarkPaidOutcome::ConflictingCharge { existing_charge_id, .. }) => {
                error!(
                    order_id = %order_id,
                    charge_id = %confirmation.payment_charge_id,
                    existing_charge_id = %existing_charge_id,
                    "Order already paid by a different charge"
                );
                Err(OrderError::ClientFault(format!(
                    "Order with id {} is already paid by another charge",
                    order_id
                )))
            }
        }
    }

    async fn resolve_products(&self, ids: &[ProductId]) -> Result<PriceSheet, CatalogError> {
        tokio::time::timeout(self.config.catalog_timeout, self.catalog.validate_products(ids))
            .await
            .unwrap_or_else(|_| {
                Err(CatalogError::Unavailable(format!(
                    "timed out after {:?}",
                    self.config.catalog_timeout
                )))
            })
            .map(PriceSheet::new)
    }

    async fn with_product_names(&self, mut order: Order) -> Order {
        let lines: Vec<OrderLine> = order
            .items
            .iter()
            .map(|item| OrderLine {
                product_id: item.product_id.clone(),
                quantity: item.quantity,
            })
            .collect();

        match self.resolve_products(&distinct_ids(&lines)).await {
            Ok(sheet) => {
                for item in &mut order.items {
                    item.name = sheet.name_of(&item.product_id).map(str::to_string);
                }
            }
            Err(err) => {
                warn!(order_id = %order.id, error = %err, "Catalog unavailable, returning order without product names");
            }
        }
        order
    }
}

fn validate_lines(lines: &[OrderLine]) -> OrderResult<()> {
    if lines.is_empty() {
        return Err(OrderError::ClientFault("Order must contain at least one item".to_string()));
    }

    let mut total: u32 = 0;
    for line in lines {
        if line.product_id.trim().is_empty() {
            return Err(OrderError::ClientFault("productId must not be empty".to_string()));
        }
        if line.quantity == 0 {
            return Err(OrderError::ClientFault(format!(
                "Quantity for product {} must be greater than zero",
                line.product_id
            )));
        }
        total = total
            .checked_add(line.quantity)
            .ok_or_else(|| OrderError::ClientFault("Order quantity is too large".to_string()))?;
    }
    Ok(())
}

fn classify_catalog(err: CatalogError) -> OrderError {
    match err {
        CatalogError::Rejected(msg) => {
            warn!(operation = "create order", error = %msg, "Catalog rejected products");
            OrderError::ClientFault(msg)
        }
        other => {
            error!(operation = "create order", error = %other, "Catalog call failed");
            OrderError::ServerFault("Product catalog unavailable".to_string())
        }
    }
}

fn store_fault(
    operation: &'static str,
    order_id: Option<Uuid>,
) -> impl FnOnce(StoreError) -> OrderError {
    move |err| {
        error!(operation, order_id = ?order_id, error = %err, "Order store failure");
        OrderError::ServerFault(format!("Failed to {}", operation))
    }
}
