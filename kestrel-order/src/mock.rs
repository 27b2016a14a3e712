//! In-process stand-ins for the remote collaborators.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use rust_decimal::Decimal;
use kestrel_core::catalog::{CatalogClient, CatalogError, Product};
use kestrel_core::events::{DeadLetterSink, PublishError};
use kestrel_core::payment::{GatewayError, PaymentGateway, PaymentSession, PaymentSessionRequest};
use kestrel_core::ProductId;
use kestrel_shared::DeadLetterEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Reject,
    Unavailable,
}

/// Catalog backed by a fixed product table.
#[derive(Default)]
pub struct MockCatalogClient {
    products: Mutex<HashMap<ProductId, Product>>,
    failure: Mutex<Option<MockFailure>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl MockCatalogClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_product(self, id: &str, name: &str, price: Decimal) -> Self {
        self.set_product(id, name, price);
        self
    }

    /// Add or reprice a product.
    pub fn set_product(&self, id: &str, name: &str, price: Decimal) {
        let product = Product {
            id: id.to_string(),
            name: name.to_string(),
            price,
        };
        self.products.lock().unwrap().insert(product.id.clone(), product);
    }

    pub fn fail_with(&self, failure: Option<MockFailure>) {
        *self.failure.lock().unwrap() = failure;
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogClient for MockCatalogClient {
    async fn validate_products(&self, ids: &[ProductId]) -> Result<Vec<Product>, CatalogError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = *self.failure.lock().unwrap();
        match failure {
            Some(MockFailure::Reject) => Err(CatalogError::Rejected("invalid product ids".into())),
            Some(MockFailure::Unavailable) => Err(CatalogError::Unavailable("connection refused".into())),
            None => {
                let products = self.products.lock().unwrap();
                Ok(ids.iter().filter_map(|id| products.get(id).cloned()).collect())
            }
        }
    }
}

/// Gateway that records every request and answers with a fake checkout URL.
#[derive(Default)]
pub struct MockPaymentGateway {
    requests: Mutex<Vec<PaymentSessionRequest>>,
    failure: Mutex<Option<MockFailure>>,
    delay: Mutex<Option<Duration>>,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, failure: Option<MockFailure>) {
        *self.failure.lock().unwrap() = failure;
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn requests(&self) -> Vec<PaymentSessionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn create_session(
        &self,
        request: &PaymentSessionRequest,
    ) -> Result<PaymentSession, GatewayError> {
        self.requests.lock().unwrap().push(request.clone());

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = *self.failure.lock().unwrap();
        match failure {
            Some(MockFailure::Reject) => Err(GatewayError::Rejected("amount too small".into())),
            Some(MockFailure::Unavailable) => Err(GatewayError::Unavailable("gateway down".into())),
            None => {
                let session_id = format!("cs_mock_{}", request.metadata.order_id.simple());
                Ok(PaymentSession(serde_json::json!({
                    "id": session_id,
                    "url": format!("https://checkout.mock/{}", session_id),
                    "currency": request.currency,
                })))
            }
        }
    }
}

/// Dead-letter sink that keeps events in memory.
#[derive(Default)]
pub struct MemoryDeadLetters {
    events: Mutex<Vec<DeadLetterEvent>>,
    failing: AtomicBool,
}

impl MemoryDeadLetters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DeadLetterEvent> {
        self.events.lock().unwrap().clone()
    }

    /// While set, every publish fails and nothing is recorded.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetters {
    async fn dead_letter(&self, event: &DeadLetterEvent) -> Result<(), PublishError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError("broker unavailable".into()));
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}
