use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;
use kestrel_core::repository::{
    MarkPaidOutcome, OrderPage, OrderStore, PaymentConfirmation, StatusUpdate, StoreError,
};
use kestrel_core::{NewOrder, Order, OrderReceipt, OrderStatus};

/// A thread-safe in-memory order store.
///
/// Pages are returned in insertion order. Used by tests and local runs
/// without a database.
#[derive(Default, Clone)]
pub struct InMemoryOrderStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    orders: HashMap<Uuid, Order>,
    insertion: Vec<Uuid>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored orders.
    pub async fn len(&self) -> usize {
        self.inner.read().await.orders.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create(&self, order: NewOrder) -> Result<Order, StoreError> {
        let order = order.into_order().without_names();
        let mut inner = self.inner.write().await;
        inner.insertion.push(order.id);
        inner.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.inner.read().await.orders.get(&id).cloned())
    }

    async fn find_many(
        &self,
        status: Option<OrderStatus>,
        offset: u64,
        limit: u32,
    ) -> Result<OrderPage, StoreError> {
        let inner = self.inner.read().await;
        let matching: Vec<&Order> = inner
            .insertion
            .iter()
            .filter_map(|id| inner.orders.get(id))
            .filter(|order| status.map_or(true, |s| order.status == s))
            .collect();

        let count = matching.len() as u64;
        let orders = matching
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(limit as usize)
            .cloned()
            .collect();

        Ok(OrderPage { orders, count })
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: OrderStatus,
        status: OrderStatus,
    ) -> Result<Option<StatusUpdate>, StoreError> {
        let mut inner = self.inner.write().await;
        Ok(inner.orders.get_mut(&id).map(|order| {
            if order.status != expected {
                return StatusUpdate::Stale { current: order.status };
            }
            order.status = status;
            order.updated_at = Utc::now();
            StatusUpdate::Updated(order.clone())
        }))
    }

    async fn mark_paid(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<Option<MarkPaidOutcome>, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(order) = inner.orders.get_mut(&confirmation.order_id) else {
            return Ok(None);
        };

        if order.paid {
            let existing = order.payment_charge_id.clone().unwrap_or_default();
            return Ok(Some(if existing == confirmation.payment_charge_id {
                MarkPaidOutcome::AlreadyApplied(order.clone())
            } else {
                MarkPaidOutcome::ConflictingCharge {
                    order: order.clone(),
                    existing_charge_id: existing,
                }
            }));
        }

        let now = Utc::now();
        order.status = OrderStatus::Paid;
        order.paid = true;
        order.paid_at = Some(confirmation.paid_at);
        order.payment_charge_id = Some(confirmation.payment_charge_id.clone());
        order.updated_at = now;

        let duplicate = order
            .receipts
            .iter()
            .any(|r| r.payment_charge_id == confirmation.payment_charge_id);
        if !duplicate {
            order.receipts.push(OrderReceipt {
                id: Uuid::new_v4(),
                order_id: order.id,
                payment_charge_id: confirmation.payment_charge_id.clone(),
                receipt_url: confirmation.receipt_url.clone(),
                created_at: now,
            });
        }

        Ok(Some(MarkPaidOutcome::Applied(order.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::OrderItem;
    use rust_decimal_macros::dec;

    fn new_order(quantity: u32) -> NewOrder {
        NewOrder::priced(vec![OrderItem {
            product_id: "p1".to_string(),
            price: dec!(5.00),
            quantity,
            name: Some("Widget".to_string()),
        }])
        .unwrap()
    }

    fn confirmation(order_id: Uuid, charge: &str) -> PaymentConfirmation {
        PaymentConfirmation {
            order_id,
            payment_charge_id: charge.to_string(),
            receipt_url: "http://r".to_string(),
            paid_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let store = InMemoryOrderStore::new();
        let created = store.create(new_order(2)).await.unwrap();

        assert_eq!(created.status, OrderStatus::Pending);
        assert_eq!(created.total_amount, dec!(10.00));
        // names are display-only
        assert!(created.items[0].name.is_none());

        let found = store.find_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(found, created);
        assert!(store.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_many_pages_in_insertion_order() {
        let store = InMemoryOrderStore::new();
        let mut ids = Vec::new();
        for i in 1..=25 {
            ids.push(store.create(new_order(i)).await.unwrap().id);
        }

        let page = store.find_many(None, 10, 10).await.unwrap();
        assert_eq!(page.count, 25);
        let page_ids: Vec<Uuid> = page.orders.iter().map(|o| o.id).collect();
        assert_eq!(page_ids, ids[10..20].to_vec());

        let last = store.find_many(None, 20, 10).await.unwrap();
        assert_eq!(last.orders.len(), 5);
    }

    #[tokio::test]
    async fn test_find_many_filters_by_status() {
        let store = InMemoryOrderStore::new();
        let a = store.create(new_order(1)).await.unwrap();
        store.create(new_order(1)).await.unwrap();
        store
            .update_status(a.id, OrderStatus::Pending, OrderStatus::Cancelled)
            .await
            .unwrap();

        let page = store.find_many(Some(OrderStatus::Cancelled), 0, 10).await.unwrap();
        assert_eq!(page.count, 1);
        assert_eq!(page.orders[0].id, a.id);
    }

    #[tokio::test]
    async fn test_update_status_on_missing_order() {
        let store = InMemoryOrderStore::new();
        let result = store
            .update_status(Uuid::new_v4(), OrderStatus::Pending, OrderStatus::Paid)
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_update_status_with_stale_expectation() {
        let store = InMemoryOrderStore::new();
        let order = store.create(new_order(1)).await.unwrap();
        store
            .update_status(order.id, OrderStatus::Pending, OrderStatus::Cancelled)
            .await
            .unwrap();

        let outcome = store
            .update_status(order.id, OrderStatus::Pending, OrderStatus::Delivered)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            Some(StatusUpdate::Stale { current: OrderStatus::Cancelled })
        ));

        let stored = store.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_mark_paid_is_idempotent() {
        let store = InMemoryOrderStore::new();
        let order = store.create(new_order(1)).await.unwrap();

        let first = store.mark_paid(&confirmation(order.id, "ch_1")).await.unwrap();
        assert!(matches!(first, Some(MarkPaidOutcome::Applied(_))));

        let second = store.mark_paid(&confirmation(order.id, "ch_1")).await.unwrap();
        let Some(MarkPaidOutcome::AlreadyApplied(order)) = second else {
            panic!("expected redelivery to be a no-op");
        };
        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.receipts.len(), 1);
    }

    #[tokio::test]
    async fn test_mark_paid_with_other_charge_conflicts() {
        let store = InMemoryOrderStore::new();
        let order = store.create(new_order(1)).await.unwrap();
        store.mark_paid(&confirmation(order.id, "ch_1")).await.unwrap();

        let outcome = store.mark_paid(&confirmation(order.id, "ch_2")).await.unwrap();
        let Some(MarkPaidOutcome::ConflictingCharge { order, existing_charge_id }) = outcome else {
            panic!("expected a conflicting charge");
        };
        assert_eq!(existing_charge_id, "ch_1");
        assert_eq!(order.payment_charge_id.as_deref(), Some("ch_1"));
        assert_eq!(order.receipts.len(), 1);
    }

    #[tokio::test]
    async fn test_mark_paid_missing_order() {
        let store = InMemoryOrderStore::new();
        let outcome = store.mark_paid(&confirmation(Uuid::new_v4(), "ch_1")).await.unwrap();
        assert!(outcome.is_none());
    }
}
