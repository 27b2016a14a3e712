use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;
use sqlx::{PgConnection, PgPool};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use kestrel_core::repository::{
    MarkPaidOutcome, OrderPage, OrderStore, PaymentConfirmation, StatusUpdate, StoreError,
};
use kestrel_core::{NewOrder, Order, OrderItem, OrderReceipt, OrderStatus};

/// Postgres-backed order store.
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    status: String,
    total_amount: Decimal,
    total_items: i32,
    paid: bool,
    paid_at: Option<DateTime<Utc>>,
    payment_charge_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    order_id: Uuid,
    product_id: String,
    price: Decimal,
    quantity: i32,
}

#[derive(sqlx::FromRow)]
struct ReceiptRow {
    id: Uuid,
    order_id: Uuid,
    payment_charge_id: String,
    receipt_url: String,
    created_at: DateTime<Utc>,
}

const ORDER_COLUMNS: &str =
    "id, status, total_amount, total_items, paid, paid_at, payment_charge_id, created_at, updated_at";

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(Box::new(err))
}

impl OrderRow {
    fn into_order(
        self,
        items: Vec<OrderItemRow>,
        receipts: Vec<ReceiptRow>,
    ) -> Result<Order, StoreError> {
        let status = self
            .status
            .parse::<OrderStatus>()
            .map_err(|e| StoreError::Corrupt(format!("order {}: {}", self.id, e)))?;
        let total_items = u32::try_from(self.total_items)
            .map_err(|_| StoreError::Corrupt(format!("order {}: negative total_items", self.id)))?;

        let items = items
            .into_iter()
            .map(|item| {
                let quantity = u32::try_from(item.quantity).map_err(|_| {
                    StoreError::Corrupt(format!("order {}: negative quantity", item.order_id))
                })?;
                Ok(OrderItem {
                    product_id: item.product_id,
                    price: item.price,
                    quantity,
                    name: None,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let receipts = receipts
            .into_iter()
            .map(|r| OrderReceipt {
                id: r.id,
                order_id: r.order_id,
                payment_charge_id: r.payment_charge_id,
                receipt_url: r.receipt_url,
                created_at: r.created_at,
            })
            .collect();

        Ok(Order {
            id: self.id,
            status,
            total_amount: self.total_amount,
            total_items,
            paid: self.paid,
            paid_at: self.paid_at,
            payment_charge_id: self.payment_charge_id,
            items,
            receipts,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Load items and receipts for one order row on the given connection.
async fn load_order(conn: &mut PgConnection, row: OrderRow) -> Result<Order, StoreError> {
    let items: Vec<OrderItemRow> = sqlx::query_as(
        "SELECT order_id, product_id, price, quantity FROM order_items WHERE order_id = $1 ORDER BY position",
    )
    .bind(row.id)
    .fetch_all(&mut *conn)
    .await
    .map_err(backend)?;

    let receipts: Vec<ReceiptRow> = sqlx::query_as(
        "SELECT id, order_id, payment_charge_id, receipt_url, created_at FROM order_receipts WHERE order_id = $1 ORDER BY created_at",
    )
    .bind(row.id)
    .fetch_all(&mut *conn)
    .await
    .map_err(backend)?;

    row.into_order(items, receipts)
}

async fn fetch_row(
    conn: &mut PgConnection,
    id: Uuid,
    for_update: bool,
) -> Result<Option<OrderRow>, StoreError> {
    let sql = format!(
        "SELECT {} FROM orders WHERE id = $1{}",
        ORDER_COLUMNS,
        if for_update { " FOR UPDATE" } else { "" }
    );
    sqlx::query_as::<_, OrderRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(backend)
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn create(&self, order: NewOrder) -> Result<Order, StoreError> {
        let total_items = i32::try_from(order.total_items)
            .map_err(|_| StoreError::OutOfRange(format!("total_items {}", order.total_items)))?;

        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, status, total_amount, total_items, paid, created_at, updated_at)
            VALUES ($1, $2, $3, $4, FALSE, $5, $5)
            "#,
        )
        .bind(order.id)
        .bind(OrderStatus::Pending.as_str())
        .bind(order.total_amount)
        .bind(total_items)
        .bind(order.created_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        for (position, item) in order.items.iter().enumerate() {
            let quantity = i32::try_from(item.quantity)
                .map_err(|_| StoreError::OutOfRange(format!("quantity {}", item.quantity)))?;

            sqlx::query(
                r#"
                INSERT INTO order_items (id, order_id, position, product_id, price, quantity)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(order.id)
            .bind(position as i32)
            .bind(&item.product_id)
            .bind(item.price)
            .bind(quantity)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)?;

        Ok(order.into_order().without_names())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;

        match fetch_row(&mut conn, id, false).await? {
            Some(row) => Ok(Some(load_order(&mut conn, row).await?)),
            None => Ok(None),
        }
    }

    async fn find_many(
        &self,
        status: Option<OrderStatus>,
        offset: u64,
        limit: u32,
    ) -> Result<OrderPage, StoreError> {
        let status = status.map(|s| s.as_str());
        let offset = i64::try_from(offset)
            .map_err(|_| StoreError::OutOfRange(format!("offset {}", offset)))?;

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM orders WHERE ($1::TEXT IS NULL OR status = $1)",
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        let sql = format!(
            "SELECT {} FROM orders WHERE ($1::TEXT IS NULL OR status = $1) ORDER BY created_at, id LIMIT $2 OFFSET $3",
            ORDER_COLUMNS
        );
        let rows: Vec<OrderRow> = sqlx::query_as(&sql)
            .bind(status)
            .bind(i64::from(limit))
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();

        let item_rows: Vec<OrderItemRow> = sqlx::query_as(
            "SELECT order_id, product_id, price, quantity FROM order_items WHERE order_id = ANY($1) ORDER BY order_id, position",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let receipt_rows: Vec<ReceiptRow> = sqlx::query_as(
            "SELECT id, order_id, payment_charge_id, receipt_url, created_at FROM order_receipts WHERE order_id = ANY($1) ORDER BY created_at",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut items_by_order: HashMap<Uuid, Vec<OrderItemRow>> = HashMap::new();
        for item in item_rows {
            items_by_order.entry(item.order_id).or_default().push(item);
        }
        let mut receipts_by_order: HashMap<Uuid, Vec<ReceiptRow>> = HashMap::new();
        for receipt in receipt_rows {
            receipts_by_order.entry(receipt.order_id).or_default().push(receipt);
        }

        let orders = rows
            .into_iter()
            .map(|row| {
                let items = items_by_order.remove(&row.id).unwrap_or_default();
                let receipts = receipts_by_order.remove(&row.id).unwrap_or_default();
                row.into_order(items, receipts)
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        Ok(OrderPage {
            orders,
            count: u64::try_from(count).unwrap_or_default(),
        })
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: OrderStatus,
        status: OrderStatus,
    ) -> Result<Option<StatusUpdate>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;

        let sql = format!(
            "UPDATE orders SET status = $1, updated_at = NOW() WHERE id = $2 AND status = $3 RETURNING {}",
            ORDER_COLUMNS
        );
        let row: Option<OrderRow> = sqlx::query_as(&sql)
            .bind(status.as_str())
            .bind(id)
            .bind(expected.as_str())
            .fetch_optional(&mut *conn)
            .await
            .map_err(backend)?;

        if let Some(row) = row {
            return Ok(Some(StatusUpdate::Updated(load_order(&mut conn, row).await?)));
        }

        // Nothing matched: either the order is gone or its status moved on.
        let current: Option<String> = sqlx::query_scalar("SELECT status FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(backend)?;

        current
            .map(|raw| {
                raw.parse::<OrderStatus>()
                    .map(|current| StatusUpdate::Stale { current })
                    .map_err(|e| StoreError::Corrupt(format!("order {}: {}", id, e)))
            })
            .transpose()
    }

    async fn mark_paid(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<Option<MarkPaidOutcome>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        // Row lock serializes concurrent deliveries for the same order.
        let Some(row) = fetch_row(&mut tx, confirmation.order_id, true).await? else {
            return Ok(None);
        };

        if row.paid {
            let existing = row.payment_charge_id.clone().unwrap_or_default();
            let order = load_order(&mut tx, row).await?;
            tx.commit().await.map_err(backend)?;

            return Ok(Some(if existing == confirmation.payment_charge_id {
                MarkPaidOutcome::AlreadyApplied(order)
            } else {
                MarkPaidOutcome::ConflictingCharge { order, existing_charge_id: existing }
            }));
        }

        let sql = format!(
            r#"
            UPDATE orders
            SET status = $2, paid = TRUE, paid_at = $3, payment_charge_id = $4, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            ORDER_COLUMNS
        );
        let row: OrderRow = sqlx::query_as(&sql)
            .bind(confirmation.order_id)
            .bind(OrderStatus::Paid.as_str())
            .bind(confirmation.paid_at)
            .bind(&confirmation.payment_charge_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(backend)?;

        sqlx::query(
            r#"
            INSERT INTO order_receipts (id, order_id, payment_charge_id, receipt_url)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (order_id, payment_charge_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(confirmation.order_id)
        .bind(&confirmation.payment_charge_id)
        .bind(&confirmation.receipt_url)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        let order = load_order(&mut tx, row).await?;
        tx.commit().await.map_err(backend)?;

        Ok(Some(MarkPaidOutcome::Applied(order)))
    }
}
