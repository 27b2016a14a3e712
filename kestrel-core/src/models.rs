use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

/// Identifier assigned by the product catalog.
pub type ProductId = String;

/// A requested `(product, quantity)` pair, before pricing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Order status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown order status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "PAID" => Ok(OrderStatus::Paid),
            "DELIVERED" => Ok(OrderStatus::Delivered),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A purchase record with priced line items.
///
/// `total_amount` and `total_items` are fixed when the order is created and
/// always agree with `items`, which never change afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub status: OrderStatus,
    pub total_amount: Decimal,
    pub total_items: u32,
    pub paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_charge_id: Option<String>,
    pub items: Vec<OrderItem>,
    #[serde(default)]
    pub receipts: Vec<OrderReceipt>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Recompute totals from the items. Used to check the stored totals,
    /// never to overwrite them.
    pub fn item_totals(&self) -> Result<(Decimal, u32), TotalsOverflow> {
        totals(&self.items)
    }

    /// Drop display names, e.g. before handing the order to a store.
    pub fn without_names(mut self) -> Self {
        for item in &mut self.items {
            item.name = None;
        }
        self
    }
}

/// One line of an order.
///
/// `price` is the unit price the catalog quoted when the order was created.
/// `name` is display-only and is not persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub price: Decimal,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl OrderItem {
    /// `None` if the product does not fit a `Decimal`.
    pub fn line_total(&self) -> Option<Decimal> {
        self.price.checked_mul(Decimal::from(self.quantity))
    }
}

/// Proof of payment attached to an order by the payment-completion path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderReceipt {
    pub id: Uuid,
    pub order_id: Uuid,
    pub payment_charge_id: String,
    pub receipt_url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Order totals overflow at product {product_id}")]
pub struct TotalsOverflow {
    pub product_id: ProductId,
}

/// A fully priced order that has not been written yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub id: Uuid,
    pub total_amount: Decimal,
    pub total_items: u32,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
}

impl NewOrder {
    pub fn priced(items: Vec<OrderItem>) -> Result<Self, TotalsOverflow> {
        let (total_amount, total_items) = totals(&items)?;
        Ok(Self {
            id: Uuid::new_v4(),
            total_amount,
            total_items,
            items,
            created_at: Utc::now(),
        })
    }

    /// The order as it looks once persisted: PENDING and unpaid.
    pub fn into_order(self) -> Order {
        Order {
            id: self.id,
            status: OrderStatus::Pending,
            total_amount: self.total_amount,
            total_items: self.total_items,
            paid: false,
            paid_at: None,
            payment_charge_id: None,
            items: self.items,
            receipts: Vec::new(),
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

fn totals(items: &[OrderItem]) -> Result<(Decimal, u32), TotalsOverflow> {
    let mut amount = Decimal::ZERO;
    let mut count = 0u32;
    for item in items {
        let overflow = || TotalsOverflow {
            product_id: item.product_id.clone(),
        };
        amount = item
            .line_total()
            .and_then(|line| amount.checked_add(line))
            .ok_or_else(overflow)?;
        count = count.checked_add(item.quantity).ok_or_else(overflow)?;
    }
    Ok((amount, count))
}
