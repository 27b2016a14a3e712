use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use rust_decimal::Decimal;
use crate::models::ProductId;

/// Authoritative product data as returned by the catalog service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Decimal,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The catalog refused the request itself (bad ids, bad shape).
    #[error("Catalog rejected request: {0}")]
    Rejected(String),

    #[error("Catalog unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed catalog response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Resolve a set of product ids.
    ///
    /// Returns a record for every id the catalog recognizes. Ids missing from
    /// the result are unknown to the catalog.
    async fn validate_products(&self, ids: &[ProductId]) -> Result<Vec<Product>, CatalogError>;
}
