pub mod client;
pub mod pricing;

pub use client::HttpCatalogClient;
pub use pricing::{distinct_ids, PriceSheet, PricingError};
