use async_trait::async_trait;
use std::time::Duration;
use kestrel_core::catalog::{CatalogClient, CatalogError, Product};
use kestrel_core::ProductId;

/// Catalog client speaking JSON over HTTP.
///
/// `POST {base_url}/products/validate` with a JSON array of ids, answered by
/// an array of `{id, name, price}` for the ids the catalog knows.
#[derive(Clone)]
pub struct HttpCatalogClient {
    http: reqwest::Client,
    validate_url: String,
}

impl HttpCatalogClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            validate_url: format!("{}/products/validate", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl CatalogClient for HttpCatalogClient {
    async fn validate_products(&self, ids: &[ProductId]) -> Result<Vec<Product>, CatalogError> {
        tracing::debug!(count = ids.len(), "Validating products against catalog");

        let response = self
            .http
            .post(&self.validate_url)
            .json(ids)
            .send()
            .await
            .map_err(|e| CatalogError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(CatalogError::Rejected(format!("{}: {}", status, body)));
        }
        if !status.is_success() {
            return Err(CatalogError::Unavailable(format!("catalog answered {}", status)));
        }

        response
            .json::<Vec<Product>>()
            .await
            .map_err(|e| CatalogError::Malformed(e.to_string()))
    }
}
