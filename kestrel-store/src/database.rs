use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::info;
use crate::app_config::DatabaseConfig;

/// Owns the Postgres pool shared by the order store.
#[derive(Clone)]
pub struct DbClient {
    pub pool: PgPool,
}

impl DbClient {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(&config.url)
            .await?;

        info!(max_connections = config.max_connections, "Connected to orders database");
        Ok(Self { pool })
    }

    /// Apply the embedded schema for `orders`, `order_items` and `order_receipts`.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Orders schema is up to date");
        Ok(())
    }
}
