use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Process configuration, read once at startup and handed to components.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub kafka: KafkaConfig,
    pub catalog: CatalogConfig,
    pub payment: PaymentConfig,
    pub listener: ListenerConfig,
    #[serde(default)]
    pub orders: OrdersConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 { 5 }

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub group_id: String,
    pub payment_topic: String,
    pub dead_letter_topic: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

impl CatalogConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String { "usd".to_string() }

impl PaymentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ListenerConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_redelivery_delay_ms")]
    pub redelivery_delay_ms: u64,
}

fn default_max_in_flight() -> usize { 16 }

fn default_redelivery_delay_ms() -> u64 { 1000 }

impl ListenerConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn redelivery_delay(&self) -> Duration {
        Duration::from_millis(self.redelivery_delay_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OrdersConfig {
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
}

fn default_page_size() -> u32 { 10 }

impl Default for OrdersConfig {
    fn default() -> Self {
        Self { default_page_size: default_page_size() }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. KESTREL__DATABASE__URL=postgres://...
            .add_source(config::Environment::with_prefix("KESTREL").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
