pub mod app_config;
pub mod database;
pub mod order_repo;
pub mod in_memory;
pub mod events;

pub use database::DbClient;
pub use order_repo::PgOrderStore;
pub use in_memory::InMemoryOrderStore;
pub use events::EventProducer;
