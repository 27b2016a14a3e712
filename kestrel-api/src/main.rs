use std::net::SocketAddr;
use std::sync::Arc;
use anyhow::Context;
use kestrel_api::{app, worker, AppState};
use kestrel_catalog::HttpCatalogClient;
use kestrel_order::{
    CompletionDispatcher, CompletionPolicy, HttpPaymentGateway, OrchestratorConfig, OrderOrchestrator,
    PaymentCompletionHandler,
};
use kestrel_store::{app_config::Config, DbClient, EventProducer, PgOrderStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kestrel_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!(port = config.server.port, "Starting Kestrel orders service");

    // Postgres
    let db = DbClient::connect(&config.database)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;
    let store = Arc::new(PgOrderStore::new(db.pool.clone()));

    // Remote collaborators
    let catalog = HttpCatalogClient::new(&config.catalog.base_url, config.catalog.timeout())
        .context("Failed to build catalog client")?;
    let payments = HttpPaymentGateway::new(&config.payment.base_url, config.payment.timeout())
        .context("Failed to build payment gateway client")?;

    let orchestrator = Arc::new(OrderOrchestrator::new(
        store,
        Arc::new(catalog),
        Arc::new(payments),
        OrchestratorConfig {
            catalog_timeout: config.catalog.timeout(),
            payment_timeout: config.payment.timeout(),
            currency: config.payment.currency.clone(),
            default_page_size: config.orders.default_page_size,
        },
    ));

    // Kafka
    let producer = EventProducer::new(&config.kafka.brokers, &config.kafka.dead_letter_topic)
        .context("Failed to create Kafka producer")?;
    let handler = Arc::new(PaymentCompletionHandler::new(
        orchestrator.clone(),
        Arc::new(producer),
        CompletionPolicy {
            max_attempts: config.listener.max_attempts,
            initial_backoff: config.listener.initial_backoff(),
            ..CompletionPolicy::default()
        },
        config.kafka.payment_topic.clone(),
    ));

    let (dispatcher, handled) = CompletionDispatcher::new(
        handler,
        config.listener.max_in_flight,
        config.listener.redelivery_delay(),
    );
    let kafka = config.kafka.clone();
    tokio::spawn(async move {
        if let Err(e) = worker::start_payment_worker(&kafka, dispatcher, handled).await {
            tracing::error!(error = %e, "Payment worker stopped");
        }
    });

    let app = app(AppState { orchestrator });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!(%addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
