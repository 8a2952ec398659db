//! Catalog service entry point.

use std::error::Error;
use std::sync::Arc;

use catalog_core::clock::{Clock, SystemClock};
use catalog_messaging::transport::Transport;
use catalog_product::application::audit_trail::AuditTrail;
use catalog_product::application::search_projection::{
    InMemoryProductSearchIndex, ProductSearchIndex,
};
use catalog_service::config::ServiceConfig;
use catalog_service::error::AppError;
use catalog_service::state::AppState;
use catalog_service::{app, consumer, telemetry};
use catalog_store::pg_event_repository::{PgEventRepository, PgTransactionManager};
use catalog_store::schema;
use catalog_unit_of_work::event_bus::DomainEventBus;
use catalog_unit_of_work::publisher::TransportIntegrationPublisher;
use catalog_unit_of_work::unit_of_work::UnitOfWork;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;

const AUDIT_TRAIL_CAPACITY: usize = 1_000;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Read configuration from environment.
    let config = ServiceConfig::from_env()?;

    let tracer_provider = telemetry::init(config.otlp_endpoint.as_deref())?;
    tracing::info!("Starting catalog service");

    // Create database connection pool.
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .map_err(AppError::from)?;
    schema::apply(&pool).await.map_err(AppError::from)?;

    let transport: Arc<dyn Transport> = consumer::transport(&config)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let search_index: Arc<dyn ProductSearchIndex> = Arc::new(InMemoryProductSearchIndex::new());

    // Write side: domain events dispatch in-process, integration events go to the log.
    let audit_trail = Arc::new(AuditTrail::new(AUDIT_TRAIL_CAPACITY));
    let bus = audit_trail.subscribe(DomainEventBus::builder()).build();
    let unit_of_work = UnitOfWork::new(
        Arc::new(PgTransactionManager::new(pool.clone())),
        Arc::new(bus),
        Arc::new(TransportIntegrationPublisher::new(
            Arc::clone(&transport),
            config.product_topic.clone(),
        )),
    );
    let app_state = AppState::new(
        Arc::clone(&clock),
        Arc::new(PgEventRepository::new(pool)),
        unit_of_work,
        Arc::clone(&search_index),
    );

    // Read side: the consumer runtime keeps the search index current.
    let cache = consumer::retry_cache(&config).await?;
    let runtime = consumer::build_runtime(&config, transport, search_index, cache, clock)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer_task = tokio::spawn(runtime.run(shutdown_rx));

    // Start server.
    let addr = config.bind_addr()?;
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app::router(app_state))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    match consumer_task.await {
        Ok(Ok(())) => tracing::info!("consumer runtime stopped"),
        Ok(Err(e)) => tracing::error!(error = %e, "consumer runtime failed"),
        Err(e) => tracing::error!(error = %e, "consumer task panicked"),
    }

    telemetry::shutdown(tracer_provider);
    Ok(())
}
