use axum::{routing::get, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stall_system::{
    config::Config,
    controllers,
    database::Database,
    services::HoldSweeper,
    store::{MemoryStore, PgStore, ReservationStore},
    AppState,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.app.rust_log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(environment = %config.app.environment, "starting stall booking service");

    let store: Arc<dyn ReservationStore> = match &config.database.url {
        Some(url) => {
            let db = Database::connect(url, &config.database).await?;
            db.run_migrations().await?;
            info!("database connected, migrations applied");
            Arc::new(PgStore::new(db.pool.clone()))
        }
        None => {
            warn!("DATABASE_URL not set, running with the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let state = AppState::build(config.clone(), store);

    let sweeper = Arc::new(HoldSweeper::new(
        state.store.clone(),
        state.hub.clone(),
        Duration::from_secs(config.hold.hold_seconds),
        Duration::from_secs(config.hold.payment_timeout_seconds),
    ));
    tokio::spawn(sweeper.run(Duration::from_secs(config.hold.sweep_interval_seconds)));

    let app = Router::new()
        .route("/", get(|| async { "Stall Booking API v1.0" }))
        .route("/health", get(|| async { "OK" }))
        .nest("/api", controllers::routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = config.app.bind_addr();
    info!("server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
