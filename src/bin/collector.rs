//! Collector Binary - HTTP event intake
//!
//! Accepts event batches on `{prefix}/tp2`, writes them to the event table and
//! rolls them up into the per-minute summary. A background task purges rows
//! whose ttl has passed.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin collector
//! ```
//!
//! ## Environment Variables
//!
//! - HITFLOW_DB_PATH - SQLite database path (default: data/hitflow.db)
//! - COLLECTOR_LISTEN_ADDR - Bind address (default: 0.0.0.0:8000)
//! - COLLECTOR_API_PREFIX - Route prefix (default: /api)
//! - REQUEST_TIMEOUT_MS - Store deadline per request (default: 5000)
//! - EVENT_TTL_DAYS / SUMMARY_TTL_DAYS - Expiry (default: 60 / 360)
//! - PURGE_INTERVAL_SECS - Reaper period (default: 3600)
//! - CORS_DEFAULT_ORIGIN - Preflight origin fallback (default: http://localhost:8000)
//! - RUST_LOG - Logging level (optional, default: info)

use hitflow::store::EventStore;
use hitflow::transport::{build_router, AppState};
use hitflow::{CollectorConfig, EventPipeline, SqliteStore};
use std::sync::Arc;
use tokio::time::{interval, Duration};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    dotenv::dotenv().ok();

    let config = CollectorConfig::from_env()?;

    log::info!("🚀 Starting hitflow collector");
    log::info!("   Database: {}", config.db_path);
    log::info!("   Listen: {}{}/tp2", config.listen_addr, config.api_prefix);
    log::info!("   Request timeout: {}ms", config.request_timeout_ms);
    log::info!(
        "   TTL: events {}d, summary {}d",
        config.event_ttl_days,
        config.summary_ttl_days
    );

    let store: Arc<dyn EventStore> = Arc::new(SqliteStore::open(&config.db_path)?);
    log::info!("📊 Backend: {}", store.backend_type());

    let pipeline = Arc::new(EventPipeline::new(
        store.clone(),
        config.event_ttl_secs(),
        config.summary_ttl_secs(),
    ));

    let reaper_store = store.clone();
    let purge_every = Duration::from_secs(config.purge_interval_secs);
    let reaper = tokio::spawn(async move {
        let mut ticker = interval(purge_every);
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now().timestamp();
            match reaper_store.purge_expired(now).await {
                Ok(0) => log::debug!("🧹 No expired rows"),
                Ok(removed) => log::info!("🧹 Purged {} expired rows", removed),
                Err(e) => log::error!("❌ Purge failed: {}", e),
            }
        }
    });

    let state = AppState::new(pipeline, config.request_timeout(), config.cors_default_origin.clone());
    let app = build_router(state, &config.api_prefix);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    log::info!("✅ Collector listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reaper.abort();
    log::info!("👋 Collector stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("❌ Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("🛑 Shutdown signal received");
}
