//! Herb Finder Backend
//!
//! REST backend with SQLite persistence, bearer-token auth and a chunked object store.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use herb_finder::analysis::UnavailableAnalyzer;
use herb_finder::config::Config;
use herb_finder::db::{self, Repository};
use herb_finder::storage::ObjectStorage;
use herb_finder::{create_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Herb Finder Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Storage path: {:?}", config.storage_path);
    tracing::info!("Bind address: {}", config.bind_addr);

    // Initialize database
    let pool = db::init_database(&config.db_path).await?;
    let repo = Arc::new(Repository::new(pool));

    // Initialize object store
    let storage = Arc::new(ObjectStorage::open(&config.storage_path, &config.public_url).await?);
    tracing::info!("Public object URL base: {}", config.public_url);

    tracing::warn!("No plant identification service configured; analysis requests will fail");

    // Create application state
    let state = AppState {
        repo,
        storage,
        analyzer: Arc::new(UnavailableAnalyzer),
        config: Arc::new(config.clone()),
    };

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
