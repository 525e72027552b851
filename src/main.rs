use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use newsdesk::config::Config;
use newsdesk::db::Database;
use newsdesk::routes::{self, AppState};

const DEFAULT_CONFIG_PATH: &str = "newsdesk.toml";

fn load_config() -> anyhow::Result<Config> {
    let path = std::env::var("NEWSDESK_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let mut config = if Path::new(&path).exists() {
        info!("Loading configuration from {}", path);
        Config::load(&path)?
    } else {
        warn!("{} not found, using built-in defaults", path);
        Config::default()
    };

    config.apply_env();
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "newsdesk=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config()?;

    // Initialize database
    let db = Database::new(&config.database.url).await?;
    db.initialize().await?;
    info!("Database initialized");

    let state = AppState::from_config(&config, Arc::new(db))?;
    state.uploads.ensure_dir().await?;
    if !state.notifier.is_enabled() {
        info!("Telegram alerts disabled");
    }

    let app = routes::app(Arc::new(state), &config)?;

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!("Server starting on http://{}", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
