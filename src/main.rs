// Auction engine entry point.
//
// Startup sequence:
// 1. Initialize tracing (stdout)
// 2. Load config
// 3. Open database and rehydrate the entity store
// 4. Build the API facade
// 5. Bind and spawn the WebSocket server
// 6. Wait for Ctrl+C, then shut down

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info};

use auction_desk::api::Api;
use auction_desk::config;
use auction_desk::db::Database;
use auction_desk::store::EntityStore;
use auction_desk::ws_server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("auction engine starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "config loaded: port={}, default_team_budget={}, min_base_price={}",
        config.ws_port, config.rules.default_team_budget, config.rules.min_base_price
    );

    // 3. Open database and rehydrate
    if let Some(parent) = config.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let db_path = config
        .db_path
        .to_str()
        .context("database path is not valid UTF-8")?
        .to_string();
    let db = Database::open(&db_path).context("failed to open database")?;
    info!("database opened at {db_path}");

    let store = Arc::new(EntityStore::open(db).context("failed to load entity store")?);

    // 4. Build the API facade
    let api = Arc::new(Api::new(store, config.rules.clone()));

    // 5. Bind and spawn the WebSocket server
    let listener = TcpListener::bind(format!("127.0.0.1:{}", config.ws_port))
        .await
        .with_context(|| format!("failed to bind port {}", config.ws_port))?;
    info!(
        "auction engine ready on 127.0.0.1:{}",
        config.ws_port
    );

    let server = tokio::spawn(async move {
        if let Err(e) = ws_server::run(listener, api).await {
            error!("websocket server error: {e:#}");
        }
    });

    // 6. Wait for Ctrl+C
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    // The server loops forever; committed state is already durable.
    server.abort();

    info!("auction engine shut down cleanly");
    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("auction_desk=info,warn")),
        )
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
