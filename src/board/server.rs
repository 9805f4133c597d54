use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tracing::info;

use super::api::{self, AppState, SharedState};
use super::channels::BroadcastHub;
use super::db::{BoardDb, DbHandle};
use super::service::BoardService;
use super::ws;
use crate::config::TasklaneConfig;

/// Configuration for the board server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub dev_mode: bool,
    pub busy_timeout: Duration,
    pub conflict_retries: u32,
    pub channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig::from(&TasklaneConfig::default())
    }
}

impl From<&TasklaneConfig> for ServerConfig {
    fn from(config: &TasklaneConfig) -> Self {
        Self {
            host: config.server.host.clone(),
            port: config.server.port,
            db_path: config.database.path.clone(),
            dev_mode: config.server.dev_mode,
            busy_timeout: config.database.busy_timeout(),
            conflict_retries: config.database.conflict_retries,
            channel_capacity: config.broadcast.channel_capacity,
        }
    }
}

/// Wire database, hub and service together.
pub fn build_state(db: BoardDb, config: &ServerConfig) -> SharedState {
    let hub = Arc::new(BroadcastHub::new(config.channel_capacity));
    let service = BoardService::new(DbHandle::new(db), hub.clone())
        .with_conflict_retries(config.conflict_retries);
    Arc::new(AppState { service, hub })
}

/// Build the full application router with API and WebSocket routes.
pub fn build_router(state: SharedState) -> Router {
    api::api_router()
        .route("/ws/boards/{id}", get(ws::board_ws_handler))
        .with_state(state)
}

/// Start the board server and run until Ctrl+C.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let db = BoardDb::open(&config.db_path, config.busy_timeout)
        .context("Failed to initialize board database")?;
    let state = build_state(db, &config);

    let mut app = build_router(state.clone());
    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(%local_addr, db = %config.db_path.display(), dev_mode = config.dev_mode, "tasklane listening");
    println!("Tasklane running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Let in-flight broadcasts reach subscribers before exiting.
    state.service.wait_for_broadcasts().await;
    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
