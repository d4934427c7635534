use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::api::{self, AppState};
use crate::orchestrator::TaskOrchestrator;

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allow any origin, for browser frontends served from elsewhere.
    pub permissive_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            permissive_cors: true,
        }
    }
}

/// Build the full application router.
pub fn build_router(state: Arc<AppState>, permissive_cors: bool) -> Router {
    let app = api::api_router().with_state(state);
    if permissive_cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Serve the task API until Ctrl+C.
pub async fn start_server(config: ServerConfig, orchestrator: TaskOrchestrator) -> Result<()> {
    let state = Arc::new(AppState { orchestrator });
    let app = build_router(state, config.permissive_cors);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(address = %local_addr, "opendev server listening");
    println!("opendev running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down...");
}
