//! HTTP server setup: routing, request limits and process lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::{config::Config, pypi, state::AppState};

/// Build the application router.
///
/// | Route | Handler |
/// |---|---|
/// | `GET /`, `POST /` | welcome page, legacy upload |
/// | `GET /health` | health check |
/// | `GET /simple`, `/simple/` | project index |
/// | `GET /simple/{project}`, `/simple/{project}/` | project links |
/// | `GET /packages/`, `/packages/{*path}` | file listing, download |
/// | `POST /packages/update` | upload |
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_request_body_size_bytes();

    Router::new()
        .route("/", get(pypi::welcome).post(pypi::legacy_upload))
        .route("/health", get(pypi::health))
        .route("/simple", get(pypi::simple_redirect))
        .route("/simple/", get(pypi::simple_index))
        .route("/simple/{project}", get(pypi::project_redirect))
        .route("/simple/{project}/", get(pypi::project_index))
        .route("/packages/", get(pypi::packages_index))
        .route("/packages/update", post(pypi::upload))
        .route("/packages/{*path}", get(pypi::download))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind, serve until Ctrl-C, then drain in-flight requests.
pub async fn run_server(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid socket address {}:{}",
                config.server.host, config.server.port
            )
        })?;

    let data_dir = &config.storage.data_dir;
    if let Err(e) = tokio::fs::create_dir_all(data_dir).await {
        error!(data_dir = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e).with_context(|| format!("Failed to create {}", data_dir.display()));
    }
    info!(
        data_dir = %data_dir.display(),
        overwrite = config.storage.overwrite,
        enable_cache = config.storage.enable_cache,
        hash_algo = %config.index.hash_algo,
        "Using data directory"
    );
    if config.fallback.enabled {
        info!(url = %config.fallback.url, "Unknown projects redirect to fallback index");
    }

    let state = Arc::new(AppState::new(config));
    let app = build_router(state);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal, stopping gracefully"),
        Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
    }
}
