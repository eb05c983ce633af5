//! Router assembly and the serve loop.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::routing::{delete, get, post};
use axum::Router;
use cragcache_core::Config;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

use crate::routes;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/csrf", get(routes::issue_csrf))
        .route("/api/search", get(routes::search))
        .route("/api/geocode/reverse", get(routes::reverse_geocode))
        .route("/api/regions/lookup", get(routes::region_lookup))
        .route("/api/climbs/{id}/rating", get(routes::climb_rating))
        .route("/api/crags/slug", get(routes::suggest_slug))
        .route("/api/route-lines/preview", post(routes::route_line_preview))
        .route("/api/crags/{id}/reports", post(routes::report_crag))
        .route("/api/images/{id}/flags", post(routes::flag_image))
        .route("/api/comments/{id}", delete(routes::delete_comment))
        .route("/api/deletion-requests", post(routes::request_deletion))
        .route("/api/uploads/sign", post(routes::sign_upload))
        .route("/api/gear/{id}/click", post(routes::gear_click))
        .with_state(state)
}

pub async fn start_server(config: &Config) -> Result<()> {
    info!("Initializing state...");
    let state = AppState::from_config(config)?;
    let app = router(state);

    let listener = TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    info!(address = %config.bind_address, "Server running");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C"),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
