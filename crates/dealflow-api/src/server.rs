//! HTTP server assembly.

use std::net::SocketAddr;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::routes;
use crate::state::AppState;

/// Builds the ingress application.
#[must_use]
pub fn ingress_app(state: AppState) -> Router {
    routes::ingress_routes()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Builds the admin application.
#[must_use]
pub fn admin_app(state: AppState) -> Router {
    routes::admin_routes()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Builds the worker application.
#[must_use]
pub fn worker_app(state: AppState) -> Router {
    routes::worker_routes()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves an application until shutdown.
///
/// # Errors
///
/// Returns an error if the listener cannot bind or the server fails.
pub async fn serve(app: Router, port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
