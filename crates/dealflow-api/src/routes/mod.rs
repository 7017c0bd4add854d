//! HTTP route handlers for the three services.

pub mod admin;
pub mod ingress;
pub mod worker;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Routes for the public ingress service.
pub fn ingress_routes() -> Router<AppState> {
    Router::new()
        .route("/webhooks/calendar", post(ingress::calendar_webhook))
        .route("/webhooks/tasks", post(ingress::tasks_webhook))
        .route("/health", get(ingress::health))
}

/// Routes for the private admin service.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/calendar/watch/start", post(admin::watch_start))
        .route("/admin/calendar/watch/replace", post(admin::watch_replace))
        .route("/admin/calendar/watch/stop", post(admin::watch_stop))
        .route("/admin/tasks/webhook/create", post(admin::tasks_webhook_create))
        .route("/admin/tasks/webhook/delete", post(admin::tasks_webhook_delete))
        .route("/admin/housekeeping", post(admin::housekeeping))
        .route("/health", get(ingress::health))
}

/// Routes for the private worker service.
pub fn worker_routes() -> Router<AppState> {
    Router::new()
        .route("/tasks/dispatch", post(worker::dispatch))
        .route("/health", get(ingress::health))
}
