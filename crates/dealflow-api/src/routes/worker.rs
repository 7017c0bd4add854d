//! Worker dispatch route.
//!
//! One endpoint behind the queue. Response codes are the retry contract:
//! 2xx acks the delivery, 400 drops it (non-retryable), 5xx makes the
//! queue redeliver with its own backoff.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;

use dealflow_flow::JobEnvelope;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Dispatch one job envelope.
///
/// POST /tasks/dispatch
pub async fn dispatch(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<serde_json::Value>> {
    if let Some(auth) = &state.dispatch_auth {
        if let Err(error) = auth.verify_headers(&headers).await {
            tracing::warn!(%error, "dispatch auth failed");
            return Err(ApiError::unauthorized(error.to_string()));
        }
    }

    // Unknown jobType fails enum deserialization here: 400, non-retryable.
    let envelope: JobEnvelope = serde_json::from_str(&body)
        .map_err(|e| ApiError::bad_request(format!("invalid envelope: {e}")))?;

    state.router.dispatch(&envelope).await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}
