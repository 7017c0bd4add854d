//! Ingress webhook routes.
//!
//! Both webhooks must answer inside the provider's ack deadline and must
//! not cause channel deactivation on transient faults: beyond the explicit
//! 400/401 rejections, every failure path acknowledges 200 and drops.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use dealflow_flow::{
    calendar_ping_key, tasks_event_key, CalendarSyncPayload, EnqueueOptions, JobEnvelope, JobType,
    TasksProcessPayload,
};
use dealflow_store::{ChannelStatus, IntegrationKind};

use crate::error::ApiError;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Liveness probe.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

fn header<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn ack() -> Response {
    (StatusCode::OK, Json(serde_json::json!({ "ok": true }))).into_response()
}

/// Calendar push notification: headers only, no body.
///
/// POST /webhooks/calendar
pub async fn calendar_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    // Initial handshake ping carries resource_state=sync; just ack.
    if header(&headers, "x-goog-resource-state") == Some("sync") {
        return Ok(ack());
    }

    let Some(channel_id) = header(&headers, "x-goog-channel-id") else {
        return Err(ApiError::bad_request("missing X-Goog-Channel-ID"));
    };
    let Some(resource_id) = header(&headers, "x-goog-resource-id") else {
        return Err(ApiError::bad_request("missing X-Goog-Resource-ID"));
    };
    let message_number = header(&headers, "x-goog-message-number").unwrap_or("0");
    let channel_token = header(&headers, "x-goog-channel-token");

    let tenant_id = state.config.tenant_id;

    // Anything from here on answers 200: the provider must not disable the
    // channel over our storage faults.
    let channel = match state.store.channel_by_id(tenant_id, channel_id).await {
        Ok(Some(channel)) => channel,
        Ok(None) => {
            tracing::info!(channel_id = channel_id, "ping for unknown channel, dropping");
            return Ok(ack());
        }
        Err(error) => {
            tracing::error!(%error, "channel lookup failed, dropping ping");
            return Ok(ack());
        }
    };

    if channel.status == ChannelStatus::Stopped {
        tracing::info!(channel_id = channel_id, "ping for stopped channel, dropping");
        return Ok(ack());
    }
    if channel.resource_id.as_deref() != Some(resource_id) {
        tracing::warn!(channel_id = channel_id, "resource id mismatch, dropping");
        return Ok(ack());
    }
    if let Some(expected) = channel.channel_token.as_deref() {
        if channel_token != Some(expected) {
            tracing::warn!(channel_id = channel_id, "channel token mismatch, dropping");
            return Ok(ack());
        }
    }

    let key = calendar_ping_key(channel_id, message_number);
    match state.store.claim_idempotency_key(tenant_id, &key).await {
        Ok(true) => {}
        Ok(false) => {
            dealflow_flow::metrics::record_webhook_deduped("calendar");
            tracing::info!(key = %key, "duplicate ping, dropping");
            return Ok(ack());
        }
        Err(error) => {
            tracing::error!(%error, "idempotency claim failed, dropping ping");
            return Ok(ack());
        }
    }

    let envelope = match JobEnvelope::new(
        JobType::CalendarSync,
        tenant_id,
        &CalendarSyncPayload {
            calendar_id: channel.calendar_id.clone(),
            channel_id: channel.channel_id.clone(),
        },
    ) {
        Ok(envelope) => envelope.with_idempotency_key(key),
        Err(error) => {
            tracing::error!(%error, "envelope build failed, dropping ping");
            return Ok(ack());
        }
    };

    if let Err(error) = state.queue.enqueue(envelope, EnqueueOptions::default()).await {
        tracing::error!(%error, "enqueue failed, dropping ping");
        return Ok(ack());
    }

    dealflow_flow::metrics::record_webhook_admitted("calendar");
    dealflow_flow::metrics::record_job_enqueued(JobType::CalendarSync.as_str());
    Ok(ack())
}

#[derive(Debug, Deserialize)]
struct EventBatch {
    #[serde(default)]
    events: Vec<TaskEvent>,
}

#[derive(Debug, Deserialize)]
struct TaskEvent {
    action: Option<String>,
    created_at: Option<String>,
    resource: Option<EventResource>,
}

#[derive(Debug, Deserialize)]
struct EventResource {
    gid: String,
    resource_type: Option<String>,
}

fn decode_hex(input: &str) -> Option<Vec<u8>> {
    if input.len() % 2 != 0 {
        return None;
    }
    (0..input.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&input[i..i + 2], 16).ok())
        .collect()
}

fn signature_matches(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Some(expected) = decode_hex(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    // verify_slice is constant-time.
    mac.verify_slice(&expected).is_ok()
}

/// Task-manager webhook: handshake echo or HMAC-signed event batch.
///
/// POST /webhooks/tasks (raw body required)
pub async fn tasks_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let tenant_id = state.config.tenant_id;
    let hook_secret = header(&headers, "x-hook-secret").map(str::to_string);
    let signature = header(&headers, "x-hook-signature").map(str::to_string);

    // Handshake: persist the secret and echo it back.
    if let (Some(secret), None) = (&hook_secret, &signature) {
        let mut config = state
            .store
            .integration(tenant_id, IntegrationKind::Tasks)
            .await
            .map_err(ApiError::from)?
            .map(|i| i.config)
            .unwrap_or_else(|| serde_json::json!({}));
        config["webhook_secret"] = serde_json::json!(secret);
        state
            .store
            .upsert_integration(tenant_id, IntegrationKind::Tasks, config)
            .await
            .map_err(ApiError::from)?;

        tracing::info!("task webhook handshake complete");
        return Ok((StatusCode::OK, [("x-hook-secret", secret.clone())]).into_response());
    }

    let Some(signature) = signature else {
        return Err(ApiError::bad_request("missing webhook headers"));
    };

    let integration = state
        .store
        .integration(tenant_id, IntegrationKind::Tasks)
        .await
        .map_err(ApiError::from)?;
    let Some(secret) = integration
        .as_ref()
        .and_then(|i| i.config.get("webhook_secret"))
        .and_then(|v| v.as_str())
    else {
        return Err(ApiError::unauthorized("no webhook secret on file"));
    };

    if !signature_matches(secret, &body, &signature) {
        return Err(ApiError::unauthorized("invalid webhook signature"));
    }

    // Past authentication: internal failures answer 200 so the provider
    // does not deactivate the webhook.
    let batch: EventBatch = match serde_json::from_slice(&body) {
        Ok(batch) => batch,
        Err(error) => {
            tracing::warn!(%error, "unparseable event body, dropping");
            return Ok(ack());
        }
    };

    if batch.events.is_empty() {
        // Heartbeat.
        return Ok(ack());
    }

    let config = integration.map(|i| i.config).unwrap_or_default();
    let webhook_gid = config
        .get("webhook_gid")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();
    let Some(project_gid) = config
        .get("project_gid")
        .and_then(|v| v.as_str())
        .map(str::to_string)
    else {
        tracing::error!("tasks integration has no project_gid, dropping events");
        return Ok(ack());
    };

    for event in &batch.events {
        let Some(resource) = &event.resource else {
            continue;
        };
        if resource.resource_type.as_deref() != Some("task") {
            continue;
        }
        let action = event.action.as_deref().unwrap_or("changed");
        let created_at = event.created_at.as_deref().unwrap_or_default();

        let key = tasks_event_key(&webhook_gid, created_at, &resource.gid, action);
        match state.store.claim_idempotency_key(tenant_id, &key).await {
            Ok(true) => {}
            Ok(false) => {
                dealflow_flow::metrics::record_webhook_deduped("tasks");
                continue;
            }
            Err(error) => {
                tracing::error!(%error, "event claim failed, skipping");
                continue;
            }
        }

        let envelope = match JobEnvelope::new(
            JobType::TasksProcess,
            tenant_id,
            &TasksProcessPayload {
                task_gid: resource.gid.clone(),
                project_gid: project_gid.clone(),
                action: Some(action.to_string()),
            },
        ) {
            Ok(envelope) => envelope.with_idempotency_key(key),
            Err(error) => {
                tracing::error!(%error, "envelope build failed, skipping event");
                continue;
            }
        };

        match state.queue.enqueue(envelope, EnqueueOptions::default()).await {
            Ok(_) => {
                dealflow_flow::metrics::record_webhook_admitted("tasks");
                dealflow_flow::metrics::record_job_enqueued(JobType::TasksProcess.as_str());
            }
            Err(error) => {
                tracing::error!(%error, "event enqueue failed, skipping");
            }
        }
    }

    Ok(ack())
}
