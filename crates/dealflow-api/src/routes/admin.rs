//! Admin routes: push-channel lifecycle, task-webhook registration, and
//! scheduled housekeeping.
//!
//! Unlike the webhook paths, admin failures are surfaced to the caller.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use dealflow_core::TenantId;
use dealflow_flow::{replace_watch, run_housekeeping, start_watch, stop_watch};
use dealflow_store::IntegrationKind;

use crate::config::DEFAULT_CALENDAR_ID;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

fn tenant_or_default(state: &AppState, tenant_id: Option<TenantId>) -> TenantId {
    tenant_id.unwrap_or(state.config.tenant_id)
}

// ----------------------------------------------------------------------
// Calendar watch lifecycle
// ----------------------------------------------------------------------

/// Request body for watch start.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartWatchRequest {
    /// Calendar to watch; defaults to the primary calendar.
    pub calendar_id: Option<String>,
    /// Opaque verification token echoed back in notifications.
    pub channel_token: Option<String>,
    /// Tenant override; defaults to the configured tenant.
    pub tenant_id: Option<TenantId>,
}

/// Channel metadata response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelResponse {
    /// Channel identifier.
    pub channel_id: String,
    /// Watched calendar.
    pub calendar_id: String,
    /// Provider resource identifier.
    pub resource_id: Option<String>,
    /// Expiry, milliseconds since epoch.
    pub expiration_ms: Option<i64>,
    /// Lifecycle status.
    pub status: String,
    /// Whether an initial sync token was captured.
    pub has_sync_token: bool,
}

impl From<dealflow_store::PushChannel> for ChannelResponse {
    fn from(channel: dealflow_store::PushChannel) -> Self {
        Self {
            channel_id: channel.channel_id,
            calendar_id: channel.calendar_id,
            resource_id: channel.resource_id,
            expiration_ms: channel.expiration_ms,
            status: channel.status.to_string(),
            has_sync_token: channel.sync_token.is_some(),
        }
    }
}

/// Start a watch channel.
///
/// POST /admin/calendar/watch/start
pub async fn watch_start(
    State(state): State<AppState>,
    Json(req): Json<StartWatchRequest>,
) -> ApiResult<Json<ChannelResponse>> {
    let tenant_id = tenant_or_default(&state, req.tenant_id);
    let calendar_id = req
        .calendar_id
        .unwrap_or_else(|| DEFAULT_CALENDAR_ID.to_string());

    let channel = start_watch(
        &state.store,
        &state.calendar,
        tenant_id,
        &calendar_id,
        req.channel_token,
        &state.config.ingress_public_base_url,
    )
    .await?;

    Ok(Json(channel.into()))
}

/// Request body for watch replace.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceWatchRequest {
    /// Calendar whose active channel to replace.
    pub calendar_id: Option<String>,
    /// Tenant override.
    pub tenant_id: Option<TenantId>,
}

/// Replace response: retired and fresh channel ids.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceWatchResponse {
    /// The retired channel.
    pub old_channel_id: String,
    /// The replacement channel.
    pub new_channel_id: String,
}

/// Replace the active watch channel.
///
/// POST /admin/calendar/watch/replace
pub async fn watch_replace(
    State(state): State<AppState>,
    Json(req): Json<ReplaceWatchRequest>,
) -> ApiResult<Json<ReplaceWatchResponse>> {
    let tenant_id = tenant_or_default(&state, req.tenant_id);
    let calendar_id = req
        .calendar_id
        .unwrap_or_else(|| DEFAULT_CALENDAR_ID.to_string());

    let (retired, replacement) = replace_watch(
        &state.store,
        &state.calendar,
        tenant_id,
        &calendar_id,
        &state.config.ingress_public_base_url,
    )
    .await?;

    Ok(Json(ReplaceWatchResponse {
        old_channel_id: retired.channel_id,
        new_channel_id: replacement.channel_id,
    }))
}

/// Request body for watch stop.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopWatchRequest {
    /// Channel to stop.
    pub channel_id: String,
    /// Tenant override.
    pub tenant_id: Option<TenantId>,
}

/// Stop response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopWatchResponse {
    /// The stopped channel.
    pub channel_id: String,
    /// Always `"stopped"`.
    pub status: String,
}

/// Stop a watch channel.
///
/// POST /admin/calendar/watch/stop
pub async fn watch_stop(
    State(state): State<AppState>,
    Json(req): Json<StopWatchRequest>,
) -> ApiResult<Json<StopWatchResponse>> {
    let tenant_id = tenant_or_default(&state, req.tenant_id);
    stop_watch(&state.store, &state.calendar, tenant_id, &req.channel_id).await?;

    Ok(Json(StopWatchResponse {
        channel_id: req.channel_id,
        status: "stopped".to_string(),
    }))
}

// ----------------------------------------------------------------------
// Task-webhook registration
// ----------------------------------------------------------------------

/// Request body for webhook registration.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateTasksWebhookRequest {
    /// Resource to watch; defaults to the configured pipeline project.
    pub resource_gid: Option<String>,
    /// Tenant override.
    pub tenant_id: Option<TenantId>,
}

/// Webhook registration response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTasksWebhookResponse {
    /// Provider webhook identifier.
    pub webhook_gid: String,
}

/// Register the task-provider webhook.
///
/// POST /admin/tasks/webhook/create
pub async fn tasks_webhook_create(
    State(state): State<AppState>,
    Json(req): Json<CreateTasksWebhookRequest>,
) -> ApiResult<Json<CreateTasksWebhookResponse>> {
    let tenant_id = tenant_or_default(&state, req.tenant_id);

    let mut config = state
        .store
        .integration(tenant_id, IntegrationKind::Tasks)
        .await?
        .map(|i| i.config)
        .unwrap_or_else(|| serde_json::json!({}));

    let resource_gid = req
        .resource_gid
        .or_else(|| {
            config
                .get("project_gid")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .ok_or_else(|| ApiError::bad_request("no resourceGid and no configured project_gid"))?;

    let target_url = format!(
        "{}/webhooks/tasks",
        state.config.ingress_public_base_url.trim_end_matches('/')
    );
    let webhook_gid = state.tasks.create_webhook(&resource_gid, &target_url).await?;

    config["webhook_gid"] = serde_json::json!(webhook_gid);
    state
        .store
        .upsert_integration(tenant_id, IntegrationKind::Tasks, config)
        .await?;

    Ok(Json(CreateTasksWebhookResponse { webhook_gid }))
}

/// Request body for webhook deregistration.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeleteTasksWebhookRequest {
    /// Webhook to remove; defaults to the stored registration.
    pub webhook_gid: Option<String>,
    /// Tenant override.
    pub tenant_id: Option<TenantId>,
}

/// Deregister the task-provider webhook.
///
/// POST /admin/tasks/webhook/delete
pub async fn tasks_webhook_delete(
    State(state): State<AppState>,
    Json(req): Json<DeleteTasksWebhookRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let tenant_id = tenant_or_default(&state, req.tenant_id);

    let mut config = state
        .store
        .integration(tenant_id, IntegrationKind::Tasks)
        .await?
        .map(|i| i.config)
        .unwrap_or_else(|| serde_json::json!({}));

    let webhook_gid = req
        .webhook_gid
        .or_else(|| {
            config
                .get("webhook_gid")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .ok_or_else(|| ApiError::bad_request("no webhookGid and none on file"))?;

    state.tasks.delete_webhook(&webhook_gid).await?;

    if let Some(map) = config.as_object_mut() {
        map.remove("webhook_gid");
    }
    state
        .store
        .upsert_integration(tenant_id, IntegrationKind::Tasks, config)
        .await?;

    Ok(Json(serde_json::json!({ "status": "deleted" })))
}

// ----------------------------------------------------------------------
// Housekeeping
// ----------------------------------------------------------------------

/// Housekeeping response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HousekeepingResponse {
    /// Idempotency keys removed.
    pub idempotency_keys_deleted: u64,
    /// Retired channels removed.
    pub channels_deleted: u64,
}

/// Delete expired idempotency keys and stale retired channels.
///
/// POST /admin/housekeeping
pub async fn housekeeping(
    State(state): State<AppState>,
) -> ApiResult<Json<HousekeepingResponse>> {
    let report = run_housekeeping(&state.store).await?;
    Ok(Json(HousekeepingResponse {
        idempotency_keys_deleted: report.idempotency_keys_deleted,
        channels_deleted: report.channels_deleted,
    }))
}
