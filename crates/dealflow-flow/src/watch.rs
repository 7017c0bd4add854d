//! Push-channel lifecycle operations.
//!
//! Channels have finite lifetime and never auto-renew; an external
//! scheduler calls replace well before expiry. Replacement ordering is
//! mandatory: create the new provider watch, copy the old sync token onto
//! the new row, retire the old row (atomically with the insert), then stop
//! the old channel best-effort — the provider may have expired it already.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use dealflow_core::TenantId;
use dealflow_providers::{CalendarProvider, SyncRequest};
use dealflow_store::{ChannelStatus, DealStore, PushChannel};

use crate::error::Result;

/// Idempotency keys older than this are deleted by housekeeping.
pub const IDEMPOTENCY_KEY_TTL_DAYS: i64 = 7;

/// Retired channels older than this are deleted by housekeeping.
pub const RETIRED_CHANNEL_TTL_HOURS: i64 = 24;

/// What housekeeping removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HousekeepingReport {
    /// Idempotency keys deleted.
    pub idempotency_keys_deleted: u64,
    /// Retired channels deleted.
    pub channels_deleted: u64,
}

/// Builds the webhook address for a tenant's calendar channel.
fn webhook_address(ingress_base_url: &str) -> String {
    format!(
        "{}/webhooks/calendar",
        ingress_base_url.trim_end_matches('/')
    )
}

/// Starts a fresh watch channel on a calendar.
///
/// Registers the watch with the provider, persists the channel row, then
/// runs one full sync purely to obtain an initial sync token (events on
/// those pages are discarded; the first real ping re-reads them).
///
/// # Errors
///
/// Returns a conflict error when an active channel already exists for the
/// calendar, or any provider/store failure.
pub async fn start_watch(
    store: &Arc<dyn DealStore>,
    calendar: &Arc<dyn CalendarProvider>,
    tenant_id: TenantId,
    calendar_id: &str,
    channel_token: Option<String>,
    ingress_base_url: &str,
) -> Result<PushChannel> {
    let channel_id = Uuid::new_v4().to_string();
    let address = webhook_address(ingress_base_url);

    let info = calendar
        .create_watch(calendar_id, &channel_id, &address, channel_token.as_deref())
        .await?;

    let now = Utc::now();
    let mut channel = PushChannel {
        tenant_id,
        calendar_id: calendar_id.to_string(),
        channel_id,
        resource_id: Some(info.resource_id),
        channel_token,
        sync_token: None,
        expiration_ms: info.expiration_ms,
        status: ChannelStatus::Active,
        created_at: now,
        updated_at: now,
    };
    store.insert_channel(&channel).await?;

    // Walk a full window once just to mint the initial cursor.
    let mut request = SyncRequest::full_window();
    loop {
        let page = calendar.list_events(calendar_id, &request).await?;
        if let Some(token) = page.next_sync_token {
            store
                .set_active_sync_token(tenant_id, calendar_id, &token)
                .await?;
            channel.sync_token = Some(token);
            break;
        }
        match page.next_page_token {
            Some(next) => request = SyncRequest::full_window().next_page(next),
            None => break,
        }
    }

    tracing::info!(
        calendar_id = calendar_id,
        channel_id = %channel.channel_id,
        "watch channel started"
    );
    Ok(channel)
}

/// Replaces the active watch channel for a calendar.
///
/// Returns `(retired, replacement)`. The old channel's sync token and
/// verification token carry over to the new row, so no notification window
/// is lost across the swap.
///
/// # Errors
///
/// Returns not-found when no active channel exists, or any provider/store
/// failure from the mandatory steps. The final provider stop is
/// best-effort: failures are logged and swallowed.
pub async fn replace_watch(
    store: &Arc<dyn DealStore>,
    calendar: &Arc<dyn CalendarProvider>,
    tenant_id: TenantId,
    calendar_id: &str,
    ingress_base_url: &str,
) -> Result<(PushChannel, PushChannel)> {
    let old = store
        .active_channel(tenant_id, calendar_id)
        .await?
        .ok_or_else(|| {
            dealflow_store::Error::not_found("active push_channel", calendar_id)
        })?;

    let channel_id = Uuid::new_v4().to_string();
    let address = webhook_address(ingress_base_url);
    let info = calendar
        .create_watch(
            calendar_id,
            &channel_id,
            &address,
            old.channel_token.as_deref(),
        )
        .await?;

    let now = Utc::now();
    let replacement = PushChannel {
        tenant_id,
        calendar_id: calendar_id.to_string(),
        channel_id,
        resource_id: Some(info.resource_id),
        channel_token: old.channel_token.clone(),
        sync_token: old.sync_token.clone(),
        expiration_ms: info.expiration_ms,
        status: ChannelStatus::Active,
        created_at: now,
        updated_at: now,
    };

    let retired = store
        .replace_active_channel(tenant_id, calendar_id, &replacement)
        .await?;

    if let Some(resource_id) = retired.resource_id.as_deref() {
        if let Err(error) = calendar.stop_watch(&retired.channel_id, resource_id).await {
            tracing::warn!(
                channel_id = %retired.channel_id,
                %error,
                "best-effort stop of replaced channel failed"
            );
        }
    }

    tracing::info!(
        calendar_id = calendar_id,
        old_channel = %retired.channel_id,
        new_channel = %replacement.channel_id,
        "watch channel replaced"
    );
    Ok((retired, replacement))
}

/// Stops a watch channel.
///
/// The provider stop is best-effort; the row is marked stopped regardless.
///
/// # Errors
///
/// Returns not-found when the channel does not exist.
pub async fn stop_watch(
    store: &Arc<dyn DealStore>,
    calendar: &Arc<dyn CalendarProvider>,
    tenant_id: TenantId,
    channel_id: &str,
) -> Result<()> {
    let channel = store
        .channel_by_id(tenant_id, channel_id)
        .await?
        .ok_or_else(|| dealflow_store::Error::not_found("push_channel", channel_id))?;

    if let Some(resource_id) = channel.resource_id.as_deref() {
        if let Err(error) = calendar.stop_watch(channel_id, resource_id).await {
            tracing::warn!(channel_id = channel_id, %error, "provider stop failed");
        }
    }

    store
        .set_channel_status(tenant_id, channel_id, ChannelStatus::Stopped)
        .await?;
    Ok(())
}

/// Deletes expired idempotency keys and stale retired channels.
///
/// # Errors
///
/// Returns any store failure.
pub async fn run_housekeeping(store: &Arc<dyn DealStore>) -> Result<HousekeepingReport> {
    let now = Utc::now();

    let idempotency_keys_deleted = store
        .delete_idempotency_keys_before(now - Duration::days(IDEMPOTENCY_KEY_TTL_DAYS))
        .await?;
    let channels_deleted = store
        .delete_retired_channels_before(now - Duration::hours(RETIRED_CHANNEL_TTL_HOURS))
        .await?;

    tracing::info!(
        idempotency_keys_deleted,
        channels_deleted,
        "housekeeping complete"
    );
    Ok(HousekeepingReport {
        idempotency_keys_deleted,
        channels_deleted,
    })
}
