//! The storage abstraction shared by all three services.
//!
//! [`DealStore`] is the single source of truth for every cross-request
//! invariant: unique-constraint claims (idempotency keys), row-level upserts
//! (deals, task states), and write-once terminal transitions (workflow
//! runs). Implementations:
//!
//! - [`crate::postgres::PostgresStore`]: production
//! - [`crate::memory::MemoryStore`]: tests and local experimentation
//!
//! ## Contract notes
//!
//! - `record_task_observation` must be atomic: the returned previous section
//!   and the write of the new one happen in a single round-trip, or the
//!   section-change detector loses updates under concurrent delivery.
//! - `close_run` must be guarded on `status = running`; a terminal run never
//!   transitions again.
//! - `replace_active_channel` must retire the old row and insert the new one
//!   atomically so no reader observes zero active channels for a calendar.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use dealflow_core::{DealId, StageKey, TenantId, WorkflowRunId};

use crate::error::Result;
use crate::model::{
    ChannelStatus, Deal, DealPatch, Integration, IntegrationKind, PushChannel, WorkflowRun,
};

/// Storage interface for the dealflow orchestrator.
#[async_trait]
pub trait DealStore: Send + Sync {
    // ------------------------------------------------------------------
    // Tenants and integrations
    // ------------------------------------------------------------------

    /// Ensures a tenant row exists (idempotent).
    async fn ensure_tenant(&self, tenant_id: TenantId, name: &str) -> Result<()>;

    /// Inserts or replaces an integration config.
    async fn upsert_integration(
        &self,
        tenant_id: TenantId,
        kind: IntegrationKind,
        config: serde_json::Value,
    ) -> Result<()>;

    /// Fetches an integration config, if present.
    async fn integration(
        &self,
        tenant_id: TenantId,
        kind: IntegrationKind,
    ) -> Result<Option<Integration>>;

    // ------------------------------------------------------------------
    // Push channels
    // ------------------------------------------------------------------

    /// Inserts a new push channel row.
    ///
    /// # Errors
    ///
    /// Returns a conflict error when an active channel already exists for
    /// the `(tenant, calendar)` pair and the new row is active.
    async fn insert_channel(&self, channel: &PushChannel) -> Result<()>;

    /// Looks up a channel by its provider-facing id, any status.
    async fn channel_by_id(
        &self,
        tenant_id: TenantId,
        channel_id: &str,
    ) -> Result<Option<PushChannel>>;

    /// Returns the active channel for a calendar, if any.
    async fn active_channel(
        &self,
        tenant_id: TenantId,
        calendar_id: &str,
    ) -> Result<Option<PushChannel>>;

    /// Atomically retires the current active channel for the calendar and
    /// inserts `new_channel` as the active one.
    ///
    /// Returns the retired channel. `new_channel.sync_token` should carry
    /// the copied token; this method does not copy it.
    ///
    /// # Errors
    ///
    /// Returns not-found when no active channel exists for the calendar.
    async fn replace_active_channel(
        &self,
        tenant_id: TenantId,
        calendar_id: &str,
        new_channel: &PushChannel,
    ) -> Result<PushChannel>;

    /// Marks a channel with a terminal status.
    async fn set_channel_status(
        &self,
        tenant_id: TenantId,
        channel_id: &str,
        status: ChannelStatus,
    ) -> Result<()>;

    /// Writes a sync token onto the currently-active channel for a calendar
    /// (last-writer-wins).
    ///
    /// Returns false when no active channel exists; the token is dropped.
    async fn set_active_sync_token(
        &self,
        tenant_id: TenantId,
        calendar_id: &str,
        sync_token: &str,
    ) -> Result<bool>;

    /// Deletes retired (replaced or stopped) channels last touched before
    /// `cutoff`. Returns the number of rows removed.
    async fn delete_retired_channels_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    // ------------------------------------------------------------------
    // Deals
    // ------------------------------------------------------------------

    /// Upserts a deal by `(tenant, calendar, event)`, coalescing non-null
    /// patch fields into any existing row. Returns the current row.
    async fn upsert_deal(
        &self,
        tenant_id: TenantId,
        calendar_id: &str,
        event_id: &str,
        patch: DealPatch,
    ) -> Result<Deal>;

    /// Fetches a deal by internal id.
    async fn deal_by_id(&self, tenant_id: TenantId, deal_id: DealId) -> Result<Option<Deal>>;

    /// Fetches a deal by its task-manager record.
    async fn deal_by_task_gid(&self, tenant_id: TenantId, task_gid: &str)
        -> Result<Option<Deal>>;

    /// Records the task-manager record backing a deal.
    async fn set_deal_task_record(
        &self,
        tenant_id: TenantId,
        deal_id: DealId,
        task_gid: &str,
    ) -> Result<()>;

    /// Records the document workspace for a deal.
    async fn set_deal_docs(
        &self,
        tenant_id: TenantId,
        deal_id: DealId,
        doc_root_id: &str,
        doc_urls: &std::collections::BTreeMap<String, String>,
    ) -> Result<()>;

    /// Writes the deal's current stage.
    async fn set_deal_stage(
        &self,
        tenant_id: TenantId,
        deal_id: DealId,
        stage: StageKey,
    ) -> Result<()>;

    // ------------------------------------------------------------------
    // Task states and pipeline sections
    // ------------------------------------------------------------------

    /// Records an observation of a task's section placement and returns the
    /// *previous* `last_seen_section_gid` (None on first observation).
    ///
    /// The read-and-write is a single atomic statement.
    async fn record_task_observation(
        &self,
        tenant_id: TenantId,
        task_gid: &str,
        project_gid: &str,
        section_gid: &str,
        modified_at: DateTime<Utc>,
    ) -> Result<Option<String>>;

    /// Records the stage that last fired a stage action for a task.
    async fn set_last_triggered_stage(
        &self,
        tenant_id: TenantId,
        task_gid: &str,
        project_gid: &str,
        stage: StageKey,
    ) -> Result<()>;

    /// Resolves a section gid to a stage key. Disabled rows do not resolve.
    async fn resolve_section(
        &self,
        tenant_id: TenantId,
        section_gid: &str,
    ) -> Result<Option<StageKey>>;

    /// Returns the enabled section gid mapped to a stage, if any.
    async fn section_for_stage(
        &self,
        tenant_id: TenantId,
        stage: StageKey,
    ) -> Result<Option<String>>;

    /// Inserts or updates a section mapping.
    async fn upsert_section(
        &self,
        tenant_id: TenantId,
        section_gid: &str,
        stage: StageKey,
        enabled: bool,
    ) -> Result<()>;

    // ------------------------------------------------------------------
    // Idempotency keys
    // ------------------------------------------------------------------

    /// Attempts to claim an idempotency key. Returns true when this call
    /// claimed it; false when it was already present.
    async fn claim_idempotency_key(&self, tenant_id: TenantId, key: &str) -> Result<bool>;

    /// Deletes idempotency keys created before `cutoff`. Returns the number
    /// of rows removed.
    async fn delete_idempotency_keys_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    // ------------------------------------------------------------------
    // Workflow runs
    // ------------------------------------------------------------------

    /// Opens a new workflow run in state `running`.
    async fn insert_run(&self, run: &WorkflowRun) -> Result<()>;

    /// Fetches a run by id.
    async fn run(&self, tenant_id: TenantId, run_id: WorkflowRunId)
        -> Result<Option<WorkflowRun>>;

    /// Returns the current cancel flag for a run. Missing runs read as
    /// cancelled so orphaned pollers stop.
    async fn cancel_requested(&self, tenant_id: TenantId, run_id: WorkflowRunId) -> Result<bool>;

    /// Sets `cancel_requested` on every running run for a deal. Returns the
    /// number of runs flagged.
    async fn request_cancel_running(&self, tenant_id: TenantId, deal_id: DealId) -> Result<u64>;

    /// Transitions a run from `running` to a terminal status, setting
    /// `finished_at` and merging `meta` when provided.
    ///
    /// Returns true when this call performed the transition; false when the
    /// run was already terminal (the write is dropped).
    async fn close_run(
        &self,
        tenant_id: TenantId,
        run_id: WorkflowRunId,
        status: crate::model::RunStatus,
        meta: Option<serde_json::Value>,
    ) -> Result<bool>;
}
