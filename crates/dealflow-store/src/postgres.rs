//! Postgres-backed store implementation.
//!
//! One `PgPool` per process; connections are checked out per statement or
//! per transaction, never held across a provider call. Every invariant the
//! orchestrator relies on is expressed in SQL:
//!
//! - idempotency claims: `INSERT ... ON CONFLICT DO NOTHING`
//! - one active channel per calendar: partial unique index
//! - prior-value task observation: single upsert with a RETURNING subselect
//! - write-once terminal runs: guarded `UPDATE ... WHERE status = 'running'`

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use dealflow_core::{DealId, StageKey, TenantId, WorkflowRunId};

use crate::error::{Error, Result};
use crate::model::{
    ChannelStatus, Deal, DealPatch, Integration, IntegrationKind, PushChannel, RunStatus,
    WorkflowRun,
};
use crate::store::DealStore;

/// Configuration for the Postgres connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Database host.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Database name.
    pub database: String,
    /// Database user.
    pub user: String,
    /// Database password.
    pub password: String,
    /// Maximum pool size.
    pub max_connections: u32,
    /// Connection acquire timeout.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "dealflow".to_string(),
            user: "dealflow".to_string(),
            password: String::new(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    fn connect_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }
}

/// Postgres [`DealStore`] implementation.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connects a new pool and runs pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot connect or migrations fail.
    pub async fn connect(config: &PoolConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.connect_url())
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| Error::database(format!("migration failed: {e}")))?;

        Ok(Self { pool })
    }

    /// Wraps an existing pool (tests, shared pools).
    #[must_use]
    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn channel_from_row(row: &PgRow) -> Result<PushChannel> {
    let status: String = row.try_get("status")?;
    Ok(PushChannel {
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        calendar_id: row.try_get("calendar_id")?,
        channel_id: row.try_get("channel_id")?,
        resource_id: row.try_get("resource_id")?,
        channel_token: row.try_get("channel_token")?,
        sync_token: row.try_get("sync_token")?,
        expiration_ms: row.try_get("expiration_ms")?,
        status: ChannelStatus::from_str(&status)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn deal_from_row(row: &PgRow) -> Result<Deal> {
    let id: String = row.try_get("id")?;
    let stage: Option<String> = row.try_get("current_stage")?;
    let doc_urls: serde_json::Value = row.try_get("doc_urls")?;
    let doc_urls: BTreeMap<String, String> = serde_json::from_value(doc_urls)
        .map_err(|e| Error::decode(format!("deal doc_urls is not a string map: {e}")))?;

    Ok(Deal {
        id: DealId::from_str(&id).map_err(|e| Error::decode(e.to_string()))?,
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        calendar_id: row.try_get("calendar_id")?,
        event_id: row.try_get("event_id")?,
        company: row.try_get("company")?,
        founder: row.try_get("founder")?,
        event_title: row.try_get("event_title")?,
        event_start: row.try_get("event_start")?,
        task_record_gid: row.try_get("task_record_gid")?,
        doc_root_id: row.try_get("doc_root_id")?,
        doc_urls,
        current_stage: stage
            .map(|s| StageKey::from_str(&s).map_err(|e| Error::decode(e.to_string())))
            .transpose()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn run_from_row(row: &PgRow) -> Result<WorkflowRun> {
    let id: String = row.try_get("id")?;
    let deal_id: String = row.try_get("deal_id")?;
    let stage: String = row.try_get("stage_key")?;
    let status: String = row.try_get("status")?;

    Ok(WorkflowRun {
        id: WorkflowRunId::from_str(&id).map_err(|e| Error::decode(e.to_string()))?,
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        deal_id: DealId::from_str(&deal_id).map_err(|e| Error::decode(e.to_string()))?,
        stage_key: StageKey::from_str(&stage).map_err(|e| Error::decode(e.to_string()))?,
        status: RunStatus::from_str(&status)?,
        cancel_requested: row.try_get("cancel_requested")?,
        meta: row.try_get("meta")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
    })
}

#[async_trait]
impl DealStore for PostgresStore {
    async fn ensure_tenant(&self, tenant_id: TenantId, name: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO tenants (id, name) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING",
        )
        .bind(tenant_id.as_uuid())
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_integration(
        &self,
        tenant_id: TenantId,
        kind: IntegrationKind,
        config: serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO integrations (tenant_id, kind, config, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (tenant_id, kind)
            DO UPDATE SET config = EXCLUDED.config, updated_at = now()
            ",
        )
        .bind(tenant_id.as_uuid())
        .bind(kind.as_str())
        .bind(config)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn integration(
        &self,
        tenant_id: TenantId,
        kind: IntegrationKind,
    ) -> Result<Option<Integration>> {
        let row = sqlx::query(
            "SELECT config, updated_at FROM integrations WHERE tenant_id = $1 AND kind = $2",
        )
        .bind(tenant_id.as_uuid())
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(|row| -> Result<Integration> {
                Ok(Integration {
                    tenant_id,
                    kind,
                    config: row.try_get("config")?,
                    updated_at: row.try_get("updated_at")?,
                })
            })
            .transpose()?)
    }

    async fn insert_channel(&self, channel: &PushChannel) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO push_channels
                (tenant_id, calendar_id, channel_id, resource_id, channel_token,
                 sync_token, expiration_ms, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(channel.tenant_id.as_uuid())
        .bind(&channel.calendar_id)
        .bind(&channel.channel_id)
        .bind(&channel.resource_id)
        .bind(&channel.channel_token)
        .bind(&channel.sync_token)
        .bind(channel.expiration_ms)
        .bind(channel.status.as_str())
        .bind(channel.created_at)
        .bind(channel.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn channel_by_id(
        &self,
        tenant_id: TenantId,
        channel_id: &str,
    ) -> Result<Option<PushChannel>> {
        let row = sqlx::query(
            "SELECT * FROM push_channels WHERE tenant_id = $1 AND channel_id = $2",
        )
        .bind(tenant_id.as_uuid())
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(channel_from_row).transpose()
    }

    async fn active_channel(
        &self,
        tenant_id: TenantId,
        calendar_id: &str,
    ) -> Result<Option<PushChannel>> {
        let row = sqlx::query(
            r"
            SELECT * FROM push_channels
            WHERE tenant_id = $1 AND calendar_id = $2 AND status = 'active'
            ",
        )
        .bind(tenant_id.as_uuid())
        .bind(calendar_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(channel_from_row).transpose()
    }

    async fn replace_active_channel(
        &self,
        tenant_id: TenantId,
        calendar_id: &str,
        new_channel: &PushChannel,
    ) -> Result<PushChannel> {
        let mut tx = self.pool.begin().await?;

        // Retire first so the partial unique index accepts the new row.
        let old_row = sqlx::query(
            r"
            UPDATE push_channels
            SET status = 'replaced', updated_at = now()
            WHERE tenant_id = $1 AND calendar_id = $2 AND status = 'active'
            RETURNING *
            ",
        )
        .bind(tenant_id.as_uuid())
        .bind(calendar_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::not_found("active push_channel", calendar_id))?;

        let retired = channel_from_row(&old_row)?;

        sqlx::query(
            r"
            INSERT INTO push_channels
                (tenant_id, calendar_id, channel_id, resource_id, channel_token,
                 sync_token, expiration_ms, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(new_channel.tenant_id.as_uuid())
        .bind(&new_channel.calendar_id)
        .bind(&new_channel.channel_id)
        .bind(&new_channel.resource_id)
        .bind(&new_channel.channel_token)
        .bind(&new_channel.sync_token)
        .bind(new_channel.expiration_ms)
        .bind(new_channel.status.as_str())
        .bind(new_channel.created_at)
        .bind(new_channel.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(retired)
    }

    async fn set_channel_status(
        &self,
        tenant_id: TenantId,
        channel_id: &str,
        status: ChannelStatus,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE push_channels SET status = $3, updated_at = now()
            WHERE tenant_id = $1 AND channel_id = $2
            ",
        )
        .bind(tenant_id.as_uuid())
        .bind(channel_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_active_sync_token(
        &self,
        tenant_id: TenantId,
        calendar_id: &str,
        sync_token: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE push_channels SET sync_token = $3, updated_at = now()
            WHERE tenant_id = $1 AND calendar_id = $2 AND status = 'active'
            ",
        )
        .bind(tenant_id.as_uuid())
        .bind(calendar_id)
        .bind(sync_token)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_retired_channels_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r"
            DELETE FROM push_channels
            WHERE status IN ('replaced', 'stopped') AND updated_at < $1
            ",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn upsert_deal(
        &self,
        tenant_id: TenantId,
        calendar_id: &str,
        event_id: &str,
        patch: DealPatch,
    ) -> Result<Deal> {
        let row = sqlx::query(
            r"
            INSERT INTO deals
                (id, tenant_id, calendar_id, event_id, company, founder,
                 event_title, event_start, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now(), now())
            ON CONFLICT (tenant_id, calendar_id, event_id) DO UPDATE
            SET company     = COALESCE(EXCLUDED.company, deals.company),
                founder     = COALESCE(EXCLUDED.founder, deals.founder),
                event_title = COALESCE(EXCLUDED.event_title, deals.event_title),
                event_start = COALESCE(EXCLUDED.event_start, deals.event_start),
                updated_at  = now()
            RETURNING *
            ",
        )
        .bind(DealId::generate().to_string())
        .bind(tenant_id.as_uuid())
        .bind(calendar_id)
        .bind(event_id)
        .bind(patch.company)
        .bind(patch.founder)
        .bind(patch.event_title)
        .bind(patch.event_start)
        .fetch_one(&self.pool)
        .await?;

        deal_from_row(&row)
    }

    async fn deal_by_id(&self, tenant_id: TenantId, deal_id: DealId) -> Result<Option<Deal>> {
        let row = sqlx::query("SELECT * FROM deals WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id.as_uuid())
            .bind(deal_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(deal_from_row).transpose()
    }

    async fn deal_by_task_gid(
        &self,
        tenant_id: TenantId,
        task_gid: &str,
    ) -> Result<Option<Deal>> {
        let row =
            sqlx::query("SELECT * FROM deals WHERE tenant_id = $1 AND task_record_gid = $2")
                .bind(tenant_id.as_uuid())
                .bind(task_gid)
                .fetch_optional(&self.pool)
                .await?;

        row.as_ref().map(deal_from_row).transpose()
    }

    async fn set_deal_task_record(
        &self,
        tenant_id: TenantId,
        deal_id: DealId,
        task_gid: &str,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE deals SET task_record_gid = $3, updated_at = now()
            WHERE tenant_id = $1 AND id = $2
            ",
        )
        .bind(tenant_id.as_uuid())
        .bind(deal_id.to_string())
        .bind(task_gid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_deal_docs(
        &self,
        tenant_id: TenantId,
        deal_id: DealId,
        doc_root_id: &str,
        doc_urls: &BTreeMap<String, String>,
    ) -> Result<()> {
        let doc_urls = serde_json::to_value(doc_urls)
            .map_err(|e| Error::decode(format!("doc_urls serialization failed: {e}")))?;

        sqlx::query(
            r"
            UPDATE deals SET doc_root_id = $3, doc_urls = $4, updated_at = now()
            WHERE tenant_id = $1 AND id = $2
            ",
        )
        .bind(tenant_id.as_uuid())
        .bind(deal_id.to_string())
        .bind(doc_root_id)
        .bind(doc_urls)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_deal_stage(
        &self,
        tenant_id: TenantId,
        deal_id: DealId,
        stage: StageKey,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE deals SET current_stage = $3, updated_at = now()
            WHERE tenant_id = $1 AND id = $2
            ",
        )
        .bind(tenant_id.as_uuid())
        .bind(deal_id.to_string())
        .bind(stage.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_task_observation(
        &self,
        tenant_id: TenantId,
        task_gid: &str,
        project_gid: &str,
        section_gid: &str,
        modified_at: DateTime<Utc>,
    ) -> Result<Option<String>> {
        // The RETURNING subselect evaluates against the statement snapshot,
        // so it observes the pre-update row: NULL on first insert, the prior
        // section on conflict. One round-trip, no lost updates.
        let previous: Option<String> = sqlx::query_scalar(
            r"
            INSERT INTO task_states
                (tenant_id, task_gid, project_gid, last_seen_section_gid,
                 last_processed_modified_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, now())
            ON CONFLICT (tenant_id, task_gid, project_gid) DO UPDATE
            SET last_seen_section_gid      = EXCLUDED.last_seen_section_gid,
                last_processed_modified_at = EXCLUDED.last_processed_modified_at,
                updated_at                 = now()
            RETURNING (
                SELECT ts.last_seen_section_gid FROM task_states ts
                WHERE ts.tenant_id = $1 AND ts.task_gid = $2 AND ts.project_gid = $3
            )
            ",
        )
        .bind(tenant_id.as_uuid())
        .bind(task_gid)
        .bind(project_gid)
        .bind(section_gid)
        .bind(modified_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(previous)
    }

    async fn set_last_triggered_stage(
        &self,
        tenant_id: TenantId,
        task_gid: &str,
        project_gid: &str,
        stage: StageKey,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE task_states SET last_triggered_stage = $4, updated_at = now()
            WHERE tenant_id = $1 AND task_gid = $2 AND project_gid = $3
            ",
        )
        .bind(tenant_id.as_uuid())
        .bind(task_gid)
        .bind(project_gid)
        .bind(stage.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn resolve_section(
        &self,
        tenant_id: TenantId,
        section_gid: &str,
    ) -> Result<Option<StageKey>> {
        let stage: Option<String> = sqlx::query_scalar(
            r"
            SELECT stage_key FROM pipeline_sections
            WHERE tenant_id = $1 AND section_gid = $2 AND enabled
            ",
        )
        .bind(tenant_id.as_uuid())
        .bind(section_gid)
        .fetch_optional(&self.pool)
        .await?;

        stage
            .map(|s| StageKey::from_str(&s).map_err(|e| Error::decode(e.to_string())))
            .transpose()
    }

    async fn section_for_stage(
        &self,
        tenant_id: TenantId,
        stage: StageKey,
    ) -> Result<Option<String>> {
        let section: Option<String> = sqlx::query_scalar(
            r"
            SELECT section_gid FROM pipeline_sections
            WHERE tenant_id = $1 AND stage_key = $2 AND enabled
            LIMIT 1
            ",
        )
        .bind(tenant_id.as_uuid())
        .bind(stage.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(section)
    }

    async fn upsert_section(
        &self,
        tenant_id: TenantId,
        section_gid: &str,
        stage: StageKey,
        enabled: bool,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO pipeline_sections (tenant_id, section_gid, stage_key, enabled)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id, section_gid)
            DO UPDATE SET stage_key = EXCLUDED.stage_key, enabled = EXCLUDED.enabled
            ",
        )
        .bind(tenant_id.as_uuid())
        .bind(section_gid)
        .bind(stage.as_str())
        .bind(enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim_idempotency_key(&self, tenant_id: TenantId, key: &str) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO idempotency_keys (key, tenant_id, created_at)
            VALUES ($1, $2, now())
            ON CONFLICT (key) DO NOTHING
            ",
        )
        .bind(key)
        .bind(tenant_id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_idempotency_keys_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_run(&self, run: &WorkflowRun) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO workflow_runs
                (id, tenant_id, deal_id, stage_key, status, cancel_requested,
                 meta, started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(run.id.to_string())
        .bind(run.tenant_id.as_uuid())
        .bind(run.deal_id.to_string())
        .bind(run.stage_key.as_str())
        .bind(run.status.as_str())
        .bind(run.cancel_requested)
        .bind(&run.meta)
        .bind(run.started_at)
        .bind(run.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn run(
        &self,
        tenant_id: TenantId,
        run_id: WorkflowRunId,
    ) -> Result<Option<WorkflowRun>> {
        let row = sqlx::query("SELECT * FROM workflow_runs WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id.as_uuid())
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(run_from_row).transpose()
    }

    async fn cancel_requested(&self, tenant_id: TenantId, run_id: WorkflowRunId) -> Result<bool> {
        let flag: Option<bool> = sqlx::query_scalar(
            "SELECT cancel_requested FROM workflow_runs WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id.as_uuid())
        .bind(run_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        // Missing runs read as cancelled so orphaned pollers stop.
        Ok(flag.unwrap_or(true))
    }

    async fn request_cancel_running(
        &self,
        tenant_id: TenantId,
        deal_id: DealId,
    ) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE workflow_runs SET cancel_requested = TRUE
            WHERE tenant_id = $1 AND deal_id = $2
              AND status = 'running' AND NOT cancel_requested
            ",
        )
        .bind(tenant_id.as_uuid())
        .bind(deal_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn close_run(
        &self,
        tenant_id: TenantId,
        run_id: WorkflowRunId,
        status: RunStatus,
        meta: Option<serde_json::Value>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE workflow_runs
            SET status = $3, meta = COALESCE($4, meta), finished_at = now()
            WHERE tenant_id = $1 AND id = $2 AND status = 'running'
            ",
        )
        .bind(tenant_id.as_uuid())
        .bind(run_id.to_string())
        .bind(status.as_str())
        .bind(meta)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
