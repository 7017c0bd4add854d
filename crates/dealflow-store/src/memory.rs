//! In-memory store implementation for tests.
//!
//! Mirrors the Postgres implementation's invariant behavior exactly:
//! single-claim idempotency keys, atomic prior-value task observations,
//! write-once terminal run transitions, and the one-active-channel rule.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No persistence, no distribution
//! - **Single-process only**: State is not visible across process boundaries

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use dealflow_core::{DealId, StageKey, TenantId, WorkflowRunId};

use crate::error::{Error, Result};
use crate::model::{
    ChannelStatus, Deal, DealPatch, Integration, IntegrationKind, PipelineSection, PushChannel,
    RunStatus, TaskState, WorkflowRun,
};
use crate::store::DealStore;

#[derive(Debug, Default)]
struct Inner {
    tenants: HashMap<TenantId, String>,
    integrations: HashMap<(TenantId, IntegrationKind), Integration>,
    channels: Vec<PushChannel>,
    deals: Vec<Deal>,
    task_states: Vec<TaskState>,
    sections: Vec<PipelineSection>,
    idempotency_keys: HashMap<String, (TenantId, DateTime<Utc>)>,
    runs: Vec<WorkflowRun>,
}

/// In-memory [`DealStore`] for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

/// Converts a lock poison error to a database error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::database("memory store lock poisoned")
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all deals, for test assertions.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn deals(&self) -> Result<Vec<Deal>> {
        let inner = self.inner.read().map_err(poison_err)?;
        Ok(inner.deals.clone())
    }

    /// Returns all channels, for test assertions.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn channels(&self) -> Result<Vec<PushChannel>> {
        let inner = self.inner.read().map_err(poison_err)?;
        Ok(inner.channels.clone())
    }

    /// Returns all workflow runs, for test assertions.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn runs(&self) -> Result<Vec<WorkflowRun>> {
        let inner = self.inner.read().map_err(poison_err)?;
        Ok(inner.runs.clone())
    }
}

#[async_trait]
impl DealStore for MemoryStore {
    async fn ensure_tenant(&self, tenant_id: TenantId, name: &str) -> Result<()> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        inner.tenants.entry(tenant_id).or_insert_with(|| name.to_string());
        Ok(())
    }

    async fn upsert_integration(
        &self,
        tenant_id: TenantId,
        kind: IntegrationKind,
        config: serde_json::Value,
    ) -> Result<()> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        inner.integrations.insert(
            (tenant_id, kind),
            Integration {
                tenant_id,
                kind,
                config,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn integration(
        &self,
        tenant_id: TenantId,
        kind: IntegrationKind,
    ) -> Result<Option<Integration>> {
        let inner = self.inner.read().map_err(poison_err)?;
        Ok(inner.integrations.get(&(tenant_id, kind)).cloned())
    }

    async fn insert_channel(&self, channel: &PushChannel) -> Result<()> {
        let mut inner = self.inner.write().map_err(poison_err)?;

        if channel.status == ChannelStatus::Active
            && inner.channels.iter().any(|c| {
                c.tenant_id == channel.tenant_id
                    && c.calendar_id == channel.calendar_id
                    && c.status == ChannelStatus::Active
            })
        {
            return Err(Error::conflict(format!(
                "active channel already exists for calendar {}",
                channel.calendar_id
            )));
        }

        inner.channels.push(channel.clone());
        Ok(())
    }

    async fn channel_by_id(
        &self,
        tenant_id: TenantId,
        channel_id: &str,
    ) -> Result<Option<PushChannel>> {
        let inner = self.inner.read().map_err(poison_err)?;
        Ok(inner
            .channels
            .iter()
            .find(|c| c.tenant_id == tenant_id && c.channel_id == channel_id)
            .cloned())
    }

    async fn active_channel(
        &self,
        tenant_id: TenantId,
        calendar_id: &str,
    ) -> Result<Option<PushChannel>> {
        let inner = self.inner.read().map_err(poison_err)?;
        Ok(inner
            .channels
            .iter()
            .find(|c| {
                c.tenant_id == tenant_id
                    && c.calendar_id == calendar_id
                    && c.status == ChannelStatus::Active
            })
            .cloned())
    }

    async fn replace_active_channel(
        &self,
        tenant_id: TenantId,
        calendar_id: &str,
        new_channel: &PushChannel,
    ) -> Result<PushChannel> {
        let mut inner = self.inner.write().map_err(poison_err)?;

        let old = inner
            .channels
            .iter_mut()
            .find(|c| {
                c.tenant_id == tenant_id
                    && c.calendar_id == calendar_id
                    && c.status == ChannelStatus::Active
            })
            .ok_or_else(|| Error::not_found("active push_channel", calendar_id))?;

        old.status = ChannelStatus::Replaced;
        old.updated_at = Utc::now();
        let retired = old.clone();

        inner.channels.push(new_channel.clone());
        Ok(retired)
    }

    async fn set_channel_status(
        &self,
        tenant_id: TenantId,
        channel_id: &str,
        status: ChannelStatus,
    ) -> Result<()> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        if let Some(channel) = inner
            .channels
            .iter_mut()
            .find(|c| c.tenant_id == tenant_id && c.channel_id == channel_id)
        {
            channel.status = status;
            channel.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_active_sync_token(
        &self,
        tenant_id: TenantId,
        calendar_id: &str,
        sync_token: &str,
    ) -> Result<bool> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        if let Some(channel) = inner.channels.iter_mut().find(|c| {
            c.tenant_id == tenant_id
                && c.calendar_id == calendar_id
                && c.status == ChannelStatus::Active
        }) {
            channel.sync_token = Some(sync_token.to_string());
            channel.updated_at = Utc::now();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn delete_retired_channels_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        let before = inner.channels.len();
        inner
            .channels
            .retain(|c| !(c.status.is_terminal() && c.updated_at < cutoff));
        Ok((before - inner.channels.len()) as u64)
    }

    async fn upsert_deal(
        &self,
        tenant_id: TenantId,
        calendar_id: &str,
        event_id: &str,
        patch: DealPatch,
    ) -> Result<Deal> {
        let mut inner = self.inner.write().map_err(poison_err)?;

        if let Some(deal) = inner.deals.iter_mut().find(|d| {
            d.tenant_id == tenant_id && d.calendar_id == calendar_id && d.event_id == event_id
        }) {
            if patch.company.is_some() {
                deal.company = patch.company;
            }
            if patch.founder.is_some() {
                deal.founder = patch.founder;
            }
            if patch.event_title.is_some() {
                deal.event_title = patch.event_title;
            }
            if patch.event_start.is_some() {
                deal.event_start = patch.event_start;
            }
            deal.updated_at = Utc::now();
            return Ok(deal.clone());
        }

        let now = Utc::now();
        let deal = Deal {
            id: DealId::generate(),
            tenant_id,
            calendar_id: calendar_id.to_string(),
            event_id: event_id.to_string(),
            company: patch.company,
            founder: patch.founder,
            event_title: patch.event_title,
            event_start: patch.event_start,
            task_record_gid: None,
            doc_root_id: None,
            doc_urls: std::collections::BTreeMap::new(),
            current_stage: None,
            created_at: now,
            updated_at: now,
        };
        inner.deals.push(deal.clone());
        Ok(deal)
    }

    async fn deal_by_id(&self, tenant_id: TenantId, deal_id: DealId) -> Result<Option<Deal>> {
        let inner = self.inner.read().map_err(poison_err)?;
        Ok(inner
            .deals
            .iter()
            .find(|d| d.tenant_id == tenant_id && d.id == deal_id)
            .cloned())
    }

    async fn deal_by_task_gid(
        &self,
        tenant_id: TenantId,
        task_gid: &str,
    ) -> Result<Option<Deal>> {
        let inner = self.inner.read().map_err(poison_err)?;
        Ok(inner
            .deals
            .iter()
            .find(|d| d.tenant_id == tenant_id && d.task_record_gid.as_deref() == Some(task_gid))
            .cloned())
    }

    async fn set_deal_task_record(
        &self,
        tenant_id: TenantId,
        deal_id: DealId,
        task_gid: &str,
    ) -> Result<()> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        let deal = inner
            .deals
            .iter_mut()
            .find(|d| d.tenant_id == tenant_id && d.id == deal_id)
            .ok_or_else(|| Error::not_found("deal", deal_id))?;
        deal.task_record_gid = Some(task_gid.to_string());
        deal.updated_at = Utc::now();
        Ok(())
    }

    async fn set_deal_docs(
        &self,
        tenant_id: TenantId,
        deal_id: DealId,
        doc_root_id: &str,
        doc_urls: &std::collections::BTreeMap<String, String>,
    ) -> Result<()> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        let deal = inner
            .deals
            .iter_mut()
            .find(|d| d.tenant_id == tenant_id && d.id == deal_id)
            .ok_or_else(|| Error::not_found("deal", deal_id))?;
        deal.doc_root_id = Some(doc_root_id.to_string());
        deal.doc_urls = doc_urls.clone();
        deal.updated_at = Utc::now();
        Ok(())
    }

    async fn set_deal_stage(
        &self,
        tenant_id: TenantId,
        deal_id: DealId,
        stage: StageKey,
    ) -> Result<()> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        let deal = inner
            .deals
            .iter_mut()
            .find(|d| d.tenant_id == tenant_id && d.id == deal_id)
            .ok_or_else(|| Error::not_found("deal", deal_id))?;
        deal.current_stage = Some(stage);
        deal.updated_at = Utc::now();
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
        let mut inner = self.inner.write().map_err(poison_err)?;

        if let Some(state) = inner.task_states.iter_mut().find(|s| {
            s.tenant_id == tenant_id && s.task_gid == task_gid && s.project_gid == project_gid
        }) {
            let previous = state.last_seen_section_gid.clone();
            state.last_seen_section_gid = Some(section_gid.to_string());
            state.last_processed_modified_at = Some(modified_at);
            state.updated_at = Utc::now();
            return Ok(previous);
        }

        inner.task_states.push(TaskState {
            tenant_id,
            task_gid: task_gid.to_string(),
            project_gid: project_gid.to_string(),
            last_seen_section_gid: Some(section_gid.to_string()),
            last_processed_modified_at: Some(modified_at),
            last_triggered_stage: None,
            updated_at: Utc::now(),
        });
        Ok(None)
    }

    async fn set_last_triggered_stage(
        &self,
        tenant_id: TenantId,
        task_gid: &str,
        project_gid: &str,
        stage: StageKey,
    ) -> Result<()> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        if let Some(state) = inner.task_states.iter_mut().find(|s| {
            s.tenant_id == tenant_id && s.task_gid == task_gid && s.project_gid == project_gid
        }) {
            state.last_triggered_stage = Some(stage);
            state.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn resolve_section(
        &self,
        tenant_id: TenantId,
        section_gid: &str,
    ) -> Result<Option<StageKey>> {
        let inner = self.inner.read().map_err(poison_err)?;
        Ok(inner
            .sections
            .iter()
            .find(|s| s.tenant_id == tenant_id && s.section_gid == section_gid && s.enabled)
            .map(|s| s.stage_key))
    }

    async fn section_for_stage(
        &self,
        tenant_id: TenantId,
        stage: StageKey,
    ) -> Result<Option<String>> {
        let inner = self.inner.read().map_err(poison_err)?;
        Ok(inner
            .sections
            .iter()
            .find(|s| s.tenant_id == tenant_id && s.stage_key == stage && s.enabled)
            .map(|s| s.section_gid.clone()))
    }

    async fn upsert_section(
        &self,
        tenant_id: TenantId,
        section_gid: &str,
        stage: StageKey,
        enabled: bool,
    ) -> Result<()> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        if let Some(section) = inner
            .sections
            .iter_mut()
            .find(|s| s.tenant_id == tenant_id && s.section_gid == section_gid)
        {
            section.stage_key = stage;
            section.enabled = enabled;
        } else {
            inner.sections.push(PipelineSection {
                tenant_id,
                section_gid: section_gid.to_string(),
                stage_key: stage,
                enabled,
            });
        }
        Ok(())
    }

    async fn claim_idempotency_key(&self, tenant_id: TenantId, key: &str) -> Result<bool> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        if inner.idempotency_keys.contains_key(key) {
            return Ok(false);
        }
        inner
            .idempotency_keys
            .insert(key.to_string(), (tenant_id, Utc::now()));
        Ok(true)
    }

    async fn delete_idempotency_keys_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        let before = inner.idempotency_keys.len();
        inner
            .idempotency_keys
            .retain(|_, (_, created_at)| *created_at >= cutoff);
        Ok((before - inner.idempotency_keys.len()) as u64)
    }

    async fn insert_run(&self, run: &WorkflowRun) -> Result<()> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        inner.runs.push(run.clone());
        Ok(())
    }

    async fn run(
        &self,
        tenant_id: TenantId,
        run_id: WorkflowRunId,
    ) -> Result<Option<WorkflowRun>> {
        let inner = self.inner.read().map_err(poison_err)?;
        Ok(inner
            .runs
            .iter()
            .find(|r| r.tenant_id == tenant_id && r.id == run_id)
            .cloned())
    }

    async fn cancel_requested(&self, tenant_id: TenantId, run_id: WorkflowRunId) -> Result<bool> {
        let inner = self.inner.read().map_err(poison_err)?;
        Ok(inner
            .runs
            .iter()
            .find(|r| r.tenant_id == tenant_id && r.id == run_id)
            .map_or(true, |r| r.cancel_requested))
    }

    async fn request_cancel_running(
        &self,
        tenant_id: TenantId,
        deal_id: DealId,
    ) -> Result<u64> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        let mut flagged = 0;
        for run in inner.runs.iter_mut().filter(|r| {
            r.tenant_id == tenant_id && r.deal_id == deal_id && r.status == RunStatus::Running
        }) {
            if !run.cancel_requested {
                run.cancel_requested = true;
                flagged += 1;
            }
        }
        Ok(flagged)
    }

    async fn close_run(
        &self,
        tenant_id: TenantId,
        run_id: WorkflowRunId,
        status: RunStatus,
        meta: Option<serde_json::Value>,
    ) -> Result<bool> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        let Some(run) = inner
            .runs
            .iter_mut()
            .find(|r| r.tenant_id == tenant_id && r.id == run_id)
        else {
            return Ok(false);
        };

        if run.status != RunStatus::Running {
            return Ok(false);
        }

        run.status = status;
        if meta.is_some() {
            run.meta = meta;
        }
        run.finished_at = Some(Utc::now());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(tenant: TenantId, calendar: &str, id: &str, status: ChannelStatus) -> PushChannel {
        PushChannel {
            tenant_id: tenant,
            calendar_id: calendar.to_string(),
            channel_id: id.to_string(),
            resource_id: Some("res-1".into()),
            channel_token: None,
            sync_token: None,
            expiration_ms: None,
            status,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn running_run(tenant: TenantId, deal: DealId) -> WorkflowRun {
        WorkflowRun {
            id: WorkflowRunId::generate(),
            tenant_id: tenant,
            deal_id: deal,
            stage_key: StageKey::InDiligence,
            status: RunStatus::Running,
            cancel_requested: false,
            meta: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    #[tokio::test]
    async fn idempotency_key_claims_once() {
        let store = MemoryStore::new();
        let tenant = TenantId::generate();

        assert!(store
            .claim_idempotency_key(tenant, "calendar_ping:gcal-A:1")
            .await
            .unwrap());
        assert!(!store
            .claim_idempotency_key(tenant, "calendar_ping:gcal-A:1")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn second_active_channel_conflicts() {
        let store = MemoryStore::new();
        let tenant = TenantId::generate();

        store
            .insert_channel(&channel(tenant, "primary", "gcal-A", ChannelStatus::Active))
            .await
            .unwrap();
        let err = store
            .insert_channel(&channel(tenant, "primary", "gcal-B", ChannelStatus::Active))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn replace_retires_old_and_keeps_one_active() {
        let store = MemoryStore::new();
        let tenant = TenantId::generate();

        let mut old = channel(tenant, "primary", "gcal-A", ChannelStatus::Active);
        old.sync_token = Some("T1".into());
        store.insert_channel(&old).await.unwrap();

        let mut new = channel(tenant, "primary", "gcal-B", ChannelStatus::Active);
        new.sync_token = Some("T1".into());
        let retired = store
            .replace_active_channel(tenant, "primary", &new)
            .await
            .unwrap();

        assert_eq!(retired.channel_id, "gcal-A");
        assert_eq!(retired.status, ChannelStatus::Replaced);

        let active = store.active_channel(tenant, "primary").await.unwrap().unwrap();
        assert_eq!(active.channel_id, "gcal-B");
        assert_eq!(active.sync_token.as_deref(), Some("T1"));

        let actives = store
            .channels()
            .unwrap()
            .into_iter()
            .filter(|c| c.status == ChannelStatus::Active)
            .count();
        assert_eq!(actives, 1);
    }

    #[tokio::test]
    async fn task_observation_returns_previous_section() {
        let store = MemoryStore::new();
        let tenant = TenantId::generate();
        let ts = Utc::now();

        let prev = store
            .record_task_observation(tenant, "t-1", "p-1", "sec-a", ts)
            .await
            .unwrap();
        assert_eq!(prev, None);

        let prev = store
            .record_task_observation(tenant, "t-1", "p-1", "sec-a", ts)
            .await
            .unwrap();
        assert_eq!(prev.as_deref(), Some("sec-a"));

        let prev = store
            .record_task_observation(tenant, "t-1", "p-1", "sec-b", ts)
            .await
            .unwrap();
        assert_eq!(prev.as_deref(), Some("sec-a"));
    }

    #[tokio::test]
    async fn close_run_is_write_once() {
        let store = MemoryStore::new();
        let tenant = TenantId::generate();
        let run = running_run(tenant, DealId::generate());
        store.insert_run(&run).await.unwrap();

        assert!(store
            .close_run(tenant, run.id, RunStatus::Succeeded, None)
            .await
            .unwrap());
        assert!(!store
            .close_run(tenant, run.id, RunStatus::Canceled, None)
            .await
            .unwrap());

        let stored = store.run(tenant, run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Succeeded);
        assert!(stored.finished_at.is_some());
    }

    #[tokio::test]
    async fn cancel_flags_only_running_runs() {
        let store = MemoryStore::new();
        let tenant = TenantId::generate();
        let deal = DealId::generate();

        let run1 = running_run(tenant, deal);
        let run2 = running_run(tenant, deal);
        store.insert_run(&run1).await.unwrap();
        store.insert_run(&run2).await.unwrap();
        store
            .close_run(tenant, run2.id, RunStatus::Succeeded, None)
            .await
            .unwrap();

        let flagged = store.request_cancel_running(tenant, deal).await.unwrap();
        assert_eq!(flagged, 1);
        assert!(store.cancel_requested(tenant, run1.id).await.unwrap());
        assert!(!store
            .run(tenant, run2.id)
            .await
            .unwrap()
            .unwrap()
            .cancel_requested);
    }

    #[tokio::test]
    async fn missing_run_reads_as_cancelled() {
        let store = MemoryStore::new();
        let tenant = TenantId::generate();
        assert!(store
            .cancel_requested(tenant, WorkflowRunId::generate())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn deal_upsert_coalesces_fields() {
        let store = MemoryStore::new();
        let tenant = TenantId::generate();

        let first = store
            .upsert_deal(
                tenant,
                "primary",
                "evt-1",
                DealPatch {
                    company: Some("Acme".into()),
                    founder: Some("Jane".into()),
                    ..DealPatch::default()
                },
            )
            .await
            .unwrap();

        let second = store
            .upsert_deal(
                tenant,
                "primary",
                "evt-1",
                DealPatch {
                    company: None,
                    founder: None,
                    event_title: Some("Acme — Jane [deal]".into()),
                    ..DealPatch::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.company.as_deref(), Some("Acme"));
        assert_eq!(second.founder.as_deref(), Some("Jane"));
        assert_eq!(second.event_title.as_deref(), Some("Acme — Jane [deal]"));
        assert_eq!(store.deals().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn housekeeping_removes_old_rows() {
        let store = MemoryStore::new();
        let tenant = TenantId::generate();

        store
            .claim_idempotency_key(tenant, "stage:t-1:sec-a:2025-01-02T03:04:05Z")
            .await
            .unwrap();
        let removed = store
            .delete_idempotency_keys_before(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let mut retired = channel(tenant, "primary", "gcal-A", ChannelStatus::Stopped);
        retired.updated_at = Utc::now() - chrono::Duration::days(2);
        store.insert_channel(&retired).await.unwrap();
        let removed = store
            .delete_retired_channels_before(Utc::now() - chrono::Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn disabled_sections_do_not_resolve() {
        let store = MemoryStore::new();
        let tenant = TenantId::generate();

        store
            .upsert_section(tenant, "sec-dd", StageKey::InDiligence, true)
            .await
            .unwrap();
        store
            .upsert_section(tenant, "sec-old", StageKey::Pass, false)
            .await
            .unwrap();

        assert_eq!(
            store.resolve_section(tenant, "sec-dd").await.unwrap(),
            Some(StageKey::InDiligence)
        );
        assert_eq!(store.resolve_section(tenant, "sec-old").await.unwrap(), None);
        assert_eq!(
            store
                .section_for_stage(tenant, StageKey::InDiligence)
                .await
                .unwrap()
                .as_deref(),
            Some("sec-dd")
        );
    }
}
