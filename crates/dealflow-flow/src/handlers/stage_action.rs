//! STAGE_ACTION handler: the stage state machine.
//!
//! One claim of `stage:{task}:{section}:{modified_at}` guards the whole
//! handler; redeliveries for the same observation are no-ops. Work after
//! the claim follows the partial-failure policy: subtask and document
//! side effects log and continue, queue enqueues are the primary dispatch
//! and propagate.

use chrono::Utc;

use dealflow_core::{StageKey, TenantId, WorkflowRunId};
use dealflow_providers::Block;
use dealflow_store::{Deal, RunStatus, WorkflowRun};

use super::deal_setup::DOC_KEY_ROOT;
use super::deal_setup::{PAGE_MEETING_NOTES, PAGE_RESEARCH};
use super::JobRouter;
use crate::dispatch::EnqueueOptions;
use crate::envelope::{
    stage_action_key, JobEnvelope, JobType, MemoGeneratePayload, ResearchBatchPayload,
    StageActionPayload,
};
use crate::error::Result;
use crate::metrics;

/// Prep subtasks created at FIRST_MEETING.
pub const FIRST_MEETING_SUBTASKS: [&str; 4] = [
    "Prep: founder background",
    "Prep: market landscape",
    "Prep: product demo questions",
    "Prep: round and terms",
];

/// Human diligence subtasks created at IN_DILIGENCE.
pub const IN_DILIGENCE_SUBTASKS: [&str; 5] = [
    "Customer reference calls",
    "Financial model review",
    "Legal and cap table review",
    "Technical deep dive",
    "Team references",
];

/// Checklist subtasks created at IC_REVIEW.
pub const IC_REVIEW_SUBTASKS: [&str; 5] = [
    "Circulate memo to IC",
    "Schedule IC meeting",
    "Confirm valuation and terms",
    "Draft term sheet",
    "Partner vote",
];

impl JobRouter {
    /// Handles one STAGE_ACTION job.
    pub(crate) async fn handle_stage_action(
        &self,
        tenant_id: TenantId,
        envelope: &JobEnvelope,
    ) -> Result<()> {
        let payload: StageActionPayload = envelope.payload_as()?;

        let key = stage_action_key(&payload.task_gid, &payload.section_gid, payload.modified_at);
        if !self.store.claim_idempotency_key(tenant_id, &key).await? {
            tracing::info!(key = %key, "stage action already processed");
            return Ok(());
        }

        let Some(deal) = self
            .store
            .deal_by_task_gid(tenant_id, &payload.task_gid)
            .await?
        else {
            tracing::info!(task_gid = %payload.task_gid, "no deal for task, dropping");
            return Ok(());
        };

        self.store
            .set_deal_stage(tenant_id, deal.id, payload.stage_key)
            .await?;
        self.write_stage_status(&deal, payload.stage_key).await;

        // Leaving diligence or entering a terminal stage kills running work.
        if payload.previous_stage == Some(StageKey::InDiligence)
            || payload.stage_key.is_terminal()
        {
            let flagged = self.store.request_cancel_running(tenant_id, deal.id).await?;
            if flagged > 0 {
                tracing::info!(deal_id = %deal.id, flagged, "cancellation requested");
            }
        }

        let run = WorkflowRun {
            id: WorkflowRunId::generate(),
            tenant_id,
            deal_id: deal.id,
            stage_key: payload.stage_key,
            status: RunStatus::Running,
            cancel_requested: false,
            meta: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        self.store.insert_run(&run).await?;

        // Runs for stages that fan out async work stay open; the batch or
        // memo handler closes them so cancellation has something to target.
        let stays_open = matches!(
            payload.stage_key,
            StageKey::InDiligence | StageKey::IcReview
        );

        match self.run_stage_work(tenant_id, &deal, &payload, run.id).await {
            Ok(()) => {
                if !stays_open {
                    self.store
                        .close_run(tenant_id, run.id, RunStatus::Succeeded, None)
                        .await?;
                    metrics::record_run_closed("succeeded");
                }
                Ok(())
            }
            Err(error) => {
                let meta = serde_json::json!({ "error": error.to_string() });
                self.store
                    .close_run(tenant_id, run.id, RunStatus::Failed, Some(meta))
                    .await?;
                metrics::record_run_closed("failed");
                Err(error)
            }
        }
    }

    /// Writes the stage banner onto the deal's document root, best-effort.
    async fn write_stage_status(&self, deal: &Deal, stage: StageKey) {
        let Some(root_id) = deal.doc_root_id.as_deref() else {
            return;
        };
        let note = format!(
            "Stage: {} — {}",
            stage.title(),
            Utc::now().format("%Y-%m-%d")
        );
        if let Err(error) = self
            .docs
            .append_blocks(root_id, &[Block::paragraph(note)])
            .await
        {
            tracing::warn!(deal_id = %deal.id, %error, "stage status write failed");
        }
    }

    async fn run_stage_work(
        &self,
        tenant_id: TenantId,
        deal: &Deal,
        payload: &StageActionPayload,
        run_id: WorkflowRunId,
    ) -> Result<()> {
        match payload.stage_key {
            StageKey::FirstMeeting => {
                self.create_subtasks(&payload.task_gid, &FIRST_MEETING_SUBTASKS)
                    .await;

                if let Some(root_url) = deal.doc_urls.get(DOC_KEY_ROOT) {
                    let notes =
                        format!("Deal workspace: {root_url}\n\nPrep checklist attached as subtasks.");
                    if let Err(error) =
                        self.tasks.update_task_notes(&payload.task_gid, &notes).await
                    {
                        tracing::warn!(task_gid = %payload.task_gid, %error, "notes update failed");
                    }
                }
                Ok(())
            }

            StageKey::InDiligence => {
                let context = self.read_meeting_notes(deal).await;
                self.clear_research_placeholders(deal).await;

                let company = deal
                    .company
                    .clone()
                    .unwrap_or_else(|| deal.display_name());
                let batch = JobEnvelope::new(
                    JobType::ResearchBatch,
                    tenant_id,
                    &ResearchBatchPayload {
                        run_id,
                        deal_id: deal.id,
                        company,
                        founder: deal.founder.clone(),
                        context,
                    },
                )?;
                self.queue.enqueue(batch, EnqueueOptions::default()).await?;
                metrics::record_job_enqueued(JobType::ResearchBatch.as_str());

                self.create_subtasks(&payload.task_gid, &IN_DILIGENCE_SUBTASKS)
                    .await;
                Ok(())
            }

            StageKey::IcReview => {
                let company = deal
                    .company
                    .clone()
                    .unwrap_or_else(|| deal.display_name());
                let memo = JobEnvelope::new(
                    JobType::MemoGenerate,
                    tenant_id,
                    &MemoGeneratePayload {
                        run_id,
                        deal_id: deal.id,
                        company,
                        founder: deal.founder.clone(),
                    },
                )?;
                self.queue.enqueue(memo, EnqueueOptions::default()).await?;
                metrics::record_job_enqueued(JobType::MemoGenerate.as_str());

                self.create_subtasks(&payload.task_gid, &IC_REVIEW_SUBTASKS)
                    .await;
                Ok(())
            }

            StageKey::Pass | StageKey::Archive => {
                // Re-issue in case a batch started between the first
                // broadcast and now.
                self.store.request_cancel_running(tenant_id, deal.id).await?;

                if let Some(root_id) = deal.doc_root_id.as_deref() {
                    let note = format!(
                        "Deal marked {} on {}.",
                        payload.stage_key.title(),
                        Utc::now().format("%Y-%m-%d")
                    );
                    if let Err(error) = self
                        .docs
                        .append_blocks(root_id, &[Block::paragraph(note)])
                        .await
                    {
                        tracing::warn!(deal_id = %deal.id, %error, "terminal note failed");
                    }
                }

                if let Err(error) = self.tasks.complete_task(&payload.task_gid).await {
                    tracing::warn!(task_gid = %payload.task_gid, %error, "task completion failed");
                }
                Ok(())
            }
        }
    }

    /// Creates a fixed set of subtasks, logging and continuing on failure.
    async fn create_subtasks(&self, parent_gid: &str, names: &[&str]) {
        for name in names {
            if let Err(error) = self.tasks.create_subtask(parent_gid, name, None).await {
                tracing::warn!(parent_gid = parent_gid, subtask = name, %error, "subtask failed");
            }
        }
    }

    /// Reads the meeting-notes page text, best-effort.
    async fn read_meeting_notes(&self, deal: &Deal) -> Option<String> {
        let root_id = deal.doc_root_id.as_deref()?;
        let page = match self.docs.find_child_page(root_id, PAGE_MEETING_NOTES).await {
            Ok(Some(page)) => page,
            Ok(None) => return None,
            Err(error) => {
                tracing::warn!(deal_id = %deal.id, %error, "meeting notes lookup failed");
                return None;
            }
        };
        match self.docs.read_page_text(&page.id).await {
            Ok(text) if !text.trim().is_empty() => Some(text),
            Ok(_) => None,
            Err(error) => {
                tracing::warn!(deal_id = %deal.id, %error, "meeting notes read failed");
                None
            }
        }
    }

    /// Clears placeholder content on the research page, best-effort.
    async fn clear_research_placeholders(&self, deal: &Deal) {
        let Some(root_id) = deal.doc_root_id.as_deref() else {
            return;
        };
        match self.docs.find_child_page(root_id, PAGE_RESEARCH).await {
            Ok(Some(page)) => {
                if let Err(error) = self.docs.clear_page(&page.id).await {
                    tracing::warn!(deal_id = %deal.id, %error, "research clear failed");
                }
            }
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(deal_id = %deal.id, %error, "research page lookup failed");
            }
        }
    }
}
