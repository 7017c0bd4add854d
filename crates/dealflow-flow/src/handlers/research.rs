//! RESEARCH_BATCH and RESEARCH_AGENT handlers: the cancellable fan-out.
//!
//! Six agents run concurrently against the LLM provider under one shared
//! cancellation token; a 5-second poller watches the run's persisted
//! cancel flag. One agent's failure never cancels its peers, and the
//! research page receives sections strictly in the fixed agent order no
//! matter which agent finished first.
//!
//! A late cancel after an agent returned but before the page write may
//! still produce output; the guarantee is that no new LLM round-trip
//! starts after cancel is observed and in-flight calls abort promptly.

use dealflow_core::TenantId;
use dealflow_providers::{Block, Completion, PageRef};
use dealflow_store::{Deal, RunStatus};

use super::deal_setup::PAGE_RESEARCH;
use super::JobRouter;
use crate::agents::AgentKey;
use crate::cancel::CancelWatcher;
use crate::envelope::{JobEnvelope, ResearchAgentPayload, ResearchBatchPayload};
use crate::error::{Error, Result};
use crate::metrics;

/// One agent's outcome inside a batch.
struct AgentOutcome {
    key: AgentKey,
    result: std::result::Result<Completion, dealflow_providers::Error>,
}

/// Renders one successful agent section: heading, body, sources, divider.
fn agent_section(key: AgentKey, completion: &Completion) -> Vec<Block> {
    let mut blocks = vec![Block::heading(2, key.title())];
    blocks.extend(dealflow_providers::markdown_to_blocks(&completion.text));
    if !completion.citations.is_empty() {
        blocks.push(Block::heading(3, "Sources"));
        for url in &completion.citations {
            blocks.push(Block::bullet(url));
        }
    }
    blocks.push(Block::Divider);
    blocks
}

impl JobRouter {
    /// Handles one RESEARCH_BATCH job.
    pub(crate) async fn handle_research_batch(
        &self,
        tenant_id: TenantId,
        envelope: &JobEnvelope,
    ) -> Result<()> {
        let payload: ResearchBatchPayload = envelope.payload_as()?;

        // Pre-start check: a cancel that landed before we began means no
        // output at all.
        if self.store.cancel_requested(tenant_id, payload.run_id).await? {
            tracing::info!(run_id = %payload.run_id, "batch cancelled before start");
            self.store
                .close_run(tenant_id, payload.run_id, RunStatus::Canceled, None)
                .await?;
            metrics::record_run_closed("canceled");
            return Ok(());
        }

        match self.run_research_batch(tenant_id, &payload).await {
            Ok(cancelled) => {
                let status = if cancelled {
                    RunStatus::Canceled
                } else {
                    RunStatus::Succeeded
                };
                self.store
                    .close_run(tenant_id, payload.run_id, status, None)
                    .await?;
                metrics::record_run_closed(status.as_str());
                Ok(())
            }
            Err(error) => {
                let meta = serde_json::json!({ "error": error.to_string() });
                self.store
                    .close_run(tenant_id, payload.run_id, RunStatus::Failed, Some(meta))
                    .await?;
                metrics::record_run_closed("failed");
                Err(error)
            }
        }
    }

    /// Runs the fan-out; returns whether cancellation was observed.
    async fn run_research_batch(
        &self,
        tenant_id: TenantId,
        payload: &ResearchBatchPayload,
    ) -> Result<bool> {
        let Some(deal) = self.store.deal_by_id(tenant_id, payload.deal_id).await? else {
            return Err(Error::invalid_job(format!(
                "deal {} not found",
                payload.deal_id
            )));
        };
        let research_page = self.research_page(&deal).await?;

        let watcher = CancelWatcher::spawn(
            self.store.clone(),
            tenant_id,
            payload.run_id,
            self.config.cancel_poll_interval,
        );
        let token = watcher.token();

        let agent_futures = AgentKey::ALL.into_iter().map(|key| {
            let request = key.completion_request(
                &self.config.llm_model,
                &payload.company,
                payload.founder.as_deref(),
                payload.context.as_deref(),
            );
            let llm = self.llm.clone();
            let token = token.clone();
            async move {
                AgentOutcome {
                    key,
                    result: llm.complete(&request, &token).await,
                }
            }
        });

        // join_all returns outcomes in spawn order, which is the fixed
        // agent order; completion order never leaks into the page.
        let outcomes = futures::future::join_all(agent_futures).await;
        let cancelled = token.is_cancelled();
        watcher.stop();

        let mut blocks = Vec::new();
        for outcome in &outcomes {
            match &outcome.result {
                Ok(completion) => {
                    metrics::record_research_agent("ok");
                    blocks.extend(agent_section(outcome.key, completion));
                }
                Err(error) if error.is_cancelled() => {
                    metrics::record_research_agent("cancelled");
                    tracing::info!(agent = %outcome.key, "agent cancelled");
                }
                Err(error) => {
                    metrics::record_research_agent("failed");
                    tracing::warn!(agent = %outcome.key, %error, "agent failed, skipping");
                }
            }
        }

        if !blocks.is_empty() {
            self.docs.append_blocks(&research_page.id, &blocks).await?;
        }

        Ok(cancelled)
    }

    /// Handles one RESEARCH_AGENT job: the single-section re-drive.
    ///
    /// Opens its own workflow run so a standalone agent is cancellable the
    /// same way a batch is.
    pub(crate) async fn handle_research_agent(
        &self,
        tenant_id: TenantId,
        envelope: &JobEnvelope,
    ) -> Result<()> {
        let payload: ResearchAgentPayload = envelope.payload_as()?;
        let agent: AgentKey = payload.agent_key.parse()?;

        let Some(deal) = self.store.deal_by_id(tenant_id, payload.deal_id).await? else {
            tracing::info!(deal_id = %payload.deal_id, "no deal for agent job, dropping");
            return Ok(());
        };
        let research_page = self.research_page(&deal).await?;

        let run = dealflow_store::WorkflowRun {
            id: dealflow_core::WorkflowRunId::generate(),
            tenant_id,
            deal_id: deal.id,
            stage_key: deal.current_stage.unwrap_or(dealflow_core::StageKey::InDiligence),
            status: RunStatus::Running,
            cancel_requested: false,
            meta: Some(serde_json::json!({ "agent": agent.as_str() })),
            started_at: chrono::Utc::now(),
            finished_at: None,
        };
        self.store.insert_run(&run).await?;

        let watcher = CancelWatcher::spawn(
            self.store.clone(),
            tenant_id,
            run.id,
            self.config.cancel_poll_interval,
        );
        let token = watcher.token();

        let company = deal.company.clone().unwrap_or_else(|| deal.display_name());
        let request = agent.completion_request(
            &self.config.llm_model,
            &company,
            deal.founder.as_deref(),
            payload.context.as_deref(),
        );
        let result = self.llm.complete(&request, &token).await;
        let cancelled = token.is_cancelled();
        watcher.stop();

        match result {
            Ok(completion) => {
                metrics::record_research_agent("ok");
                self.docs
                    .append_blocks(&research_page.id, &agent_section(agent, &completion))
                    .await?;
                self.store
                    .close_run(tenant_id, run.id, RunStatus::Succeeded, None)
                    .await?;
                metrics::record_run_closed("succeeded");
                Ok(())
            }
            Err(error) if error.is_cancelled() || cancelled => {
                metrics::record_research_agent("cancelled");
                self.store
                    .close_run(tenant_id, run.id, RunStatus::Canceled, None)
                    .await?;
                metrics::record_run_closed("canceled");
                Ok(())
            }
            Err(error) => {
                metrics::record_research_agent("failed");
                let meta = serde_json::json!({ "error": error.to_string() });
                self.store
                    .close_run(tenant_id, run.id, RunStatus::Failed, Some(meta))
                    .await?;
                metrics::record_run_closed("failed");
                Err(error.into())
            }
        }
    }

    /// Resolves the deal's research page.
    pub(crate) async fn research_page(&self, deal: &Deal) -> Result<PageRef> {
        let root_id = deal
            .doc_root_id
            .as_deref()
            .ok_or_else(|| Error::invalid_job(format!("deal {} has no workspace", deal.id)))?;
        self.docs
            .find_child_page(root_id, PAGE_RESEARCH)
            .await?
            .ok_or_else(|| {
                Error::invalid_job(format!("deal {} has no research page", deal.id))
            })
    }
}
