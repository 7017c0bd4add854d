//! MEMO_GENERATE handler: memo synthesis.
//!
//! The same cancellation pattern as the research batch, with a single LLM
//! call. Output lands on the memo page with a generated-on callout up top
//! and a review warning at the bottom.

use chrono::Utc;

use dealflow_core::TenantId;
use dealflow_providers::Block;
use dealflow_store::{Deal, RunStatus};

use super::deal_setup::PAGE_MEMO;
use super::JobRouter;
use crate::agents::memo_request;
use crate::cancel::CancelWatcher;
use crate::envelope::{JobEnvelope, MemoGeneratePayload};
use crate::error::{Error, Result};
use crate::metrics;

impl JobRouter {
    /// Handles one MEMO_GENERATE job.
    pub(crate) async fn handle_memo_generate(
        &self,
        tenant_id: TenantId,
        envelope: &JobEnvelope,
    ) -> Result<()> {
        let payload: MemoGeneratePayload = envelope.payload_as()?;

        if self.store.cancel_requested(tenant_id, payload.run_id).await? {
            tracing::info!(run_id = %payload.run_id, "memo cancelled before start");
            self.store
                .close_run(tenant_id, payload.run_id, RunStatus::Canceled, None)
                .await?;
            metrics::record_run_closed("canceled");
            return Ok(());
        }

        match self.run_memo_generate(tenant_id, &payload).await {
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
            Err(error) if error.is_cancelled() => {
                self.store
                    .close_run(tenant_id, payload.run_id, RunStatus::Canceled, None)
                    .await?;
                metrics::record_run_closed("canceled");
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

    async fn run_memo_generate(
        &self,
        tenant_id: TenantId,
        payload: &MemoGeneratePayload,
    ) -> Result<bool> {
        let Some(deal) = self.store.deal_by_id(tenant_id, payload.deal_id).await? else {
            return Err(Error::invalid_job(format!(
                "deal {} not found",
                payload.deal_id
            )));
        };
        let memo_page = self.memo_page(&deal).await?;

        // Feed gathered research into the synthesis when it exists.
        let research = match self.research_page(&deal).await {
            Ok(page) => match self.docs.read_page_text(&page.id).await {
                Ok(text) if !text.trim().is_empty() => Some(text),
                Ok(_) => None,
                Err(error) => {
                    tracing::warn!(deal_id = %deal.id, %error, "research read failed");
                    None
                }
            },
            Err(_) => None,
        };

        let watcher = CancelWatcher::spawn(
            self.store.clone(),
            tenant_id,
            payload.run_id,
            self.config.cancel_poll_interval,
        );
        let token = watcher.token();

        let request = memo_request(
            &self.config.llm_model,
            &payload.company,
            payload.founder.as_deref(),
            research.as_deref(),
        );
        let result = self.llm.complete(&request, &token).await;
        let cancelled = token.is_cancelled();
        watcher.stop();

        let completion = match result {
            Ok(completion) => completion,
            Err(error) if error.is_cancelled() => return Ok(true),
            Err(error) => return Err(error.into()),
        };

        let mut blocks = vec![Block::callout(format!(
            "Generated on {}.",
            Utc::now().format("%Y-%m-%d")
        ))];
        blocks.extend(dealflow_providers::markdown_to_blocks(&completion.text));
        blocks.push(Block::callout(
            "Auto-generated draft — review every claim before sharing.",
        ));

        self.docs.append_blocks(&memo_page.id, &blocks).await?;
        Ok(cancelled)
    }

    async fn memo_page(&self, deal: &Deal) -> Result<dealflow_providers::PageRef> {
        let root_id = deal
            .doc_root_id
            .as_deref()
            .ok_or_else(|| Error::invalid_job(format!("deal {} has no workspace", deal.id)))?;
        self.docs
            .find_child_page(root_id, PAGE_MEMO)
            .await?
            .ok_or_else(|| Error::invalid_job(format!("deal {} has no memo page", deal.id)))
    }
}
