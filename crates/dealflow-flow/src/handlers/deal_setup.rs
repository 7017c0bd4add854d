//! Deal-object materialization.
//!
//! A freshly detected deal gets a document workspace (one root, five child
//! pages) and a pipeline task in the FIRST_MEETING section. The task is the
//! more user-visible artifact, so it is still created when the workspace
//! fails; both steps are best-effort and logged.

use std::collections::BTreeMap;

use dealflow_core::{StageKey, TenantId};
use dealflow_providers::{Block, NewTask, PageRef};
use dealflow_store::{Deal, IntegrationKind};

use super::JobRouter;
use crate::error::{Error, Result};

/// `doc_urls` key for the workspace root.
pub const DOC_KEY_ROOT: &str = "root";

/// Child pages: `doc_urls` key, page title, placeholder paragraph.
pub const CHILD_PAGES: [(&str, &str, &str); 5] = [
    (
        "meeting_notes",
        "Meeting Notes",
        "Notes from meetings will be captured here.",
    ),
    (
        "research",
        "Research",
        "Research will appear here once diligence begins.",
    ),
    ("risks", "Risks", "Track key risks and mitigations here."),
    (
        "follow_ups",
        "Follow-ups",
        "Open questions and follow-up items.",
    ),
    (
        "memo",
        "Investment Memo",
        "The memo is generated at IC review.",
    ),
];

/// Title of the meeting-notes child page.
pub const PAGE_MEETING_NOTES: &str = "Meeting Notes";

/// Title of the research child page.
pub const PAGE_RESEARCH: &str = "Research";

/// Title of the memo child page.
pub const PAGE_MEMO: &str = "Investment Memo";

impl JobRouter {
    /// Materializes the task record and document workspace for a new deal.
    ///
    /// Never fails the caller: each step logs and swallows its own errors.
    pub(crate) async fn materialize_deal(&self, tenant_id: TenantId, deal: &Deal) {
        let mut root_url = None;

        match self.create_deal_workspace(tenant_id, deal).await {
            Ok((root, urls)) => {
                root_url = Some(root.url);
                tracing::info!(deal_id = %deal.id, pages = urls.len(), "workspace created");
            }
            Err(error) => {
                tracing::warn!(deal_id = %deal.id, %error, "workspace creation failed");
            }
        }

        // The task still goes in when the workspace failed.
        if let Err(error) = self
            .create_pipeline_task(tenant_id, deal, root_url.as_deref())
            .await
        {
            tracing::warn!(deal_id = %deal.id, %error, "pipeline task creation failed");
        }
    }

    async fn create_deal_workspace(
        &self,
        tenant_id: TenantId,
        deal: &Deal,
    ) -> Result<(PageRef, BTreeMap<String, String>)> {
        let root = self
            .docs
            .create_page(None, &deal.display_name(), &[])
            .await?;

        let mut urls = BTreeMap::new();
        urls.insert(DOC_KEY_ROOT.to_string(), root.url.clone());

        for (key, title, placeholder) in CHILD_PAGES {
            let page = self
                .docs
                .create_page(Some(&root.id), title, &[Block::paragraph(placeholder)])
                .await?;
            urls.insert(key.to_string(), page.url);
        }

        self.store
            .set_deal_docs(tenant_id, deal.id, &root.id, &urls)
            .await?;
        Ok((root, urls))
    }

    async fn create_pipeline_task(
        &self,
        tenant_id: TenantId,
        deal: &Deal,
        root_url: Option<&str>,
    ) -> Result<String> {
        let integration = self
            .store
            .integration(tenant_id, IntegrationKind::Tasks)
            .await?
            .ok_or_else(|| Error::configuration("tasks integration is not configured"))?;
        let project_gid = integration
            .config
            .get("project_gid")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::configuration("tasks integration has no project_gid"))?
            .to_string();

        let section_gid = self
            .store
            .section_for_stage(tenant_id, StageKey::FirstMeeting)
            .await?;

        let mut notes = String::new();
        if let Some(url) = root_url {
            notes.push_str(&format!("Deal workspace: {url}\n\n"));
        }
        notes.push_str(&format!(
            "Auto-created from calendar event {}.",
            deal.event_id
        ));

        let task_gid = self
            .tasks
            .create_task(&NewTask {
                name: deal.display_name(),
                notes: Some(notes),
                project_gid,
                section_gid,
            })
            .await?;

        self.store
            .set_deal_task_record(tenant_id, deal.id, &task_gid)
            .await?;
        Ok(task_gid)
    }
}
