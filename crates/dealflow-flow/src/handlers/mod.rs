//! Worker job handlers.
//!
//! [`JobRouter`] owns the store, the queue, and the four provider clients,
//! and maps the closed job-type vocabulary onto handler methods with an
//! exhaustive match. Handlers are idempotent or idempotency-guarded: the
//! queue delivers at least once and retries on any error return.

pub mod calendar_sync;
pub mod deal_setup;
pub mod memo;
pub mod research;
pub mod stage_action;
pub mod tasks_process;

use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;

use dealflow_providers::{CalendarProvider, DocsProvider, LlmProvider, TaskProvider};
use dealflow_store::DealStore;

use crate::cancel::CANCEL_POLL_INTERVAL;
use crate::dispatch::JobQueue;
use crate::envelope::{JobEnvelope, JobType};
use crate::error::Result;
use crate::metrics;

/// Tunables for the orchestration engine.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// Model used for research agents and memo synthesis.
    pub llm_model: String,
    /// How often long-running handlers poll the cancel flag.
    pub cancel_poll_interval: Duration,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            llm_model: "gpt-4o".to_string(),
            cancel_poll_interval: CANCEL_POLL_INTERVAL,
        }
    }
}

/// Routes queue envelopes to job handlers.
pub struct JobRouter {
    pub(crate) store: Arc<dyn DealStore>,
    pub(crate) queue: Arc<dyn JobQueue>,
    pub(crate) calendar: Arc<dyn CalendarProvider>,
    pub(crate) tasks: Arc<dyn TaskProvider>,
    pub(crate) docs: Arc<dyn DocsProvider>,
    pub(crate) llm: Arc<dyn LlmProvider>,
    pub(crate) config: FlowConfig,
}

impl std::fmt::Debug for JobRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRouter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl JobRouter {
    /// Creates a router over the given collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn DealStore>,
        queue: Arc<dyn JobQueue>,
        calendar: Arc<dyn CalendarProvider>,
        tasks: Arc<dyn TaskProvider>,
        docs: Arc<dyn DocsProvider>,
        llm: Arc<dyn LlmProvider>,
        config: FlowConfig,
    ) -> Self {
        Self {
            store,
            queue,
            calendar,
            tasks,
            docs,
            llm,
            config,
        }
    }

    /// Handles one queue envelope.
    ///
    /// # Errors
    ///
    /// Propagates handler failures; the worker maps them to 5xx so the
    /// queue retries, except invalid jobs which map to 400.
    pub async fn dispatch(&self, envelope: &JobEnvelope) -> Result<()> {
        let tenant_id = envelope.tenant_id;
        let span = dealflow_core::job_span(envelope.job_type.as_str(), &tenant_id.to_string());

        let result = async {
            match envelope.job_type {
                JobType::CalendarSync => self.handle_calendar_sync(tenant_id, envelope).await,
                JobType::TasksProcess => self.handle_tasks_process(tenant_id, envelope).await,
                JobType::StageAction => self.handle_stage_action(tenant_id, envelope).await,
                JobType::ResearchBatch => self.handle_research_batch(tenant_id, envelope).await,
                JobType::ResearchAgent => self.handle_research_agent(tenant_id, envelope).await,
                JobType::MemoGenerate => self.handle_memo_generate(tenant_id, envelope).await,
            }
        }
        .instrument(span)
        .await;

        if let Err(error) = &result {
            metrics::record_job_failure(envelope.job_type.as_str());
            tracing::error!(job_type = %envelope.job_type, %error, "job handler failed");
        }
        result
    }
}
