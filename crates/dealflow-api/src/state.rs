//! Shared application state.

use std::sync::Arc;

use dealflow_core::secrets::SecretStore;
use dealflow_flow::{FlowConfig, JobQueue, JobRouter};
use dealflow_providers::{CalendarProvider, DocsProvider, LlmProvider, TaskProvider};
use dealflow_store::DealStore;

use crate::auth::DispatchVerifier;
use crate::config::Config;

/// Shared state for all three services' request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Arc<Config>,
    /// The relational store.
    pub store: Arc<dyn DealStore>,
    /// The job queue.
    pub queue: Arc<dyn JobQueue>,
    /// Calendar provider client.
    pub calendar: Arc<dyn CalendarProvider>,
    /// Task-manager provider client.
    pub tasks: Arc<dyn TaskProvider>,
    /// Secret store (5-minute cached).
    pub secrets: Arc<dyn SecretStore>,
    /// The worker's job router.
    pub router: Arc<JobRouter>,
    /// OIDC verifier for queue dispatch; `None` in local dev.
    pub dispatch_auth: Option<Arc<DispatchVerifier>>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("dispatch_auth", &self.dispatch_auth.is_some())
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Builds application state from the collaborators.
    ///
    /// The job router shares the same store/queue/provider instances the
    /// routes use directly.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        store: Arc<dyn DealStore>,
        queue: Arc<dyn JobQueue>,
        calendar: Arc<dyn CalendarProvider>,
        tasks: Arc<dyn TaskProvider>,
        docs: Arc<dyn DocsProvider>,
        llm: Arc<dyn LlmProvider>,
        secrets: Arc<dyn SecretStore>,
        dispatch_auth: Option<Arc<DispatchVerifier>>,
    ) -> Self {
        let flow_config = FlowConfig {
            llm_model: config.llm_model.clone(),
            ..FlowConfig::default()
        };
        let router = Arc::new(JobRouter::new(
            store.clone(),
            queue.clone(),
            calendar.clone(),
            tasks.clone(),
            docs,
            llm,
            flow_config,
        ));

        Self {
            config: Arc::new(config),
            store,
            queue,
            calendar,
            tasks,
            secrets,
            router,
            dispatch_auth,
        }
    }
}
