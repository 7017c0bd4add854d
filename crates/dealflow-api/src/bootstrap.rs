//! Process bootstrap shared by the three binaries.
//!
//! Builds the production [`AppState`]: Postgres store, secret-backed
//! provider clients, and the environment-selected queue backend. With
//! `LOCAL_DEV` set, secrets come from environment variables and jobs
//! dispatch via direct HTTP to the worker.

use std::sync::Arc;

use anyhow::Context;

use dealflow_core::secrets::{CachingSecretStore, EnvSecretStore, GcpSecretStore, SecretStore};
use dealflow_flow::{CloudTasksConfig, CloudTasksQueue, HttpJobQueue, JobQueue};
use dealflow_providers::{HttpCalendarClient, HttpDocsClient, HttpLlmClient, HttpTaskClient};
use dealflow_store::{DealStore, PoolConfig, PostgresStore};

use crate::auth::DispatchVerifier;
use crate::config::Config;
use crate::state::AppState;

/// Secret name for the calendar provider access token.
pub const SECRET_CALENDAR_TOKEN: &str = "calendar-access-token";
/// Secret name for the task-manager access token.
pub const SECRET_TASKS_TOKEN: &str = "tasks-access-token";
/// Secret name for the document provider access token.
pub const SECRET_DOCS_TOKEN: &str = "docs-access-token";
/// Secret name for the LLM provider API key.
pub const SECRET_LLM_API_KEY: &str = "llm-api-key";

/// Builds the full production state for one service process.
///
/// # Errors
///
/// Returns an error on any connection, credential, or configuration
/// failure; binaries fail fast at startup.
pub async fn build_state(config: Config) -> anyhow::Result<AppState> {
    let pool = PoolConfig {
        host: config.database.host.clone(),
        port: config.database.port,
        database: config.database.name.clone(),
        user: config.database.user.clone(),
        password: config.database.password.clone(),
        max_connections: config.database.pool_max,
        ..PoolConfig::default()
    };
    let store: Arc<dyn DealStore> = Arc::new(
        PostgresStore::connect(&pool)
            .await
            .context("database connection failed")?,
    );
    store
        .ensure_tenant(config.tenant_id, "default")
        .await
        .context("tenant bootstrap failed")?;

    let inner: Arc<dyn SecretStore> = if config.local_dev {
        Arc::new(EnvSecretStore::new())
    } else {
        let project_id = config
            .project_id
            .clone()
            .context("PROJECT_ID is required unless LOCAL_DEV is set")?;
        Arc::new(GcpSecretStore::new(project_id).await?)
    };
    let secrets: Arc<dyn SecretStore> = Arc::new(CachingSecretStore::new(inner));

    let calendar_token = secrets.get(SECRET_CALENDAR_TOKEN).await?;
    let tasks_token = secrets.get(SECRET_TASKS_TOKEN).await?;
    let docs_token = secrets.get(SECRET_DOCS_TOKEN).await?;
    let llm_key = secrets.get(SECRET_LLM_API_KEY).await?;

    let calendar = Arc::new(HttpCalendarClient::new(calendar_token)?);
    let tasks = Arc::new(HttpTaskClient::new(tasks_token)?);
    let docs = Arc::new(HttpDocsClient::new(docs_token)?);
    let llm = Arc::new(HttpLlmClient::new(llm_key)?);

    let queue: Arc<dyn JobQueue> = if config.local_dev {
        Arc::new(HttpJobQueue::new(&config.worker_url)?)
    } else {
        let project_id = config
            .project_id
            .clone()
            .context("PROJECT_ID is required unless LOCAL_DEV is set")?;
        let mut queue_config = CloudTasksConfig::new(
            project_id,
            config.region.clone(),
            config.queue_name.clone(),
            config.worker_url.clone(),
        );
        if let Some(invoker) = &config.tasks_invoker_sa_email {
            queue_config = queue_config.with_invoker(invoker.clone());
        }
        Arc::new(CloudTasksQueue::new(queue_config).await?)
    };

    let dispatch_auth = if config.local_dev {
        None
    } else {
        let invoker = config
            .tasks_invoker_sa_email
            .clone()
            .context("TASKS_INVOKER_SA_EMAIL is required unless LOCAL_DEV is set")?;
        Some(Arc::new(DispatchVerifier::new(
            config.worker_url.clone(),
            invoker,
        )?))
    };

    Ok(AppState::new(
        config,
        store,
        queue,
        calendar,
        tasks,
        docs,
        llm,
        secrets,
        dispatch_auth,
    ))
}
