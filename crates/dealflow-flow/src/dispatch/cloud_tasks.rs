//! Cloud Tasks queue implementation.
//!
//! Durable dispatch backend: every job becomes an HTTP push task aimed at
//! the worker's `/tasks/dispatch` endpoint, signed with an OIDC identity
//! token for the invoker service account. Envelope idempotency keys become
//! Cloud Tasks task names, so redundant enqueues collapse server-side.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use gcp_auth::TokenProvider;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{EnqueueOptions, EnqueueResult, JobQueue};
use crate::envelope::JobEnvelope;
use crate::error::{Error, Result};

/// Configuration for the Cloud Tasks queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudTasksConfig {
    /// GCP project ID.
    pub project_id: String,
    /// Cloud Tasks location (e.g., "us-central1").
    pub region: String,
    /// Queue name.
    pub queue_name: String,
    /// Worker base URL; jobs POST to `{worker_url}/tasks/dispatch`.
    pub worker_url: String,
    /// Service account email minting OIDC tokens for dispatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoker_service_account: Option<String>,
    /// Maximum time the worker has to answer one dispatch.
    #[serde(default = "default_dispatch_deadline")]
    pub dispatch_deadline: Duration,
    /// Retry configuration applied to the queue on first use.
    #[serde(default)]
    pub retry_config: RetryConfig,
    /// Whether to apply retry configuration via the Cloud Tasks API.
    ///
    /// Defaults to true; set to false for IaC-managed queues.
    #[serde(default = "default_apply_queue_retry_config")]
    pub apply_queue_retry_config: bool,
}

fn default_dispatch_deadline() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_apply_queue_retry_config() -> bool {
    true
}

/// Retry configuration for the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of delivery attempts.
    pub max_attempts: u32,
    /// Minimum backoff duration.
    pub min_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Maximum time for retries from first attempt.
    pub max_retry_duration: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(300),
            max_retry_duration: Duration::from_secs(3600),
        }
    }
}

impl CloudTasksConfig {
    /// Creates a new config with required fields.
    #[must_use]
    pub fn new(
        project_id: impl Into<String>,
        region: impl Into<String>,
        queue_name: impl Into<String>,
        worker_url: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            region: region.into(),
            queue_name: queue_name.into(),
            worker_url: worker_url.into(),
            invoker_service_account: None,
            dispatch_deadline: default_dispatch_deadline(),
            retry_config: RetryConfig::default(),
            apply_queue_retry_config: default_apply_queue_retry_config(),
        }
    }

    /// Sets the invoker service account for OIDC-signed dispatch.
    #[must_use]
    pub fn with_invoker(mut self, email: impl Into<String>) -> Self {
        self.invoker_service_account = Some(email.into());
        self
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    /// Sets whether queue retry configuration should be applied via API.
    #[must_use]
    pub const fn with_queue_retry_updates(mut self, enabled: bool) -> Self {
        self.apply_queue_retry_config = enabled;
        self
    }

    /// Returns the full queue path for the Cloud Tasks API.
    #[must_use]
    pub fn queue_path(&self) -> String {
        format!(
            "projects/{}/locations/{}/queues/{}",
            self.project_id, self.region, self.queue_name
        )
    }

    /// Returns the dispatch target URL.
    #[must_use]
    pub fn dispatch_url(&self) -> String {
        format!("{}/tasks/dispatch", self.worker_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTaskRequest {
    task: CloudTask,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CloudTask {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    http_request: HttpRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    schedule_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dispatch_deadline: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HttpRequest {
    url: String,
    http_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    headers: Option<std::collections::HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    oidc_token: Option<OidcToken>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OidcToken {
    service_account_email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    audience: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueuePatchRequest {
    name: String,
    retry_config: QueueRetryConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueueRetryConfig {
    max_attempts: u32,
    min_backoff: String,
    max_backoff: String,
    max_retry_duration: String,
}

#[derive(Debug, Deserialize)]
struct CloudTasksErrorResponse {
    error: CloudTasksError,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)] // Fields used for deserialization
struct CloudTasksError {
    code: i32,
    message: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct CloudTasksSuccessResponse {
    name: String,
}

/// Cloud Tasks [`JobQueue`] implementation.
pub struct CloudTasksQueue {
    config: CloudTasksConfig,
    token_provider: Arc<dyn TokenProvider>,
    client: reqwest::Client,
    configured_queues: Mutex<HashSet<String>>,
}

impl std::fmt::Debug for CloudTasksQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudTasksQueue")
            .field("config", &self.config)
            .field("token_provider", &"<TokenProvider>")
            .finish_non_exhaustive()
    }
}

impl CloudTasksQueue {
    /// Creates a new Cloud Tasks queue client.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration is invalid
    /// - GCP authentication cannot be initialized
    pub async fn new(config: CloudTasksConfig) -> Result<Self> {
        if config.project_id.is_empty() {
            return Err(Error::configuration("project_id cannot be empty"));
        }
        if config.region.is_empty() {
            return Err(Error::configuration("region cannot be empty"));
        }
        if config.queue_name.is_empty() {
            return Err(Error::configuration("queue_name cannot be empty"));
        }
        if config.worker_url.is_empty() {
            return Err(Error::configuration("worker_url cannot be empty"));
        }

        let token_provider = gcp_auth::provider()
            .await
            .map_err(|e| Error::configuration(format!("failed to initialize GCP auth: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::configuration(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            config,
            token_provider,
            client,
            configured_queues: Mutex::new(HashSet::new()),
        })
    }

    /// Sanitizes a string for use as a Cloud Tasks task ID.
    ///
    /// Task IDs must start with a letter or underscore, contain only
    /// letters, numbers, underscores, and hyphens, and be at most 500
    /// characters.
    pub(crate) fn sanitize_task_id(key: &str) -> String {
        let sanitized: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        if sanitized.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
            format!("j_{sanitized}")
        } else {
            sanitized
        }
        .chars()
        .take(500)
        .collect()
    }

    async fn get_access_token(&self) -> Result<String> {
        let scopes = &["https://www.googleapis.com/auth/cloud-tasks"];
        let token = self
            .token_provider
            .token(scopes)
            .await
            .map_err(|e| Error::dispatch(format!("failed to get GCP access token: {e}")))?;

        Ok(token.as_str().to_string())
    }

    /// Formats a duration as a Cloud Tasks API duration string.
    pub(crate) fn format_duration(duration: Duration) -> String {
        let secs = duration.as_secs();
        let nanos = duration.subsec_nanos();
        if nanos == 0 {
            return format!("{secs}s");
        }

        let mut fractional = format!("{nanos:09}");
        while fractional.ends_with('0') {
            fractional.pop();
        }

        format!("{secs}.{fractional}s")
    }

    fn format_schedule_time(delay: Duration) -> String {
        let now = chrono::Utc::now();
        let scheduled = now + chrono::Duration::from_std(delay).unwrap_or_default();
        scheduled.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
    }

    async fn ensure_queue_retry_config(&self) -> Result<()> {
        if !self.config.apply_queue_retry_config {
            return Ok(());
        }

        let queue_path = self.config.queue_path();
        {
            let configured = self.configured_queues.lock().await;
            if configured.contains(&queue_path) {
                return Ok(());
            }
        }

        let access_token = self.get_access_token().await?;
        let request = QueuePatchRequest {
            name: queue_path.clone(),
            retry_config: QueueRetryConfig {
                max_attempts: self.config.retry_config.max_attempts,
                min_backoff: Self::format_duration(self.config.retry_config.min_backoff),
                max_backoff: Self::format_duration(self.config.retry_config.max_backoff),
                max_retry_duration: Self::format_duration(
                    self.config.retry_config.max_retry_duration,
                ),
            },
        };

        let api_url = format!(
            "https://cloudtasks.googleapis.com/v2/{queue_path}?updateMask=retryConfig"
        );

        let response = self
            .client
            .patch(&api_url)
            .bearer_auth(&access_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::dispatch(format!("Cloud Tasks queue update failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(Error::configuration(format!(
                "Cloud Tasks queue update error: {status} - {error_body}"
            )));
        }

        let mut configured = self.configured_queues.lock().await;
        configured.insert(queue_path);
        Ok(())
    }
}

#[async_trait]
impl JobQueue for CloudTasksQueue {
    async fn enqueue(
        &self,
        envelope: JobEnvelope,
        options: EnqueueOptions,
    ) -> Result<EnqueueResult> {
        self.ensure_queue_retry_config().await?;

        let queue_path = self.config.queue_path();

        // Named tasks dedupe server-side; keyless jobs always enqueue.
        let task_name = envelope
            .idempotency_key
            .as_deref()
            .map(|key| format!("{}/tasks/{}", queue_path, Self::sanitize_task_id(key)));

        let body_bytes = serde_json::to_vec(&envelope)
            .map_err(|e| Error::serialization(e.to_string()))?;
        let body_base64 = base64::engine::general_purpose::STANDARD.encode(&body_bytes);

        let oidc_token = self
            .config
            .invoker_service_account
            .as_ref()
            .map(|email| OidcToken {
                service_account_email: email.clone(),
                audience: Some(self.config.worker_url.clone()),
            });

        let request = CreateTaskRequest {
            task: CloudTask {
                name: task_name.clone(),
                http_request: HttpRequest {
                    url: self.config.dispatch_url(),
                    http_method: "POST".to_string(),
                    headers: Some({
                        let mut headers = std::collections::HashMap::new();
                        headers.insert("Content-Type".to_string(), "application/json".to_string());
                        headers
                    }),
                    body: Some(body_base64),
                    oidc_token,
                },
                schedule_time: options.delay.map(Self::format_schedule_time),
                dispatch_deadline: Some(Self::format_duration(self.config.dispatch_deadline)),
            },
        };

        let access_token = self.get_access_token().await?;
        let api_url = format!("https://cloudtasks.googleapis.com/v2/{queue_path}/tasks");

        let response = self
            .client
            .post(&api_url)
            .bearer_auth(&access_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::dispatch(format!("Cloud Tasks API request failed: {e}")))?;

        let status = response.status();

        if status.is_success() {
            let success: CloudTasksSuccessResponse = response
                .json()
                .await
                .map_err(|e| Error::dispatch(format!("failed to parse success response: {e}")))?;

            Ok(EnqueueResult::Enqueued {
                message_id: success.name,
            })
        } else if status.as_u16() == 409 {
            // ALREADY_EXISTS - a task with this name exists (idempotent).
            Ok(EnqueueResult::Deduplicated {
                existing_message_id: task_name.unwrap_or_default(),
            })
        } else {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());

            if let Ok(parsed) = serde_json::from_str::<CloudTasksErrorResponse>(&error_body) {
                Err(Error::dispatch(format!(
                    "Cloud Tasks API error: {} ({})",
                    parsed.error.message, parsed.error.status
                )))
            } else {
                Err(Error::dispatch(format!(
                    "Cloud Tasks API error: {status} - {error_body}"
                )))
            }
        }
    }

    fn queue_name(&self) -> &str {
        &self.config.queue_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_queue_path() {
        let config = CloudTasksConfig::new(
            "my-project",
            "us-central1",
            "dealflow-jobs",
            "https://worker.example.run.app",
        );

        assert_eq!(
            config.queue_path(),
            "projects/my-project/locations/us-central1/queues/dealflow-jobs"
        );
        assert_eq!(
            config.dispatch_url(),
            "https://worker.example.run.app/tasks/dispatch"
        );
    }

    #[test]
    fn config_builder_pattern() {
        let config = CloudTasksConfig::new(
            "my-project",
            "us-central1",
            "dealflow-jobs",
            "https://worker.example.run.app/",
        )
        .with_invoker("tasks-invoker@my-project.iam.gserviceaccount.com")
        .with_retry_config(RetryConfig {
            max_attempts: 8,
            ..Default::default()
        })
        .with_queue_retry_updates(false);

        assert_eq!(
            config.invoker_service_account.as_deref(),
            Some("tasks-invoker@my-project.iam.gserviceaccount.com")
        );
        assert_eq!(config.retry_config.max_attempts, 8);
        assert!(!config.apply_queue_retry_config);
        assert_eq!(
            config.dispatch_url(),
            "https://worker.example.run.app/tasks/dispatch"
        );
    }

    #[test]
    fn retry_config_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.min_backoff, Duration::from_secs(10));
        assert_eq!(config.max_backoff, Duration::from_secs(300));
    }

    #[test]
    fn sanitize_task_id_replaces_separators() {
        assert_eq!(
            CloudTasksQueue::sanitize_task_id("calendar_ping:gcal-A:1"),
            "calendar_ping_gcal-A_1"
        );
    }

    #[test]
    fn sanitize_task_id_starting_with_digit() {
        assert_eq!(CloudTasksQueue::sanitize_task_id("1-task"), "j_1-task");
    }

    #[test]
    fn format_duration_seconds_only() {
        assert_eq!(
            CloudTasksQueue::format_duration(Duration::from_secs(10)),
            "10s"
        );
    }

    #[test]
    fn format_duration_subsecond() {
        assert_eq!(
            CloudTasksQueue::format_duration(Duration::from_millis(1500)),
            "1.5s"
        );
    }
}
