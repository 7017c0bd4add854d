//! Direct-HTTP job queue for local development.
//!
//! With `LOCAL_DEV` set, jobs skip the durable queue entirely and POST
//! straight to the worker's dispatch endpoint. Delivery is synchronous and
//! once-only; there is no retry, which is exactly what a local loop wants.

use std::time::Duration;

use async_trait::async_trait;
use ulid::Ulid;

use super::{EnqueueOptions, EnqueueResult, JobQueue};
use crate::envelope::JobEnvelope;
use crate::error::{Error, Result};

/// Direct-HTTP [`JobQueue`] implementation.
pub struct HttpJobQueue {
    dispatch_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpJobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpJobQueue")
            .field("dispatch_url", &self.dispatch_url)
            .finish_non_exhaustive()
    }
}

impl HttpJobQueue {
    /// Creates a queue that POSTs to `{worker_url}/tasks/dispatch`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(worker_url: impl Into<String>) -> Result<Self> {
        let worker_url = worker_url.into();
        if worker_url.is_empty() {
            return Err(Error::configuration("worker_url cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10 * 60))
            .build()
            .map_err(|e| Error::configuration(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            dispatch_url: format!("{}/tasks/dispatch", worker_url.trim_end_matches('/')),
            client,
        })
    }
}

#[async_trait]
impl JobQueue for HttpJobQueue {
    async fn enqueue(
        &self,
        envelope: JobEnvelope,
        options: EnqueueOptions,
    ) -> Result<EnqueueResult> {
        if let Some(delay) = options.delay {
            // No scheduler locally; just wait it out.
            tokio::time::sleep(delay).await;
        }

        let response = self
            .client
            .post(&self.dispatch_url)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| Error::dispatch(format!("local dispatch failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::dispatch(format!(
                "local dispatch returned {status}: {body}"
            )));
        }

        Ok(EnqueueResult::Enqueued {
            message_id: Ulid::new().to_string(),
        })
    }

    fn queue_name(&self) -> &str {
        "local-http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_url_construction() {
        let queue = HttpJobQueue::new("http://localhost:8082/").unwrap();
        assert_eq!(queue.dispatch_url, "http://localhost:8082/tasks/dispatch");
        assert_eq!(queue.queue_name(), "local-http");
    }

    #[test]
    fn empty_worker_url_rejected() {
        assert!(HttpJobQueue::new("").is_err());
    }
}
