//! Job dispatch abstraction.
//!
//! This module provides:
//!
//! - [`JobQueue`]: Trait for enqueueing jobs to a dispatch backend
//! - [`InMemoryJobQueue`]: In-memory queue for testing
//! - [`CloudTasksQueue`]: Durable queue with OIDC-signed HTTP dispatch
//! - [`HttpJobQueue`]: Direct-HTTP local variant for development
//!
//! ## Design Principles
//!
//! - **Backend agnostic**: Same interface for Cloud Tasks, direct HTTP,
//!   and in-memory queues; selection is environment-driven at startup
//! - **Idempotent dispatch**: Envelope idempotency keys enable dedup
//! - **Structured payloads**: JSON-serializable job envelopes

pub mod cloud_tasks;
pub mod http;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::envelope::JobEnvelope;
use crate::error::Result;

pub use cloud_tasks::{CloudTasksConfig, CloudTasksQueue, RetryConfig};
pub use http::HttpJobQueue;
pub use memory::InMemoryJobQueue;

/// Result of enqueuing a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueResult {
    /// Job was enqueued successfully.
    Enqueued {
        /// Queue-specific message ID.
        message_id: String,
    },
    /// Job was deduplicated (same idempotency key already enqueued).
    Deduplicated {
        /// The existing message ID.
        existing_message_id: String,
    },
}

impl EnqueueResult {
    /// Returns true if the job was newly enqueued.
    #[must_use]
    pub const fn is_enqueued(&self) -> bool {
        matches!(self, Self::Enqueued { .. })
    }

    /// Returns the message ID.
    #[must_use]
    pub fn message_id(&self) -> &str {
        match self {
            Self::Enqueued { message_id }
            | Self::Deduplicated {
                existing_message_id: message_id,
            } => message_id,
        }
    }
}

/// Options for job enqueueing.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Delay before the job becomes visible to the worker.
    pub delay: Option<Duration>,
}

impl EnqueueOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the delay before the job becomes visible.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Queue abstraction for dispatching jobs to the worker.
///
/// ## Thread Safety
///
/// All methods are `Send + Sync`; handlers share one queue via `Arc`.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueues a job for execution.
    ///
    /// # Errors
    ///
    /// Returns a dispatch error when the backend rejects the job; the
    /// caller propagates it so the triggering delivery retries.
    async fn enqueue(&self, envelope: JobEnvelope, options: EnqueueOptions)
        -> Result<EnqueueResult>;

    /// Returns the queue's name or identifier.
    fn queue_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_result_accessors() {
        let enqueued = EnqueueResult::Enqueued {
            message_id: "msg-1".to_string(),
        };
        assert!(enqueued.is_enqueued());
        assert_eq!(enqueued.message_id(), "msg-1");

        let deduped = EnqueueResult::Deduplicated {
            existing_message_id: "msg-2".to_string(),
        };
        assert!(!deduped.is_enqueued());
        assert_eq!(deduped.message_id(), "msg-2");
    }

    #[test]
    fn enqueue_options_builder() {
        let options = EnqueueOptions::new().with_delay(Duration::from_secs(30));
        assert_eq!(options.delay, Some(Duration::from_secs(30)));
    }
}
