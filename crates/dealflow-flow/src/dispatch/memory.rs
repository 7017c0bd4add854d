//! In-memory job queue implementation for testing.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No persistence, no distribution
//! - **Single-process only**: Jobs are not visible across process boundaries
//! - **No delay support**: Delay option is accepted but ignored

use std::collections::{HashSet, VecDeque};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use ulid::Ulid;

use super::{EnqueueOptions, EnqueueResult, JobQueue};
use crate::envelope::JobEnvelope;
use crate::error::{Error, Result};

/// Entry in the in-memory queue.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    /// Message ID.
    pub message_id: String,
    /// Job envelope.
    pub envelope: JobEnvelope,
    /// Options used when enqueuing.
    pub options: EnqueueOptions,
}

/// In-memory job queue for testing.
#[derive(Debug, Default)]
pub struct InMemoryJobQueue {
    name: String,
    queue: RwLock<VecDeque<QueueEntry>>,
    /// Set of idempotency keys for deduplication.
    seen_keys: RwLock<HashSet<String>>,
}

/// Converts a lock poison error to a dispatch error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::dispatch("job queue lock poisoned")
}

impl InMemoryJobQueue {
    /// Creates a new in-memory job queue.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue: RwLock::new(VecDeque::new()),
            seen_keys: RwLock::new(HashSet::new()),
        }
    }

    /// Takes the next job from the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn take(&self) -> Result<Option<QueueEntry>> {
        let mut queue = self.queue.write().map_err(poison_err)?;
        Ok(queue.pop_front())
    }

    /// Returns all enqueued jobs, clearing the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn drain(&self) -> Result<Vec<QueueEntry>> {
        let mut queue = self.queue.write().map_err(poison_err)?;
        Ok(queue.drain(..).collect())
    }

    /// Returns the number of queued jobs.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        let queue = self.queue.read().map_err(poison_err)?;
        Ok(queue.len())
    }

    /// Returns true when no jobs are queued.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Clears the queue and deduplication state.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn clear(&self) -> Result<()> {
        self.queue.write().map_err(poison_err)?.clear();
        self.seen_keys.write().map_err(poison_err)?.clear();
        Ok(())
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(
        &self,
        envelope: JobEnvelope,
        options: EnqueueOptions,
    ) -> Result<EnqueueResult> {
        if let Some(key) = envelope.idempotency_key.clone() {
            let mut seen = self.seen_keys.write().map_err(poison_err)?;
            if !seen.insert(key.clone()) {
                return Ok(EnqueueResult::Deduplicated {
                    existing_message_id: format!("dedup-{key}"),
                });
            }
        }

        let message_id = Ulid::new().to_string();
        let mut queue = self.queue.write().map_err(poison_err)?;
        queue.push_back(QueueEntry {
            message_id: message_id.clone(),
            envelope,
            options,
        });

        Ok(EnqueueResult::Enqueued { message_id })
    }

    fn queue_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{CalendarSyncPayload, JobType};
    use dealflow_core::TenantId;

    fn envelope(key: Option<&str>) -> JobEnvelope {
        let mut envelope = JobEnvelope::new(
            JobType::CalendarSync,
            TenantId::generate(),
            &CalendarSyncPayload {
                calendar_id: "primary".into(),
                channel_id: "gcal-A".into(),
            },
        )
        .unwrap();
        if let Some(key) = key {
            envelope = envelope.with_idempotency_key(key);
        }
        envelope
    }

    #[tokio::test]
    async fn enqueue_and_take() -> Result<()> {
        let queue = InMemoryJobQueue::new("test");

        let result = queue
            .enqueue(envelope(None), EnqueueOptions::default())
            .await?;
        assert!(result.is_enqueued());

        let entry = queue.take()?.expect("should have entry");
        assert_eq!(entry.envelope.job_type, JobType::CalendarSync);
        assert!(queue.take()?.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn same_idempotency_key_deduplicates() -> Result<()> {
        let queue = InMemoryJobQueue::new("test");

        let result1 = queue
            .enqueue(envelope(Some("calendar_ping:gcal-A:1")), EnqueueOptions::default())
            .await?;
        assert!(result1.is_enqueued());

        let result2 = queue
            .enqueue(envelope(Some("calendar_ping:gcal-A:1")), EnqueueOptions::default())
            .await?;
        assert!(matches!(result2, EnqueueResult::Deduplicated { .. }));

        assert_eq!(queue.len()?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn keyless_envelopes_never_deduplicate() -> Result<()> {
        let queue = InMemoryJobQueue::new("test");

        queue.enqueue(envelope(None), EnqueueOptions::default()).await?;
        queue.enqueue(envelope(None), EnqueueOptions::default()).await?;
        assert_eq!(queue.len()?, 2);

        Ok(())
    }

    #[tokio::test]
    async fn clear_resets_dedup_state() -> Result<()> {
        let queue = InMemoryJobQueue::new("test");

        queue
            .enqueue(envelope(Some("k1")), EnqueueOptions::default())
            .await?;
        queue.clear()?;

        let result = queue
            .enqueue(envelope(Some("k1")), EnqueueOptions::default())
            .await?;
        assert!(result.is_enqueued());

        Ok(())
    }
}
