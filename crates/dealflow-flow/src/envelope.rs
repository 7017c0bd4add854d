//! The queue job envelope and per-job payloads.
//!
//! Everything that crosses a process boundary travels as a [`JobEnvelope`]:
//! a closed job-type vocabulary, the tenant, a job-specific JSON payload,
//! and an optional idempotency key the queue uses for dedup.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use dealflow_core::{DealId, StageKey, TenantId, WorkflowRunId};

use crate::error::{Error, Result};

/// The closed set of job types the worker dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    /// Incremental/full calendar sync for one channel.
    CalendarSync,
    /// Section-change detection for one task.
    TasksProcess,
    /// Stage state machine for one transition.
    StageAction,
    /// Single research agent re-drive.
    ResearchAgent,
    /// Cancellable six-agent research fan-out.
    ResearchBatch,
    /// Investment memo synthesis.
    MemoGenerate,
}

impl JobType {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CalendarSync => "CALENDAR_SYNC",
            Self::TasksProcess => "TASKS_PROCESS",
            Self::StageAction => "STAGE_ACTION",
            Self::ResearchAgent => "RESEARCH_AGENT",
            Self::ResearchBatch => "RESEARCH_BATCH",
            Self::MemoGenerate => "MEMO_GENERATE",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The on-wire queue envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEnvelope {
    /// Which handler this job routes to.
    pub job_type: JobType,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Job-specific payload.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Optional dedup key; the queue drops duplicate enqueues.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl JobEnvelope {
    /// Builds an envelope with a typed payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn new<T: Serialize>(job_type: JobType, tenant_id: TenantId, payload: &T) -> Result<Self> {
        let payload = serde_json::to_value(payload)
            .map_err(|e| Error::serialization(format!("job payload: {e}")))?;
        Ok(Self {
            job_type,
            tenant_id,
            payload,
            idempotency_key: None,
        })
    }

    /// Attaches an idempotency key for queue-level dedup.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Deserializes the payload into a typed struct.
    ///
    /// # Errors
    ///
    /// Returns a non-retryable invalid-job error if the payload does not
    /// match the expected shape.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            Error::invalid_job(format!("{} payload: {e}", self.job_type))
        })
    }
}

/// Formats a timestamp the way idempotency keys expect it.
///
/// `2025-01-02T03:04:05Z` — whole seconds, `Z` suffix. Keys must be
/// byte-stable across processes, so this is the only formatting used.
#[must_use]
pub fn key_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Idempotency key for a calendar push notification.
#[must_use]
pub fn calendar_ping_key(channel_id: &str, message_number: &str) -> String {
    format!("calendar_ping:{channel_id}:{message_number}")
}

/// Idempotency key for a task-webhook event.
#[must_use]
pub fn tasks_event_key(
    webhook_gid: &str,
    created_at: &str,
    resource_gid: &str,
    action: &str,
) -> String {
    format!("tasks_evt:{webhook_gid}:{created_at}:{resource_gid}:{action}")
}

/// Idempotency key for a stage transition.
#[must_use]
pub fn stage_action_key(task_gid: &str, section_gid: &str, modified_at: DateTime<Utc>) -> String {
    format!(
        "stage:{task_gid}:{section_gid}:{}",
        key_timestamp(modified_at)
    )
}

// ============================================================================
// Typed payloads
// ============================================================================

/// Payload for [`JobType::CalendarSync`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarSyncPayload {
    /// Calendar to sync.
    pub calendar_id: String,
    /// Channel that triggered the sync.
    pub channel_id: String,
}

/// Payload for [`JobType::TasksProcess`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TasksProcessPayload {
    /// Task to inspect.
    pub task_gid: String,
    /// Pipeline project scoping the section lookup.
    pub project_gid: String,
    /// Provider action that fired the webhook (`changed`, `added`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

/// Payload for [`JobType::StageAction`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageActionPayload {
    /// Task that moved.
    pub task_gid: String,
    /// Section it landed in.
    pub section_gid: String,
    /// Stage the section maps to.
    pub stage_key: StageKey,
    /// Provider modification timestamp of the observed move.
    pub modified_at: DateTime<Utc>,
    /// Stage the task left, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_stage: Option<StageKey>,
}

/// Payload for [`JobType::ResearchBatch`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchBatchPayload {
    /// Workflow run whose cancel flag governs the batch.
    pub run_id: WorkflowRunId,
    /// Deal under research.
    pub deal_id: DealId,
    /// Company name.
    pub company: String,
    /// Founder name, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub founder: Option<String>,
    /// Meeting-notes context fed to the agents.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Payload for [`JobType::ResearchAgent`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchAgentPayload {
    /// Deal under research.
    pub deal_id: DealId,
    /// Which agent to run.
    pub agent_key: String,
    /// Meeting-notes context fed to the agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Payload for [`JobType::MemoGenerate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoGeneratePayload {
    /// Workflow run whose cancel flag governs the synthesis.
    pub run_id: WorkflowRunId,
    /// Deal the memo covers.
    pub deal_id: DealId,
    /// Company name.
    pub company: String,
    /// Founder name, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub founder: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_type_wire_names() {
        assert_eq!(JobType::CalendarSync.as_str(), "CALENDAR_SYNC");
        let json = serde_json::to_string(&JobType::ResearchBatch).unwrap();
        assert_eq!(json, "\"RESEARCH_BATCH\"");
    }

    #[test]
    fn envelope_wire_format_is_camel_case() {
        let tenant = TenantId::generate();
        let envelope = JobEnvelope::new(
            JobType::CalendarSync,
            tenant,
            &CalendarSyncPayload {
                calendar_id: "primary".into(),
                channel_id: "gcal-A".into(),
            },
        )
        .unwrap()
        .with_idempotency_key("calendar_ping:gcal-A:1");

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["jobType"], "CALENDAR_SYNC");
        assert_eq!(json["tenantId"], tenant.to_string());
        assert_eq!(json["payload"]["calendarId"], "primary");
        assert_eq!(json["idempotencyKey"], "calendar_ping:gcal-A:1");
    }

    #[test]
    fn envelope_payload_roundtrip() {
        let tenant = TenantId::generate();
        let payload = StageActionPayload {
            task_gid: "t-1".into(),
            section_gid: "sec-dd".into(),
            stage_key: StageKey::InDiligence,
            modified_at: "2025-01-02T03:04:05Z".parse().unwrap(),
            previous_stage: Some(StageKey::FirstMeeting),
        };

        let envelope = JobEnvelope::new(JobType::StageAction, tenant, &payload).unwrap();
        let parsed: StageActionPayload = envelope.payload_as().unwrap();
        assert_eq!(parsed.task_gid, "t-1");
        assert_eq!(parsed.stage_key, StageKey::InDiligence);
        assert_eq!(parsed.previous_stage, Some(StageKey::FirstMeeting));
    }

    #[test]
    fn mismatched_payload_is_invalid_job() {
        let tenant = TenantId::generate();
        let envelope = JobEnvelope {
            job_type: JobType::CalendarSync,
            tenant_id: tenant,
            payload: serde_json::json!({ "wrong": true }),
            idempotency_key: None,
        };
        let result: Result<CalendarSyncPayload> = envelope.payload_as();
        assert!(matches!(result, Err(Error::InvalidJob { .. })));
    }

    #[test]
    fn idempotency_key_formats() {
        assert_eq!(calendar_ping_key("gcal-A", "1"), "calendar_ping:gcal-A:1");
        assert_eq!(
            tasks_event_key("wh-1", "2025-01-02T03:04:05Z", "t-1", "changed"),
            "tasks_evt:wh-1:2025-01-02T03:04:05Z:t-1:changed"
        );

        let ts: DateTime<Utc> = "2025-01-02T03:04:05Z".parse().unwrap();
        assert_eq!(
            stage_action_key("t-1", "sec-dd", ts),
            "stage:t-1:sec-dd:2025-01-02T03:04:05Z"
        );
    }
}
