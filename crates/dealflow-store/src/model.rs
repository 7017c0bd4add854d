//! Persisted entity types.
//!
//! These mirror the relational schema one-to-one. Provider-issued
//! identifiers (channel ids, task gids, section gids, event ids) are opaque
//! strings; internal keys are typed ids from `dealflow-core`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dealflow_core::{DealId, StageKey, TenantId, WorkflowRunId};

/// The kind of an external integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationKind {
    /// Calendar provider credentials/config.
    Calendar,
    /// Task-manager provider credentials/config.
    Tasks,
    /// Document provider credentials/config.
    Docs,
    /// LLM provider credentials/config.
    Llm,
}

impl IntegrationKind {
    /// Returns the stable storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Calendar => "calendar",
            Self::Tasks => "tasks",
            Self::Docs => "docs",
            Self::Llm => "llm",
        }
    }
}

impl fmt::Display for IntegrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntegrationKind {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "calendar" => Ok(Self::Calendar),
            "tasks" => Ok(Self::Tasks),
            "docs" => Ok(Self::Docs),
            "llm" => Ok(Self::Llm),
            other => Err(crate::error::Error::decode(format!(
                "unknown integration kind: {other}"
            ))),
        }
    }
}

/// A per-tenant integration config bag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Integration {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Which collaborator this config is for.
    pub kind: IntegrationKind,
    /// Opaque structured config (e.g. webhook secrets, project gids).
    pub config: serde_json::Value,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle state of a push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    /// Receiving notifications.
    Active,
    /// Superseded by a newer channel; terminal.
    Replaced,
    /// Explicitly stopped; terminal.
    Stopped,
}

impl ChannelStatus {
    /// Returns the stable storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Replaced => "replaced",
            Self::Stopped => "stopped",
        }
    }

    /// Returns true for terminal states.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Replaced | Self::Stopped)
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelStatus {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "replaced" => Ok(Self::Replaced),
            "stopped" => Ok(Self::Stopped),
            other => Err(crate::error::Error::decode(format!(
                "unknown channel status: {other}"
            ))),
        }
    }
}

/// An active or retired push subscription on an external calendar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushChannel {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// The watched calendar.
    pub calendar_id: String,
    /// Provider-facing channel identifier (we allocate it).
    pub channel_id: String,
    /// Provider-issued resource identifier.
    pub resource_id: Option<String>,
    /// Opaque verification token echoed back in notifications.
    pub channel_token: Option<String>,
    /// Current incremental sync cursor.
    pub sync_token: Option<String>,
    /// Provider-reported expiry, milliseconds since epoch.
    pub expiration_ms: Option<i64>,
    /// Lifecycle state.
    pub status: ChannelStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Canonical per-opportunity record linking external IDs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deal {
    /// Internal primary key.
    pub id: DealId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Originating calendar.
    pub calendar_id: String,
    /// Originating calendar event.
    pub event_id: String,
    /// Extracted company name.
    pub company: Option<String>,
    /// Extracted founder name or email.
    pub founder: Option<String>,
    /// Raw event title at last sync.
    pub event_title: Option<String>,
    /// Event start time, when known.
    pub event_start: Option<DateTime<Utc>>,
    /// Task-manager record backing this deal.
    pub task_record_gid: Option<String>,
    /// Root page of the document workspace.
    pub doc_root_id: Option<String>,
    /// Page-name → URL map for the document workspace.
    pub doc_urls: BTreeMap<String, String>,
    /// Current pipeline stage.
    pub current_stage: Option<StageKey>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Deal {
    /// Returns the display name used for document titles.
    #[must_use]
    pub fn display_name(&self) -> String {
        match (self.company.as_deref(), self.founder.as_deref()) {
            (Some(company), Some(founder)) => format!("{company} — {founder}"),
            (Some(company), None) => company.to_string(),
            (None, Some(founder)) => founder.to_string(),
            (None, None) => self.event_id.clone(),
        }
    }
}

/// Fields coalesced into a deal row on each sync.
///
/// `None` fields never overwrite existing values.
#[derive(Debug, Clone, Default)]
pub struct DealPatch {
    /// Extracted company name.
    pub company: Option<String>,
    /// Extracted founder name or email.
    pub founder: Option<String>,
    /// Raw event title.
    pub event_title: Option<String>,
    /// Event start time.
    pub event_start: Option<DateTime<Utc>>,
}

/// Last-observed placement of a task inside the pipeline project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Provider task identifier.
    pub task_gid: String,
    /// Provider project identifier.
    pub project_gid: String,
    /// Section the task was last seen in.
    pub last_seen_section_gid: Option<String>,
    /// Provider modification timestamp last processed.
    pub last_processed_modified_at: Option<DateTime<Utc>>,
    /// Stage that last fired a stage action.
    pub last_triggered_stage: Option<StageKey>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Mapping from a provider section to a logical stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Provider section identifier.
    pub section_gid: String,
    /// The stage this section maps to.
    pub stage_key: StageKey,
    /// Only enabled rows participate in resolution.
    pub enabled: bool,
}

/// Terminal and non-terminal workflow run states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Handler is executing.
    Running,
    /// Handler finished cleanly.
    Succeeded,
    /// Handler raised; the queue may retry with a fresh run.
    Failed,
    /// Cancellation was observed and honored.
    Canceled,
}

impl RunStatus {
    /// Returns the stable storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// Returns true for terminal states.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            other => Err(crate::error::Error::decode(format!(
                "unknown run status: {other}"
            ))),
        }
    }
}

/// One attempt of a stage-driven orchestration on a deal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// Internal primary key.
    pub id: WorkflowRunId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// The deal this run acts on.
    pub deal_id: DealId,
    /// Stage that triggered this run.
    pub stage_key: StageKey,
    /// Current status; transition out of `running` is write-once.
    pub status: RunStatus,
    /// Cooperative cancellation flag.
    pub cancel_requested: bool,
    /// Free-form metadata (e.g. failure messages).
    pub meta: Option<serde_json::Value>,
    /// Start timestamp.
    pub started_at: DateTime<Utc>,
    /// Set iff status is terminal.
    pub finished_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_status_roundtrip() {
        for status in [
            ChannelStatus::Active,
            ChannelStatus::Replaced,
            ChannelStatus::Stopped,
        ] {
            let parsed: ChannelStatus = status.as_str().parse().unwrap();
            assert_eq!(status, parsed);
        }
    }

    #[test]
    fn run_status_terminality() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Canceled.is_terminal());
    }

    #[test]
    fn deal_display_name_prefers_company_and_founder() {
        let mut deal = Deal {
            id: DealId::generate(),
            tenant_id: TenantId::generate(),
            calendar_id: "primary".into(),
            event_id: "evt-1".into(),
            company: Some("Acme".into()),
            founder: Some("Jane".into()),
            event_title: None,
            event_start: None,
            task_record_gid: None,
            doc_root_id: None,
            doc_urls: BTreeMap::new(),
            current_stage: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(deal.display_name(), "Acme — Jane");

        deal.founder = None;
        assert_eq!(deal.display_name(), "Acme");

        deal.company = None;
        assert_eq!(deal.display_name(), "evt-1");
    }
}
