//! Strongly-typed identifiers for dealflow entities.
//!
//! Identifiers come in two flavors:
//! - **Tenant IDs** are UUIDs, matching the relational schema's keying.
//! - **Internally generated IDs** (deals, workflow runs) are ULIDs, which
//!   encode creation time and sort lexicographically.
//!
//! Provider-issued identifiers (task gids, section gids, calendar event ids)
//! stay as plain strings; they are opaque to us and owned by the provider.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A unique identifier for a tenant.
///
/// Every persisted row is scoped by a tenant ID; a single default tenant is
/// acceptable for one-org deployments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(Uuid);

impl TenantId {
    /// Generates a new random tenant ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a tenant ID from a raw UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TenantId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s).map(Self).map_err(|e| Error::InvalidId {
            message: format!("invalid tenant ID '{s}': {e}"),
        })
    }
}

/// A unique identifier for a deal.
///
/// One deal corresponds to one deal-tagged calendar event; the ULID is the
/// internal primary key, while `(tenant, calendar_id, event_id)` stays the
/// natural key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DealId(Ulid);

impl DealId {
    /// Generates a new unique deal ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Creates a deal ID from a raw ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Returns the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl fmt::Display for DealId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DealId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| Error::InvalidId {
                message: format!("invalid deal ID '{s}': {e}"),
            })
    }
}

/// A unique identifier for a workflow run.
///
/// Each stage-driven orchestration attempt on a deal gets its own run ID;
/// the ULID's embedded timestamp doubles as the run's creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowRunId(Ulid);

impl WorkflowRunId {
    /// Generates a new unique workflow run ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Creates a workflow run ID from a raw ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Returns the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }

    /// Returns the creation timestamp encoded in the ID.
    #[must_use]
    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        let ms = self.0.timestamp_ms();
        chrono::DateTime::from_timestamp_millis(ms as i64).unwrap_or_else(chrono::Utc::now)
    }
}

impl fmt::Display for WorkflowRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WorkflowRunId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| Error::InvalidId {
                message: format!("invalid workflow run ID '{s}': {e}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_id_roundtrip() {
        let id = TenantId::generate();
        let s = id.to_string();
        let parsed: TenantId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn deal_id_roundtrip() {
        let id = DealId::generate();
        let s = id.to_string();
        let parsed: DealId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn workflow_run_id_roundtrip() {
        let id = WorkflowRunId::generate();
        let s = id.to_string();
        let parsed: WorkflowRunId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(DealId::generate(), DealId::generate());
        assert_ne!(WorkflowRunId::generate(), WorkflowRunId::generate());
    }

    #[test]
    fn invalid_id_returns_error() {
        let result: Result<TenantId> = "not-a-uuid".parse();
        assert!(result.is_err());

        let result: Result<DealId> = "not-a-ulid!".parse();
        assert!(result.is_err());
    }
}
