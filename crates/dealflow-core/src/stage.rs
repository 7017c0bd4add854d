//! The pipeline stage vocabulary.
//!
//! Stages are the closed set of logical phases a deal moves through. Section
//! rows in the task-manager project map onto these keys; everything else in
//! the system (workflow runs, deal rows, the stage state machine) speaks
//! `StageKey`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A logical pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageKey {
    /// Initial meeting scheduled; prep work begins.
    FirstMeeting,
    /// Active diligence; research fan-out runs here.
    InDiligence,
    /// Investment-committee review; memo synthesis runs here.
    IcReview,
    /// Passed on the opportunity.
    Pass,
    /// Archived without a decision.
    Archive,
}

impl StageKey {
    /// All stages, in pipeline order.
    pub const ALL: [Self; 5] = [
        Self::FirstMeeting,
        Self::InDiligence,
        Self::IcReview,
        Self::Pass,
        Self::Archive,
    ];

    /// Returns the stable storage/wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FirstMeeting => "FIRST_MEETING",
            Self::InDiligence => "IN_DILIGENCE",
            Self::IcReview => "IC_REVIEW",
            Self::Pass => "PASS",
            Self::Archive => "ARCHIVE",
        }
    }

    /// Returns a human-readable title for document output.
    #[must_use]
    pub const fn title(&self) -> &'static str {
        match self {
            Self::FirstMeeting => "First Meeting",
            Self::InDiligence => "In Diligence",
            Self::IcReview => "IC Review",
            Self::Pass => "Pass",
            Self::Archive => "Archive",
        }
    }

    /// Returns true for the stages that end a deal's active life.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Pass | Self::Archive)
    }
}

impl fmt::Display for StageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "FIRST_MEETING" => Ok(Self::FirstMeeting),
            "IN_DILIGENCE" => Ok(Self::InDiligence),
            "IC_REVIEW" => Ok(Self::IcReview),
            "PASS" => Ok(Self::Pass),
            "ARCHIVE" => Ok(Self::Archive),
            other => Err(Error::InvalidInput(format!("unknown stage key: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_key_roundtrip() {
        for stage in StageKey::ALL {
            let parsed: StageKey = stage.as_str().parse().unwrap();
            assert_eq!(stage, parsed);
        }
    }

    #[test]
    fn stage_key_serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&StageKey::InDiligence).unwrap();
        assert_eq!(json, "\"IN_DILIGENCE\"");

        let parsed: StageKey = serde_json::from_str("\"IC_REVIEW\"").unwrap();
        assert_eq!(parsed, StageKey::IcReview);
    }

    #[test]
    fn terminal_stages() {
        assert!(StageKey::Pass.is_terminal());
        assert!(StageKey::Archive.is_terminal());
        assert!(!StageKey::InDiligence.is_terminal());
    }

    #[test]
    fn unknown_stage_is_rejected() {
        assert!("NOT_A_STAGE".parse::<StageKey>().is_err());
    }
}
