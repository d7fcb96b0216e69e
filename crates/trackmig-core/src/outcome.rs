//! Per-record migration outcomes

use crate::record::{DestKey, SourceKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a record was skipped rather than written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// Assignee has no entry in the user mapping
    UnmappedAssignee,
    /// Destination already holds a record tagged with this source key
    AlreadyMigrated,
    /// A previously failed key no longer exists in the source
    MissingInSource,
}

impl SkipReason {
    /// Stable label used in logs and reports
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnmappedAssignee => "unmapped-assignee",
            Self::AlreadyMigrated => "already-migrated",
            Self::MissingInSource => "missing-in-source",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    Created,
    Skipped(SkipReason),
    /// Write failed; carries the rejection or last transport error
    Failed(String),
}

impl Outcome {
    #[inline]
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// One entry of the run's result log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationResult {
    pub source_key: SourceKey,
    /// Destination key, when the record exists on the destination side
    pub dest_key: Option<DestKey>,
    pub outcome: Outcome,
    pub attempted_at: DateTime<Utc>,
}

impl MigrationResult {
    /// Record was created at `dest_key`
    #[must_use]
    pub fn created(source_key: SourceKey, dest_key: Option<DestKey>, attempted_at: DateTime<Utc>) -> Self {
        Self {
            source_key,
            dest_key,
            outcome: Outcome::Created,
            attempted_at,
        }
    }

    /// Record was skipped
    #[must_use]
    pub fn skipped(
        source_key: SourceKey,
        dest_key: Option<DestKey>,
        reason: SkipReason,
        attempted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source_key,
            dest_key,
            outcome: Outcome::Skipped(reason),
            attempted_at,
        }
    }

    /// Record failed
    #[must_use]
    pub fn failed(source_key: SourceKey, error: impl Into<String>, attempted_at: DateTime<Utc>) -> Self {
        Self {
            source_key,
            dest_key: None,
            outcome: Outcome::Failed(error.into()),
            attempted_at,
        }
    }
}
