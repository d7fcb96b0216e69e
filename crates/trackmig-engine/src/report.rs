//! Result log and run summary
//!
//! The result log holds exactly one [`MigrationResult`] per source key for a
//! run; entries are appended once and never revised. The [`RunSummary`] is
//! derived from it when the run ends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use trackmig_core::{MigrationResult, Outcome, SkipReason, SourceKey};
use ulid::Ulid;

/// Unique run identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub Ulid);

impl RunId {
    /// Generate new run ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Append-only, write-once log of per-record results
#[derive(Debug, Default)]
pub struct ResultLog {
    entries: Vec<MigrationResult>,
    keys: HashSet<SourceKey>,
}

impl ResultLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a result for `key` was already logged
    #[inline]
    #[must_use]
    pub fn contains(&self, key: &SourceKey) -> bool {
        self.keys.contains(key)
    }

    /// Append a result
    ///
    /// # Errors
    /// Hands the result back if its key is already logged.
    pub fn append(&mut self, result: MigrationResult) -> Result<(), MigrationResult> {
        if !self.keys.insert(result.source_key.clone()) {
            return Err(result);
        }
        self.entries.push(result);
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[MigrationResult] {
        &self.entries
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Overall result of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FinalStatus {
    /// Every record was created or skipped
    Completed,
    /// Source exhausted but some records ended `Failed`
    CompletedWithFailures,
    /// Cancelled; resumable from the checkpoint
    Paused,
    /// Halted by a systemic error; resumable from the checkpoint
    Failed { reason: String },
}

impl FinalStatus {
    /// Check if the run finished without any failure
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::CompletedWithFailures => f.write_str("completed with failures"),
            Self::Paused => f.write_str("paused"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// A record that was skipped, with the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRecord {
    pub source_key: SourceKey,
    pub reason: SkipReason,
}

/// A record that failed, with the error text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRecord {
    pub source_key: SourceKey,
    pub reason: String,
}

/// A source status that was not in the status table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFallback {
    pub source_key: SourceKey,
    pub source_status: String,
    pub applied_status: String,
}

/// Summary returned to the caller at the end of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub source_id: String,
    pub final_status: FinalStatus,
    pub total_processed: usize,
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
    pub skipped_records: Vec<SkippedRecord>,
    pub failed_records: Vec<FailedRecord>,
    pub status_fallbacks: Vec<StatusFallback>,
    /// Pages completed across this and earlier runs of the same checkpoint
    pub pages_completed: u64,
    /// Run continued from an existing checkpoint
    pub resumed: bool,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    /// Empty summary for a run that is starting
    #[must_use]
    pub fn new(run_id: RunId, source_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            source_id: source_id.into(),
            final_status: FinalStatus::Paused,
            total_processed: 0,
            created: 0,
            skipped: 0,
            failed: 0,
            skipped_records: Vec::new(),
            failed_records: Vec::new(),
            status_fallbacks: Vec::new(),
            pages_completed: 0,
            resumed: false,
            dry_run: false,
            started_at,
            finished_at: started_at,
        }
    }

    /// Fill counts and key lists from the result log
    #[must_use]
    pub fn with_results(mut self, log: &ResultLog) -> Self {
        self.total_processed = log.len();
        self.skipped_records.clear();
        self.failed_records.clear();
        self.created = 0;
        for result in log.entries() {
            match &result.outcome {
                Outcome::Created => self.created += 1,
                Outcome::Skipped(reason) => self.skipped_records.push(SkippedRecord {
                    source_key: result.source_key.clone(),
                    reason: *reason,
                }),
                Outcome::Failed(reason) => self.failed_records.push(FailedRecord {
                    source_key: result.source_key.clone(),
                    reason: reason.clone(),
                }),
            }
        }
        self.skipped = self.skipped_records.len();
        self.failed = self.failed_records.len();
        self
    }

    /// Skipped records with a given reason
    #[must_use]
    pub fn skipped_for(&self, reason: SkipReason) -> Vec<&SourceKey> {
        self.skipped_records
            .iter()
            .filter(|s| s.reason == reason)
            .map(|s| &s.source_key)
            .collect()
    }

    /// Human-readable multi-line report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Migration run {} ({})\n", self.run_id, self.source_id));
        out.push_str(&format!("  Status:    {}\n", self.final_status));
        out.push_str(&format!("  Processed: {}\n", self.total_processed));
        out.push_str(&format!("  Created:   {}\n", self.created));
        out.push_str(&format!("  Skipped:   {}\n", self.skipped));
        out.push_str(&format!("  Failed:    {}\n", self.failed));
        if self.dry_run {
            out.push_str("  (dry run: nothing was written)\n");
        }
        for skipped in &self.skipped_records {
            out.push_str(&format!("  skipped {}: {}\n", skipped.source_key, skipped.reason));
        }
        for failed in &self.failed_records {
            out.push_str(&format!("  failed  {}: {}\n", failed.source_key, failed.reason));
        }
        for fallback in &self.status_fallbacks {
            out.push_str(&format!(
                "  status  {}: `{}` not in status table, used `{}`\n",
                fallback.source_key, fallback.source_status, fallback.applied_status
            ));
        }
        out
    }
}
