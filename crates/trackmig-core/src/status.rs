//! Status vocabulary translation

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Configurable source-status → destination-status table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusTable {
    /// Known source statuses and their destination equivalents
    #[serde(default)]
    pub table: BTreeMap<String, String>,
    /// Destination status used for any source status not in `table`
    pub default: String,
}

/// Result of a status lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedStatus<'a> {
    /// Status was present in the table
    Mapped(&'a str),
    /// Status was unknown; the default was used
    Fallback(&'a str),
}

impl<'a> ResolvedStatus<'a> {
    /// Destination status value
    #[inline]
    #[must_use]
    pub fn value(self) -> &'a str {
        match self {
            Self::Mapped(v) | Self::Fallback(v) => v,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_fallback(self) -> bool {
        matches!(self, Self::Fallback(_))
    }
}

impl StatusTable {
    /// Create an empty table with the given default
    #[must_use]
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            table: BTreeMap::new(),
            default: default.into(),
        }
    }

    /// With one mapping entry
    #[must_use]
    pub fn with(mut self, source: impl Into<String>, dest: impl Into<String>) -> Self {
        self.table.insert(source.into(), dest.into());
        self
    }

    /// Translate a source status
    #[must_use]
    pub fn resolve(&self, source_status: &str) -> ResolvedStatus<'_> {
        match self.table.get(source_status.trim()) {
            Some(dest) => ResolvedStatus::Mapped(dest),
            None => ResolvedStatus::Fallback(&self.default),
        }
    }
}

impl Default for StatusTable {
    fn default() -> Self {
        Self::new("New")
            .with("Open", "New")
            .with("In Progress", "InProgress")
            .with("Done", "Closed")
    }
}
