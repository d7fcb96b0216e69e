//! Source backed by a fixed set of records
//!
//! Serves a snapshot held in memory, either built directly or loaded from a
//! tracker export file (a JSON array or one JSON object per line). Page
//! tokens are decimal offsets into the filtered snapshot.

use crate::error::BackendError;
use crate::source::{Page, PageToken, SourceSystem};
use async_trait::async_trait;
use std::collections::HashSet;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;
use trackmig_core::{SourceKey, SourceRecord};

/// The only filter a snapshot understands besides the empty query
const ASSIGNED_ONLY: &str = "assignee is not empty";

/// In-memory, paginated source
#[derive(Debug)]
pub struct SnapshotSource {
    id: String,
    records: Vec<SourceRecord>,
    page_size: usize,
    list_calls: AtomicUsize,
}

impl SnapshotSource {
    #[must_use]
    pub fn new(id: impl Into<String>, records: Vec<SourceRecord>, page_size: usize) -> Self {
        Self {
            id: id.into(),
            records,
            page_size: page_size.max(1),
            list_calls: AtomicUsize::new(0),
        }
    }

    /// Load a tracker export
    ///
    /// # Errors
    /// I/O failures, or `InvalidData` when the file is not a JSON array of
    /// records or JSON lines.
    pub async fn from_export_file(
        id: impl Into<String>,
        path: impl AsRef<Path>,
        page_size: usize,
    ) -> io::Result<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await?;
        let records = parse_export(&text)?;
        info!(path = %path.display(), records = records.len(), "source export loaded");
        Ok(Self::new(id, records, page_size))
    }

    /// Number of `list_records` calls served
    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn matching(&self, query: &str) -> Result<Vec<&SourceRecord>, BackendError> {
        let normalized = query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        match normalized.as_str() {
            "" => Ok(self.records.iter().collect()),
            ASSIGNED_ONLY => Ok(self.records.iter().filter(|r| r.assignee.is_some()).collect()),
            _ => Err(BackendError::Rejected(format!("unsupported query `{query}`"))),
        }
    }
}

fn parse_export(text: &str) -> io::Result<Vec<SourceRecord>> {
    let invalid = |e: serde_json::Error| io::Error::new(io::ErrorKind::InvalidData, e);
    if text.trim_start().starts_with('[') {
        return serde_json::from_str(text).map_err(invalid);
    }
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(invalid))
        .collect()
}

#[async_trait]
impl SourceSystem for SnapshotSource {
    fn source_id(&self) -> &str {
        &self.id
    }

    async fn list_records(&self, query: &str, page_token: Option<&PageToken>) -> Result<Page, BackendError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let matching = self.matching(query)?;
        let offset = match page_token {
            None => 0,
            Some(token) => token
                .as_str()
                .parse::<usize>()
                .map_err(|_| BackendError::Protocol(format!("invalid page token `{}`", token.as_str())))?,
        };

        let end = offset.saturating_add(self.page_size).min(matching.len());
        let records = matching
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|r| (*r).clone())
            .collect();
        let next_page_token = (end < matching.len()).then(|| PageToken::new(end.to_string()));
        Ok(Page {
            records,
            next_page_token,
        })
    }

    async fn fetch_records(&self, keys: &[SourceKey]) -> Result<Vec<SourceRecord>, BackendError> {
        let wanted: HashSet<&SourceKey> = keys.iter().collect();
        Ok(self
            .records
            .iter()
            .filter(|r| wanted.contains(&r.key))
            .cloned()
            .collect())
    }
}
