//! Source reader
//!
//! Each supported tracker implements [`SourceSystem`]. The [`SourceReader`]
//! walks it page by page, forward only, retrying transient failures. Page
//! tokens are opaque to the engine; a token stored in a checkpoint resumes
//! enumeration exactly where it stopped, provided the source collection is
//! not reordered between runs.

use crate::error::{BackendError, RetryError};
use crate::retry::with_retry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;
use trackmig_core::{RetryPolicy, SourceKey, SourceRecord, SourceUserId};

/// Opaque continuation token issued by a source system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageToken(pub String);

impl PageToken {
    #[inline]
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One page of records in source order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub records: Vec<SourceRecord>,
    /// Token for the following page; `None` on the last page
    pub next_page_token: Option<PageToken>,
}

/// Capability exposed by a source tracker
#[async_trait]
pub trait SourceSystem: Send + Sync {
    /// Stable identifier; checkpoints are keyed by it
    fn source_id(&self) -> &str;

    /// List one page of records matching `query`, starting at `page_token`
    /// (`None` for the first page)
    async fn list_records(&self, query: &str, page_token: Option<&PageToken>) -> Result<Page, BackendError>;

    /// Fetch specific records by key; unknown keys are omitted from the result
    async fn fetch_records(&self, keys: &[SourceKey]) -> Result<Vec<SourceRecord>, BackendError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Cursor {
    Start,
    At(PageToken),
    Exhausted,
}

/// Lazy, forward-only page iterator over a [`SourceSystem`]
pub struct SourceReader {
    system: Arc<dyn SourceSystem>,
    query: String,
    policy: RetryPolicy,
    cursor: Cursor,
}

impl SourceReader {
    /// Reader positioned at the first page
    #[must_use]
    pub fn new(system: Arc<dyn SourceSystem>, query: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            system,
            query: query.into(),
            policy,
            cursor: Cursor::Start,
        }
    }

    /// Continue from a stored token (`None` = first page)
    #[must_use]
    pub fn resume_at(mut self, token: Option<PageToken>) -> Self {
        self.cursor = token.map_or(Cursor::Start, Cursor::At);
        self
    }

    /// Mark the source as fully enumerated
    #[must_use]
    pub fn exhausted(mut self) -> Self {
        self.cursor = Cursor::Exhausted;
        self
    }

    /// Identifier of the underlying source
    #[inline]
    #[must_use]
    pub fn source_id(&self) -> &str {
        self.system.source_id()
    }

    /// Check if no pages remain
    #[inline]
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.cursor == Cursor::Exhausted
    }

    /// Fetch the next page, or `None` once the source is exhausted
    ///
    /// # Errors
    /// `RetryError` when the source keeps failing; the cursor is left unchanged
    /// so pagination is never skipped.
    pub async fn next_page(&mut self) -> Result<Option<Page>, RetryError> {
        let token = match &self.cursor {
            Cursor::Exhausted => return Ok(None),
            Cursor::Start => None,
            Cursor::At(token) => Some(token.clone()),
        };

        let system = &self.system;
        let query = self.query.as_str();
        let page = with_retry(&self.policy, "list_records", || {
            system.list_records(query, token.as_ref())
        })
        .await?;

        debug!(
            source = self.system.source_id(),
            records = page.records.len(),
            has_next = page.next_page_token.is_some(),
            "page fetched"
        );
        self.cursor = match &page.next_page_token {
            Some(next) => Cursor::At(next.clone()),
            None => Cursor::Exhausted,
        };
        Ok(Some(page))
    }

    /// Walk the remaining pages and collect the distinct assignees, sorted
    ///
    /// # Errors
    /// `RetryError` when the source keeps failing
    pub async fn assignees(&mut self) -> Result<BTreeSet<SourceUserId>, RetryError> {
        let mut users = BTreeSet::new();
        while let Some(page) = self.next_page().await? {
            users.extend(page.records.into_iter().filter_map(|r| r.assignee));
        }
        Ok(users)
    }

    /// Fetch specific records by key
    ///
    /// # Errors
    /// `RetryError` when the source keeps failing
    pub async fn fetch(&self, keys: &[SourceKey]) -> Result<Vec<SourceRecord>, RetryError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let system = &self.system;
        with_retry(&self.policy, "fetch_records", || system.fetch_records(keys)).await
    }
}

impl std::fmt::Debug for SourceReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceReader")
            .field("source", &self.system.source_id())
            .field("query", &self.query)
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SnapshotSource;

    fn records(n: usize) -> Vec<SourceRecord> {
        (0..n)
            .map(|i| SourceRecord::new(format!("R-{i}"), format!("record {i}"), "Open"))
            .collect()
    }

    fn reader(n: usize, page_size: usize) -> SourceReader {
        let source = Arc::new(SnapshotSource::new("tracker", records(n), page_size));
        SourceReader::new(source, "", RetryPolicy::immediate(3))
    }

    #[tokio::test]
    async fn walks_all_pages_then_stops() {
        let mut reader = reader(5, 2);
        let mut seen = Vec::new();
        while let Some(page) = reader.next_page().await.unwrap() {
            seen.extend(page.records.into_iter().map(|r| r.key));
        }
        assert_eq!(seen.len(), 5);
        assert_eq!(seen[4], SourceKey::new("R-4"));
        assert!(reader.is_exhausted());
        assert!(reader.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resumes_from_token() {
        let mut first = reader(5, 2);
        let page = first.next_page().await.unwrap().unwrap();
        let token = page.next_page_token;

        let mut resumed = reader(5, 2).resume_at(token);
        let page = resumed.next_page().await.unwrap().unwrap();
        assert_eq!(page.records[0].key, SourceKey::new("R-2"));
    }

    #[tokio::test]
    async fn exhausted_reader_yields_nothing() {
        let mut reader = reader(5, 2).exhausted();
        assert!(reader.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn collects_distinct_assignees_across_pages() {
        let records = vec![
            SourceRecord::new("A", "a", "Open").with_assignee("mdoe"),
            SourceRecord::new("B", "b", "Open"),
            SourceRecord::new("C", "c", "Open").with_assignee("jsmith"),
            SourceRecord::new("D", "d", "Open").with_assignee("mdoe"),
        ];
        let source = Arc::new(SnapshotSource::new("tracker", records, 2));
        let mut reader = SourceReader::new(source, "", RetryPolicy::immediate(1));

        let users: Vec<_> = reader.assignees().await.unwrap().into_iter().collect();
        assert_eq!(users, vec![SourceUserId::new("jsmith"), SourceUserId::new("mdoe")]);
        assert!(reader.is_exhausted());
    }

    #[tokio::test]
    async fn fetch_with_no_keys_skips_call() {
        let reader = reader(1, 1);
        assert!(reader.fetch(&[]).await.unwrap().is_empty());
    }
}
