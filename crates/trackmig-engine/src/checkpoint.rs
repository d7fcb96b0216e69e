//! Checkpoint management for resumable runs
//!
//! A checkpoint records how far enumeration of one source has progressed
//! and which keys ended `Failed`. Only the coordinator mutates it, and only
//! after every record of a page has a terminal outcome.

use crate::error::CheckpointError;
use crate::source::PageToken;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};
use trackmig_core::SourceKey;

/// Current checkpoint schema version
pub const CHECKPOINT_VERSION: u32 = 1;

/// Durable progress marker for one source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub source_id: String,
    /// Token of the first page not yet processed
    pub last_page_token: Option<PageToken>,
    /// Records with a terminal outcome across completed pages
    pub processed_count: u64,
    /// Keys whose last attempt ended `Failed`; retried on resume
    pub failed_keys: BTreeSet<SourceKey>,
    pub pages_completed: u64,
    /// Set once the page without a continuation token has completed
    pub source_exhausted: bool,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Fresh checkpoint at the start of the source
    #[must_use]
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            source_id: source_id.into(),
            last_page_token: None,
            processed_count: 0,
            failed_keys: BTreeSet::new(),
            pages_completed: 0,
            source_exhausted: false,
            updated_at: Utc::now(),
        }
    }

    /// Check if no progress was recorded yet
    #[inline]
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.pages_completed == 0 && self.failed_keys.is_empty()
    }

    /// Move past a fully resolved page
    pub fn advance(
        &mut self,
        next_page_token: Option<PageToken>,
        processed: u64,
        failed: &[SourceKey],
        resolved: &[SourceKey],
    ) {
        for key in resolved {
            self.failed_keys.remove(key);
        }
        self.failed_keys.extend(failed.iter().cloned());
        self.source_exhausted = next_page_token.is_none();
        self.last_page_token = next_page_token;
        self.processed_count += processed;
        self.pages_completed += 1;
        self.updated_at = Utc::now();
    }

    /// Drop failed keys that no longer need a retry
    pub fn resolve_failed(&mut self, resolved: &[SourceKey]) {
        for key in resolved {
            self.failed_keys.remove(key);
        }
        self.updated_at = Utc::now();
    }

    /// Check that a loaded checkpoint can be used for `source_id`
    ///
    /// # Errors
    /// `CheckpointError::Version` or `CheckpointError::SourceMismatch`
    pub fn validate_for(&self, source_id: &str) -> Result<(), CheckpointError> {
        if self.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::Version {
                found: self.version,
                expected: CHECKPOINT_VERSION,
            });
        }
        if self.source_id != source_id {
            return Err(CheckpointError::SourceMismatch {
                expected: source_id.to_string(),
                found: self.source_id.clone(),
            });
        }
        Ok(())
    }
}

/// Durable storage for checkpoints, keyed by source id
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the active checkpoint for a source
    async fn load(&self, source_id: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Replace the active checkpoint
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    /// Retire the active checkpoint after a completed run
    async fn archive(&self, source_id: &str) -> Result<(), CheckpointError>;

    /// Delete the active checkpoint so the next run starts over
    async fn clear(&self, source_id: &str) -> Result<(), CheckpointError>;
}

/// One JSON file per source in a directory
///
/// Writes go to a temporary file that is renamed over the checkpoint, so a
/// crash mid-write leaves the previous checkpoint intact.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the active checkpoint for a source
    #[must_use]
    pub fn path_for(&self, source_id: &str) -> PathBuf {
        self.dir.join(format!("{}.checkpoint.json", file_stem(source_id)))
    }

    fn io_error(path: &Path, source: std::io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

fn file_stem(source_id: &str) -> String {
    source_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, source_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let path = self.path_for(source_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::io_error(&path, e)),
        };
        let checkpoint = serde_json::from_slice(&bytes)
            .map_err(|source| CheckpointError::Corrupt { path: path.clone(), source })?;
        debug!(path = %path.display(), "checkpoint loaded");
        Ok(Some(checkpoint))
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let path = self.path_for(&checkpoint.source_id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(checkpoint)
            .map_err(|source| CheckpointError::Corrupt { path: path.clone(), source })?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Self::io_error(&self.dir, e))?;
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| Self::io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Self::io_error(&path, e))?;
        Ok(())
    }

    async fn archive(&self, source_id: &str) -> Result<(), CheckpointError> {
        let path = self.path_for(source_id);
        let archived = self.dir.join(format!(
            "{}.{}.archived.json",
            file_stem(source_id),
            Utc::now().format("%Y%m%dT%H%M%S%.3fZ")
        ));
        match tokio::fs::rename(&path, &archived).await {
            Ok(()) => {
                info!(path = %archived.display(), "checkpoint archived");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_error(&path, e)),
        }
    }

    async fn clear(&self, source_id: &str) -> Result<(), CheckpointError> {
        let path = self.path_for(source_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_error(&path, e)),
        }
    }
}

/// Process-local store, for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    active: Mutex<HashMap<String, Checkpoint>>,
    archived: Mutex<Vec<Checkpoint>>,
    saves: AtomicUsize,
}

impl MemoryCheckpointStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Active checkpoint for a source, if any
    #[must_use]
    pub fn get(&self, source_id: &str) -> Option<Checkpoint> {
        self.active.lock().get(source_id).cloned()
    }

    /// Checkpoints retired by completed runs, oldest first
    #[must_use]
    pub fn archived(&self) -> Vec<Checkpoint> {
        self.archived.lock().clone()
    }

    /// Number of successful saves
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, source_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.get(source_id))
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        self.active
            .lock()
            .insert(checkpoint.source_id.clone(), checkpoint.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn archive(&self, source_id: &str) -> Result<(), CheckpointError> {
        if let Some(checkpoint) = self.active.lock().remove(source_id) {
            self.archived.lock().push(checkpoint);
        }
        Ok(())
    }

    async fn clear(&self, source_id: &str) -> Result<(), CheckpointError> {
        self.active.lock().remove(source_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(k: &str) -> SourceKey {
        SourceKey::new(k)
    }

    #[test]
    fn advance_tracks_failures_and_token() {
        let mut checkpoint = Checkpoint::new("jira");
        assert!(checkpoint.is_fresh());

        checkpoint.advance(Some(PageToken::new("50")), 50, &[key("C")], &[]);
        assert_eq!(checkpoint.processed_count, 50);
        assert_eq!(checkpoint.pages_completed, 1);
        assert!(checkpoint.failed_keys.contains(&key("C")));
        assert!(!checkpoint.source_exhausted);

        checkpoint.advance(None, 10, &[], &[key("C")]);
        assert!(checkpoint.failed_keys.is_empty());
        assert!(checkpoint.source_exhausted);
        assert_eq!(checkpoint.last_page_token, None);
    }

    #[test]
    fn validate_rejects_other_source() {
        let checkpoint = Checkpoint::new("jira");
        assert!(checkpoint.validate_for("jira").is_ok());
        assert!(matches!(
            checkpoint.validate_for("asana"),
            Err(CheckpointError::SourceMismatch { .. })
        ));
    }

    #[test]
    fn validate_rejects_unknown_version() {
        let mut checkpoint = Checkpoint::new("jira");
        checkpoint.version = 99;
        assert!(matches!(
            checkpoint.validate_for("jira"),
            Err(CheckpointError::Version { found: 99, .. })
        ));
    }

    #[tokio::test]
    async fn file_store_roundtrip_archive_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoints"));

        assert!(store.load("jira/PROJ").await.unwrap().is_none());

        let mut checkpoint = Checkpoint::new("jira/PROJ");
        checkpoint.advance(Some(PageToken::new("100")), 100, &[key("X-1")], &[]);
        store.save(&checkpoint).await.unwrap();

        let loaded = store.load("jira/PROJ").await.unwrap().unwrap();
        assert_eq!(loaded, checkpoint);
        assert!(store.path_for("jira/PROJ").ends_with("jira_PROJ.checkpoint.json"));

        store.archive("jira/PROJ").await.unwrap();
        assert!(store.load("jira/PROJ").await.unwrap().is_none());
        let archived = std::fs::read_dir(dir.path().join("checkpoints"))
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".archived.json"))
            .count();
        assert_eq!(archived, 1);

        store.save(&checkpoint).await.unwrap();
        store.clear("jira/PROJ").await.unwrap();
        assert!(store.load("jira/PROJ").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_reports_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        std::fs::write(store.path_for("jira"), b"{not json").unwrap();
        assert!(matches!(
            store.load("jira").await,
            Err(CheckpointError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn memory_store_archives() {
        let store = MemoryCheckpointStore::new();
        store.save(&Checkpoint::new("jira")).await.unwrap();
        store.archive("jira").await.unwrap();
        assert!(store.get("jira").is_none());
        assert_eq!(store.archived().len(), 1);
        assert_eq!(store.save_count(), 1);
    }
}
