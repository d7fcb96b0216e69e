//! Destination persisted as a JSON ledger file
//!
//! Every created record is appended to the ledger and the file is rewritten
//! (temporary file, then rename) before the create returns, so a key handed
//! back to the engine is always durable.

use super::memory::validate;
use crate::destination::DestinationSystem;
use crate::error::BackendError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};
use trackmig_core::{DestKey, SourceKey, TranslatedRecord};

/// One created record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub dest_key: DestKey,
    pub source_key: SourceKey,
    pub record: TranslatedRecord,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Ledger {
    next: u64,
    entries: Vec<LedgerEntry>,
}

/// File-backed destination
#[derive(Debug)]
pub struct JsonLedgerDestination {
    path: PathBuf,
    prefix: String,
    ledger: Mutex<Ledger>,
}

impl JsonLedgerDestination {
    /// Open the ledger at `path`, starting empty when the file does not exist
    ///
    /// # Errors
    /// I/O failures, or `InvalidData` when the file is not a ledger.
    pub async fn open(path: impl Into<PathBuf>, prefix: impl Into<String>) -> io::Result<Self> {
        let path = path.into();
        let ledger = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ledger::default(),
            Err(e) => return Err(e),
        };
        info!(path = %path.display(), entries = ledger.entries.len(), "destination ledger opened");
        Ok(Self {
            path,
            prefix: prefix.into(),
            ledger: Mutex::new(ledger),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of every entry in creation order
    pub async fn entries(&self) -> Vec<LedgerEntry> {
        self.ledger.lock().await.entries.clone()
    }

    async fn flush(&self, ledger: &Ledger) -> io::Result<()> {
        let bytes = serde_json::to_vec_pretty(ledger)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await
    }
}

#[async_trait]
impl DestinationSystem for JsonLedgerDestination {
    fn destination_id(&self) -> &str {
        &self.prefix
    }

    async fn find_by_source_key(&self, source_key: &SourceKey) -> Result<Option<DestKey>, BackendError> {
        let ledger = self.ledger.lock().await;
        Ok(ledger
            .entries
            .iter()
            .find(|e| &e.source_key == source_key)
            .map(|e| e.dest_key.clone()))
    }

    async fn create(&self, record: &TranslatedRecord, source_key: &SourceKey) -> Result<DestKey, BackendError> {
        validate(record)?;
        let mut ledger = self.ledger.lock().await;
        let next = ledger.next + 1;
        let dest_key = DestKey::new(format!("{}-{next}", self.prefix));
        ledger.entries.push(LedgerEntry {
            dest_key: dest_key.clone(),
            source_key: source_key.clone(),
            record: record.clone(),
            created_at: Utc::now(),
        });
        ledger.next = next;

        if let Err(e) = self.flush(&ledger).await {
            ledger.entries.pop();
            ledger.next = next - 1;
            return Err(BackendError::Unavailable(format!(
                "ledger write to {} failed: {e}",
                self.path.display()
            )));
        }
        debug!(dest = %dest_key, source = %source_key, "ledger entry written");
        Ok(dest_key)
    }
}
