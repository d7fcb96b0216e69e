//! Destination writer
//!
//! Idempotent upsert on top of a [`DestinationSystem`]: look for a record
//! already tagged with the source key, create one only when none exists.
//! Repeating an upsert never creates a second record for the same key.
//!
//! The find-then-create pair is not atomic. A single engine instance is
//! assumed to own a given source-key space; two engines migrating
//! overlapping keys at the same time can still create duplicates.

use crate::error::{BackendError, RetryError};
use crate::retry::with_retry;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use trackmig_core::{DestKey, RetryPolicy, SourceKey, TranslatedRecord};

/// Capability exposed by a destination tracker
#[async_trait]
pub trait DestinationSystem: Send + Sync {
    /// Stable identifier used in logs
    fn destination_id(&self) -> &str;

    /// Find the record tagged with `source_key`
    async fn find_by_source_key(&self, source_key: &SourceKey) -> Result<Option<DestKey>, BackendError>;

    /// Create a record tagged with `source_key`
    async fn create(&self, record: &TranslatedRecord, source_key: &SourceKey) -> Result<DestKey, BackendError>;
}

/// Result of an upsert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert {
    /// A new record was created
    Created(DestKey),
    /// A record tagged with the key already existed; nothing was written
    Existing(DestKey),
}

impl Upsert {
    #[inline]
    #[must_use]
    pub fn dest_key(&self) -> &DestKey {
        match self {
            Self::Created(key) | Self::Existing(key) => key,
        }
    }
}

/// Retrying, idempotent writer
#[derive(Clone)]
pub struct DestinationWriter {
    system: Arc<dyn DestinationSystem>,
    policy: RetryPolicy,
}

impl DestinationWriter {
    #[must_use]
    pub fn new(system: Arc<dyn DestinationSystem>, policy: RetryPolicy) -> Self {
        Self { system, policy }
    }

    /// Identifier of the underlying destination
    #[inline]
    #[must_use]
    pub fn destination_id(&self) -> &str {
        self.system.destination_id()
    }

    /// Create `record` unless a record tagged with `source_key` exists
    ///
    /// A retried attempt repeats the lookup first, so a create that timed out
    /// after taking effect is found instead of duplicated. Such a record is
    /// still reported as `Created`, since this call wrote it.
    ///
    /// # Errors
    /// - `RetryError::Permanent` when the destination rejects the record
    /// - `RetryError::Exhausted` when the destination stays unreachable
    pub async fn upsert(&self, source_key: &SourceKey, record: &TranslatedRecord) -> Result<Upsert, RetryError> {
        let system = &self.system;
        let create_issued = &AtomicBool::new(false);
        with_retry(&self.policy, "upsert", || async move {
            if let Some(existing) = system.find_by_source_key(source_key).await? {
                if create_issued.load(Ordering::Relaxed) {
                    debug!(key = %source_key, dest = %existing, "earlier create took effect");
                    return Ok(Upsert::Created(existing));
                }
                return Ok(Upsert::Existing(existing));
            }
            create_issued.store(true, Ordering::Relaxed);
            system.create(record, source_key).await.map(Upsert::Created)
        })
        .await
    }

    /// Look up the record tagged with `source_key` without writing
    ///
    /// # Errors
    /// `RetryError` when the lookup keeps failing
    pub async fn lookup(&self, source_key: &SourceKey) -> Result<Option<DestKey>, RetryError> {
        let system = &self.system;
        with_retry(&self.policy, "find_by_source_key", || {
            system.find_by_source_key(source_key)
        })
        .await
    }
}

impl std::fmt::Debug for DestinationWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestinationWriter")
            .field("destination", &self.system.destination_id())
            .field("policy", &self.policy)
            .finish()
    }
}
