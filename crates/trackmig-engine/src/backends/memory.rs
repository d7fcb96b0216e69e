//! In-memory destination
//!
//! Behaves like a tracker queue: issues keys `<PREFIX>-<n>`, tags each
//! record with its source key, and rejects records failing validation.

use crate::destination::DestinationSystem;
use crate::error::BackendError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use trackmig_core::{DestKey, SourceKey, TranslatedRecord};

/// A record held by a destination, with the source key it is tagged with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub dest_key: DestKey,
    pub source_key: SourceKey,
    pub record: TranslatedRecord,
}

#[derive(Debug, Default)]
struct Queue {
    next: u64,
    records: Vec<StoredRecord>,
}

/// Process-local destination queue
#[derive(Debug)]
pub struct MemoryDestination {
    prefix: String,
    queue: Mutex<Queue>,
    rejections: Mutex<HashMap<SourceKey, String>>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryDestination {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            queue: Mutex::new(Queue::default()),
            rejections: Mutex::new(HashMap::new()),
            latency: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Delay every call, so concurrent calls overlap
    #[inline]
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Reject creation of the record tagged `source_key`
    pub fn reject(&self, source_key: impl Into<SourceKey>, reason: impl Into<String>) {
        self.rejections.lock().insert(source_key.into(), reason.into());
    }

    /// Stop rejecting `source_key`
    pub fn accept(&self, source_key: &SourceKey) {
        self.rejections.lock().remove(source_key);
    }

    /// Insert a record as if an earlier run had created it
    pub fn seed(&self, record: TranslatedRecord) -> DestKey {
        let mut queue = self.queue.lock();
        self.push(&mut queue, record.source_key.clone(), record)
    }

    /// Records tagged with `source_key`
    #[must_use]
    pub fn count_tagged(&self, source_key: &SourceKey) -> usize {
        self.queue
            .lock()
            .records
            .iter()
            .filter(|r| &r.source_key == source_key)
            .count()
    }

    /// First record tagged with `source_key`
    #[must_use]
    pub fn get(&self, source_key: &SourceKey) -> Option<StoredRecord> {
        self.queue
            .lock()
            .records
            .iter()
            .find(|r| &r.source_key == source_key)
            .cloned()
    }

    /// All records in creation order
    #[must_use]
    pub fn records(&self) -> Vec<StoredRecord> {
        self.queue.lock().records.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest number of calls observed in progress at once
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn push(&self, queue: &mut Queue, source_key: SourceKey, record: TranslatedRecord) -> DestKey {
        queue.next += 1;
        let dest_key = DestKey::new(format!("{}-{}", self.prefix, queue.next));
        queue.records.push(StoredRecord {
            dest_key: dest_key.clone(),
            source_key,
            record,
        });
        dest_key
    }

    async fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        InFlight(&self.in_flight)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Validation applied to every create
pub(crate) fn validate(record: &TranslatedRecord) -> Result<(), BackendError> {
    if record.title.trim().is_empty() {
        return Err(BackendError::Rejected("title must not be empty".to_string()));
    }
    Ok(())
}

#[async_trait]
impl DestinationSystem for MemoryDestination {
    fn destination_id(&self) -> &str {
        &self.prefix
    }

    async fn find_by_source_key(&self, source_key: &SourceKey) -> Result<Option<DestKey>, BackendError> {
        let _guard = self.enter().await;
        Ok(self.get(source_key).map(|r| r.dest_key))
    }

    async fn create(&self, record: &TranslatedRecord, source_key: &SourceKey) -> Result<DestKey, BackendError> {
        let _guard = self.enter().await;
        if let Some(reason) = self.rejections.lock().get(source_key) {
            return Err(BackendError::Rejected(reason.clone()));
        }
        validate(record)?;
        let mut queue = self.queue.lock();
        Ok(self.push(&mut queue, source_key.clone(), record.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(key: &str, title: &str) -> TranslatedRecord {
        TranslatedRecord {
            source_key: SourceKey::new(key),
            assignee: None,
            title: title.to_string(),
            description: String::new(),
            status: "New".to_string(),
        }
    }

    #[tokio::test]
    async fn issues_sequential_keys() {
        let destination = MemoryDestination::new("QUEUE");
        let a = destination.create(&record("A", "a"), &SourceKey::new("A")).await.unwrap();
        let b = destination.create(&record("B", "b"), &SourceKey::new("B")).await.unwrap();
        assert_eq!(a, DestKey::new("QUEUE-1"));
        assert_eq!(b, DestKey::new("QUEUE-2"));
        assert_eq!(
            destination.find_by_source_key(&SourceKey::new("B")).await.unwrap(),
            Some(b)
        );
    }

    #[tokio::test]
    async fn rejects_empty_title() {
        let destination = MemoryDestination::new("QUEUE");
        let err = destination
            .create(&record("A", "   "), &SourceKey::new("A"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Rejected(_)));
        assert!(destination.is_empty());
    }

    #[tokio::test]
    async fn seeded_record_is_found() {
        let destination = MemoryDestination::new("QUEUE");
        let key = destination.seed(record("A", "a"));
        assert_eq!(
            destination.find_by_source_key(&SourceKey::new("A")).await.unwrap(),
            Some(key)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn tracks_overlapping_calls() {
        let destination = Arc::new(MemoryDestination::new("QUEUE").with_latency(Duration::from_millis(10)));
        let calls = (0..3).map(|i| {
            let destination = Arc::clone(&destination);
            tokio::spawn(async move {
                let key = SourceKey::new(format!("K-{i}"));
                destination.find_by_source_key(&key).await
            })
        });
        for call in futures::future::join_all(calls).await {
            call.unwrap().unwrap();
        }
        assert_eq!(destination.max_in_flight(), 3);
    }
}
