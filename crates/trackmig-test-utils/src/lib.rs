//! Testing utilities for the trackmig workspace
//!
//! Shared fixtures, scenario setups, and fault-injecting backend wrappers.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use trackmig_core::{DestKey, MigrationConfig, RetryPolicy, SourceKey, SourceRecord, TranslatedRecord, UserMapping};
use trackmig_engine::backends::{MemoryDestination, SnapshotSource};
use trackmig_engine::{BackendError, DestinationSystem, MemoryCheckpointStore, MigrationCoordinator, Page, PageToken, SourceSystem};

pub const SOURCE_ID: &str = "jira";

pub fn record(key: &str) -> SourceRecord {
    SourceRecord::new(key, format!("Issue {key}"), "Open")
}

pub fn assigned(key: &str, user: &str) -> SourceRecord {
    record(key).with_assignee(user)
}

/// `count` records `R-0..` all assigned to `user`
pub fn numbered_records(count: usize, user: &str) -> Vec<SourceRecord> {
    (0..count).map(|i| assigned(&format!("R-{i}"), user)).collect()
}

pub fn mapping(pairs: &[(&str, &str)]) -> Arc<UserMapping> {
    Arc::new(UserMapping::from_pairs(pairs.iter().copied()))
}

/// Config with no query filter, immediate retries and a small worker pool
pub fn test_config() -> MigrationConfig {
    MigrationConfig::new()
        .with_query("")
        .with_retry(RetryPolicy::immediate(3))
        .with_concurrency(4)
}

/// Source, destination and checkpoint store for one test
pub struct Harness {
    pub source: Arc<dyn SourceSystem>,
    pub destination: Arc<MemoryDestination>,
    pub store: Arc<MemoryCheckpointStore>,
    pub mapping: Arc<UserMapping>,
}

impl Harness {
    pub fn new(records: Vec<SourceRecord>, page_size: usize, mapping: Arc<UserMapping>) -> Self {
        Self {
            source: Arc::new(SnapshotSource::new(SOURCE_ID, records, page_size)),
            destination: Arc::new(MemoryDestination::new("QUEUE")),
            store: Arc::new(MemoryCheckpointStore::new()),
            mapping,
        }
    }

    /// Replace the source, keeping destination and store
    pub fn with_source(mut self, source: Arc<dyn SourceSystem>) -> Self {
        self.source = source;
        self
    }

    pub fn coordinator(&self, config: MigrationConfig) -> MigrationCoordinator {
        self.coordinator_to(config, self.destination.clone())
    }

    /// Coordinator writing to another destination, e.g. a fault-injecting wrapper
    pub fn coordinator_to(&self, config: MigrationConfig, destination: Arc<dyn DestinationSystem>) -> MigrationCoordinator {
        MigrationCoordinator::new(config, Arc::clone(&self.source), destination, self.store.clone())
            .with_mapping(Arc::clone(&self.mapping))
    }
}

/// A: mapped assignee; B: unmapped assignee; C: rejected by the destination
pub fn abc_scenario() -> Harness {
    let records = vec![assigned("A", "alice"), assigned("B", "bob"), assigned("C", "carol")];
    let harness = Harness::new(records, 10, mapping(&[("alice", "alice@tracker"), ("carol", "carol@tracker")]));
    harness.destination.reject("C", "summary exceeds 255 characters");
    harness
}

fn cancel_if_due(trigger: &Mutex<Option<(usize, CancellationToken)>>, call: usize) {
    if let Some((at, token)) = trigger.lock().as_ref() {
        if *at == call {
            token.cancel();
        }
    }
}

/// Source wrapper that fails or cancels on chosen `list_records` calls
pub struct FlakySource {
    inner: Arc<dyn SourceSystem>,
    list_calls: AtomicUsize,
    fail_first: AtomicUsize,
    fail_after: AtomicUsize,
    down: AtomicBool,
    cancel_on: Mutex<Option<(usize, CancellationToken)>>,
}

impl FlakySource {
    pub fn new(inner: Arc<dyn SourceSystem>) -> Self {
        Self {
            inner,
            list_calls: AtomicUsize::new(0),
            fail_first: AtomicUsize::new(0),
            fail_after: AtomicUsize::new(usize::MAX),
            down: AtomicBool::new(false),
            cancel_on: Mutex::new(None),
        }
    }

    /// First `n` list calls fail with a transient error
    pub fn fail_first(self, n: usize) -> Self {
        self.fail_first.store(n, Ordering::SeqCst);
        self
    }

    /// List calls after the first `n` fail with a transient error
    pub fn fail_after(self, n: usize) -> Self {
        self.fail_after.store(n, Ordering::SeqCst);
        self
    }

    /// Every call fails with a transient error while down
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Cancel `token` while serving list call number `call` (1-based)
    pub fn cancel_on_call(self, call: usize, token: CancellationToken) -> Self {
        *self.cancel_on.lock() = Some((call, token));
        self
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceSystem for FlakySource {
    fn source_id(&self) -> &str {
        self.inner.source_id()
    }

    async fn list_records(&self, query: &str, page_token: Option<&PageToken>) -> Result<Page, BackendError> {
        let call = self.list_calls.fetch_add(1, Ordering::SeqCst) + 1;
        cancel_if_due(&self.cancel_on, call);
        let failing = self.down.load(Ordering::SeqCst)
            || call <= self.fail_first.load(Ordering::SeqCst)
            || call > self.fail_after.load(Ordering::SeqCst);
        if failing {
            return Err(BackendError::Unavailable("source returned 503".into()));
        }
        self.inner.list_records(query, page_token).await
    }

    async fn fetch_records(&self, keys: &[SourceKey]) -> Result<Vec<SourceRecord>, BackendError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("source returned 503".into()));
        }
        self.inner.fetch_records(keys).await
    }
}

/// Destination wrapper injecting transport faults in front of a [`MemoryDestination`]
pub struct FlakyDestination {
    inner: Arc<MemoryDestination>,
    creates: AtomicUsize,
    timeouts_before_write: AtomicUsize,
    lost_acks: AtomicUsize,
    down: AtomicBool,
    cancel_on: Mutex<Option<(usize, CancellationToken)>>,
}

impl FlakyDestination {
    pub fn new(inner: Arc<MemoryDestination>) -> Self {
        Self {
            inner,
            creates: AtomicUsize::new(0),
            timeouts_before_write: AtomicUsize::new(0),
            lost_acks: AtomicUsize::new(0),
            down: AtomicBool::new(false),
            cancel_on: Mutex::new(None),
        }
    }

    /// Next `n` creates time out without writing
    pub fn timeouts(self, n: usize) -> Self {
        self.timeouts_before_write.store(n, Ordering::SeqCst);
        self
    }

    /// Next `n` creates write the record but report a timeout
    pub fn lost_acks(self, n: usize) -> Self {
        self.lost_acks.store(n, Ordering::SeqCst);
        self
    }

    /// Every call fails as unreachable while down
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Cancel `token` while serving create number `call` (1-based)
    pub fn cancel_on_create(self, call: usize, token: CancellationToken) -> Self {
        *self.cancel_on.lock() = Some((call, token));
        self
    }

    /// Create calls received, including failed ones
    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    fn take_one(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl DestinationSystem for FlakyDestination {
    fn destination_id(&self) -> &str {
        self.inner.destination_id()
    }

    async fn find_by_source_key(&self, source_key: &SourceKey) -> Result<Option<DestKey>, BackendError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("connection refused".into()));
        }
        self.inner.find_by_source_key(source_key).await
    }

    async fn create(&self, record: &TranslatedRecord, source_key: &SourceKey) -> Result<DestKey, BackendError> {
        let call = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
        cancel_if_due(&self.cancel_on, call);
        if self.down.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("connection refused".into()));
        }
        if Self::take_one(&self.timeouts_before_write) {
            return Err(BackendError::Timeout);
        }
        let dest_key = self.inner.create(record, source_key).await?;
        if Self::take_one(&self.lost_acks) {
            return Err(BackendError::Timeout);
        }
        Ok(dest_key)
    }
}
