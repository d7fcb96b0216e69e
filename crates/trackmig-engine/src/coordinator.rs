//! Migration coordinator
//!
//! Drives one run: loads the identity mapping and checkpoint, retries keys
//! that failed last time, then walks the source page by page. Records within
//! a page are translated and written concurrently, up to the configured
//! limit; the page boundary is a barrier, and the checkpoint only advances
//! once every record of the page has a terminal outcome.
//!
//! ```text
//! Starting ──▶ Running ──▶ Completed   (source exhausted, checkpoint archived)
//!    │            ├──────▶ Paused      (cancelled, checkpoint flushed)
//!    └────────────┴──────▶ Failed      (systemic error, checkpoint kept)
//! ```

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::destination::{DestinationSystem, DestinationWriter, Upsert};
use crate::error::MigrationError;
use crate::events::{EventSink, RunEvent};
use crate::report::{FinalStatus, ResultLog, RunId, RunSummary, StatusFallback};
use crate::source::{SourceReader, SourceSystem};
use crate::state::{validate_transition, RunState};
use chrono::{DateTime, Utc};
use futures::future;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use trackmig_core::{
    translate, MigrationConfig, MigrationResult, SkipReason, SourceKey, SourceRecord, StatusTable,
    UserMapping,
};

/// Supervises a migration from one source into one destination
pub struct MigrationCoordinator {
    config: MigrationConfig,
    source: Arc<dyn SourceSystem>,
    destination: Arc<dyn DestinationSystem>,
    checkpoints: Arc<dyn CheckpointStore>,
    mapping: Option<Arc<UserMapping>>,
    cancel: CancellationToken,
    events: EventSink,
}

impl MigrationCoordinator {
    #[must_use]
    pub fn new(
        config: MigrationConfig,
        source: Arc<dyn SourceSystem>,
        destination: Arc<dyn DestinationSystem>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            config,
            source,
            destination,
            checkpoints,
            mapping: None,
            cancel: CancellationToken::new(),
            events: EventSink::default(),
        }
    }

    /// Use an already loaded mapping instead of reading `config.mapping.path`
    #[inline]
    #[must_use]
    pub fn with_mapping(mut self, mapping: Arc<UserMapping>) -> Self {
        self.mapping = Some(mapping);
        self
    }

    /// Share a cancellation token with the caller
    #[inline]
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Publish progress events to `tx`
    ///
    /// Every event is delivered while the receiver is alive; a full channel
    /// holds the run back until the receiver catches up.
    #[inline]
    #[must_use]
    pub fn with_events(mut self, tx: mpsc::Sender<RunEvent>) -> Self {
        self.events = EventSink::new(tx);
        self
    }

    /// Token that pauses the run when cancelled
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Execute the run
    ///
    /// Per-record failures never abort the run; they are counted in the
    /// summary. Systemic failures during the run end it with
    /// [`FinalStatus::Failed`] and leave the last checkpoint in place.
    ///
    /// # Errors
    /// Startup failures: invalid configuration, unreadable identity mapping,
    /// or a checkpoint that cannot be loaded or belongs to another source.
    pub async fn run(&self) -> Result<RunSummary, MigrationError> {
        let run_id = RunId::new();
        let started_at = Utc::now();
        let source_id = self.source.source_id().to_string();
        let mut state = RunState::Starting;

        let (mapping, checkpoint) = match self.start(&source_id).await {
            Ok(loaded) => loaded,
            Err(e) => {
                error!(%run_id, source = %source_id, error = %e, "migration failed to start");
                transition(&mut state, RunState::Failed)?;
                return Err(e);
            }
        };
        transition(&mut state, RunState::Running)?;

        let resumed = !checkpoint.is_fresh() || checkpoint.last_page_token.is_some();
        info!(
            %run_id,
            source = %source_id,
            destination = self.destination.destination_id(),
            resumed,
            dry_run = self.config.dry_run,
            concurrency = self.config.concurrency,
            pending_failed = checkpoint.failed_keys.len(),
            "migration started"
        );
        self.events.emit(RunEvent::Started {
            run_id,
            source_id: source_id.clone(),
            resumed,
            dry_run: self.config.dry_run,
        })
        .await;

        let writer = DestinationWriter::new(Arc::clone(&self.destination), self.config.retry.clone());
        let ctx = RecordContext {
            mapping: &mapping,
            statuses: &self.config.status,
            writer: &writer,
            dry_run: self.config.dry_run,
        };
        let mut progress = Progress::new(checkpoint);

        let final_status = self.drive(&ctx, &mut progress).await;
        let next_state = match &final_status {
            FinalStatus::Completed | FinalStatus::CompletedWithFailures => RunState::Completed,
            FinalStatus::Paused => RunState::Paused,
            FinalStatus::Failed { .. } => RunState::Failed,
        };
        transition(&mut state, next_state)?;

        let summary = progress.summarize(run_id, source_id, started_at, final_status, resumed, self.config.dry_run);
        match &summary.final_status {
            FinalStatus::Failed { reason } => error!(
                %run_id,
                reason = %reason,
                processed = summary.total_processed,
                "migration halted"
            ),
            status => info!(
                %run_id,
                status = %status,
                processed = summary.total_processed,
                created = summary.created,
                skipped = summary.skipped,
                failed = summary.failed,
                "migration finished"
            ),
        }
        self.events.emit(RunEvent::Finished(summary.clone())).await;
        Ok(summary)
    }

    async fn start(&self, source_id: &str) -> Result<(Arc<UserMapping>, Checkpoint), MigrationError> {
        self.config.validate()?;

        let mapping = match &self.mapping {
            Some(mapping) => Arc::clone(mapping),
            None => Arc::new(UserMapping::from_path(
                &self.config.mapping.path,
                &self.config.mapping.columns,
            )?),
        };

        let checkpoint = match self.checkpoints.load(source_id).await? {
            Some(checkpoint) => {
                checkpoint.validate_for(source_id)?;
                checkpoint
            }
            None => Checkpoint::new(source_id),
        };
        Ok((mapping, checkpoint))
    }

    /// Retry pass, then the page loop; returns how the run ended
    async fn drive(&self, ctx: &RecordContext<'_>, progress: &mut Progress) -> FinalStatus {
        if let Some(status) = self.retry_failed_keys(ctx, progress).await {
            return status;
        }

        let mut reader = SourceReader::new(Arc::clone(&self.source), self.config.query.clone(), self.config.retry.clone());
        reader = if progress.checkpoint.source_exhausted {
            reader.exhausted()
        } else {
            reader.resume_at(progress.checkpoint.last_page_token.clone())
        };

        loop {
            let fetched = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return self.pause(progress).await,
                fetched = reader.next_page() => fetched,
            };
            let page = match fetched {
                Ok(Some(page)) => page,
                Ok(None) => break,
                Err(e) => return failed(&MigrationError::Source(e)),
            };

            let batch = self.run_batch(ctx, page.records, progress).await;
            if !batch.complete {
                return self.pause(progress).await;
            }

            progress.checkpoint.advance(
                page.next_page_token.clone(),
                batch.processed,
                &batch.failed,
                &batch.resolved,
            );
            if let Err(reason) = self.persist(&progress.checkpoint).await {
                return reason;
            }
            info!(
                page = progress.checkpoint.pages_completed,
                processed = progress.checkpoint.processed_count,
                failed = batch.failed.len(),
                "page committed"
            );
            self.events.emit(RunEvent::PageCommitted {
                pages_completed: progress.checkpoint.pages_completed,
                processed_count: progress.checkpoint.processed_count,
                next_page_token: page.next_page_token,
            })
            .await;

            if let Some(status) = self.check_breaker(progress, &batch) {
                return status;
            }
        }

        if !self.config.dry_run {
            if let Err(e) = self.checkpoints.archive(&progress.checkpoint.source_id).await {
                return failed(&MigrationError::Checkpoint(e));
            }
        }
        if progress.log.entries().iter().any(|r| r.outcome.is_failed()) {
            FinalStatus::CompletedWithFailures
        } else {
            FinalStatus::Completed
        }
    }

    /// Retry keys a previous run left `Failed`
    ///
    /// Returns a final status when the run must stop here.
    async fn retry_failed_keys(&self, ctx: &RecordContext<'_>, progress: &mut Progress) -> Option<FinalStatus> {
        if progress.checkpoint.failed_keys.is_empty() {
            return None;
        }
        let keys: Vec<SourceKey> = progress.checkpoint.failed_keys.iter().cloned().collect();
        info!(keys = keys.len(), "retrying keys that failed in an earlier run");

        let reader = SourceReader::new(Arc::clone(&self.source), self.config.query.clone(), self.config.retry.clone());
        let fetched = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Some(self.pause(progress).await),
            fetched = reader.fetch(&keys) => fetched,
        };
        let records = match fetched {
            Ok(records) => records,
            Err(e) => return Some(failed(&MigrationError::Source(e))),
        };

        let wanted: HashSet<&SourceKey> = keys.iter().collect();
        let records: Vec<SourceRecord> = records.into_iter().filter(|r| wanted.contains(&r.key)).collect();
        let found: HashSet<SourceKey> = records.iter().map(|r| r.key.clone()).collect();

        let mut missing = BatchReport::default();
        for key in keys.iter().filter(|k| !found.contains(*k)) {
            warn!(key = %key, "failed key no longer exists in source");
            progress.settle(
                RecordOutcome::settled(MigrationResult::skipped(
                    key.clone(),
                    None,
                    SkipReason::MissingInSource,
                    Utc::now(),
                )),
                &mut missing,
                &self.events,
            )
            .await;
        }

        let mut batch = self.run_batch(ctx, records, progress).await;
        batch.resolved.extend(missing.resolved);
        progress.checkpoint.resolve_failed(&batch.resolved);
        if let Err(status) = self.persist(&progress.checkpoint).await {
            return Some(status);
        }
        info!(
            resolved = batch.resolved.len(),
            still_failed = progress.checkpoint.failed_keys.len(),
            "retry pass finished"
        );

        if !batch.complete {
            return Some(self.pause(progress).await);
        }
        self.check_breaker(progress, &batch)
    }

    /// Translate and write one batch of records concurrently
    async fn run_batch(&self, ctx: &RecordContext<'_>, records: Vec<SourceRecord>, progress: &mut Progress) -> BatchReport {
        let mut seen = HashSet::new();
        let pending: Vec<SourceRecord> = records
            .into_iter()
            .filter(|record| {
                let fresh = !progress.log.contains(&record.key) && seen.insert(record.key.clone());
                if !fresh {
                    debug!(key = %record.key, "key already has a result in this run");
                }
                fresh
            })
            .collect();

        let expected = pending.len();
        let cancel = &self.cancel;
        let mut outcomes = stream::iter(pending)
            .take_while(|_| future::ready(!cancel.is_cancelled()))
            .map(|record| process_record(ctx, record))
            .buffer_unordered(self.config.concurrency);

        let mut report = BatchReport::default();
        let mut settled = 0;
        while let Some(outcome) = outcomes.next().await {
            settled += 1;
            progress.settle(outcome, &mut report, &self.events).await;
        }
        report.complete = settled == expected;
        report
    }

    async fn persist(&self, checkpoint: &Checkpoint) -> Result<(), FinalStatus> {
        if self.config.dry_run {
            return Ok(());
        }
        self.checkpoints
            .save(checkpoint)
            .await
            .map_err(|e| failed(&MigrationError::Checkpoint(e)))
    }

    async fn pause(&self, progress: &Progress) -> FinalStatus {
        info!(
            pages_completed = progress.checkpoint.pages_completed,
            "cancellation requested; pausing"
        );
        match self.persist(&progress.checkpoint).await {
            Ok(()) => FinalStatus::Paused,
            Err(status) => status,
        }
    }

    fn check_breaker(&self, progress: &mut Progress, batch: &BatchReport) -> Option<FinalStatus> {
        if batch.attempted_writes == 0 {
            return None;
        }
        if batch.exhausted_writes < batch.attempted_writes {
            progress.unreachable_pages = 0;
            return None;
        }
        progress.unreachable_pages += 1;
        warn!(
            consecutive = progress.unreachable_pages,
            limit = self.config.circuit_breaker_pages,
            "every write in batch failed with destination unreachable"
        );
        let limit = self.config.circuit_breaker_pages;
        (limit > 0 && progress.unreachable_pages >= limit).then(|| {
            failed(&MigrationError::DestinationUnreachable {
                pages: progress.unreachable_pages,
            })
        })
    }
}

impl std::fmt::Debug for MigrationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationCoordinator")
            .field("source", &self.source.source_id())
            .field("destination", &self.destination.destination_id())
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

fn transition(state: &mut RunState, to: RunState) -> Result<(), MigrationError> {
    validate_transition(*state, to)?;
    debug!(from = ?*state, to = ?to, "run state transition");
    *state = to;
    Ok(())
}

fn failed(err: &MigrationError) -> FinalStatus {
    FinalStatus::Failed {
        reason: err.to_string(),
    }
}

/// Read-only inputs shared by every in-flight record
struct RecordContext<'a> {
    mapping: &'a UserMapping,
    statuses: &'a StatusTable,
    writer: &'a DestinationWriter,
    dry_run: bool,
}

/// Terminal outcome of one record plus what the coordinator needs to know
struct RecordOutcome {
    result: MigrationResult,
    status_fallback: Option<StatusFallback>,
    write_attempted: bool,
    destination_unreachable: bool,
}

impl RecordOutcome {
    fn settled(result: MigrationResult) -> Self {
        Self {
            result,
            status_fallback: None,
            write_attempted: false,
            destination_unreachable: false,
        }
    }
}

async fn process_record(ctx: &RecordContext<'_>, record: SourceRecord) -> RecordOutcome {
    let attempted_at = Utc::now();
    let translation = translate(&record, ctx.mapping, ctx.statuses);
    let key = record.key;

    if let Some(user) = &translation.unmapped_assignee {
        warn!(key = %key, assignee = %user, "assignee has no mapping entry; record skipped");
        return RecordOutcome::settled(MigrationResult::skipped(
            key,
            None,
            SkipReason::UnmappedAssignee,
            attempted_at,
        ));
    }

    let status_fallback = translation.status_fallback.map(|source_status| StatusFallback {
        source_key: key.clone(),
        source_status,
        applied_status: translation.record.status.clone(),
    });

    let written = if ctx.dry_run {
        ctx.writer.lookup(&key).await.map(|found| found.map(Upsert::Existing))
    } else {
        ctx.writer.upsert(&key, &translation.record).await.map(Some)
    };

    let (result, destination_unreachable) = match written {
        Ok(Some(Upsert::Created(dest_key))) => {
            debug!(key = %key, dest = %dest_key, "record created");
            (MigrationResult::created(key, Some(dest_key), attempted_at), false)
        }
        Ok(Some(Upsert::Existing(dest_key))) => {
            debug!(key = %key, dest = %dest_key, "record already migrated");
            (
                MigrationResult::skipped(key, Some(dest_key), SkipReason::AlreadyMigrated, attempted_at),
                false,
            )
        }
        Ok(None) => {
            debug!(key = %key, "record would be created");
            (MigrationResult::created(key, None, attempted_at), false)
        }
        Err(e) => {
            warn!(key = %key, error = %e, "record failed");
            let unreachable = e.is_exhausted();
            (MigrationResult::failed(key, e.to_string(), attempted_at), unreachable)
        }
    };

    RecordOutcome {
        result,
        status_fallback,
        write_attempted: true,
        destination_unreachable,
    }
}

/// What one batch did, as the checkpoint and circuit breaker see it
#[derive(Debug, Default)]
struct BatchReport {
    /// Every pending record reached an outcome
    complete: bool,
    processed: u64,
    failed: Vec<SourceKey>,
    resolved: Vec<SourceKey>,
    attempted_writes: usize,
    exhausted_writes: usize,
}

/// Mutable run state owned by the coordinating task
struct Progress {
    log: ResultLog,
    fallbacks: Vec<StatusFallback>,
    checkpoint: Checkpoint,
    unreachable_pages: u32,
}

impl Progress {
    fn new(checkpoint: Checkpoint) -> Self {
        Self {
            log: ResultLog::new(),
            fallbacks: Vec::new(),
            checkpoint,
            unreachable_pages: 0,
        }
    }

    async fn settle(&mut self, outcome: RecordOutcome, report: &mut BatchReport, events: &EventSink) {
        if outcome.write_attempted {
            report.attempted_writes += 1;
            if outcome.destination_unreachable {
                report.exhausted_writes += 1;
            }
        }

        let key = outcome.result.source_key.clone();
        let is_failed = outcome.result.outcome.is_failed();
        events.emit(RunEvent::Record(outcome.result.clone())).await;
        if let Err(duplicate) = self.log.append(outcome.result) {
            debug!(key = %duplicate.source_key, "duplicate result ignored");
            return;
        }
        report.processed += 1;
        if is_failed {
            report.failed.push(key);
        } else {
            report.resolved.push(key);
        }

        if let Some(fallback) = outcome.status_fallback {
            warn!(
                key = %fallback.source_key,
                status = %fallback.source_status,
                applied = %fallback.applied_status,
                "status not in status table; default applied"
            );
            self.fallbacks.push(fallback.clone());
            events.emit(RunEvent::StatusFallback(fallback)).await;
        }
    }

    fn summarize(
        self,
        run_id: RunId,
        source_id: String,
        started_at: DateTime<Utc>,
        final_status: FinalStatus,
        resumed: bool,
        dry_run: bool,
    ) -> RunSummary {
        let mut summary = RunSummary::new(run_id, source_id, started_at).with_results(&self.log);
        summary.final_status = final_status;
        summary.status_fallbacks = self.fallbacks;
        summary.pages_completed = self.checkpoint.pages_completed;
        summary.resumed = resumed;
        summary.dry_run = dry_run;
        summary.finished_at = Utc::now();
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{MemoryDestination, SnapshotSource};
    use crate::checkpoint::MemoryCheckpointStore;
    use trackmig_core::RetryPolicy;

    fn config() -> MigrationConfig {
        MigrationConfig::new()
            .with_retry(RetryPolicy::immediate(2))
            .with_concurrency(4)
    }

    fn mapping() -> Arc<UserMapping> {
        Arc::new(UserMapping::from_pairs([("alice", "alice@dest")]))
    }

    #[tokio::test]
    async fn empty_source_completes() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let coordinator = MigrationCoordinator::new(
            config(),
            Arc::new(SnapshotSource::new("jira", Vec::new(), 10)),
            Arc::new(MemoryDestination::new("Q")),
            store.clone(),
        )
        .with_mapping(mapping());

        let summary = coordinator.run().await.unwrap();
        assert_eq!(summary.final_status, FinalStatus::Completed);
        assert_eq!(summary.total_processed, 0);
        assert_eq!(summary.pages_completed, 1);
        assert_eq!(store.archived().len(), 1);
    }

    #[tokio::test]
    async fn invalid_config_is_startup_error() {
        let coordinator = MigrationCoordinator::new(
            config().with_concurrency(0),
            Arc::new(SnapshotSource::new("jira", Vec::new(), 10)),
            Arc::new(MemoryDestination::new("Q")),
            Arc::new(MemoryCheckpointStore::new()),
        )
        .with_mapping(mapping());

        let err = coordinator.run().await.unwrap_err();
        assert!(err.is_startup());
    }

    #[tokio::test]
    async fn dry_run_never_writes() {
        let destination = Arc::new(MemoryDestination::new("Q"));
        let store = Arc::new(MemoryCheckpointStore::new());
        let records = vec![
            SourceRecord::new("A", "first", "Open").with_assignee("alice"),
            SourceRecord::new("B", "second", "Open").with_assignee("bob"),
        ];
        let coordinator = MigrationCoordinator::new(
            config().with_dry_run(true),
            Arc::new(SnapshotSource::new("jira", records, 10)),
            destination.clone(),
            store.clone(),
        )
        .with_mapping(mapping());

        let summary = coordinator.run().await.unwrap();
        assert!(summary.dry_run);
        assert_eq!((summary.created, summary.skipped), (1, 1));
        assert!(destination.is_empty());
        assert_eq!(store.save_count(), 0);
        assert!(store.archived().is_empty());
    }

    #[tokio::test]
    async fn cancelled_before_start_pauses() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let records = vec![SourceRecord::new("A", "first", "Open")];
        let coordinator = MigrationCoordinator::new(
            config(),
            Arc::new(SnapshotSource::new("jira", records, 10)),
            Arc::new(MemoryDestination::new("Q")),
            store.clone(),
        )
        .with_mapping(mapping());
        coordinator.cancellation_token().cancel();

        let summary = coordinator.run().await.unwrap();
        assert_eq!(summary.final_status, FinalStatus::Paused);
        assert_eq!(summary.total_processed, 0);
        assert!(store.get("jira").is_some());
    }
}
