use pretty_assertions::assert_eq;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use trackmig_core::{SkipReason, SourceKey};
use trackmig_engine::{Checkpoint, CheckpointStore, FinalStatus, PageToken};
use trackmig_test_utils::{
    mapping, numbered_records, test_config, FlakyDestination, FlakySource, Harness, SOURCE_ID,
};

fn key(k: &str) -> SourceKey {
    SourceKey::new(k)
}

fn alice() -> Harness {
    Harness::new(numbered_records(10, "alice"), 3, mapping(&[("alice", "alice@tracker")]))
}

#[tokio::test]
async fn test_resume_after_pause_processes_rest_exactly_once() {
    let token = CancellationToken::new();
    let harness = alice();
    let flaky = Arc::new(FlakySource::new(harness.source.clone()).cancel_on_call(3, token.clone()));
    let harness = harness.with_source(flaky.clone());

    let paused = harness
        .coordinator(test_config())
        .with_cancellation(token)
        .run()
        .await
        .unwrap();
    assert_eq!(paused.final_status, FinalStatus::Paused);
    assert_eq!(paused.pages_completed, 2);
    assert_eq!(paused.created, 6);

    let checkpoint = harness.store.get(SOURCE_ID).unwrap();
    assert_eq!(checkpoint.last_page_token, Some(PageToken::new("6")));
    assert_eq!(checkpoint.processed_count, 6);

    let resumed = harness.coordinator(test_config()).run().await.unwrap();
    assert_eq!(resumed.final_status, FinalStatus::Completed);
    assert!(resumed.resumed);
    assert_eq!(resumed.total_processed, 4);
    assert_eq!(resumed.created, 4);
    assert_eq!(resumed.pages_completed, 4);

    // three calls before the pause, two after; covered pages are not fetched again
    assert_eq!(flaky.list_calls(), 5);
    assert_eq!(harness.destination.len(), 10);
    for i in 0..10 {
        assert_eq!(harness.destination.count_tagged(&key(&format!("R-{i}"))), 1);
    }
    assert!(harness.store.get(SOURCE_ID).is_none());
    assert_eq!(harness.store.archived().len(), 1);
}

#[tokio::test]
async fn test_pause_mid_page_lets_dispatched_writes_finish() {
    let token = CancellationToken::new();
    let harness = Harness::new(numbered_records(4, "alice"), 10, mapping(&[("alice", "alice@tracker")]));
    let destination =
        Arc::new(FlakyDestination::new(harness.destination.clone()).cancel_on_create(2, token.clone()));

    let paused = harness
        .coordinator_to(test_config().with_concurrency(1), destination.clone())
        .with_cancellation(token)
        .run()
        .await
        .unwrap();
    assert_eq!(paused.final_status, FinalStatus::Paused);
    assert_eq!(paused.created, 2);
    assert_eq!(paused.pages_completed, 0);
    assert_eq!(harness.store.get(SOURCE_ID).unwrap().last_page_token, None);

    let resumed = harness
        .coordinator_to(test_config(), destination.clone())
        .run()
        .await
        .unwrap();
    assert_eq!(resumed.final_status, FinalStatus::Completed);
    assert_eq!(resumed.created, 2);
    assert_eq!(resumed.skipped_for(SkipReason::AlreadyMigrated).len(), 2);
    assert_eq!(harness.destination.len(), 4);
}

#[tokio::test]
async fn test_failed_keys_are_retried_on_resume() {
    let token = CancellationToken::new();
    let harness = Harness::new(numbered_records(6, "alice"), 2, mapping(&[("alice", "alice@tracker")]));
    harness.destination.reject("R-1", "summary too long");
    let flaky = Arc::new(FlakySource::new(harness.source.clone()).cancel_on_call(3, token.clone()));
    let harness = harness.with_source(flaky);

    let paused = harness
        .coordinator(test_config())
        .with_cancellation(token)
        .run()
        .await
        .unwrap();
    assert_eq!(paused.final_status, FinalStatus::Paused);
    assert_eq!(paused.failed, 1);
    let checkpoint = harness.store.get(SOURCE_ID).unwrap();
    assert_eq!(checkpoint.failed_keys.iter().collect::<Vec<_>>(), vec![&key("R-1")]);

    // data corrected on the destination side
    harness.destination.accept(&key("R-1"));

    let resumed = harness.coordinator(test_config()).run().await.unwrap();
    assert_eq!(resumed.final_status, FinalStatus::Completed);
    assert_eq!(resumed.created, 3);
    assert_eq!(resumed.failed, 0);
    assert_eq!(harness.destination.count_tagged(&key("R-1")), 1);
    assert!(harness.store.archived()[0].failed_keys.is_empty());
}

#[tokio::test]
async fn test_still_failing_key_stays_in_checkpoint() {
    let harness = Harness::new(numbered_records(2, "alice"), 10, mapping(&[("alice", "alice@tracker")]));
    harness.destination.reject("R-0", "summary too long");
    let mut checkpoint = Checkpoint::new(SOURCE_ID);
    checkpoint.advance(Some(PageToken::new("10")), 2, &[key("R-0")], &[]);
    harness.store.save(&checkpoint).await.unwrap();

    let summary = harness.coordinator(test_config()).run().await.unwrap();
    assert_eq!(summary.final_status, FinalStatus::CompletedWithFailures);
    assert_eq!(summary.failed_records[0].source_key, key("R-0"));
    assert!(harness.store.archived()[0].failed_keys.contains(&key("R-0")));
}

#[tokio::test]
async fn test_failed_key_gone_from_source_is_skipped() {
    let harness = alice();
    let mut checkpoint = Checkpoint::new(SOURCE_ID);
    checkpoint.failed_keys.insert(key("GONE-1"));
    harness.store.save(&checkpoint).await.unwrap();

    let summary = harness.coordinator(test_config()).run().await.unwrap();
    assert!(summary.resumed);
    assert_eq!(summary.skipped_for(SkipReason::MissingInSource), vec![&key("GONE-1")]);
    assert_eq!(summary.created, 10);
    assert_eq!(summary.final_status, FinalStatus::Completed);
}

#[tokio::test]
async fn test_exhausted_checkpoint_does_not_refetch() {
    let harness = alice();
    let flaky = Arc::new(FlakySource::new(harness.source.clone()));
    let harness = harness.with_source(flaky.clone());

    let mut checkpoint = Checkpoint::new(SOURCE_ID);
    checkpoint.advance(Some(PageToken::new("3")), 3, &[], &[]);
    checkpoint.advance(None, 7, &[], &[]);
    harness.store.save(&checkpoint).await.unwrap();

    let summary = harness.coordinator(test_config()).run().await.unwrap();
    assert_eq!(summary.final_status, FinalStatus::Completed);
    assert_eq!(summary.total_processed, 0);
    assert_eq!(summary.pages_completed, 2);
    assert_eq!(flaky.list_calls(), 0);
    assert_eq!(harness.store.archived().len(), 1);
}
