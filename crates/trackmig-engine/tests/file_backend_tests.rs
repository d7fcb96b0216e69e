use std::path::Path;
use std::sync::Arc;
use trackmig_core::{DestUserId, MappingColumns, MappingConfig, MigrationConfig, RetryPolicy, SkipReason, SourceKey};
use trackmig_engine::prelude::*;

const EXPORT: &str = r#"{"key":"PROJ-1","title":"Login fails","status":"Open","assignee":"jsmith","created_at":"2024-03-01T10:00:00Z"}
{"key":"PROJ-2","title":"Broken docs","status":"Done","assignee":"unknown","created_at":"2024-03-02T10:00:00Z"}
{"key":"PROJ-3","title":"Crash on save","status":"In Progress","assignee":"mdoe","created_at":"2024-03-03T10:00:00Z"}
"#;

const MAPPING: &str = "\u{feff}jira_user,tracker_user\njsmith,john.smith\nmdoe,mary.doe\n";

fn config(dir: &Path) -> MigrationConfig {
    MigrationConfig::new()
        .with_retry(RetryPolicy::immediate(2))
        .with_mapping(MappingConfig {
            path: dir.join("user_mapping.csv"),
            columns: MappingColumns::named("jira_user", "tracker_user"),
        })
}

async fn run(dir: &Path) -> RunSummary {
    let source = SnapshotSource::from_export_file("jira", dir.join("export.jsonl"), 2)
        .await
        .unwrap();
    let destination = JsonLedgerDestination::open(dir.join("ledger.json"), "QUEUE")
        .await
        .unwrap();
    let checkpoints = FileCheckpointStore::new(dir.join("checkpoints"));

    MigrationCoordinator::new(
        config(dir),
        Arc::new(source),
        Arc::new(destination),
        Arc::new(checkpoints),
    )
    .run()
    .await
    .unwrap()
}

#[tokio::test]
async fn test_file_backed_run_and_rerun() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("export.jsonl"), EXPORT).unwrap();
    std::fs::write(dir.path().join("user_mapping.csv"), MAPPING).unwrap();

    let first = run(dir.path()).await;
    assert_eq!(first.final_status, FinalStatus::Completed);
    assert_eq!(first.created, 2);
    assert_eq!(
        first.skipped_for(SkipReason::UnmappedAssignee),
        vec![&SourceKey::new("PROJ-2")]
    );
    assert_eq!(first.pages_completed, 2);

    let store = FileCheckpointStore::new(dir.path().join("checkpoints"));
    assert!(!store.path_for("jira").exists());

    let ledger = JsonLedgerDestination::open(dir.path().join("ledger.json"), "QUEUE")
        .await
        .unwrap();
    let entries = ledger.entries().await;
    assert_eq!(entries.len(), 2);
    let crash = entries
        .iter()
        .find(|e| e.source_key == SourceKey::new("PROJ-3"))
        .unwrap();
    assert_eq!(crash.record.assignee, Some(DestUserId::new("mary.doe")));
    assert_eq!(crash.record.status, "InProgress");
    drop(ledger);

    let second = run(dir.path()).await;
    assert_eq!(second.created, 0);
    assert_eq!(second.skipped_for(SkipReason::AlreadyMigrated).len(), 2);

    let ledger = JsonLedgerDestination::open(dir.path().join("ledger.json"), "QUEUE")
        .await
        .unwrap();
    assert_eq!(ledger.entries().await.len(), 2);
}
