//! Progress events emitted during a run
//!
//! Observers subscribe with a bounded mpsc channel. A full channel applies
//! backpressure to the run; events are only dropped once the receiver is
//! gone.

use crate::report::{RunId, RunSummary, StatusFallback};
use crate::source::PageToken;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;
use trackmig_core::MigrationResult;

/// Event stream item
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    /// Run passed startup
    Started {
        run_id: RunId,
        source_id: String,
        resumed: bool,
        dry_run: bool,
    },
    /// A record reached a terminal outcome
    Record(MigrationResult),
    /// Page resolved and checkpoint persisted
    PageCommitted {
        pages_completed: u64,
        processed_count: u64,
        next_page_token: Option<PageToken>,
    },
    /// Source status fell back to the table default
    StatusFallback(StatusFallback),
    /// Run ended
    Finished(RunSummary),
}

/// Event publisher; a no-op without a subscriber
#[derive(Debug, Clone, Default)]
pub(crate) struct EventSink {
    tx: Option<mpsc::Sender<RunEvent>>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::Sender<RunEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub(crate) async fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).await.is_err() {
                trace!("event receiver closed; run event dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use trackmig_core::SourceKey;

    #[tokio::test]
    async fn delivers_to_subscriber() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = EventSink::new(tx);
        sink.emit(RunEvent::Record(MigrationResult::failed(
            SourceKey::new("C"),
            "boom",
            Utc::now(),
        )))
        .await;
        assert!(matches!(rx.recv().await, Some(RunEvent::Record(_))));
    }

    fn committed(pages: u64) -> RunEvent {
        RunEvent::PageCommitted {
            pages_completed: pages,
            processed_count: pages,
            next_page_token: None,
        }
    }

    #[tokio::test]
    async fn closed_channel_is_ignored() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sink = EventSink::new(tx);
        sink.emit(committed(1)).await;
        sink.emit(committed(2)).await;
        EventSink::default().emit(committed(1)).await;
    }

    #[tokio::test]
    async fn full_channel_waits_for_receiver() {
        let (tx, mut rx) = mpsc::channel(1);
        let sink = EventSink::new(tx);
        let producer = tokio::spawn(async move {
            for page in 1..=5 {
                sink.emit(committed(page)).await;
            }
        });

        let mut pages = Vec::new();
        while let Some(event) = rx.recv().await {
            if let RunEvent::PageCommitted { pages_completed, .. } = event {
                pages.push(pages_completed);
            }
        }
        producer.await.unwrap();
        assert_eq!(pages, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn events_serialize_with_tag() {
        let json = serde_json::to_value(RunEvent::PageCommitted {
            pages_completed: 2,
            processed_count: 100,
            next_page_token: Some(PageToken::new("100")),
        })
        .unwrap();
        assert_eq!(json["event"], "page_committed");
        assert_eq!(json["next_page_token"], "100");
    }
}
