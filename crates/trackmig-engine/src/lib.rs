//! trackmig engine - Resumable, idempotent tracker migration
//!
//! Moves records from a source tracker into a destination tracker:
//! 1. **Read**: page through the source with [`SourceReader`]
//! 2. **Translate**: map assignees and statuses with `trackmig_core::translate`
//! 3. **Write**: upsert through [`DestinationWriter`], tagged by source key
//!
//! The [`MigrationCoordinator`] supervises the pipeline, persists a
//! [`Checkpoint`] after every page, and returns a [`RunSummary`].
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use trackmig_core::{MigrationConfig, SourceRecord, UserMapping};
//! use trackmig_engine::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), MigrationError> {
//! let source = SnapshotSource::new(
//!     "jira",
//!     vec![SourceRecord::new("PROJ-1", "Fix login", "Open").with_assignee("alice")],
//!     50,
//! );
//! let mapping = UserMapping::from_pairs([("alice", "alice@tracker")]);
//!
//! let coordinator = MigrationCoordinator::new(
//!     MigrationConfig::new(),
//!     Arc::new(source),
//!     Arc::new(MemoryDestination::new("QUEUE")),
//!     Arc::new(MemoryCheckpointStore::new()),
//! )
//! .with_mapping(Arc::new(mapping));
//!
//! let summary = coordinator.run().await?;
//! assert_eq!(summary.final_status, FinalStatus::Completed);
//! assert_eq!(summary.created, 1);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Pipeline
pub mod coordinator;
pub mod destination;
pub mod source;

// Run bookkeeping
pub mod checkpoint;
pub mod events;
pub mod report;
pub mod state;

// Shared plumbing
pub mod backends;
pub mod error;
pub mod retry;

// Re-exports
pub use checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, CHECKPOINT_VERSION};
pub use coordinator::MigrationCoordinator;
pub use destination::{DestinationSystem, DestinationWriter, Upsert};
pub use error::{BackendError, CheckpointError, MigrationError, RetryError};
pub use events::RunEvent;
pub use report::{FailedRecord, FinalStatus, ResultLog, RunId, RunSummary, SkippedRecord, StatusFallback};
pub use source::{Page, PageToken, SourceReader, SourceSystem};
pub use state::RunState;

/// Everything needed to wire up and run a migration
pub mod prelude {
    pub use crate::backends::{JsonLedgerDestination, MemoryDestination, SnapshotSource};
    pub use crate::checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
    pub use crate::coordinator::MigrationCoordinator;
    pub use crate::destination::DestinationSystem;
    pub use crate::error::{BackendError, MigrationError};
    pub use crate::events::RunEvent;
    pub use crate::report::{FinalStatus, RunSummary};
    pub use crate::source::{Page, PageToken, SourceSystem};
    pub use tokio_util::sync::CancellationToken;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
