//! Built-in source and destination backends
//!
//! - `SnapshotSource`: records held in memory or loaded from an export file
//! - `MemoryDestination`: process-local queue with validation and rejections
//! - `JsonLedgerDestination`: queue persisted to a JSON file

mod ledger;
mod memory;
mod snapshot;

pub use ledger::{JsonLedgerDestination, LedgerEntry};
pub use memory::{MemoryDestination, StoredRecord};
pub use snapshot::SnapshotSource;
