//! trackmig core - Tracker migration domain
//!
//! Everything here is pure and synchronous:
//! - Record, user and key identifiers for both sides of a migration
//! - Identity mapping (source user → destination user)
//! - Status vocabulary translation
//! - Record translation
//! - Per-record outcomes and engine configuration
//!
//! # Example
//!
//! ```rust
//! use trackmig_core::{translate, SourceRecord, StatusTable, UserMapping};
//!
//! let mapping = UserMapping::from_pairs([("alice", "alice@tracker")]);
//! let record = SourceRecord::new("PROJ-1", "Fix login", "Done").with_assignee("alice");
//!
//! let translation = translate(&record, &mapping, &StatusTable::default());
//! assert!(translation.is_writable());
//! assert_eq!(translation.record.status, "Closed");
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod identity;
pub mod outcome;
pub mod record;
pub mod status;
pub mod translate;

pub use config::{MappingConfig, MigrationConfig, RetryPolicy};
pub use error::{ConfigError, MappingError};
pub use identity::{write_template, MappingColumns, UserMapping};
pub use outcome::{MigrationResult, Outcome, SkipReason};
pub use record::{DestKey, DestUserId, SourceKey, SourceRecord, SourceUserId, TranslatedRecord};
pub use status::{ResolvedStatus, StatusTable};
pub use translate::{translate, Translation};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
