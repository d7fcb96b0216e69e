//! Migration configuration
//!
//! Loaded from TOML; every field has a default so a config file only needs
//! to name what differs.
//!
//! ```toml
//! query = "assignee is not empty"
//! concurrency = 8
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 1000
//!
//! [status]
//! default = "New"
//! table = { "Open" = "New", "In Progress" = "InProgress", "Done" = "Closed" }
//!
//! [mapping]
//! path = "user_mapping.csv"
//! source_column = "jira_user"
//! dest_column = "tracker_user"
//! ```

use crate::error::ConfigError;
use crate::identity::MappingColumns;
use crate::status::StatusTable;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Backoff policy applied uniformly to every source and destination call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay_ms: u64,
    /// Multiplier applied per further attempt
    pub factor: f64,
    /// Upper bound on a single delay before jitter
    pub max_delay_ms: u64,
    /// Random extra delay in `0..=max_jitter_ms`
    pub max_jitter_ms: u64,
}

impl RetryPolicy {
    /// Retry without waiting between attempts
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            factor: 1.0,
            max_delay_ms: 0,
            max_jitter_ms: 0,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based), jitter excluded
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_ms = (self.base_delay_ms as f64) * self.factor.powi(exponent);
        let capped = delay_ms.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            factor: 2.0,
            max_delay_ms: 30_000,
            max_jitter_ms: 250,
        }
    }
}

/// Where the identity mapping comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    pub path: PathBuf,
    #[serde(flatten)]
    pub columns: MappingColumns,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("user_mapping.csv"),
            columns: MappingColumns::default(),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Source-specific filter expression
    pub query: String,
    /// Records written concurrently within a page
    pub concurrency: usize,
    /// Look up but never create destination records
    pub dry_run: bool,
    /// Consecutive unreachable-destination pages that halt the run; 0 disables
    pub circuit_breaker_pages: u32,
    pub retry: RetryPolicy,
    pub status: StatusTable,
    pub mapping: MappingConfig,
    /// Directory for checkpoint files
    pub checkpoint_dir: PathBuf,
}

impl MigrationConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from TOML text
    ///
    /// # Errors
    /// `ConfigError::Parse` or `ConfigError::Invalid`
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    ///
    /// # Errors
    /// `ConfigError::Io`, `ConfigError::Parse` or `ConfigError::Invalid`
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// `ConfigError::Invalid` naming the first offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::invalid("concurrency", "must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be at least 1"));
        }
        if !(self.retry.factor >= 1.0) {
            return Err(ConfigError::invalid("retry.factor", "must be >= 1.0"));
        }
        if self.status.default.trim().is_empty() {
            return Err(ConfigError::invalid("status.default", "must not be empty"));
        }
        Ok(())
    }

    /// With concurrency limit
    #[inline]
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// With retry policy
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// With status table
    #[inline]
    #[must_use]
    pub fn with_status_table(mut self, status: StatusTable) -> Self {
        self.status = status;
        self
    }

    /// With source query
    #[inline]
    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    /// With circuit breaker threshold
    #[inline]
    #[must_use]
    pub fn with_circuit_breaker_pages(mut self, pages: u32) -> Self {
        self.circuit_breaker_pages = pages;
        self
    }

    /// With dry-run mode
    #[inline]
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// With mapping source
    #[inline]
    #[must_use]
    pub fn with_mapping(mut self, mapping: MappingConfig) -> Self {
        self.mapping = mapping;
        self
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            query: "assignee is not empty".to_string(),
            concurrency: 8,
            dry_run: false,
            circuit_breaker_pages: 3,
            retry: RetryPolicy::default(),
            status: StatusTable::default(),
            mapping: MappingConfig::default(),
            checkpoint_dir: PathBuf::from(".trackmig/checkpoints"),
        }
    }
}
