//! `trackmig run` configuration file
//!
//! The engine settings sit at the top level; `[source]` and `[destination]`
//! select the file-backed backends.
//!
//! ```toml
//! concurrency = 4
//! checkpoint_dir = ".trackmig/checkpoints"
//!
//! [mapping]
//! path = "user_mapping.csv"
//!
//! [source]
//! id = "jira/PROJ"
//! export_path = "export.jsonl"
//!
//! [destination]
//! ledger_path = "ledger.json"
//! key_prefix = "QUEUE"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use trackmig_core::MigrationConfig;

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SourceConfig {
    /// Checkpoints are keyed by this id
    pub(crate) id: String,
    /// JSON array or JSON-lines tracker export
    pub(crate) export_path: PathBuf,
    #[serde(default = "default_page_size")]
    pub(crate) page_size: usize,
}

fn default_page_size() -> usize {
    50
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DestinationConfig {
    pub(crate) ledger_path: PathBuf,
    #[serde(default = "default_key_prefix")]
    pub(crate) key_prefix: String,
}

fn default_key_prefix() -> String {
    "QUEUE".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CliConfig {
    #[serde(flatten)]
    pub(crate) migration: MigrationConfig,
    pub(crate) source: SourceConfig,
    pub(crate) destination: DestinationConfig,
}

impl CliConfig {
    pub(crate) fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("invalid configuration")?;
        config.migration.validate()?;
        Ok(config)
    }

    /// Load a config file; relative paths are resolved against its directory
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let mut config = Self::from_toml_str(&text).with_context(|| format!("in {}", path.display()))?;
        if let Some(base) = path.parent() {
            config.rebase(base);
        }
        Ok(config)
    }

    fn rebase(&mut self, base: &Path) {
        for path in [
            &mut self.migration.mapping.path,
            &mut self.migration.checkpoint_dir,
            &mut self.source.export_path,
            &mut self.destination.ledger_path,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
concurrency = 4
dry_run = true

[retry]
max_attempts = 5

[status]
default = "Open"
table = { "Done" = "Closed" }

[mapping]
path = "users.csv"
source_column = "jira_user"
dest_column = "tracker_user"

[source]
id = "jira/PROJ"
export_path = "export.jsonl"

[destination]
ledger_path = "/var/lib/trackmig/ledger.json"
"#;

    #[test]
    fn parses_engine_and_backend_tables() {
        let config = CliConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.migration.concurrency, 4);
        assert!(config.migration.dry_run);
        assert_eq!(config.migration.retry.max_attempts, 5);
        assert_eq!(config.migration.retry.base_delay_ms, 1_000);
        assert_eq!(config.migration.status.default, "Open");
        assert_eq!(config.migration.mapping.columns.source_column.as_deref(), Some("jira_user"));
        assert_eq!(config.source.id, "jira/PROJ");
        assert_eq!(config.source.page_size, 50);
        assert_eq!(config.destination.key_prefix, "QUEUE");
    }

    #[test]
    fn rejects_invalid_engine_settings() {
        let text = SAMPLE.replace("concurrency = 4", "concurrency = 0");
        assert!(CliConfig::from_toml_str(&text).is_err());
    }

    #[test]
    fn missing_source_table_is_an_error() {
        assert!(CliConfig::from_toml_str("concurrency = 2\n").is_err());
    }

    #[test]
    fn relative_paths_follow_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trackmig.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = CliConfig::load(&path).unwrap();
        assert_eq!(config.migration.mapping.path, dir.path().join("users.csv"));
        assert_eq!(config.source.export_path, dir.path().join("export.jsonl"));
        assert_eq!(
            config.destination.ledger_path,
            PathBuf::from("/var/lib/trackmig/ledger.json")
        );
    }
}
