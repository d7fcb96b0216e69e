//! Error types for trackmig core
//!
//! Both kinds are fatal at startup: a run never begins without a valid
//! configuration and identity mapping.

use std::path::PathBuf;

/// Identity mapping load failures
#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    /// Mapping file could not be opened or read
    #[error("cannot read mapping file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Header row missing, too narrow, or lacking the expected columns
    #[error("malformed mapping header: {0}")]
    MalformedHeader(String),

    /// Refused to overwrite an existing mapping table
    #[error("mapping file {0} already exists")]
    TemplateExists(PathBuf),

    /// A data row could not be decoded (e.g. invalid UTF-8)
    #[error("unreadable mapping row at line {line}: {source}")]
    Row {
        line: u64,
        #[source]
        source: csv::Error,
    },
}

/// Configuration load and validation failures
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for the schema
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of its accepted range
    #[error("invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    #[inline]
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_config_display() {
        let err = ConfigError::invalid("concurrency", "must be at least 1");
        assert_eq!(
            err.to_string(),
            "invalid config value `concurrency`: must be at least 1"
        );
    }

    #[test]
    fn mapping_header_display() {
        let err = MappingError::MalformedHeader("expected 2 columns, found 1".into());
        assert!(err.to_string().contains("malformed mapping header"));
    }
}
