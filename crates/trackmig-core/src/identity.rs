//! Identity mapper
//!
//! Loads the source-user → destination-user table once per run and answers
//! lookups from memory. The table is a CSV file with a header row; by default
//! the first column holds source IDs and the second destination IDs. When
//! column names are configured (e.g. `jira_user`, `tracker_user`) they are
//! located by header name instead.

use crate::error::MappingError;
use crate::record::{DestUserId, SourceUserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use tracing::{info, warn};

/// Header columns to read from the mapping table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingColumns {
    /// Header name of the source-user column; first column when unset
    #[serde(default)]
    pub source_column: Option<String>,
    /// Header name of the destination-user column; second column when unset
    #[serde(default)]
    pub dest_column: Option<String>,
}

impl MappingColumns {
    /// Locate columns by header name
    #[must_use]
    pub fn named(source: impl Into<String>, dest: impl Into<String>) -> Self {
        Self {
            source_column: Some(source.into()),
            dest_column: Some(dest.into()),
        }
    }

    /// Header row written to a fresh mapping template
    fn template_header(&self) -> [&str; 2] {
        [
            self.source_column.as_deref().unwrap_or("source_user"),
            self.dest_column.as_deref().unwrap_or("dest_user"),
        ]
    }

    fn resolve(&self, headers: &[String]) -> Result<(usize, usize), MappingError> {
        if headers.len() < 2 {
            return Err(MappingError::MalformedHeader(format!(
                "expected at least 2 columns, found {}",
                headers.len()
            )));
        }
        let source = match &self.source_column {
            Some(name) => find_column(headers, name)?,
            None => 0,
        };
        let dest = match &self.dest_column {
            Some(name) => find_column(headers, name)?,
            None => 1,
        };
        if source == dest {
            return Err(MappingError::MalformedHeader(
                "source and destination columns are the same".to_string(),
            ));
        }
        Ok((source, dest))
    }
}

fn find_column(headers: &[String], name: &str) -> Result<usize, MappingError> {
    headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case(name))
        .ok_or_else(|| MappingError::MalformedHeader(format!("missing column `{name}`")))
}

/// Immutable source → destination user table
#[derive(Debug, Clone, Default)]
pub struct UserMapping {
    entries: HashMap<SourceUserId, DestUserId>,
    duplicates: usize,
    skipped_rows: usize,
}

impl UserMapping {
    /// Build a mapping from pairs; later pairs win over earlier ones
    pub fn from_pairs<I, S, D>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, D)>,
        S: Into<SourceUserId>,
        D: Into<DestUserId>,
    {
        let mut mapping = Self::default();
        for (source, dest) in pairs {
            mapping.insert(source.into(), dest.into());
        }
        mapping
    }

    /// Load a mapping table from a file
    ///
    /// # Errors
    /// - `MappingError::Io` if the file cannot be opened
    /// - `MappingError::MalformedHeader` / `MappingError::Row` as for [`Self::from_reader`]
    pub fn from_path(path: impl AsRef<Path>, columns: &MappingColumns) -> Result<Self, MappingError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| MappingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mapping = Self::from_reader(file, columns)?;
        info!(
            path = %path.display(),
            users = mapping.len(),
            duplicates = mapping.duplicates,
            "user mapping loaded"
        );
        Ok(mapping)
    }

    /// Load a mapping table from any reader
    ///
    /// Rows with fewer than two cells or an empty identifier are skipped with a
    /// warning. Duplicate source IDs keep the last occurrence.
    ///
    /// # Errors
    /// - `MappingError::MalformedHeader` if the header is absent or lacks the columns
    /// - `MappingError::Row` if a row cannot be decoded
    pub fn from_reader<R: Read>(reader: R, columns: &MappingColumns) -> Result<Self, MappingError> {
        let mut csv = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = csv
            .headers()
            .map_err(|e| MappingError::MalformedHeader(e.to_string()))?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect();
        let (source_idx, dest_idx) = columns.resolve(&headers)?;

        let mut mapping = Self::default();
        for (idx, row) in csv.records().enumerate() {
            // header is line 1
            let line = idx as u64 + 2;
            let row = row.map_err(|source| MappingError::Row { line, source })?;

            let source = row.get(source_idx).unwrap_or_default();
            let dest = row.get(dest_idx).unwrap_or_default();
            if source.is_empty() || dest.is_empty() {
                warn!(line, "skipping mapping row with missing user id");
                mapping.skipped_rows += 1;
                continue;
            }
            mapping.insert(SourceUserId::new(source), DestUserId::new(dest));
        }
        Ok(mapping)
    }

    fn insert(&mut self, source: SourceUserId, dest: DestUserId) {
        if let Some(previous) = self.entries.insert(source.clone(), dest.clone()) {
            warn!(
                user = %source,
                previous = %previous,
                current = %dest,
                "duplicate source user in mapping, last entry wins"
            );
            self.duplicates += 1;
        }
    }

    /// Destination user for a source user, `None` when unmapped
    #[inline]
    #[must_use]
    pub fn resolve(&self, user: &SourceUserId) -> Option<&DestUserId> {
        self.entries.get(user)
    }

    /// Number of distinct source users
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rows that overrode an earlier row for the same source user
    #[inline]
    #[must_use]
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Rows ignored for missing identifiers
    #[inline]
    #[must_use]
    pub fn skipped_rows(&self) -> usize {
        self.skipped_rows
    }
}

/// Start a mapping table listing `users` with an empty destination column
///
/// The operator fills in destination IDs before the first run. An existing
/// file is never overwritten. Returns the number of users written.
///
/// # Errors
/// - `MappingError::TemplateExists` if `path` already exists
/// - `MappingError::Io` if the file cannot be created or written
pub fn write_template<'a, I>(path: impl AsRef<Path>, columns: &MappingColumns, users: I) -> Result<usize, MappingError>
where
    I: IntoIterator<Item = &'a SourceUserId>,
{
    let path = path.as_ref();
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|source| match source.kind() {
            io::ErrorKind::AlreadyExists => MappingError::TemplateExists(path.to_path_buf()),
            _ => MappingError::Io {
                path: path.to_path_buf(),
                source,
            },
        })?;

    let written = write_template_rows(file, columns, users).map_err(|source| MappingError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), users = written, "mapping template written");
    Ok(written)
}

fn write_template_rows<'a, W, I>(writer: W, columns: &MappingColumns, users: I) -> io::Result<usize>
where
    W: Write,
    I: IntoIterator<Item = &'a SourceUserId>,
{
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(columns.template_header())?;
    let mut written = 0;
    for user in users {
        csv.write_record([user.as_str(), ""])?;
        written += 1;
    }
    csv.flush()?;
    Ok(written)
}
