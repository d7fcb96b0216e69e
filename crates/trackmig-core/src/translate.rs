//! Record translator
//!
//! Pure mapping from a [`SourceRecord`] to a [`TranslatedRecord`]. An
//! assignee that cannot be resolved is left absent and reported, never
//! replaced by a guessed user.

use crate::identity::UserMapping;
use crate::record::{SourceRecord, SourceUserId, TranslatedRecord};
use crate::status::StatusTable;

/// Translated record plus the data-quality findings made along the way
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub record: TranslatedRecord,
    /// Source assignee with no mapping entry
    pub unmapped_assignee: Option<SourceUserId>,
    /// Source status that was not in the status table
    pub status_fallback: Option<String>,
}

impl Translation {
    /// Whether the record may be written to the destination
    #[inline]
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.unmapped_assignee.is_none()
    }
}

/// Translate one source record
#[must_use]
pub fn translate(record: &SourceRecord, mapping: &UserMapping, statuses: &StatusTable) -> Translation {
    let (assignee, unmapped_assignee) = match &record.assignee {
        Some(user) => match mapping.resolve(user) {
            Some(dest) => (Some(dest.clone()), None),
            None => (None, Some(user.clone())),
        },
        None => (None, None),
    };

    let status = statuses.resolve(&record.status);
    let status_fallback = status.is_fallback().then(|| record.status.clone());

    Translation {
        record: TranslatedRecord {
            source_key: record.key.clone(),
            assignee,
            title: record.title.clone(),
            description: record.description.clone(),
            status: status.value().to_string(),
        },
        unmapped_assignee,
        status_fallback,
    }
}
