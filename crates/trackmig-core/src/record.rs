//! Record types flowing through a migration
//!
//! - Identifiers for records and users on both sides of a migration
//! - `SourceRecord`: immutable snapshot read from the source tracker
//! - `TranslatedRecord`: creation request for the destination tracker

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier
            #[inline]
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the raw identifier
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Stable key of a record within its source tracker (e.g. `PROJ-42`)
    SourceKey
);
string_id!(
    /// Key assigned by the destination tracker when a record is created
    DestKey
);
string_id!(
    /// User identifier in the source tracker
    SourceUserId
);
string_id!(
    /// User identifier in the destination tracker
    DestUserId
);

/// Snapshot of one record as read from a source tracker.
///
/// The source is the system of record; the engine never writes back to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Unique key within the source
    pub key: SourceKey,
    /// Summary line
    pub title: String,
    /// Free-form body
    #[serde(default)]
    pub description: String,
    /// Assignee as known to the source, if any
    #[serde(default)]
    pub assignee: Option<SourceUserId>,
    /// Workflow status name in the source's vocabulary
    pub status: String,
    /// Creation time reported by the source
    pub created_at: DateTime<Utc>,
}

impl SourceRecord {
    /// Create an unassigned record with an empty description
    #[must_use]
    pub fn new(key: impl Into<SourceKey>, title: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            description: String::new(),
            assignee: None,
            status: status.into(),
            created_at: Utc::now(),
        }
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// With assignee
    #[inline]
    #[must_use]
    pub fn with_assignee(mut self, assignee: impl Into<SourceUserId>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    /// With creation time
    #[inline]
    #[must_use]
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Destination-side creation request derived from a [`SourceRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslatedRecord {
    /// Key of the record this was derived from; tagged on the destination record
    pub source_key: SourceKey,
    /// Resolved destination assignee
    pub assignee: Option<DestUserId>,
    pub title: String,
    pub description: String,
    /// Status in the destination's vocabulary
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_raw_value() {
        let key = SourceKey::new("PROJ-1");
        assert_eq!(key.to_string(), "PROJ-1");
        assert_eq!(key.as_str(), "PROJ-1");
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&DestKey::from("QUEUE-7")).unwrap();
        assert_eq!(json, "\"QUEUE-7\"");
    }

    #[test]
    fn source_record_defaults_optional_fields() {
        let json = r#"{"key":"A-1","title":"t","status":"Open","created_at":"2024-01-02T03:04:05Z"}"#;
        let record: SourceRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.assignee, None);
        assert!(record.description.is_empty());
    }

    #[test]
    fn source_record_builder() {
        let record = SourceRecord::new("A-1", "title", "Open")
            .with_assignee("jdoe")
            .with_description("body");
        assert_eq!(record.assignee, Some(SourceUserId::new("jdoe")));
        assert_eq!(record.description, "body");
    }
}
