//! Core data models produced by connectors.
//!
//! Every connector, whatever its source, emits the same normalized types:
//! [`Document`]s made of ordered [`Section`]s, lightweight [`SlimDocument`]s
//! for deletion reconciliation, and [`ConnectorFailure`] records for single
//! items that could not be converted.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Seconds since the Unix epoch, as used for sync windows.
pub type SecondsSinceUnixEpoch = f64;

/// The kind of external system a document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentSource {
    Wiki,
    Jira,
    Slack,
    GoogleDrive,
    File,
}

impl DocumentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentSource::Wiki => "wiki",
            DocumentSource::Jira => "jira",
            DocumentSource::Slack => "slack",
            DocumentSource::GoogleDrive => "google_drive",
            DocumentSource::File => "file",
        }
    }
}

impl fmt::Display for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metadata value: either a single string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Text(String),
    List(Vec<String>),
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

impl From<Vec<String>> for MetadataValue {
    fn from(value: Vec<String>) -> Self {
        MetadataValue::List(value)
    }
}

/// Ordered metadata map. `BTreeMap` keeps serialization deterministic.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A contiguous piece of document text with an optional link back to the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub link: Option<String>,
    pub text: String,
}

impl Section {
    pub fn new(link: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            link: Some(link.into()),
            text: text.into(),
        }
    }
}

/// A normalized unit of ingestible content.
///
/// The `id` is deterministic for a given source entity, so re-syncing an
/// unchanged entity produces an identical document and downstream upserts
/// stay idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub sections: Vec<Section>,
    pub source: DocumentSource,
    pub semantic_identifier: String,
    pub title: Option<String>,
    pub doc_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    /// Concatenated text of all sections, in reading order.
    pub fn text(&self) -> String {
        self.sections
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Identity-only projection of a [`Document`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlimDocument {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perm_sync_data: Option<serde_json::Value>,
}

impl SlimDocument {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            perm_sync_data: None,
        }
    }
}

/// Which unit of work a [`ConnectorFailure`] refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailedEntity {
    /// A single document that could not be produced.
    Document {
        document_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        document_link: Option<String>,
    },
    /// A whole batch or listing page, e.g. `"/pages offset=200"`.
    Batch { description: String },
}

/// A failed unit of work, emitted inline in the item stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorFailure {
    pub failed_entity: FailedEntity,
    pub error_kind: String,
    pub message: String,
}

impl ConnectorFailure {
    pub fn document(
        document_id: impl Into<String>,
        error_kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            failed_entity: FailedEntity::Document {
                document_id: document_id.into(),
                document_link: None,
            },
            error_kind: error_kind.into(),
            message: message.into(),
        }
    }

    pub fn batch(
        description: impl Into<String>,
        error_kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            failed_entity: FailedEntity::Batch {
                description: description.into(),
            },
            error_kind: error_kind.into(),
            message: message.into(),
        }
    }
}

/// One item of a checkpointed sync: a document or an inline failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocumentOrFailure {
    Document(Document),
    Failure(ConnectorFailure),
}

impl DocumentOrFailure {
    pub fn is_failure(&self) -> bool {
        matches!(self, DocumentOrFailure::Failure(_))
    }
}

/// Render metadata as `"key: value"` lines for generative context.
///
/// List values are joined with `", "`.
pub fn format_metadata(metadata: &Metadata) -> Vec<String> {
    metadata
        .iter()
        .map(|(key, value)| match value {
            MetadataValue::Text(v) => format!("{}: {}", key, v),
            MetadataValue::List(vs) => format!("{}: {}", key, vs.join(", ")),
        })
        .collect()
}

/// Convert epoch seconds to a UTC timestamp. Fractional seconds are kept.
pub fn epoch_to_utc(secs: SecondsSinceUnixEpoch) -> Option<DateTime<Utc>> {
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round() as u32;
    Utc.timestamp_opt(whole as i64, nanos.min(999_999_999)).single()
}

/// Parse a remote timestamp string as UTC.
///
/// Accepts RFC 3339 (`2024-01-02T03:04:05.000000Z`) and the naive
/// `YYYY-MM-DD HH:MM:SS` form, which is taken to be UTC.
pub fn time_str_to_utc(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}
