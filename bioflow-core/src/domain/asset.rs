//! Asset domain types
//!
//! An asset is one named stage of the pipeline. Every successful stage
//! execution for a partition leaves an [`AssetRecord`] in the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

use crate::domain::partition::PartitionKey;

/// Well-known metadata keys written by the pipeline stages
pub mod keys {
    pub const LENGTH: &str = "length";
    pub const PREVIEW: &str = "preview";
    pub const PATH: &str = "path";
    pub const UPSTREAM_RECORD: &str = "upstream_record";
    pub const UPSTREAM_LENGTH: &str = "upstream_length";
    pub const UPSTREAM_PATH: &str = "upstream_path";
}

/// Typed metadata value attached to a materialization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MetadataValue {
    Int(i64),
    Text(String),
    /// Preview text meant to be rendered as markdown
    Markdown(String),
    Path(String),
}

impl MetadataValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            MetadataValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the textual content of text and markdown values
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) | MetadataValue::Markdown(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&str> {
        match self {
            MetadataValue::Path(p) => Some(p),
            _ => None,
        }
    }
}

/// Metadata mapping of a materialization, ordered by key
pub type Metadata = BTreeMap<String, MetadataValue>;

/// One completed execution of one pipeline stage for one partition
///
/// Records are never mutated after creation. Several records may exist
/// for the same (asset, partition) pair when a partition is re-run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub id: Uuid,
    pub asset: String,
    pub partition_key: PartitionKey,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl AssetRecord {
    /// Creates a fresh record stamped with the current time
    pub fn new(asset: impl Into<String>, partition_key: PartitionKey, metadata: Metadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            asset: asset.into(),
            partition_key,
            metadata,
            created_at: Utc::now(),
        }
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        self.metadata.get(key).and_then(MetadataValue::as_int)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(MetadataValue::as_text)
    }

    pub fn path(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(MetadataValue::as_path)
    }
}

/// Output of the load stage, handed explicitly to the transform stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedRecord {
    pub partition_key: PartitionKey,
    /// Absolute host path of the raw input
    pub path: PathBuf,
    /// Path of the raw input relative to the data root
    pub rel_path: PathBuf,
    pub contents: String,
}

/// What the consume stage learned from the transform stage's materialization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumedSummary {
    pub partition_key: PartitionKey,
    pub upstream_record: Uuid,
    pub length: i64,
    pub preview: String,
    pub output_path: PathBuf,
}

/// Returns at most `max_chars` leading characters of `contents`
pub fn preview(contents: &str, max_chars: usize) -> String {
    contents.chars().take(max_chars).collect()
}
