//! Partition domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of one unit of work within a partition dimension
///
/// For the source dimension this is the file name of the raw input.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(String);

impl PartitionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartitionKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for PartitionKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl AsRef<str> for PartitionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Request to execute the pipeline for one partition
///
/// Emitted by the discovery sensor, consumed once by the pipeline driver.
/// Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkRequest {
    pub dimension: String,
    pub partition_key: PartitionKey,
}

impl WorkRequest {
    pub fn new(dimension: impl Into<String>, partition_key: PartitionKey) -> Self {
        Self {
            dimension: dimension.into(),
            partition_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_key_serializes_as_plain_string() {
        let key = PartitionKey::from("sample1.txt");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"sample1.txt\"");

        let back: PartitionKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_partition_key_ordering() {
        let mut keys = vec![PartitionKey::from("b"), PartitionKey::from("a")];
        keys.sort();
        assert_eq!(keys[0].as_str(), "a");
    }
}
