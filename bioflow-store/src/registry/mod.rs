//! Partition registry
//!
//! Tracks the known partition keys of each named partition dimension.
//! Dimensions are created on first registration and only ever grow:
//! a registered key is never removed or renamed, and registering a key
//! that is already present is a no-op.

mod memory;
mod sqlite;

pub use memory::InMemoryPartitionRegistry;
pub use sqlite::SqlitePartitionRegistry;

use async_trait::async_trait;
use bioflow_core::domain::partition::PartitionKey;
use std::collections::BTreeSet;

use crate::error::Result;

/// Append-only store of partition keys per dimension
#[async_trait]
pub trait PartitionRegistry: Send + Sync {
    /// Returns true iff `key` was previously registered in `dimension`
    async fn has(&self, dimension: &str, key: &PartitionKey) -> Result<bool>;

    /// Registers every key not already present
    ///
    /// Overlap with existing keys is not an error. An unknown dimension is
    /// created on the fly.
    ///
    /// # Returns
    /// The number of keys that were newly added
    async fn register(&self, dimension: &str, keys: &BTreeSet<PartitionKey>) -> Result<usize>;

    /// Returns every key registered in `dimension` (empty for unknown dimensions)
    async fn keys(&self, dimension: &str) -> Result<BTreeSet<PartitionKey>>;
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every registry backend must satisfy

    use super::*;

    pub fn key_set(keys: &[&str]) -> BTreeSet<PartitionKey> {
        keys.iter().map(|k| PartitionKey::from(*k)).collect()
    }

    pub async fn registration_is_idempotent(registry: &dyn PartitionRegistry) {
        let keys = key_set(&["a.txt", "b.txt"]);

        assert_eq!(registry.register("source", &keys).await.unwrap(), 2);
        assert_eq!(registry.register("source", &keys).await.unwrap(), 0);

        for key in &keys {
            assert!(registry.has("source", key).await.unwrap());
        }
        assert_eq!(registry.keys("source").await.unwrap(), keys);
    }

    pub async fn overlapping_registration_adds_only_new_keys(registry: &dyn PartitionRegistry) {
        registry
            .register("source", &key_set(&["a.txt", "b.txt"]))
            .await
            .unwrap();
        let added = registry
            .register("source", &key_set(&["b.txt", "c.txt"]))
            .await
            .unwrap();

        assert_eq!(added, 1);
        assert_eq!(
            registry.keys("source").await.unwrap(),
            key_set(&["a.txt", "b.txt", "c.txt"])
        );
    }

    pub async fn dimensions_are_independent(registry: &dyn PartitionRegistry) {
        registry
            .register("source", &key_set(&["a.txt"]))
            .await
            .unwrap();

        assert!(
            !registry
                .has("other", &PartitionKey::from("a.txt"))
                .await
                .unwrap()
        );
        assert!(registry.keys("other").await.unwrap().is_empty());
    }

    pub async fn empty_registration_is_noop(registry: &dyn PartitionRegistry) {
        assert_eq!(registry.register("source", &BTreeSet::new()).await.unwrap(), 0);
        assert!(registry.keys("source").await.unwrap().is_empty());
    }
}
