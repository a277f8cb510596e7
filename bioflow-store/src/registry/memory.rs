//! In-memory partition registry

use async_trait::async_trait;
use bioflow_core::domain::partition::PartitionKey;
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use super::PartitionRegistry;
use crate::error::Result;

/// Registry held entirely in process memory
///
/// Suitable for tests and one-shot runs; state is lost on exit.
#[derive(Default)]
pub struct InMemoryPartitionRegistry {
    dimensions: RwLock<HashMap<String, BTreeSet<PartitionKey>>>,
}

impl InMemoryPartitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PartitionRegistry for InMemoryPartitionRegistry {
    async fn has(&self, dimension: &str, key: &PartitionKey) -> Result<bool> {
        let dimensions = self.dimensions.read()?;
        Ok(dimensions
            .get(dimension)
            .is_some_and(|keys| keys.contains(key)))
    }

    async fn register(&self, dimension: &str, keys: &BTreeSet<PartitionKey>) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut dimensions = self.dimensions.write()?;
        let known = dimensions.entry(dimension.to_string()).or_default();

        let added = keys
            .iter()
            .filter(|key| known.insert((*key).clone()))
            .count();

        tracing::debug!(
            "Registered {} new key(s) in dimension {}",
            added,
            dimension
        );
        Ok(added)
    }

    async fn keys(&self, dimension: &str) -> Result<BTreeSet<PartitionKey>> {
        let dimensions = self.dimensions.read()?;
        Ok(dimensions.get(dimension).cloned().unwrap_or_default())
    }
}
