//! In-memory materialization ledger

use async_trait::async_trait;
use bioflow_core::domain::asset::{AssetRecord, Metadata};
use bioflow_core::domain::partition::PartitionKey;
use std::collections::HashMap;
use std::sync::Mutex;

use super::MaterializationLedger;
use crate::error::Result;

/// Ledger held in process memory, indexed by (asset, partition)
#[derive(Default)]
pub struct InMemoryLedger {
    records: Mutex<HashMap<(String, PartitionKey), Vec<AssetRecord>>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MaterializationLedger for InMemoryLedger {
    async fn append(
        &self,
        asset: &str,
        partition_key: &PartitionKey,
        metadata: Metadata,
    ) -> Result<AssetRecord> {
        let record = AssetRecord::new(asset, partition_key.clone(), metadata);

        let mut records = self.records.lock()?;
        records
            .entry((asset.to_string(), partition_key.clone()))
            .or_default()
            .push(record.clone());

        Ok(record)
    }

    async fn latest(
        &self,
        asset: &str,
        partition_key: &PartitionKey,
    ) -> Result<Option<AssetRecord>> {
        let records = self.records.lock()?;
        Ok(records
            .get(&(asset.to_string(), partition_key.clone()))
            .and_then(|history| history.last().cloned()))
    }

    async fn records(&self, asset: &str, partition_key: &PartitionKey) -> Result<Vec<AssetRecord>> {
        let records = self.records.lock()?;
        Ok(records
            .get(&(asset.to_string(), partition_key.clone()))
            .cloned()
            .unwrap_or_default())
    }
}
