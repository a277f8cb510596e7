//! Materialization ledger
//!
//! Append-only record of stage executions. Each record belongs to one
//! (asset, partition) pair; several records per pair are expected when a
//! partition is re-run, and `latest` always returns the most recent one.

mod memory;
mod sqlite;

pub use memory::InMemoryLedger;
pub use sqlite::SqliteLedger;

use async_trait::async_trait;
use bioflow_core::domain::asset::{AssetRecord, Metadata};
use bioflow_core::domain::partition::PartitionKey;

use crate::error::Result;

/// Append-only store of materializations indexed by (asset, partition)
#[async_trait]
pub trait MaterializationLedger: Send + Sync {
    /// Appends a new record; never overwrites an existing one
    async fn append(
        &self,
        asset: &str,
        partition_key: &PartitionKey,
        metadata: Metadata,
    ) -> Result<AssetRecord>;

    /// Returns the most recently appended record for the pair
    ///
    /// `None` means the asset has not been materialized for this partition
    /// yet, which callers should treat as "not ready" rather than fatal.
    async fn latest(
        &self,
        asset: &str,
        partition_key: &PartitionKey,
    ) -> Result<Option<AssetRecord>>;

    /// Returns every record for the pair, oldest first
    async fn records(&self, asset: &str, partition_key: &PartitionKey) -> Result<Vec<AssetRecord>>;
}
