//! Bioflow Store
//!
//! Storage layer for the pipeline's cross-partition state:
//! - Partition registry: append-only key sets per partition dimension
//! - Materialization ledger: append-only records per (asset, partition)
//!
//! Both are exposed as traits with an in-memory and an SQLite backend.

pub mod db;
pub mod error;
pub mod ledger;
pub mod registry;

pub use error::{Result, StoreError};
pub use ledger::{InMemoryLedger, MaterializationLedger, SqliteLedger};
pub use registry::{InMemoryPartitionRegistry, PartitionRegistry, SqlitePartitionRegistry};
