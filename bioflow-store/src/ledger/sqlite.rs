//! SQLite materialization ledger
//!
//! Records are rows of the `materializations` table. The autoincrement
//! `seq` column gives the append order, so "latest" does not depend on
//! clock resolution.

use async_trait::async_trait;
use bioflow_core::domain::asset::{AssetRecord, Metadata};
use bioflow_core::domain::partition::PartitionKey;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::MaterializationLedger;
use crate::error::{Result, StoreError};

/// Ledger persisted in SQLite
#[derive(Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Creates a ledger over an already migrated pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MaterializationLedger for SqliteLedger {
    async fn append(
        &self,
        asset: &str,
        partition_key: &PartitionKey,
        metadata: Metadata,
    ) -> Result<AssetRecord> {
        let record = AssetRecord::new(asset, partition_key.clone(), metadata);
        let metadata_json = serde_json::to_string(&record.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO materializations (id, asset, partition_key, metadata, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id)
        .bind(&record.asset)
        .bind(record.partition_key.as_str())
        .bind(metadata_json)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            "Appended materialization {} for {}:{}",
            record.id,
            asset,
            partition_key
        );

        Ok(record)
    }

    async fn latest(
        &self,
        asset: &str,
        partition_key: &PartitionKey,
    ) -> Result<Option<AssetRecord>> {
        let row = sqlx::query_as::<_, MaterializationRow>(
            r#"
            SELECT id, asset, partition_key, metadata, created_at
            FROM materializations
            WHERE asset = ? AND partition_key = ?
            ORDER BY seq DESC
            LIMIT 1
            "#,
        )
        .bind(asset)
        .bind(partition_key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(AssetRecord::try_from).transpose()
    }

    async fn records(&self, asset: &str, partition_key: &PartitionKey) -> Result<Vec<AssetRecord>> {
        let rows = sqlx::query_as::<_, MaterializationRow>(
            r#"
            SELECT id, asset, partition_key, metadata, created_at
            FROM materializations
            WHERE asset = ? AND partition_key = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(asset)
        .bind(partition_key.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AssetRecord::try_from).collect()
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct MaterializationRow {
    id: Uuid,
    asset: String,
    partition_key: String,
    metadata: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<MaterializationRow> for AssetRecord {
    type Error = StoreError;

    fn try_from(row: MaterializationRow) -> Result<Self> {
        Ok(AssetRecord {
            id: row.id,
            asset: row.asset,
            partition_key: PartitionKey::from(row.partition_key),
            metadata: serde_json::from_str(&row.metadata)?,
            created_at: row.created_at,
        })
    }
}
