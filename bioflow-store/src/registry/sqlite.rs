//! SQLite partition registry
//!
//! Keys live in the `partitions` table keyed by (dimension, partition_key).
//! Registration inserts with `ON CONFLICT DO NOTHING` inside one
//! transaction, so a batch is committed all at once or not at all.

use async_trait::async_trait;
use bioflow_core::domain::partition::PartitionKey;
use sqlx::SqlitePool;
use std::collections::BTreeSet;

use super::PartitionRegistry;
use crate::error::{Result, StoreError};

/// Registry persisted in SQLite
#[derive(Clone)]
pub struct SqlitePartitionRegistry {
    pool: SqlitePool,
}

impl SqlitePartitionRegistry {
    /// Creates a registry over an already migrated pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PartitionRegistry for SqlitePartitionRegistry {
    async fn has(&self, dimension: &str, key: &PartitionKey) -> Result<bool> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM partitions
            WHERE dimension = ? AND partition_key = ?
            "#,
        )
        .bind(dimension)
        .bind(key.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0 > 0)
    }

    async fn register(&self, dimension: &str, keys: &BTreeSet<PartitionKey>) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }

        let registered_at = chrono::Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut added = 0;

        for key in keys {
            let result = sqlx::query(
                r#"
                INSERT INTO partitions (dimension, partition_key, registered_at)
                VALUES (?, ?, ?)
                ON CONFLICT (dimension, partition_key) DO NOTHING
                "#,
            )
            .bind(dimension)
            .bind(key.as_str())
            .bind(registered_at)
            .execute(&mut *tx)
            .await;

            match result {
                Ok(done) => added += done.rows_affected() as usize,
                Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                    return Err(StoreError::RegistrationConflict {
                        dimension: dimension.to_string(),
                        key: key.clone(),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        tx.commit().await?;

        tracing::debug!(
            "Registered {} new key(s) in dimension {}",
            added,
            dimension
        );
        Ok(added)
    }

    async fn keys(&self, dimension: &str) -> Result<BTreeSet<PartitionKey>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT partition_key FROM partitions
            WHERE dimension = ?
            "#,
        )
        .bind(dimension)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(key,)| PartitionKey::from(key)).collect())
    }
}
