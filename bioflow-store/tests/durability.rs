//! SQLite stores keep their state across a closed and reopened database file

use bioflow_core::domain::asset::{Metadata, MetadataValue};
use bioflow_core::domain::partition::PartitionKey;
use bioflow_store::db;
use bioflow_store::{MaterializationLedger, PartitionRegistry, SqliteLedger, SqlitePartitionRegistry};
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use std::path::Path;

async fn open(path: &Path) -> SqlitePool {
    let pool = db::create_pool(&format!("sqlite://{}", path.display()))
        .await
        .unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

fn length(n: i64) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("length".to_string(), MetadataValue::Int(n));
    metadata
}

#[tokio::test]
async fn registry_and_ledger_survive_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bioflow.db");
    let key = PartitionKey::from("sample1.txt");

    let pool = open(&path).await;
    let registry = SqlitePartitionRegistry::new(pool.clone());
    let ledger = SqliteLedger::new(pool.clone());

    let keys: BTreeSet<PartitionKey> = ["sample1.txt", "sample2.txt"]
        .into_iter()
        .map(PartitionKey::from)
        .collect();
    assert_eq!(registry.register("source", &keys).await.unwrap(), 2);

    let mut appended = Vec::new();
    for n in 1..=3 {
        appended.push(ledger.append("asset_b", &key, length(n)).await.unwrap());
    }

    drop(registry);
    drop(ledger);
    pool.close().await;

    let pool = open(&path).await;
    let registry = SqlitePartitionRegistry::new(pool.clone());
    let ledger = SqliteLedger::new(pool.clone());

    assert!(registry.has("source", &key).await.unwrap());
    assert_eq!(registry.keys("source").await.unwrap(), keys);
    assert_eq!(registry.register("source", &keys).await.unwrap(), 0);

    let latest = ledger.latest("asset_b", &key).await.unwrap().unwrap();
    assert_eq!(latest.id, appended[2].id);
    assert_eq!(latest.int("length"), Some(3));

    let records = ledger.records("asset_b", &key).await.unwrap();
    assert_eq!(
        records.iter().map(|r| r.id).collect::<Vec<_>>(),
        appended.iter().map(|r| r.id).collect::<Vec<_>>()
    );

    // A later append still sorts after the records written before reopening
    let fourth = ledger.append("asset_b", &key, length(4)).await.unwrap();
    let latest = ledger.latest("asset_b", &key).await.unwrap().unwrap();
    assert_eq!(latest.id, fourth.id);

    pool.close().await;
}
