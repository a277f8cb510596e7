//! Discovery sensor
//!
//! Lists the source directory on every tick, diffs it against the partition
//! registry and emits one work request per new key, then registers those
//! keys.
//!
//! Keys whose registration failed stay pending inside the sensor: they
//! count as known when diffing, and they are registered again at the start
//! of the next tick before the registry is read. Ticks never overlap.

use bioflow_core::domain::partition::{PartitionKey, WorkRequest};
use bioflow_store::{PartitionRegistry, StoreError};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::Result;

const MAX_REGISTER_ATTEMPTS: u32 = 3;
const INITIAL_REGISTER_DELAY_MS: u64 = 100;

/// Sensor turning new files of the source directory into work requests
pub struct DiscoveryPoller {
    source_dir: PathBuf,
    dimension: String,
    registry: Arc<dyn PartitionRegistry>,

    /// Emitted keys whose registration has not committed yet.
    /// Held for the whole tick, which also serialises ticks.
    pending: Mutex<BTreeSet<PartitionKey>>,
}

impl DiscoveryPoller {
    /// Creates a new sensor
    ///
    /// # Arguments
    /// * `source_dir` - Directory whose files are the partition keys
    /// * `dimension` - Partition dimension the keys are registered in
    /// * `registry` - Partition registry shared with the rest of the runner
    pub fn new(
        source_dir: impl Into<PathBuf>,
        dimension: impl Into<String>,
        registry: Arc<dyn PartitionRegistry>,
    ) -> Self {
        Self {
            source_dir: source_dir.into(),
            dimension: dimension.into(),
            registry,
            pending: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn dimension(&self) -> &str {
        &self.dimension
    }

    /// Performs a single sensor tick
    ///
    /// # Returns
    /// One work request per key present in the source directory but not yet
    /// known to the registry
    pub async fn poll(&self) -> Result<Vec<WorkRequest>> {
        let mut pending = self.pending.lock().await;

        if !pending.is_empty() {
            info!(
                "Retrying registration of {} pending key(s) in dimension {}",
                pending.len(),
                self.dimension
            );
            self.register_with_retry(&pending).await?;
            pending.clear();
        }

        let listing = list_source(&self.source_dir).await?;
        let known = self.registry.keys(&self.dimension).await?;

        let new_keys: BTreeSet<PartitionKey> = listing.difference(&known).cloned().collect();

        if new_keys.is_empty() {
            debug!("No new partitions in {}", self.source_dir.display());
            return Ok(Vec::new());
        }

        info!(
            "Found {} new partition(s) in {}",
            new_keys.len(),
            self.source_dir.display()
        );

        let requests = new_keys
            .iter()
            .map(|key| WorkRequest::new(self.dimension.clone(), key.clone()))
            .collect();

        match self.register_with_retry(&new_keys).await {
            Ok(added) => {
                debug!(
                    "Registered {} partition(s) in dimension {}",
                    added, self.dimension
                );
            }
            Err(e) => {
                error!(
                    "Failed to register {} partition(s), will retry next tick: {}",
                    new_keys.len(),
                    e
                );
                pending.extend(new_keys);
            }
        }

        Ok(requests)
    }

    /// Registers keys with exponential backoff between attempts
    async fn register_with_retry(
        &self,
        keys: &BTreeSet<PartitionKey>,
    ) -> std::result::Result<usize, StoreError> {
        let mut attempt = 0;
        let mut delay_ms = INITIAL_REGISTER_DELAY_MS;

        loop {
            attempt += 1;

            match self.registry.register(&self.dimension, keys).await {
                Ok(added) => return Ok(added),
                Err(e) if attempt >= MAX_REGISTER_ATTEMPTS => return Err(e),
                Err(e) => {
                    warn!(
                        "Failed to register partitions (attempt {}/{}): {}",
                        attempt, MAX_REGISTER_ATTEMPTS, e
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms *= 2;
                }
            }
        }
    }
}

/// Lists the partition keys present in the source directory
///
/// Only regular files (or symlinks to them) with UTF-8 names are keys.
async fn list_source(dir: &Path) -> std::io::Result<BTreeSet<PartitionKey>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut keys = BTreeSet::new();

    while let Some(entry) = entries.next_entry().await? {
        let is_file = tokio::fs::metadata(entry.path())
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            continue;
        }

        match entry.file_name().into_string() {
            Ok(name) => {
                keys.insert(PartitionKey::from(name));
            }
            Err(name) => {
                warn!("Skipping source entry with non UTF-8 name: {:?}", name);
            }
        }
    }

    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bioflow_store::InMemoryPartitionRegistry;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Registry whose first `failures` register calls fail
    struct FlakyRegistry {
        inner: InMemoryPartitionRegistry,
        failures: AtomicUsize,
        register_calls: AtomicUsize,
    }

    impl FlakyRegistry {
        fn new(failures: usize) -> Self {
            Self {
                inner: InMemoryPartitionRegistry::new(),
                failures: AtomicUsize::new(failures),
                register_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PartitionRegistry for FlakyRegistry {
        async fn has(&self, dimension: &str, key: &PartitionKey) -> bioflow_store::Result<bool> {
            self.inner.has(dimension, key).await
        }

        async fn register(
            &self,
            dimension: &str,
            keys: &BTreeSet<PartitionKey>,
        ) -> bioflow_store::Result<usize> {
            self.register_calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::LockPoisoned("injected failure".to_string()));
            }
            self.inner.register(dimension, keys).await
        }

        async fn keys(&self, dimension: &str) -> bioflow_store::Result<BTreeSet<PartitionKey>> {
            self.inner.keys(dimension).await
        }
    }

    fn keys_of(requests: &[WorkRequest]) -> Vec<&str> {
        requests.iter().map(|r| r.partition_key.as_str()).collect()
    }

    async fn write(dir: &Path, name: &str) {
        tokio::fs::write(dir.join(name), name).await.unwrap();
    }

    #[tokio::test]
    async fn test_poll_emits_only_the_delta() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt").await;
        write(dir.path(), "b.txt").await;

        let registry = Arc::new(InMemoryPartitionRegistry::new());
        registry
            .register("source", &[PartitionKey::from("a.txt")].into_iter().collect())
            .await
            .unwrap();

        let sensor = DiscoveryPoller::new(dir.path(), "source", registry.clone());
        let requests = sensor.poll().await.unwrap();

        assert_eq!(keys_of(&requests), vec!["b.txt"]);
        assert_eq!(requests[0].dimension, "source");
        assert!(
            registry
                .has("source", &PartitionKey::from("b.txt"))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_second_poll_without_changes_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt").await;

        let sensor = DiscoveryPoller::new(
            dir.path(),
            "source",
            Arc::new(InMemoryPartitionRegistry::new()),
        );

        assert_eq!(sensor.poll().await.unwrap().len(), 1);
        assert!(sensor.poll().await.unwrap().is_empty());

        write(dir.path(), "b.txt").await;
        assert_eq!(keys_of(&sensor.poll().await.unwrap()), vec!["b.txt"]);
    }

    #[tokio::test]
    async fn test_directories_are_not_partitions() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt").await;
        tokio::fs::create_dir(dir.path().join("nested")).await.unwrap();

        let sensor = DiscoveryPoller::new(
            dir.path(),
            "source",
            Arc::new(InMemoryPartitionRegistry::new()),
        );

        assert_eq!(keys_of(&sensor.poll().await.unwrap()), vec!["a.txt"]);
    }

    #[tokio::test]
    async fn test_missing_source_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let sensor = DiscoveryPoller::new(
            dir.path().join("absent"),
            "source",
            Arc::new(InMemoryPartitionRegistry::new()),
        );

        assert!(sensor.poll().await.is_err());
    }

    #[tokio::test]
    async fn test_transient_registration_failure_is_retried_within_tick() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt").await;

        let registry = Arc::new(FlakyRegistry::new(1));
        let sensor = DiscoveryPoller::new(dir.path(), "source", registry.clone());

        assert_eq!(sensor.poll().await.unwrap().len(), 1);
        assert_eq!(registry.register_calls.load(Ordering::SeqCst), 2);
        assert!(
            registry
                .has("source", &PartitionKey::from("a.txt"))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_failed_registration_is_not_re_emitted() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt").await;

        let registry = Arc::new(FlakyRegistry::new(MAX_REGISTER_ATTEMPTS as usize));
        let sensor = DiscoveryPoller::new(dir.path(), "source", registry.clone());

        // Emitted even though registration never committed
        assert_eq!(keys_of(&sensor.poll().await.unwrap()), vec!["a.txt"]);
        assert!(
            !registry
                .has("source", &PartitionKey::from("a.txt"))
                .await
                .unwrap()
        );

        // Next tick commits the pending key first and emits nothing new
        assert!(sensor.poll().await.unwrap().is_empty());
        assert!(
            registry
                .has("source", &PartitionKey::from("a.txt"))
                .await
                .unwrap()
        );
    }
}
