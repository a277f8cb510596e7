//! Asset pipeline
//!
//! Three assets executed in order for each partition:
//! - load: reads the raw source file
//! - transform: runs the transform image over it in a container
//! - consume: reads back the transform's materialization metadata
//!
//! Each successful stage appends a materialization to the ledger. Stages
//! of one partition run strictly in sequence; different partitions share
//! nothing but the ledger.

use bioflow_core::domain::asset::{
    AssetRecord, ConsumedSummary, LoadedRecord, Metadata, MetadataValue, keys, preview,
};
use bioflow_core::domain::container::{ContainerRunSpec, INPUT_FILE_PATH, OUTPUT_FILE_PATH};
use bioflow_core::domain::partition::{PartitionKey, WorkRequest};
use bioflow_core::domain::pipeline::{PartitionOutcome, PartitionState};
use bioflow_store::MaterializationLedger;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::podman::{self, ContainerExecutor};

/// Number of leading characters echoed to the log when loading a source
const LOG_PREVIEW_CHARS: usize = 10;

/// Data layout and asset names used by the stages
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub data_root: PathBuf,
    /// Source asset name, also its directory under the data root
    pub source_asset: String,
    /// Transform asset name, also its output directory under the data root
    pub transform_asset: String,
    pub consume_asset: String,
    pub transform_image: String,
    pub container_mount: String,
    pub preview_chars: usize,
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            data_root: config.data_root.clone(),
            source_asset: config.source_dir.clone(),
            transform_asset: config.transform_asset.clone(),
            consume_asset: config.consume_asset.clone(),
            transform_image: config.transform_image.clone(),
            container_mount: config.container_mount.clone(),
            preview_chars: config.preview_chars,
        }
    }
}

/// Runs the load -> transform -> consume graph for one partition at a time
pub struct AssetPipeline {
    settings: PipelineSettings,
    ledger: Arc<dyn MaterializationLedger>,
    executor: Arc<dyn ContainerExecutor>,
}

impl AssetPipeline {
    pub fn new(
        settings: PipelineSettings,
        ledger: Arc<dyn MaterializationLedger>,
        executor: Arc<dyn ContainerExecutor>,
    ) -> Self {
        Self {
            settings,
            ledger,
            executor,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Drives one partition through every stage
    ///
    /// A failing stage moves the partition to `Failed`; nothing is retried.
    pub async fn run_partition(&self, request: &WorkRequest) -> PartitionOutcome {
        let key = &request.partition_key;
        let mut state = PartitionState::Pending;

        info!("Starting pipeline for partition {}", key);

        match self.drive(key, &mut state).await {
            Ok(()) => {
                info!("Partition {} consumed", key);
                PartitionOutcome {
                    partition_key: key.clone(),
                    state,
                    failed_after: None,
                    error: None,
                }
            }
            Err(e) => {
                error!(
                    partition = %key,
                    stage = self.stage_asset(state),
                    kind = e.kind(),
                    "Partition run failed: {}",
                    e
                );
                if let PipelineError::ContainerExecutionFailed { log_tail, .. } = &e {
                    for line in log_tail {
                        error!(partition = %key, "  | {}", line);
                    }
                }
                PartitionOutcome {
                    partition_key: key.clone(),
                    state: PartitionState::Failed,
                    failed_after: Some(state),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn drive(&self, key: &PartitionKey, state: &mut PartitionState) -> Result<()> {
        let loaded = self.load(key).await?;
        *state = PartitionState::Loaded;

        self.transform(key, &loaded).await?;
        *state = PartitionState::Transformed;

        self.consume(key).await?;
        *state = PartitionState::Consumed;

        Ok(())
    }

    /// Asset executed when leaving `state`
    fn stage_asset(&self, state: PartitionState) -> &str {
        match state {
            PartitionState::Pending => self.settings.source_asset.as_str(),
            PartitionState::Loaded => self.settings.transform_asset.as_str(),
            PartitionState::Transformed | PartitionState::Consumed | PartitionState::Failed => {
                self.settings.consume_asset.as_str()
            }
        }
    }

    /// Stage 1: reads the raw source content of the partition
    pub async fn load(&self, key: &PartitionKey) -> Result<LoadedRecord> {
        validate_key(key)?;

        let asset = &self.settings.source_asset;
        let rel_path = Path::new(asset).join(key.as_str());
        let path = self.settings.data_root.join(&rel_path);

        info!("Loading {} partition {}", asset, key);

        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(PipelineError::SourceNotFound {
                    partition_key: key.clone(),
                    path,
                });
            }
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                return Err(PipelineError::SourceNotText {
                    partition_key: key.clone(),
                    path,
                });
            }
            Err(e) => return Err(e.into()),
        };
        let path = tokio::fs::canonicalize(&path).await?;

        info!("Loaded {} bytes from {}", contents.len(), key);
        info!("First {} chars: {}", LOG_PREVIEW_CHARS, preview(&contents, LOG_PREVIEW_CHARS));

        let mut metadata = Metadata::new();
        metadata.insert(keys::LENGTH.to_string(), MetadataValue::Int(contents.len() as i64));
        metadata.insert(
            keys::PREVIEW.to_string(),
            MetadataValue::Markdown(preview(&contents, self.settings.preview_chars)),
        );
        metadata.insert(
            keys::PATH.to_string(),
            MetadataValue::Path(path.display().to_string()),
        );
        self.ledger.append(asset, key, metadata).await?;

        Ok(LoadedRecord {
            partition_key: key.clone(),
            path,
            rel_path,
            contents,
        })
    }

    /// Stage 2: runs the transform container over the loaded input
    ///
    /// The data root is mounted into the container; input and output paths
    /// are passed as in-container paths under the mount.
    pub async fn transform(&self, key: &PartitionKey, loaded: &LoadedRecord) -> Result<AssetRecord> {
        validate_key(key)?;

        let asset = &self.settings.transform_asset;
        let mount = Path::new(&self.settings.container_mount);
        let output_rel = Path::new(asset).join(key.as_str());
        let output_host = self.settings.data_root.join(&output_rel);

        // The container can only write into directories that exist on the host
        tokio::fs::create_dir_all(self.settings.data_root.join(asset)).await?;

        let input_path = mount.join(&loaded.rel_path).display().to_string();
        let output_path = mount.join(&output_rel).display().to_string();

        info!(
            "Setting env vars: {}={}, {}={}",
            INPUT_FILE_PATH, input_path, OUTPUT_FILE_PATH, output_path
        );
        info!(
            "Mounting {} to {} in container",
            self.settings.data_root.display(),
            self.settings.container_mount
        );

        let spec = ContainerRunSpec::new(&self.settings.transform_image)
            .with_name(podman::container_name(key.as_str()))
            .with_env(INPUT_FILE_PATH, input_path)
            .with_env(OUTPUT_FILE_PATH, output_path)
            .with_mount(&self.settings.data_root, &self.settings.container_mount);

        let result = self.executor.run(&spec).await?;

        let artifact = result.output_path.unwrap_or(output_host);
        let contents = match tokio::fs::read_to_string(&artifact).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(PipelineError::OutputMissing {
                    partition_key: key.clone(),
                    path: artifact,
                });
            }
            Err(e) => return Err(e.into()),
        };

        info!("Transform produced {} bytes for {}", contents.len(), key);

        let mut metadata = Metadata::new();
        metadata.insert(keys::LENGTH.to_string(), MetadataValue::Int(contents.len() as i64));
        metadata.insert(
            keys::PREVIEW.to_string(),
            MetadataValue::Markdown(preview(&contents, self.settings.preview_chars)),
        );
        metadata.insert(
            keys::PATH.to_string(),
            MetadataValue::Path(artifact.display().to_string()),
        );

        let record = self.ledger.append(asset, key, metadata).await?;
        Ok(record)
    }

    /// Stage 3: consumes the transform's latest materialization
    ///
    /// Returns [`PipelineError::LedgerNotFound`] (see
    /// [`PipelineError::is_not_ready`]) when the transform has not run for
    /// this partition yet.
    pub async fn consume(&self, key: &PartitionKey) -> Result<ConsumedSummary> {
        let upstream = &self.settings.transform_asset;

        let record = self
            .ledger
            .latest(upstream, key)
            .await?
            .ok_or_else(|| PipelineError::LedgerNotFound {
                asset: upstream.clone(),
                partition_key: key.clone(),
            })?;

        let length = record.int(keys::LENGTH).unwrap_or_else(|| {
            warn!("Materialization {} has no {} metadata", record.id, keys::LENGTH);
            0
        });
        let summary = ConsumedSummary {
            partition_key: key.clone(),
            upstream_record: record.id,
            length,
            preview: record.text(keys::PREVIEW).unwrap_or_default().to_string(),
            output_path: PathBuf::from(record.path(keys::PATH).unwrap_or_default()),
        };

        info!(
            "Consumed {} materialization {} for {}: {} bytes",
            upstream, record.id, key, summary.length
        );

        let mut metadata = Metadata::new();
        metadata.insert(
            keys::UPSTREAM_RECORD.to_string(),
            MetadataValue::Text(record.id.to_string()),
        );
        metadata.insert(keys::UPSTREAM_LENGTH.to_string(), MetadataValue::Int(length));
        metadata.insert(
            keys::UPSTREAM_PATH.to_string(),
            MetadataValue::Path(summary.output_path.display().to_string()),
        );
        self.ledger
            .append(&self.settings.consume_asset, key, metadata)
            .await?;

        Ok(summary)
    }
}

/// Partition keys must be a single plain file name so that they cannot
/// address anything outside their asset directory
fn validate_key(key: &PartitionKey) -> Result<()> {
    let mut components = Path::new(key.as_str()).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(PipelineError::InvalidPartitionKey(key.clone())),
    }
}
