//! Error types for pipeline execution
//!
//! Every variant aborts only the run of the partition it was raised for.

use bioflow_core::domain::partition::PartitionKey;
use bioflow_core::image::ImageError;
use bioflow_store::StoreError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The raw input of a partition does not exist
    #[error("source for partition '{partition_key}' not found at {}", .path.display())]
    SourceNotFound {
        partition_key: PartitionKey,
        path: PathBuf,
    },

    /// The raw input exists but is not valid UTF-8 text
    #[error("source for partition '{partition_key}' at {} is not UTF-8 text", .path.display())]
    SourceNotText {
        partition_key: PartitionKey,
        path: PathBuf,
    },

    /// Partition keys must be plain file names
    #[error("invalid partition key '{0}'")]
    InvalidPartitionKey(PartitionKey),

    /// The container process exited with a non-zero status
    #[error("container {image} exited with status {exit_code}")]
    ContainerExecutionFailed {
        image: String,
        exit_code: i32,
        /// Last lines of combined output, oldest first
        log_tail: Vec<String>,
    },

    #[error("container {image} did not finish within {timeout:?}")]
    ContainerTimeout { image: String, timeout: Duration },

    #[error("failed to launch container {image}: {source}")]
    ContainerLaunch {
        image: String,
        source: std::io::Error,
    },

    /// The container exited cleanly but left no output artifact
    #[error("output for partition '{partition_key}' missing at {}", .path.display())]
    OutputMissing {
        partition_key: PartitionKey,
        path: PathBuf,
    },

    /// Upstream has not materialized this partition yet
    #[error("no materialization of {asset} for partition '{partition_key}' yet")]
    LedgerNotFound {
        asset: String,
        partition_key: PartitionKey,
    },

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// True for the recoverable "upstream not materialized yet" condition
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::LedgerNotFound { .. })
    }

    /// Short name of the error kind, used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceNotFound { .. } => "source_not_found",
            Self::SourceNotText { .. } => "source_not_text",
            Self::InvalidPartitionKey(_) => "invalid_partition_key",
            Self::ContainerExecutionFailed { .. } => "container_execution_failed",
            Self::ContainerTimeout { .. } => "container_timeout",
            Self::ContainerLaunch { .. } => "container_launch",
            Self::OutputMissing { .. } => "output_missing",
            Self::LedgerNotFound { .. } => "ledger_not_found",
            Self::Image(_) => "image",
            Self::Store(StoreError::RegistrationConflict { .. }) => "registration_conflict",
            Self::Store(_) => "store",
            Self::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_ready_is_only_ledger_not_found() {
        let not_ready = PipelineError::LedgerNotFound {
            asset: "asset_b".to_string(),
            partition_key: PartitionKey::from("sample1.txt"),
        };
        assert!(not_ready.is_not_ready());

        let failed = PipelineError::ContainerExecutionFailed {
            image: "asset_b:latest".to_string(),
            exit_code: 1,
            log_tail: vec![],
        };
        assert!(!failed.is_not_ready());
        assert_eq!(failed.kind(), "container_execution_failed");
    }

    #[test]
    fn test_display_includes_context() {
        let err = PipelineError::SourceNotFound {
            partition_key: PartitionKey::from("missing.txt"),
            path: PathBuf::from("data/source_a/missing.txt"),
        };
        assert_eq!(
            err.to_string(),
            "source for partition 'missing.txt' not found at data/source_a/missing.txt"
        );
    }
}
