//! Runner configuration
//!
//! Defines the data layout, asset names, container settings, polling cadence
//! and storage location of the pipeline.

use anyhow::Context;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Value of `database_url` selecting the in-memory stores
pub const IN_MEMORY_DATABASE: &str = "memory";

/// Runner configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Host directory shared with containers (the data volume)
    pub data_root: PathBuf,

    /// Subdirectory of the data root listed by the sensor.
    /// Also the name of the source asset.
    pub source_dir: String,

    /// Name of the dynamic partition dimension
    pub partition_dimension: String,

    pub transform_asset: String,
    pub consume_asset: String,

    /// Image run by the transform stage
    pub transform_image: String,

    /// Mount point of the data root inside containers
    pub container_mount: String,

    /// Container engine command, optionally with leading arguments
    /// (e.g. "podman" or "podman --remote")
    pub container_engine: String,

    /// Maximum time a container may run before it is killed
    pub container_timeout: Duration,

    /// How often the sensor lists the source directory
    pub poll_interval: Duration,

    /// Max partitions executing the pipeline at once
    pub max_parallel_partitions: usize,

    /// SQLite URL, or "memory" for in-memory stores
    pub database_url: String,

    /// Number of characters kept as content preview in metadata
    pub preview_chars: usize,

    /// Number of output lines attached to container failures
    pub log_tail_lines: usize,

    /// Run a single tick and exit
    pub one_shot: bool,
}

impl Config {
    /// Creates a new configuration with defaults rooted at `data_root`
    pub fn new(data_root: PathBuf) -> Self {
        Self {
            data_root,
            source_dir: "source_a".to_string(),
            partition_dimension: "source".to_string(),
            transform_asset: "asset_b".to_string(),
            consume_asset: "asset_c".to_string(),
            transform_image: "asset_b:latest".to_string(),
            container_mount: "/data".to_string(),
            container_engine: "podman".to_string(),
            container_timeout: Duration::from_secs(3600),
            poll_interval: Duration::from_secs(30),
            max_parallel_partitions: 2,
            database_url: "sqlite://bioflow.db".to_string(),
            preview_chars: 100,
            log_tail_lines: 20,
            one_shot: false,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Recognized environment variables (all optional):
    /// - BIOFLOW_DATA_ROOT (default: data)
    /// - BIOFLOW_SOURCE_DIR (default: source_a)
    /// - BIOFLOW_PARTITION_DIMENSION (default: source)
    /// - BIOFLOW_TRANSFORM_ASSET (default: asset_b)
    /// - BIOFLOW_CONSUME_ASSET (default: asset_c)
    /// - BIOFLOW_TRANSFORM_IMAGE (default: asset_b:latest)
    /// - BIOFLOW_CONTAINER_MOUNT (default: /data)
    /// - BIOFLOW_CONTAINER_ENGINE (default: podman)
    /// - BIOFLOW_CONTAINER_TIMEOUT (seconds, default: 3600)
    /// - BIOFLOW_POLL_INTERVAL (seconds, default: 30)
    /// - BIOFLOW_MAX_PARALLEL_PARTITIONS (default: 2)
    /// - BIOFLOW_DATABASE_URL (default: sqlite://bioflow.db)
    /// - BIOFLOW_PREVIEW_CHARS (default: 100)
    /// - BIOFLOW_LOG_TAIL_LINES (default: 20)
    /// - BIOFLOW_ONE_SHOT (1/true to run a single tick)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Creates configuration from an arbitrary variable lookup
    ///
    /// Unset variables take their default; set but unparsable ones are an error.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_root = lookup("BIOFLOW_DATA_ROOT").unwrap_or_else(|| "data".to_string());
        let mut config = Self::new(PathBuf::from(data_root));

        let string = |name: &str, target: &mut String| {
            if let Some(value) = lookup(name) {
                *target = value;
            }
        };

        string("BIOFLOW_SOURCE_DIR", &mut config.source_dir);
        string("BIOFLOW_PARTITION_DIMENSION", &mut config.partition_dimension);
        string("BIOFLOW_TRANSFORM_ASSET", &mut config.transform_asset);
        string("BIOFLOW_CONSUME_ASSET", &mut config.consume_asset);
        string("BIOFLOW_TRANSFORM_IMAGE", &mut config.transform_image);
        string("BIOFLOW_CONTAINER_MOUNT", &mut config.container_mount);
        string("BIOFLOW_CONTAINER_ENGINE", &mut config.container_engine);
        string("BIOFLOW_DATABASE_URL", &mut config.database_url);

        if let Some(secs) = parse::<u64>(&lookup, "BIOFLOW_CONTAINER_TIMEOUT")? {
            config.container_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse::<u64>(&lookup, "BIOFLOW_POLL_INTERVAL")? {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(n) = parse(&lookup, "BIOFLOW_MAX_PARALLEL_PARTITIONS")? {
            config.max_parallel_partitions = n;
        }
        if let Some(n) = parse(&lookup, "BIOFLOW_PREVIEW_CHARS")? {
            config.preview_chars = n;
        }
        if let Some(n) = parse(&lookup, "BIOFLOW_LOG_TAIL_LINES")? {
            config.log_tail_lines = n;
        }

        config.one_shot = lookup("BIOFLOW_ONE_SHOT")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(config)
    }

    /// Loads and validates configuration from the environment
    ///
    /// A set but invalid variable is an error; nothing falls back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(|name| std::env::var(name).ok())
    }

    pub fn load_from<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self::from_lookup(lookup).context("invalid BIOFLOW_* configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Directory listed by the sensor
    pub fn source_path(&self) -> PathBuf {
        self.data_root.join(&self.source_dir)
    }

    /// Splits the engine command into program and leading arguments
    pub fn engine_command(&self) -> (String, Vec<String>) {
        let mut parts = self.container_engine.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_default();
        (program, parts.collect())
    }

    pub fn uses_in_memory_store(&self) -> bool {
        self.database_url == IN_MEMORY_DATABASE
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("source_dir", &self.source_dir),
            ("partition_dimension", &self.partition_dimension),
            ("transform_asset", &self.transform_asset),
            ("consume_asset", &self.consume_asset),
            ("transform_image", &self.transform_image),
            ("database_url", &self.database_url),
        ] {
            if value.trim().is_empty() {
                anyhow::bail!("{} cannot be empty", name);
            }
        }

        if self.container_engine.trim().is_empty() {
            anyhow::bail!("container_engine cannot be empty");
        }

        if !Path::new(&self.container_mount).is_absolute() {
            anyhow::bail!("container_mount must be an absolute path");
        }

        if self.container_timeout.is_zero() {
            anyhow::bail!("container_timeout must be greater than 0");
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.max_parallel_partitions == 0 {
            anyhow::bail!("max_parallel_partitions must be greater than 0");
        }

        if self.log_tail_lines == 0 {
            anyhow::bail!("log_tail_lines must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(PathBuf::from("data"))
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> anyhow::Result<Option<T>> {
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: {}", name, raw)),
        None => Ok(None),
    }
}
