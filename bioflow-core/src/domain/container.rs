//! Container run domain types
//!
//! A [`ContainerRunSpec`] describes one containerized execution. The file
//! contract with the containerized process is carried in its environment:
//! `INPUT_FILE_PATH` and `OUTPUT_FILE_PATH` hold in-container paths that are
//! reachable from the host through one of the volume mounts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Environment variable carrying the in-container input path
pub const INPUT_FILE_PATH: &str = "INPUT_FILE_PATH";

/// Environment variable carrying the in-container output path
pub const OUTPUT_FILE_PATH: &str = "OUTPUT_FILE_PATH";

/// Description of one containerized execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRunSpec {
    pub image: String,
    pub env: BTreeMap<String, String>,
    /// Host path -> in-container path
    pub mounts: BTreeMap<PathBuf, String>,
    /// Optional container name, used to clean up after a timeout
    pub name: Option<String>,
}

impl ContainerRunSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            env: BTreeMap::new(),
            mounts: BTreeMap::new(),
            name: None,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_mount(mut self, host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        self.mounts.insert(host.into(), container.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Maps an in-container path back to the host through the mounts
    ///
    /// The longest matching mount point wins. Returns `None` when the path
    /// is not under any mount.
    pub fn host_path_for(&self, container_path: &str) -> Option<PathBuf> {
        let target = Path::new(container_path);

        self.mounts
            .iter()
            .filter_map(|(host, mount)| {
                target
                    .strip_prefix(mount)
                    .ok()
                    .map(|rest| (Path::new(mount).components().count(), host.join(rest)))
            })
            .max_by_key(|(depth, _)| *depth)
            .map(|(_, path)| path)
    }

    /// Host path of the output artifact promised by `OUTPUT_FILE_PATH`
    pub fn output_host_path(&self) -> Option<PathBuf> {
        self.env
            .get(OUTPUT_FILE_PATH)
            .and_then(|path| self.host_path_for(path))
    }
}

/// Outcome of a containerized execution
///
/// Output lines have already been delivered to the logging sinks; only the
/// counts and the last few lines are kept here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRunResult {
    pub exit_code: i32,
    pub stdout_lines: usize,
    pub stderr_lines: usize,
    pub log_tail: Vec<String>,
    /// Host path of the artifact named by `OUTPUT_FILE_PATH`, if any.
    /// Reading it is the caller's job.
    pub output_path: Option<PathBuf>,
}

impl ContainerRunResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}
