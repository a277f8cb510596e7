//! Container image descriptors
//!
//! Formats the build command for a conda-based image from its list of
//! package dependencies. Purely a data-to-arguments transform; running the
//! command is the runner's concern.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while formatting an image build
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageError {
    #[error("image {0} has no dependencies")]
    NoDependencies(String),
}

/// A conda package pinned to a channel and version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub channel: String,
    pub package: String,
    pub version: String,
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}={}", self.channel, self.package, self.version)
    }
}

/// An image built from a conda Dockerfile with a set of dependencies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CondaImage {
    pub image_name: String,
    pub image_version: String,
    pub dependencies: Vec<Dependency>,
}

impl fmt::Display for CondaImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.image_name, self.image_version)
    }
}

impl CondaImage {
    /// Builds the argument list of the image build command
    ///
    /// # Arguments
    /// * `engine` - Container engine binary (e.g. `podman`, `docker`)
    /// * `dockerfile` - Path of the conda Dockerfile
    /// * `cache` - When false, `--no-cache` is passed
    pub fn build_command(
        &self,
        engine: &str,
        dockerfile: &str,
        cache: bool,
    ) -> Result<Vec<String>, ImageError> {
        if self.dependencies.is_empty() {
            return Err(ImageError::NoDependencies(self.to_string()));
        }

        let mut cmd = vec![
            engine.to_string(),
            "build".to_string(),
            "--progress=plain".to_string(),
            "-t".to_string(),
            self.to_string(),
            "-f".to_string(),
            dockerfile.to_string(),
        ];

        if !cache {
            cmd.push("--no-cache".to_string());
        }

        let dependencies = self
            .dependencies
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ");

        cmd.push("--build-arg".to_string());
        cmd.push(format!("CONDA_DEPENDENCIES={}", dependencies));
        cmd.push(".".to_string());

        Ok(cmd)
    }
}
