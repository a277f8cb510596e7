//! Container execution
//!
//! Runs one container per call through the podman (or docker) CLI:
//! - Resolving volume mounts to absolute host paths
//! - Passing the environment contract (`INPUT_FILE_PATH`, `OUTPUT_FILE_PATH`)
//! - Draining the engine's stdout/stderr into log sinks while waiting
//! - Killing and removing the container when it exceeds its timeout
//!
//! The adapter never retries. Reading the output artifact is left to the
//! caller once the container has exited.

use async_trait::async_trait;
use bioflow_core::domain::container::{ContainerRunResult, ContainerRunSpec};
use bioflow_core::image::CondaImage;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::output::{self, OutputSink, TailBuffer, TracingSink};

/// Runs containers described by a [`ContainerRunSpec`]
#[async_trait]
pub trait ContainerExecutor: Send + Sync {
    /// Runs the container to completion
    ///
    /// A non-zero exit status is returned as
    /// [`PipelineError::ContainerExecutionFailed`].
    async fn run(&self, spec: &ContainerRunSpec) -> Result<ContainerRunResult>;
}

/// Checks if the container engine is installed and answering
pub async fn check_engine_available(program: &str) -> anyhow::Result<()> {
    let output = Command::new(program)
        .arg("--version")
        .output()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to execute '{} --version': {}", program, e))?;

    if !output.status.success() {
        anyhow::bail!("{} is not working correctly", program);
    }

    let version = String::from_utf8_lossy(&output.stdout);
    info!("Container engine is available: {}", version.trim());

    Ok(())
}

/// Generates a unique container name for a partition or build
///
/// Characters the engines reject in names are replaced with '-'.
pub fn container_name(label: &str) -> String {
    let label: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();

    format!("bioflow-{}-{}", label, Uuid::new_v4().simple())
}

/// Container executor shelling out to the podman/docker CLI
#[derive(Debug, Clone)]
pub struct PodmanExecutor {
    program: String,
    /// Arguments placed before the subcommand (e.g. `--remote`)
    engine_args: Vec<String>,
    timeout: Duration,
    tail_lines: usize,
}

impl PodmanExecutor {
    /// Creates an executor for the given engine binary
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            engine_args: Vec::new(),
            timeout: Duration::from_secs(3600),
            tail_lines: 20,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let (program, engine_args) = config.engine_command();
        Self::new(program)
            .with_engine_args(engine_args)
            .with_timeout(config.container_timeout)
            .with_tail_lines(config.log_tail_lines)
    }

    pub fn with_engine_args(mut self, args: Vec<String>) -> Self {
        self.engine_args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_tail_lines(mut self, tail_lines: usize) -> Self {
        self.tail_lines = tail_lines;
        self
    }

    /// Runs a container, delivering its output to `sink` as well as to the
    /// failure tail
    pub async fn run_with_sink<S>(
        &self,
        spec: &ContainerRunSpec,
        sink: &mut S,
    ) -> Result<ContainerRunResult>
    where
        S: OutputSink + ?Sized,
    {
        let resolved = resolve_mounts(spec).await?;
        let args = run_args(&resolved);

        info!(
            "Running container {} (image {}, {} mount(s))",
            resolved.name.as_deref().unwrap_or("<unnamed>"),
            resolved.image,
            resolved.mounts.len()
        );
        debug!("{} {} {}", self.program, self.engine_args.join(" "), args.join(" "));

        let mut result = self
            .execute(args, &resolved.image, resolved.name.as_deref(), sink)
            .await?;
        result.output_path = resolved.output_host_path();

        Ok(result)
    }

    /// Builds a conda image, streaming the build log
    pub async fn build_image(
        &self,
        image: &CondaImage,
        dockerfile: &str,
        cache: bool,
    ) -> Result<ContainerRunResult> {
        let command = image.build_command(&self.program, dockerfile, cache)?;
        let args = command.into_iter().skip(1).collect();

        info!("Building image {}", image);

        let mut sink = TracingSink::new(format!("build {}", image));
        self.execute(args, &image.to_string(), None, &mut sink).await
    }

    /// Spawns the engine, drains its output and waits for it under the timeout
    async fn execute<S>(
        &self,
        args: Vec<String>,
        image: &str,
        container: Option<&str>,
        sink: &mut S,
    ) -> Result<ContainerRunResult>
    where
        S: OutputSink + ?Sized,
    {
        let mut child = Command::new(&self.program)
            .args(&self.engine_args)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PipelineError::ContainerLaunch {
                image: image.to_string(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("engine stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("engine stderr was not captured"))?;

        let mut tail = TailBuffer::new(self.tail_lines);
        let waited = {
            let mut sinks = (&mut *sink, &mut tail);
            tokio::time::timeout(self.timeout, async {
                let stats = output::drain(stdout, stderr, &mut sinks).await?;
                let status = child.wait().await?;
                Ok::<_, std::io::Error>((stats, status))
            })
            .await
        };

        let (stats, status) = match waited {
            Ok(done) => done?,
            Err(_) => {
                warn!(
                    "Container {} exceeded timeout of {:?}, killing it",
                    image, self.timeout
                );
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill engine process: {}", e);
                }
                if let Some(name) = container {
                    self.remove_container(name).await;
                }
                return Err(PipelineError::ContainerTimeout {
                    image: image.to_string(),
                    timeout: self.timeout,
                });
            }
        };

        // Killed by a signal: no exit code
        let exit_code = status.code().unwrap_or(-1);

        debug!(
            "Container {} finished: exit_code={}, stdout_lines={}, stderr_lines={}",
            image, exit_code, stats.stdout_lines, stats.stderr_lines
        );

        let log_tail = tail.into_lines();
        if exit_code != 0 {
            return Err(PipelineError::ContainerExecutionFailed {
                image: image.to_string(),
                exit_code,
                log_tail,
            });
        }

        Ok(ContainerRunResult {
            exit_code,
            stdout_lines: stats.stdout_lines,
            stderr_lines: stats.stderr_lines,
            log_tail,
            output_path: None,
        })
    }

    /// Force-removes a container, ignoring failures
    async fn remove_container(&self, name: &str) {
        let output = Command::new(&self.program)
            .args(&self.engine_args)
            .arg("rm")
            .arg("-f")
            .arg(name)
            .stdin(Stdio::null())
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                debug!("Container {} removed", name);
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!("Failed to remove container {}: {}", name, stderr.trim());
            }
            Err(e) => {
                warn!("Failed to remove container {}: {}", name, e);
            }
        }
    }
}

#[async_trait]
impl ContainerExecutor for PodmanExecutor {
    async fn run(&self, spec: &ContainerRunSpec) -> Result<ContainerRunResult> {
        let label = spec.name.clone().unwrap_or_else(|| spec.image.clone());
        let mut sink = TracingSink::new(label);
        self.run_with_sink(spec, &mut sink).await
    }
}

/// Returns a copy of `spec` whose mount sources are absolute
///
/// Container engines reject relative host paths. Missing host directories
/// are created so the canonical path exists.
async fn resolve_mounts(spec: &ContainerRunSpec) -> Result<ContainerRunSpec> {
    let mut resolved = spec.clone();
    resolved.mounts.clear();

    for (host, container) in &spec.mounts {
        tokio::fs::create_dir_all(host).await?;
        let absolute: PathBuf = tokio::fs::canonicalize(host).await?;
        resolved.mounts.insert(absolute, container.clone());
    }

    Ok(resolved)
}

/// Arguments of the `run` subcommand for a resolved spec
fn run_args(spec: &ContainerRunSpec) -> Vec<String> {
    let mut args = vec!["run".to_string(), "--rm".to_string()];

    if let Some(name) = &spec.name {
        args.push("--name".to_string());
        args.push(name.clone());
    }

    for (key, value) in &spec.env {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }

    for (host, container) in &spec.mounts {
        args.push("-v".to_string());
        args.push(format!("{}:{}", host.display(), container));
    }

    args.push(spec.image.clone());
    args
}
