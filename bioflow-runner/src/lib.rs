//! Bioflow Runner
//!
//! Watches a source directory for new raw inputs and drives each one, as a
//! partition, through the load -> transform -> consume asset graph.
//!
//! Architecture:
//! - Configuration: settings from environment or defaults
//! - Sensor: discovers new partitions and registers them
//! - Pipeline: the three asset stages and the per-partition state machine
//! - Podman: containerized execution of the transform stage
//! - Output: multiplexed draining of child process output into log sinks
//! - Scheduler: tick loop and bounded parallel execution of partitions

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod podman;
pub mod scheduler;
pub mod sensor;

pub use error::{PipelineError, Result};
