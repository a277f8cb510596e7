//! Partition scheduler
//!
//! Ticks the discovery sensor on a fixed interval and runs the pipeline
//! for every emitted work request in its own task. A semaphore bounds the
//! number of partitions executing at once; requests wait for a permit
//! instead of being skipped.

use anyhow::Result;
use bioflow_core::domain::partition::WorkRequest;
use bioflow_core::domain::pipeline::{PartitionOutcome, PartitionState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::pipeline::AssetPipeline;
use crate::sensor::DiscoveryPoller;

/// Feeds work requests from the sensor to the pipeline
pub struct PartitionScheduler {
    poll_interval: Duration,
    sensor: Arc<DiscoveryPoller>,
    pipeline: Arc<AssetPipeline>,
    semaphore: Arc<Semaphore>,
}

impl PartitionScheduler {
    /// Creates a new scheduler
    pub fn new(
        poll_interval: Duration,
        max_parallel_partitions: usize,
        sensor: Arc<DiscoveryPoller>,
        pipeline: Arc<AssetPipeline>,
    ) -> Self {
        Self {
            poll_interval,
            sensor,
            pipeline,
            semaphore: Arc::new(Semaphore::new(max_parallel_partitions)),
        }
    }

    /// Starts the sensor loop
    ///
    /// Partitions keep running in the background while later ticks happen.
    /// A failing tick is logged and does not stop the loop.
    pub async fn run(&self) -> Result<()> {
        info!(
            "Starting partition scheduler (interval: {:?})",
            self.poll_interval
        );

        let mut interval = time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        let mut running = JoinSet::new();

        loop {
            interval.tick().await;

            while let Some(finished) = running.try_join_next() {
                if let Err(e) = finished {
                    warn!("Partition task panicked: {}", e);
                }
            }

            debug!("Polling for new partitions");

            match self.sensor.poll().await {
                Ok(requests) => {
                    if !requests.is_empty() {
                        info!("Scheduling {} partition(s) this tick", requests.len());
                    }
                    for request in requests {
                        running.spawn(self.partition_task(request));
                    }
                }
                Err(e) => {
                    error!("Error during sensor tick: {:#}", e);
                }
            }
        }
    }

    /// Performs a single tick and waits for every scheduled partition
    pub async fn run_once(&self) -> Result<Vec<PartitionOutcome>> {
        let requests = self.sensor.poll().await?;

        if requests.is_empty() {
            debug!("No new partitions");
            return Ok(Vec::new());
        }

        info!("Scheduling {} partition(s)", requests.len());

        let handles: Vec<JoinHandle<PartitionOutcome>> = requests
            .into_iter()
            .map(|request| tokio::spawn(self.partition_task(request)))
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!("Partition task panicked: {}", e),
            }
        }

        Ok(outcomes)
    }

    /// Builds the task running one partition once a permit is available
    fn partition_task(
        &self,
        request: WorkRequest,
    ) -> impl Future<Output = PartitionOutcome> + Send + 'static {
        let semaphore = Arc::clone(&self.semaphore);
        let pipeline = Arc::clone(&self.pipeline);

        async move {
            // Permit is released when dropped
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    return PartitionOutcome {
                        partition_key: request.partition_key,
                        state: PartitionState::Failed,
                        failed_after: Some(PartitionState::Pending),
                        error: Some("scheduler is shutting down".to_string()),
                    };
                }
            };

            let outcome = pipeline.run_partition(&request).await;
            info!(
                "Partition {} finished in state {}",
                outcome.partition_key, outcome.state
            );
            outcome
        }
    }
}
