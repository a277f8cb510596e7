//! End-to-end pipeline scenarios over a scratch data root

use async_trait::async_trait;
use bioflow_core::domain::asset::keys;
use bioflow_core::domain::container::{ContainerRunResult, ContainerRunSpec};
use bioflow_core::domain::partition::{PartitionKey, WorkRequest};
use bioflow_core::domain::pipeline::PartitionState;
use bioflow_runner::config::Config;
use bioflow_runner::pipeline::{AssetPipeline, PipelineSettings};
use bioflow_runner::podman::{ContainerExecutor, PodmanExecutor};
use bioflow_runner::scheduler::PartitionScheduler;
use bioflow_runner::sensor::DiscoveryPoller;
use bioflow_runner::{PipelineError, Result};
use bioflow_store::{
    InMemoryLedger, InMemoryPartitionRegistry, MaterializationLedger, PartitionRegistry,
};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Fake container engine: parses `-e`/`-v` like podman does and writes
/// HELLO to the host side of OUTPUT_FILE_PATH
const HELLO_ENGINE: &str = r#"
out=""; host=""; mount=""
while [ $# -gt 0 ]; do
    case "$1" in
        -e) case "$2" in OUTPUT_FILE_PATH=*) out="${2#OUTPUT_FILE_PATH=}";; esac; shift 2;;
        -v) host="${2%%:*}"; mount="${2#*:}"; shift 2;;
        --name) shift 2;;
        *) shift;;
    esac
done
echo "writing $out"
printf 'HELLO' > "$host${out#$mount}"
"#;

const FAILING_ENGINE: &str = r#"echo "transform crashed" >&2; exit 1"#;

fn shell_engine(script: &str) -> PodmanExecutor {
    PodmanExecutor::new("/bin/sh")
        .with_engine_args(vec![
            "-c".to_string(),
            script.to_string(),
            "fake-engine".to_string(),
        ])
        .with_timeout(Duration::from_secs(10))
}

/// In-process executor honouring the output contract, tracking concurrency
#[derive(Default)]
struct UppercaseExecutor {
    active: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl ContainerExecutor for UppercaseExecutor {
    async fn run(&self, spec: &ContainerRunSpec) -> Result<ContainerRunResult> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let input = spec
            .host_path_for(&spec.env["INPUT_FILE_PATH"])
            .expect("input under mount");
        let output = spec.output_host_path().expect("output under mount");
        let contents = tokio::fs::read_to_string(&input).await?;
        tokio::time::sleep(Duration::from_millis(20)).await;
        tokio::fs::write(&output, contents.to_uppercase()).await?;

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(ContainerRunResult {
            exit_code: 0,
            stdout_lines: 0,
            stderr_lines: 0,
            log_tail: vec![],
            output_path: Some(output),
        })
    }
}

struct Harness {
    dir: tempfile::TempDir,
    config: Config,
    registry: Arc<InMemoryPartitionRegistry>,
    ledger: Arc<InMemoryLedger>,
    pipeline: Arc<AssetPipeline>,
    sensor: Arc<DiscoveryPoller>,
}

impl Harness {
    fn new(executor: Arc<dyn ContainerExecutor>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("source_a")).unwrap();

        let config = Config::new(dir.path().to_path_buf());
        let registry = Arc::new(InMemoryPartitionRegistry::new());
        let ledger = Arc::new(InMemoryLedger::new());
        let pipeline = Arc::new(AssetPipeline::new(
            PipelineSettings::from(&config),
            ledger.clone(),
            executor,
        ));
        let sensor = Arc::new(DiscoveryPoller::new(
            config.source_path(),
            config.partition_dimension.clone(),
            registry.clone(),
        ));

        Self {
            dir,
            config,
            registry,
            ledger,
            pipeline,
            sensor,
        }
    }

    fn add_source(&self, name: &str, contents: &str) {
        std::fs::write(self.dir.path().join("source_a").join(name), contents).unwrap();
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }
}

#[tokio::test]
async fn scenario_a_discovery_and_load() {
    let harness = Harness::new(Arc::new(UppercaseExecutor::default()));
    harness.add_source("sample1.txt", "raw sample text\n");

    let requests = harness.sensor.poll().await.unwrap();
    assert_eq!(
        requests,
        vec![WorkRequest::new("source", PartitionKey::from("sample1.txt"))]
    );
    assert!(
        harness
            .registry
            .has("source", &PartitionKey::from("sample1.txt"))
            .await
            .unwrap()
    );

    let loaded = harness
        .pipeline
        .load(&requests[0].partition_key)
        .await
        .unwrap();
    assert_eq!(loaded.contents, "raw sample text\n");

    assert!(harness.sensor.poll().await.unwrap().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn scenario_b_transform_output_becomes_metadata() {
    let harness = Harness::new(Arc::new(shell_engine(HELLO_ENGINE)));
    harness.add_source("sample1.txt", "hello");
    let key = PartitionKey::from("sample1.txt");

    let loaded = harness.pipeline.load(&key).await.unwrap();
    let record = harness.pipeline.transform(&key, &loaded).await.unwrap();

    assert_eq!(record.asset, "asset_b");
    assert_eq!(record.int(keys::LENGTH), Some(5));
    assert_eq!(record.text(keys::PREVIEW), Some("HELLO"));

    let written = std::fs::read_to_string(harness.root().join("asset_b/sample1.txt")).unwrap();
    assert_eq!(written, "HELLO");

    let latest = harness
        .ledger
        .latest("asset_b", &key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.id, record.id);

    let summary = harness.pipeline.consume(&key).await.unwrap();
    assert_eq!(summary.length, 5);
    assert_eq!(summary.preview, "HELLO");
    assert_eq!(summary.upstream_record, record.id);
}

#[cfg(unix)]
#[tokio::test]
async fn scenario_c_failed_container_does_not_block_discovery() {
    let harness = Harness::new(Arc::new(shell_engine(FAILING_ENGINE)));
    harness.add_source("sample1.txt", "hello");

    let requests = harness.sensor.poll().await.unwrap();
    assert_eq!(requests.len(), 1);

    let outcome = harness.pipeline.run_partition(&requests[0]).await;
    assert_eq!(outcome.state, PartitionState::Failed);
    assert_eq!(outcome.failed_after, Some(PartitionState::Loaded));
    assert!(outcome.error.unwrap().contains("exited with status 1"));

    assert!(
        harness
            .ledger
            .latest("asset_b", &requests[0].partition_key)
            .await
            .unwrap()
            .is_none()
    );

    harness.add_source("sample2.txt", "other");
    let next = harness.sensor.poll().await.unwrap();
    assert_eq!(
        next,
        vec![WorkRequest::new("source", PartitionKey::from("sample2.txt"))]
    );
}

#[tokio::test]
async fn scenario_d_consume_before_transform_is_not_ready() {
    let harness = Harness::new(Arc::new(UppercaseExecutor::default()));
    harness.add_source("sample1.txt", "hello");
    let key = PartitionKey::from("sample1.txt");

    harness.pipeline.load(&key).await.unwrap();
    let err = harness.pipeline.consume(&key).await.unwrap_err();

    assert!(err.is_not_ready());
    assert!(matches!(err, PipelineError::LedgerNotFound { ref asset, .. } if asset == "asset_b"));
    assert!(
        harness
            .ledger
            .latest("asset_c", &key)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn rerunning_a_partition_appends_new_records() {
    let harness = Harness::new(Arc::new(UppercaseExecutor::default()));
    harness.add_source("sample1.txt", "first");
    let request = WorkRequest::new("source", PartitionKey::from("sample1.txt"));

    assert!(harness.pipeline.run_partition(&request).await.succeeded());
    harness.add_source("sample1.txt", "second run");
    assert!(harness.pipeline.run_partition(&request).await.succeeded());

    let records = harness
        .ledger
        .records("asset_b", &request.partition_key)
        .await
        .unwrap();
    assert_eq!(records.len(), 2);

    let latest = harness
        .ledger
        .latest("asset_b", &request.partition_key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.id, records[1].id);
    assert_eq!(latest.text(keys::PREVIEW), Some("SECOND RUN"));
}

#[tokio::test]
async fn scheduler_runs_every_new_partition_within_parallelism_bound() {
    let executor = Arc::new(UppercaseExecutor::default());
    let harness = Harness::new(executor.clone());
    for name in ["a.txt", "b.txt", "c.txt"] {
        harness.add_source(name, name);
    }

    let scheduler = PartitionScheduler::new(
        harness.config.poll_interval,
        1,
        harness.sensor.clone(),
        harness.pipeline.clone(),
    );

    let outcomes = scheduler.run_once().await.unwrap();
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|o| o.state == PartitionState::Consumed));
    assert_eq!(executor.peak.load(Ordering::SeqCst), 1);

    assert!(scheduler.run_once().await.unwrap().is_empty());
}
