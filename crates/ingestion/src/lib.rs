pub mod admission;
pub mod classifier;
pub mod clients;
pub mod confirmation;
mod core;
pub mod error;
pub mod feed;
pub mod queue;
pub mod registry;
pub mod resolver;
pub mod telemetry;

use anyhow::{anyhow, Context, Result};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use whalewatch_config::AppConfig;
use whalewatch_core_types::{CandidateTx, EventEnvelope, TransferEvent};

pub use admission::{AdmissionQueue, AdmissionSettings, Task, TaskHandler, TaskOutcome};
pub use classifier::{ClassifierSettings, TransferClassifier};
pub use clients::{ChainClient, ExplorerClient, FullnodeClient, IndexerLookup, TransactionIndexer};
pub use confirmation::{ConfirmationGate, ConfirmationSettings, GateOutcome};
pub use error::{GateError, RemoteError, ResolveError};
pub use feed::{parse_feed_message, FeedListener, FeedSettings};
pub use queue::OverflowQueue;
pub use registry::{AssetRegistry, KnownWallet, RegistryRefresher, RegistrySnapshot, TokenInfo};
pub use resolver::{ResolverPool, ResolverSettings};
pub use telemetry::{QueueMetrics, QueueMetricsSnapshot};

/// Feed listener, admission queue, confirmation gate and resolver pool wired
/// in series. Built stopped; `start` spawns every task.
pub struct IngestionPipeline {
    feed: FeedListener,
    admission: Arc<AdmissionQueue>,
    gate: Arc<ConfirmationGate>,
    resolver: Arc<ResolverPool>,
    candidates: Arc<OverflowQueue<CandidateTx>>,
    metrics: Arc<QueueMetrics>,
    report_seconds: u64,
    cancel: CancellationToken,
}

impl IngestionPipeline {
    pub fn build(
        config: &AppConfig,
        chain: Arc<dyn ChainClient>,
        indexer: Arc<dyn TransactionIndexer>,
        registry: Arc<AssetRegistry>,
        events_tx: mpsc::Sender<EventEnvelope<TransferEvent>>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let admission_settings = AdmissionSettings::from_config(&config.admission);
        let resolver_settings = ResolverSettings::from_config(&config.resolver, &config.admission);
        let classifier = ClassifierSettings::from_config(&config.alerts)
            .context("invalid alerts configuration")?;

        let metrics = Arc::new(QueueMetrics::default());
        metrics.set_shape(
            admission_settings.queue_capacity,
            admission_settings.workers,
            admission_settings.max_concurrent,
            resolver_settings.workers,
        );

        let candidates = Arc::new(OverflowQueue::new(
            config.resolver.candidate_queue_capacity.max(1),
        ));
        let admission =
            AdmissionQueue::new(admission_settings, Arc::clone(&metrics), cancel.clone());
        let gate = Arc::new(ConfirmationGate::new(
            chain,
            ConfirmationSettings::from_config(&config.confirmation),
            Arc::clone(&candidates),
            Arc::clone(&metrics),
            cancel.clone(),
        ));
        let resolver = ResolverPool::new(
            indexer,
            Arc::new(TransferClassifier::new(classifier)),
            registry,
            Arc::clone(&candidates),
            events_tx,
            resolver_settings,
            Arc::clone(&metrics),
            cancel.clone(),
        );
        let feed = FeedListener::new(
            FeedSettings::from_config(&config.feed),
            Arc::clone(&admission),
            Arc::clone(&metrics),
            cancel.clone(),
        );

        Ok(Self {
            feed,
            admission,
            gate,
            resolver,
            candidates,
            metrics,
            report_seconds: config.admission.report_seconds,
            cancel,
        })
    }

    /// Same as `build`, talking to the configured full node and indexer.
    pub fn from_config(
        config: &AppConfig,
        registry: Arc<AssetRegistry>,
        events_tx: mpsc::Sender<EventEnvelope<TransferEvent>>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let timeout = Duration::from_millis(config.node.request_timeout_ms.max(1));
        let chain = FullnodeClient::new(&config.node.fullnode_http_url, timeout)?;
        let indexer = ExplorerClient::new(&config.node.explorer_http_url, timeout)?;
        Self::build(
            config,
            Arc::new(chain),
            Arc::new(indexer),
            registry,
            events_tx,
            cancel,
        )
    }

    pub fn metrics(&self) -> Arc<QueueMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn start(self) -> RunningPipeline {
        let mut worker_tasks = self.admission.spawn_workers(Arc::clone(&self.gate));
        worker_tasks.extend(self.resolver.spawn_workers());
        worker_tasks.push(tokio::spawn(telemetry::run_metrics_reporter(
            Arc::clone(&self.metrics),
            self.report_seconds,
            self.cancel.clone(),
        )));
        let feed_task = tokio::spawn(self.feed.run());
        info!(tasks = worker_tasks.len() + 1, "ingestion pipeline started");

        RunningPipeline {
            feed_task: Some(feed_task),
            worker_tasks,
            admission: self.admission,
            candidates: self.candidates,
        }
    }
}

pub struct RunningPipeline {
    feed_task: Option<JoinHandle<Result<()>>>,
    worker_tasks: Vec<JoinHandle<()>>,
    admission: Arc<AdmissionQueue>,
    candidates: Arc<OverflowQueue<CandidateTx>>,
}

impl RunningPipeline {
    /// Resolves when the feed listener exits; pending forever once it has
    /// already been observed.
    pub async fn feed_finished(&mut self) -> Result<()> {
        let Some(handle) = self.feed_task.as_mut() else {
            return std::future::pending().await;
        };
        let joined = handle.await;
        self.feed_task = None;
        joined.map_err(|error| anyhow!("feed task failed: {error}"))?
    }

    /// Expects the pipeline's cancellation token to be cancelled already.
    /// Waits up to `grace` for every task, then aborts what is left.
    pub async fn shutdown(mut self, grace: Duration) {
        self.admission.close();
        self.candidates.close();

        let handles = self.worker_tasks;
        let feed_task = self.feed_task.take();
        let aborts: Vec<_> = handles
            .iter()
            .map(JoinHandle::abort_handle)
            .chain(feed_task.iter().map(JoinHandle::abort_handle))
            .collect();

        let feed = async move {
            let Some(handle) = feed_task else {
                return;
            };
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    warn!(error = %format!("{error:#}"), "feed listener exited with error");
                }
                Err(error) if error.is_cancelled() => {}
                Err(error) => warn!(error = %error, "feed task failed"),
            }
        };
        let workers = join_all(handles);
        if tokio::time::timeout(grace, async { tokio::join!(feed, workers) })
            .await
            .is_err()
        {
            warn!(
                grace_ms = grace.as_millis() as u64,
                "pipeline tasks still running after grace; aborting"
            );
            for abort in aborts {
                abort.abort();
            }
        }
        info!("ingestion pipeline stopped");
    }
}
