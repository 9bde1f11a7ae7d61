mod notify;
mod telemetry;
mod web;

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use whalewatch_config::load_from_env_or_default;
use whalewatch_ingestion::{AssetRegistry, IngestionPipeline, RegistryRefresher};

use crate::notify::{run_notification_consumer, LogNotificationSink};
use crate::telemetry::PrometheusExporter;
use crate::web::WebState;

const DEFAULT_CONFIG_PATH: &str = "configs/dev.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let cli_config = parse_config_arg();
    let default_path = cli_config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let (config, loaded_config_path) = load_from_env_or_default(&default_path)?;

    init_tracing(&config.system.log_level, config.system.log_json);
    info!(
        config_path = %loaded_config_path.display(),
        env = %config.system.env,
        confirmation_depth = config.confirmation.depth,
        min_native_trigger = config.alerts.min_native_trigger,
        tracked_tokens = config.alerts.tracked_tokens.len(),
        "configuration loaded"
    );

    let cancel = CancellationToken::new();
    let registry = Arc::new(AssetRegistry::default());
    let refresher = RegistryRefresher::new(
        &config.registry,
        Duration::from_millis(config.node.request_timeout_ms.max(1)),
        Arc::clone(&registry),
    )
    .context("failed to initialize asset registry refresher")?;
    let initial = refresher.refresh_once().await;
    info!(
        tokens_loaded = initial.tokens_refreshed,
        known_wallets_loaded = initial.wallets_refreshed,
        "initial asset registry load"
    );

    let (events_tx, events_rx) = mpsc::channel(config.notify.event_queue_capacity.max(1));
    let pipeline = IngestionPipeline::from_config(
        &config,
        Arc::clone(&registry),
        events_tx,
        cancel.clone(),
    )
    .context("failed to initialize ingestion pipeline")?;
    let metrics = pipeline.metrics();

    let web_task = if config.metrics.enabled {
        let listener = web::bind(&config.metrics.bind_addr).await?;
        let exporter = PrometheusExporter::new(Arc::clone(&metrics))?;
        let state = WebState::new(exporter, Arc::clone(&metrics), Arc::clone(&registry));
        Some(tokio::spawn(web::run_server(listener, state, cancel.clone())))
    } else {
        None
    };

    let refresher_task = tokio::spawn(refresher.run(cancel.clone()));
    let sink = Arc::new(LogNotificationSink::new(Arc::clone(&registry)));
    let consumer_task = tokio::spawn(run_notification_consumer(events_rx, sink, cancel.clone()));
    let mut running = pipeline.start();

    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("shutdown signal received"),
                Err(error) => warn!(error = %error, "failed listening for shutdown signal"),
            }
            Ok(())
        }
        feed = running.feed_finished() => {
            match &feed {
                Ok(()) => info!("feed listener finished"),
                Err(error) => error!(error = %format!("{error:#}"), "feed listener failed"),
            }
            feed
        }
    };

    cancel.cancel();
    let grace = Duration::from_millis(config.system.shutdown_grace_ms.max(1));
    running.shutdown(grace).await;
    await_task("registry refresher", refresher_task, grace).await;
    if let Some(delivered) = await_task("notification consumer", consumer_task, grace).await {
        info!(delivered, "notification consumer drained");
    }
    if let Some(web_task) = web_task {
        if let Some(Err(error)) = await_task("metrics server", web_task, grace).await {
            warn!(error = %format!("{error:#}"), "metrics server exited with error");
        }
    }
    info!("whalewatch stopped");
    outcome
}

fn parse_config_arg() -> Option<PathBuf> {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(inline) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(inline));
        }
    }
    None
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    if json {
        tracing_subscriber::fmt()
            .with_target(false)
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_target(false)
            .with_env_filter(filter)
            .compact()
            .init();
    }
}

async fn await_task<T>(name: &'static str, handle: JoinHandle<T>, grace: Duration) -> Option<T> {
    let abort = handle.abort_handle();
    match tokio::time::timeout(grace, handle).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(error)) => {
            warn!(task = name, error = %error, "task ended abnormally");
            None
        }
        Err(_) => {
            warn!(task = name, "task did not stop within grace period; aborting");
            abort.abort();
            None
        }
    }
}
