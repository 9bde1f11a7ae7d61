use anyhow::{anyhow, Context, Result};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use serde::de::IgnoredAny;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use whalewatch_config::FeedConfig;
use whalewatch_core_types::{BlockNotification, RawBlockTransaction, ShardPair};

use crate::admission::{AdmissionQueue, Task};
use crate::core::sleep_with_backoff;
use crate::telemetry::QueueMetrics;

type FeedStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub ws_url: String,
    pub notify_method: String,
    pub ping_interval: Duration,
    pub close_timeout: Duration,
    pub reconnect_on_disconnect: bool,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
}

impl FeedSettings {
    pub fn from_config(config: &FeedConfig) -> Self {
        let reconnect_initial_ms = config.reconnect_initial_ms.max(1);
        Self {
            ws_url: config.ws_url.trim().to_string(),
            notify_method: config.notify_method.clone(),
            ping_interval: Duration::from_secs(config.ping_interval_seconds.max(1)),
            close_timeout: Duration::from_millis(config.close_timeout_ms),
            reconnect_on_disconnect: config.reconnect_on_disconnect,
            reconnect_initial_ms,
            reconnect_max_ms: config.reconnect_max_ms.max(reconnect_initial_ms),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FeedMessage {
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockNotifyParams {
    hash: String,
    #[serde(default)]
    timestamp: i64,
    chain_from: u32,
    chain_to: u32,
    height: u64,
    #[serde(default)]
    transactions: Vec<NotifiedTransaction>,
}

#[derive(Debug, Deserialize)]
struct NotifiedTransaction {
    unsigned: UnsignedTransaction,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnsignedTransaction {
    tx_id: String,
    #[serde(default)]
    inputs: Vec<IgnoredAny>,
}

/// Parses one feed frame. Returns `Ok(None)` for well-formed messages with a
/// different method, `Err` for anything that cannot be read as a notification.
pub fn parse_feed_message(text: &str, notify_method: &str) -> Result<Option<BlockNotification>> {
    let message: FeedMessage =
        serde_json::from_str(text).context("feed message is not a json object")?;
    match message.method.as_deref() {
        Some(method) if method == notify_method => {}
        _ => return Ok(None),
    }
    let params = message
        .params
        .ok_or_else(|| anyhow!("{notify_method} message without params"))?;
    let params: BlockNotifyParams = serde_json::from_value(params)
        .with_context(|| format!("malformed {notify_method} params"))?;

    Ok(Some(BlockNotification {
        hash: params.hash,
        timestamp_ms: params.timestamp,
        shard: ShardPair::new(params.chain_from, params.chain_to),
        height: params.height,
        transactions: params
            .transactions
            .into_iter()
            .map(|tx| RawBlockTransaction {
                tx_id: tx.unsigned.tx_id,
                input_count: tx.unsigned.inputs.len(),
            })
            .collect(),
    }))
}

enum SessionEnd {
    Cancelled,
    Lost(String),
}

/// Owns the websocket. Every block notification is handed to the admission
/// queue without waiting on downstream work.
pub struct FeedListener {
    settings: FeedSettings,
    admission: Arc<AdmissionQueue>,
    metrics: Arc<QueueMetrics>,
    cancel: CancellationToken,
}

impl FeedListener {
    pub fn new(
        settings: FeedSettings,
        admission: Arc<AdmissionQueue>,
        metrics: Arc<QueueMetrics>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            settings,
            admission,
            metrics,
            cancel,
        }
    }

    /// Runs until cancelled. Failing to connect the first time is an error,
    /// as is losing the connection when reconnects are disabled.
    pub async fn run(self) -> Result<()> {
        let mut ws = self.connect().await?;
        loop {
            match self.session(ws).await {
                SessionEnd::Cancelled => {
                    info!("feed listener stopped");
                    return Ok(());
                }
                SessionEnd::Lost(reason) if !self.settings.reconnect_on_disconnect => {
                    return Err(anyhow!("feed connection lost: {reason}"));
                }
                SessionEnd::Lost(reason) => {
                    warn!(reason = %reason, "feed connection lost; reconnecting");
                    match self.reconnect().await {
                        Some(next) => ws = next,
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    async fn connect(&self) -> Result<FeedStream> {
        let (ws, _response) = connect_async(self.settings.ws_url.as_str())
            .await
            .with_context(|| format!("failed connecting to {}", self.settings.ws_url))?;
        info!(ws_url = %self.settings.ws_url, "feed connected");
        Ok(ws)
    }

    /// Returns `None` when cancelled while waiting.
    async fn reconnect(&self) -> Option<FeedStream> {
        let mut next_backoff_ms = self.settings.reconnect_initial_ms;
        loop {
            QueueMetrics::bump(&self.metrics.feed_reconnects_total);
            if !sleep_with_backoff(
                &mut next_backoff_ms,
                self.settings.reconnect_initial_ms,
                self.settings.reconnect_max_ms,
                &self.cancel,
            )
            .await
            {
                return None;
            }
            let attempt = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                attempt = self.connect() => attempt,
            };
            match attempt {
                Ok(ws) => return Some(ws),
                Err(error) => {
                    warn!(error = %format!("{error:#}"), "feed reconnect failed");
                }
            }
        }
    }

    async fn session(&self, ws: FeedStream) -> SessionEnd {
        let (mut sink, stream) = ws.split();
        let mut reader: JoinHandle<String> = tokio::spawn(read_loop(
            stream,
            Arc::clone(&self.admission),
            Arc::clone(&self.metrics),
            self.settings.notify_method.clone(),
        ));

        let mut ping = time::interval(self.settings.ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ping.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    if let Err(error) = sink.send(Message::Close(None)).await {
                        debug!(error = %error, "failed sending feed close frame");
                    }
                    if time::timeout(self.settings.close_timeout, &mut reader).await.is_err() {
                        debug!("feed reader did not exit in time; aborting");
                        reader.abort();
                    }
                    return SessionEnd::Cancelled;
                }
                _ = ping.tick() => {
                    if let Err(error) = sink.send(Message::Ping(Default::default())).await {
                        reader.abort();
                        return SessionEnd::Lost(format!("ping failed: {error}"));
                    }
                }
                finished = &mut reader => {
                    let reason = finished
                        .unwrap_or_else(|error| format!("reader task failed: {error}"));
                    return SessionEnd::Lost(reason);
                }
            }
        }
    }
}

async fn read_loop(
    mut stream: SplitStream<FeedStream>,
    admission: Arc<AdmissionQueue>,
    metrics: Arc<QueueMetrics>,
    notify_method: String,
) -> String {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                QueueMetrics::bump(&metrics.feed_messages_total);
                match parse_feed_message(text.as_str(), &notify_method) {
                    Ok(Some(notification)) => {
                        debug!(
                            block_hash = %notification.hash,
                            shard = %notification.shard,
                            height = notification.height,
                            transactions = notification.transactions.len(),
                            "block notification received"
                        );
                        admission.submit_detached(Task::new(notification));
                    }
                    Ok(None) => {}
                    Err(error) => {
                        QueueMetrics::bump(&metrics.feed_parse_rejected_total);
                        warn!(error = %format!("{error:#}"), "skipping malformed feed message");
                    }
                }
            }
            Ok(Message::Close(frame)) => return format!("closed by peer: {frame:?}"),
            Ok(_) => {}
            Err(error) => return format!("stream error: {error}"),
        }
    }
    "stream ended".to_string()
}
