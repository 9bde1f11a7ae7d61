use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use whalewatch_core_types::{EventEnvelope, TransferEvent, TransferKind};
use whalewatch_ingestion::{AssetRegistry, RegistrySnapshot};

/// Where transfer events leave the process.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, event: &EventEnvelope<TransferEvent>) -> Result<()>;
}

/// Writes each transfer as a structured log line with known-wallet labels.
pub struct LogNotificationSink {
    registry: Arc<AssetRegistry>,
}

impl LogNotificationSink {
    pub fn new(registry: Arc<AssetRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn deliver(&self, event: &EventEnvelope<TransferEvent>) -> Result<()> {
        let snapshot = self.registry.snapshot();
        let transfer = &event.payload;
        info!(
            event_id = %event.event_id,
            tx_id = %transfer.tx_id,
            shard = %transfer.shard,
            kind = transfer.kind.as_str(),
            symbol = transfer.asset.symbol(),
            amount = transfer.amount,
            from = %transfer.from,
            to = %transfer.to,
            text = %describe_transfer(transfer, &snapshot),
            "whale transfer"
        );
        Ok(())
    }
}

pub fn describe_transfer(transfer: &TransferEvent, snapshot: &RegistrySnapshot) -> String {
    let prefix = match transfer.kind {
        TransferKind::Direct => "",
        TransferKind::ContractMediated => "contract ",
    };
    format!(
        "{prefix}{} transferred: {} to {}",
        humanize_amount(transfer.amount, transfer.asset.symbol()),
        address_label(snapshot, &transfer.from),
        address_label(snapshot, &transfer.to),
    )
}

pub fn humanize_amount(amount: f64, symbol: &str) -> String {
    if amount >= 1e6 {
        format!("{:.2} M {symbol}", amount / 1e6)
    } else if amount >= 1_000.0 {
        format!("{:.2} K {symbol}", amount / 1_000.0)
    } else if amount < 1.0 {
        format!("{amount:.3} {symbol}")
    } else {
        format!("{amount:.2} {symbol}")
    }
}

/// Known wallet label, else the address shortened to `abc...xyz`.
fn address_label(snapshot: &RegistrySnapshot, address: &str) -> String {
    if let Some(label) = snapshot
        .wallet(address)
        .map(|wallet| wallet.label())
        .filter(|label| !label.trim().is_empty())
    {
        return label.to_string();
    }
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 6 {
        return address.to_string();
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 3..].iter().collect();
    format!("{head}...{tail}")
}

/// Delivers events until the channel closes. On cancellation, whatever is
/// already buffered is still delivered. Returns how many were delivered.
pub async fn run_notification_consumer<S>(
    mut events_rx: mpsc::Receiver<EventEnvelope<TransferEvent>>,
    sink: Arc<S>,
    cancel: CancellationToken,
) -> u64
where
    S: NotificationSink + ?Sized,
{
    let mut delivered = 0u64;
    loop {
        tokio::select! {
            biased;
            event = events_rx.recv() => {
                let Some(event) = event else {
                    debug!("event channel closed; notification consumer exiting");
                    return delivered;
                };
                delivered += deliver_one(sink.as_ref(), &event).await;
            }
            _ = cancel.cancelled() => {
                while let Ok(event) = events_rx.try_recv() {
                    delivered += deliver_one(sink.as_ref(), &event).await;
                }
                debug!(delivered, "notification consumer stopped");
                return delivered;
            }
        }
    }
}

async fn deliver_one<S>(sink: &S, event: &EventEnvelope<TransferEvent>) -> u64
where
    S: NotificationSink + ?Sized,
{
    match sink.deliver(event).await {
        Ok(()) => 1,
        Err(error) => {
            warn!(
                tx_id = %event.payload.tx_id,
                error = %format!("{error:#}"),
                "transfer notification failed"
            );
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::Mutex;
    use std::time::Duration;
    use whalewatch_core_types::{Asset, ShardPair};
    use whalewatch_ingestion::KnownWallet;

    fn transfer(tx_id: &str, amount: f64) -> TransferEvent {
        TransferEvent {
            from: "1DrDyTr9RpRsQnDnXo2YRiPzPW4ooHX5LLoqXrqfMrpQH".to_string(),
            to: "addr-exchange".to_string(),
            amount,
            asset: Asset::Native {
                symbol: "ALPH".to_string(),
            },
            kind: TransferKind::Direct,
            tx_id: tx_id.to_string(),
            shard: ShardPair::new(0, 0),
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn deliver(&self, event: &EventEnvelope<TransferEvent>) -> Result<()> {
            if self.fail_on == Some(event.payload.tx_id.as_str()) {
                return Err(anyhow!("sink rejected"));
            }
            self.seen
                .lock()
                .expect("sink lock")
                .push(event.payload.tx_id.clone());
            Ok(())
        }
    }

    #[test]
    fn amounts_are_humanized_by_magnitude() {
        assert_eq!(humanize_amount(0.5, "ALPH"), "0.500 ALPH");
        assert_eq!(humanize_amount(512.0, "ALPH"), "512.00 ALPH");
        assert_eq!(humanize_amount(6_000.0, "ALPH"), "6.00 K ALPH");
        assert_eq!(humanize_amount(2_500_000.0, "USDT"), "2.50 M USDT");
    }

    #[test]
    fn description_uses_labels_and_short_addresses() {
        let snapshot = RegistrySnapshot::new(
            Vec::new(),
            vec![KnownWallet {
                address: "addr-exchange".to_string(),
                name: "gate hot".to_string(),
                exchange_name: "Gate".to_string(),
                state: String::new(),
                kind: "cex".to_string(),
            }],
        );
        let text = describe_transfer(&transfer("tx-1", 6_000.0), &snapshot);
        assert_eq!(text, "6.00 K ALPH transferred: 1Dr...pQH to Gate");
    }

    #[tokio::test]
    async fn consumer_delivers_until_channel_closes() {
        let (events_tx, events_rx) = mpsc::channel(4);
        let sink = Arc::new(RecordingSink {
            fail_on: Some("tx-bad"),
            ..RecordingSink::default()
        });
        let consumer = tokio::spawn(run_notification_consumer(
            events_rx,
            Arc::clone(&sink),
            CancellationToken::new(),
        ));
        for tx_id in ["tx-1", "tx-bad", "tx-2"] {
            events_tx
                .send(EventEnvelope::new("resolver", transfer(tx_id, 9_000.0)))
                .await
                .expect("send");
        }
        drop(events_tx);

        let delivered = tokio::time::timeout(Duration::from_secs(5), consumer)
            .await
            .expect("consumer exits")
            .expect("join");
        assert_eq!(delivered, 2);
        assert_eq!(
            *sink.seen.lock().expect("sink lock"),
            vec!["tx-1".to_string(), "tx-2".to_string()]
        );
    }

    #[tokio::test]
    async fn cancelled_consumer_drains_buffered_events() {
        let (events_tx, events_rx) = mpsc::channel(4);
        events_tx
            .send(EventEnvelope::new("resolver", transfer("tx-1", 9_000.0)))
            .await
            .expect("send");
        events_tx
            .send(EventEnvelope::new("resolver", transfer("tx-2", 9_000.0)))
            .await
            .expect("send");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let sink = Arc::new(RecordingSink::default());
        let delivered = run_notification_consumer(events_rx, Arc::clone(&sink), cancel).await;
        assert_eq!(delivered, 2);
        assert_eq!(sink.seen.lock().expect("sink lock").len(), 2);
    }
}
