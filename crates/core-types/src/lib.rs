use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    pub event_id: Uuid,
    pub correlation_id: Uuid,
    pub source_component: String,
    pub ts_utc: DateTime<Utc>,
    pub payload: T,
}

impl<T> EventEnvelope<T> {
    pub fn new(source_component: impl Into<String>, payload: T) -> Self {
        let correlation_id = Uuid::new_v4();
        Self {
            event_id: Uuid::new_v4(),
            correlation_id,
            source_component: source_component.into(),
            ts_utc: Utc::now(),
            payload,
        }
    }

    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

/// Source and destination group of a multi-shard chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardPair {
    pub from: u32,
    pub to: u32,
}

impl ShardPair {
    pub fn new(from: u32, to: u32) -> Self {
        Self { from, to }
    }
}

impl fmt::Display for ShardPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.from, self.to)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBlockTransaction {
    pub tx_id: String,
    pub input_count: usize,
}

impl RawBlockTransaction {
    pub fn is_coinbase(&self) -> bool {
        self.input_count == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockNotification {
    pub hash: String,
    pub timestamp_ms: i64,
    pub shard: ShardPair,
    pub height: u64,
    pub transactions: Vec<RawBlockTransaction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateTx {
    pub tx_id: String,
    pub shard: ShardPair,
    pub block_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAmount {
    pub id: String,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub address: String,
    pub native_amount: String,
    pub tokens: Vec<TokenAmount>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputKind {
    Asset,
    Contract,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub kind: OutputKind,
    pub address: String,
    pub native_amount: String,
    pub tokens: Vec<TokenAmount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTransaction {
    pub tx_id: String,
    pub tx_type: String,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub finalized: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Asset {
    Native {
        symbol: String,
    },
    Token {
        id: String,
        symbol: String,
        decimals: u32,
    },
}

impl Asset {
    pub fn symbol(&self) -> &str {
        match self {
            Self::Native { symbol } | Self::Token { symbol, .. } => symbol,
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Self::Native { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    Direct,
    ContractMediated,
}

impl TransferKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::ContractMediated => "contract_mediated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub from: String,
    pub to: String,
    pub amount: f64,
    pub asset: Asset,
    pub kind: TransferKind,
    pub tx_id: String,
    pub shard: ShardPair,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coinbase_is_detected_from_empty_inputs() {
        let reward = RawBlockTransaction {
            tx_id: "tx-reward".to_string(),
            input_count: 0,
        };
        let transfer = RawBlockTransaction {
            tx_id: "tx-transfer".to_string(),
            input_count: 2,
        };
        assert!(reward.is_coinbase());
        assert!(!transfer.is_coinbase());
    }

    #[test]
    fn asset_serializes_with_kind_tag() {
        let asset = Asset::Token {
            id: "token-ayin".to_string(),
            symbol: "AYIN".to_string(),
            decimals: 18,
        };
        let value = serde_json::to_value(&asset).expect("asset should serialize");
        assert_eq!(value["kind"], "token");
        assert_eq!(value["symbol"], "AYIN");
        assert_eq!(asset.symbol(), "AYIN");
        assert!(!asset.is_native());
    }

    #[test]
    fn envelope_keeps_explicit_correlation() {
        let correlation = Uuid::new_v4();
        let envelope = EventEnvelope::new("resolver", 7u32).with_correlation(correlation);
        assert_eq!(envelope.correlation_id, correlation);
        assert_ne!(envelope.event_id, correlation);
        assert_eq!(envelope.source_component, "resolver");
    }

    #[test]
    fn shard_pair_displays_as_arrow() {
        assert_eq!(ShardPair::new(1, 3).to_string(), "1->3");
    }
}
