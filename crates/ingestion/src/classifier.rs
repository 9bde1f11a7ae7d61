use anyhow::Result;
use primitive_types::U256;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};
use whalewatch_config::AlertsConfig;
use whalewatch_core_types::{
    Asset, OutputKind, ResolvedTransaction, ShardPair, TokenAmount, TransferEvent, TransferKind,
};

use crate::registry::RegistrySnapshot;

#[derive(Debug, Clone, PartialEq)]
pub struct TrackedToken {
    pub trigger: f64,
    pub decimals: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub native_symbol: String,
    pub native_decimals: u32,
    pub min_native_trigger: f64,
    pub tracked_tokens: HashMap<String, TrackedToken>,
    pub ignored_pairs: HashSet<(String, String)>,
    pub emit_contract_transfers: bool,
}

impl ClassifierSettings {
    pub fn from_config(config: &AlertsConfig) -> Result<Self> {
        Ok(Self {
            native_symbol: config.native_symbol.clone(),
            native_decimals: config.native_decimals,
            min_native_trigger: config.min_native_trigger,
            tracked_tokens: config
                .tracked_tokens
                .iter()
                .map(|(id, tracked)| {
                    (
                        id.clone(),
                        TrackedToken {
                            trigger: tracked.trigger,
                            decimals: tracked.decimals,
                        },
                    )
                })
                .collect(),
            ignored_pairs: config.ignored_pair_list()?.into_iter().collect(),
            emit_contract_transfers: config.emit_contract_transfers,
        })
    }
}

/// Turns a finalized transaction into transfer events. Pure: the same
/// transaction, settings and registry snapshot always give the same events.
///
/// Thresholds are compared against raw on-chain units; `f64` only appears in
/// the amount carried by the emitted event.
#[derive(Debug, Clone)]
pub struct TransferClassifier {
    settings: ClassifierSettings,
    native_trigger: U256,
}

/// `None` keys the native asset.
type AssetKey = Option<String>;
type NetDeltas<'a> = BTreeMap<AssetKey, BTreeMap<&'a str, NetFlow>>;

/// Credits and debits of one address for one asset.
#[derive(Debug, Clone, Copy, Default)]
struct NetFlow {
    credit: U256,
    debit: U256,
}

impl NetFlow {
    fn record(&mut self, amount: U256, credit: bool) {
        if credit {
            self.credit = self.credit.saturating_add(amount);
        } else {
            self.debit = self.debit.saturating_add(amount);
        }
    }

    fn gain(&self) -> Option<U256> {
        (self.credit > self.debit).then(|| self.credit - self.debit)
    }

    fn loss(&self) -> Option<U256> {
        (self.debit > self.credit).then(|| self.debit - self.credit)
    }
}

impl TransferClassifier {
    pub fn new(settings: ClassifierSettings) -> Self {
        let native_trigger = raw_trigger(settings.min_native_trigger, settings.native_decimals);
        Self {
            settings,
            native_trigger,
        }
    }

    pub fn classify(
        &self,
        tx: &ResolvedTransaction,
        shard: ShardPair,
        registry: &RegistrySnapshot,
    ) -> Vec<TransferEvent> {
        let contract_addresses: HashSet<&str> = tx
            .outputs
            .iter()
            .filter(|output| output.kind == OutputKind::Contract)
            .map(|output| output.address.as_str())
            .collect();
        let contract_mediated = tx
            .inputs
            .iter()
            .any(|input| contract_addresses.contains(input.address.as_str()));

        if contract_mediated {
            if !self.settings.emit_contract_transfers {
                debug!(tx_id = %tx.tx_id, "contract-mediated transaction not alerted");
                return Vec::new();
            }
            return self.classify_contract_flow(tx, shard, registry, &contract_addresses);
        }
        self.classify_direct(tx, shard, registry)
    }

    fn classify_direct(
        &self,
        tx: &ResolvedTransaction,
        shard: ShardPair,
        registry: &RegistrySnapshot,
    ) -> Vec<TransferEvent> {
        let Some(sender) = tx.inputs.first().map(|input| input.address.as_str()) else {
            return Vec::new();
        };

        let mut events = Vec::new();
        for output in tx
            .outputs
            .iter()
            .filter(|output| output.kind == OutputKind::Asset)
        {
            let native = parse_amount(&tx.tx_id, &output.native_amount);
            if native >= self.native_trigger {
                self.push_event(
                    &mut events,
                    (sender, &output.address),
                    native,
                    self.native_asset(),
                    TransferKind::Direct,
                    tx,
                    shard,
                );
            }

            for token in &output.tokens {
                let Some((asset, trigger)) = self.tracked_asset(&token.id, registry) else {
                    continue;
                };
                let amount = parse_amount(&tx.tx_id, &token.amount);
                if amount >= trigger {
                    self.push_event(
                        &mut events,
                        (sender, &output.address),
                        amount,
                        asset,
                        TransferKind::Direct,
                        tx,
                        shard,
                    );
                }
            }
        }
        events
    }

    /// Nets the native asset and every tracked token across inputs and
    /// outputs, skipping the contracts themselves, then reports the largest
    /// loser paying the largest gainer for each asset.
    fn classify_contract_flow(
        &self,
        tx: &ResolvedTransaction,
        shard: ShardPair,
        registry: &RegistrySnapshot,
        contract_addresses: &HashSet<&str>,
    ) -> Vec<TransferEvent> {
        let mut deltas = NetDeltas::new();
        for output in &tx.outputs {
            if !contract_addresses.contains(output.address.as_str()) {
                self.accumulate(
                    &mut deltas,
                    tx,
                    &output.address,
                    &output.native_amount,
                    &output.tokens,
                    true,
                );
            }
        }
        for input in &tx.inputs {
            if !contract_addresses.contains(input.address.as_str()) {
                self.accumulate(
                    &mut deltas,
                    tx,
                    &input.address,
                    &input.native_amount,
                    &input.tokens,
                    false,
                );
            }
        }

        let mut events = Vec::new();
        for (key, per_address) in &deltas {
            let Some((sender, receiver, gained)) = extreme_pair(per_address) else {
                continue;
            };
            let (asset, trigger) = match key {
                None => (self.native_asset(), self.native_trigger),
                Some(id) => match self.tracked_asset(id, registry) {
                    Some(found) => found,
                    None => continue,
                },
            };
            if gained >= trigger {
                self.push_event(
                    &mut events,
                    (sender, receiver),
                    gained,
                    asset,
                    TransferKind::ContractMediated,
                    tx,
                    shard,
                );
            }
        }
        events
    }

    fn accumulate<'a>(
        &self,
        deltas: &mut NetDeltas<'a>,
        tx: &ResolvedTransaction,
        address: &'a str,
        native_amount: &str,
        tokens: &[TokenAmount],
        credit: bool,
    ) {
        let native = parse_amount(&tx.tx_id, native_amount);
        let flow = deltas.entry(None).or_default().entry(address).or_default();
        flow.record(native, credit);

        for token in tokens {
            if !self.settings.tracked_tokens.contains_key(&token.id) {
                continue;
            }
            let amount = parse_amount(&tx.tx_id, &token.amount);
            deltas
                .entry(Some(token.id.clone()))
                .or_default()
                .entry(address)
                .or_default()
                .record(amount, credit);
        }
    }

    fn native_asset(&self) -> Asset {
        Asset::Native {
            symbol: self.settings.native_symbol.clone(),
        }
    }

    fn decimals_of(&self, asset: &Asset) -> u32 {
        match asset {
            Asset::Token { decimals, .. } => *decimals,
            Asset::Native { .. } => self.settings.native_decimals,
        }
    }

    /// Untracked tokens and tracked tokens with no known decimals yield `None`.
    /// The trigger comes back in raw units for the resolved decimals.
    fn tracked_asset(
        &self,
        token_id: &str,
        registry: &RegistrySnapshot,
    ) -> Option<(Asset, U256)> {
        let tracked = self.settings.tracked_tokens.get(token_id)?;
        let info = registry.token(token_id);
        let Some(decimals) = tracked.decimals.or_else(|| info.map(|info| info.decimals)) else {
            warn!(token_id, "tracked token has no known decimals; skipping");
            return None;
        };
        let symbol = info
            .map(|info| info.symbol.trim())
            .filter(|symbol| !symbol.is_empty())
            .unwrap_or(token_id)
            .to_string();
        Some((
            Asset::Token {
                id: token_id.to_string(),
                symbol,
                decimals,
            },
            raw_trigger(tracked.trigger, decimals),
        ))
    }

    fn push_event(
        &self,
        events: &mut Vec<TransferEvent>,
        (from, to): (&str, &str),
        raw_amount: U256,
        asset: Asset,
        kind: TransferKind,
        tx: &ResolvedTransaction,
        shard: ShardPair,
    ) {
        if from == to {
            return;
        }
        if self
            .settings
            .ignored_pairs
            .contains(&(from.to_string(), to.to_string()))
        {
            debug!(tx_id = %tx.tx_id, from, to, "transfer between ignored pair suppressed");
            return;
        }
        events.push(TransferEvent {
            from: from.to_string(),
            to: to.to_string(),
            amount: display_amount(raw_amount, self.decimals_of(&asset)),
            asset,
            kind,
            tx_id: tx.tx_id.clone(),
            shard,
        });
    }
}

/// Raw amounts are unsigned decimal strings up to 256 bits. Anything wider
/// saturates so it still clears every threshold.
fn parse_amount(tx_id: &str, raw: &str) -> U256 {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return U256::zero();
    }
    match U256::from_dec_str(trimmed) {
        Ok(value) => value,
        Err(_) if trimmed.bytes().all(|byte| byte.is_ascii_digit()) => {
            warn!(tx_id, raw, "amount exceeds 256 bits; saturated");
            U256::MAX
        }
        Err(error) => {
            warn!(tx_id, raw, error = ?error, "unparseable amount treated as zero");
            U256::zero()
        }
    }
}

fn pow10(decimals: u32) -> Option<U256> {
    (decimals <= 77).then(|| U256::exp10(decimals as usize))
}

/// Smallest raw amount whose normalized value is at least `trigger`, computed
/// from the shortest decimal rendering of the trigger so no float rounding
/// reaches the comparison. Fractional digits past `decimals` round up.
fn raw_trigger(trigger: f64, decimals: u32) -> U256 {
    if trigger.is_nan() || trigger <= 0.0 {
        return U256::zero();
    }
    let rendered = trigger.to_string();
    let (whole, fraction) = rendered
        .split_once('.')
        .unwrap_or((rendered.as_str(), ""));
    let scale = decimals as usize;
    let kept = &fraction[..fraction.len().min(scale)];
    let dropped = &fraction[kept.len()..];
    let Ok(raw) = U256::from_dec_str(&format!("{whole}{kept:0<scale$}")) else {
        return U256::MAX;
    };
    if dropped.bytes().any(|digit| digit != b'0') {
        raw.saturating_add(U256::one())
    } else {
        raw
    }
}

fn to_f64(value: U256) -> f64 {
    value.to_string().parse().unwrap_or(f64::MAX)
}

/// Normalized amount for display only.
fn display_amount(raw: U256, decimals: u32) -> f64 {
    let Some(scale) = pow10(decimals) else {
        return 0.0;
    };
    to_f64(raw / scale) + to_f64(raw % scale) / to_f64(scale)
}

/// Most negative and most positive holder. Ties resolve to the first address
/// in sorted order.
fn extreme_pair<'a>(
    per_address: &BTreeMap<&'a str, NetFlow>,
) -> Option<(&'a str, &'a str, U256)> {
    let mut sender: Option<(&'a str, U256)> = None;
    let mut receiver: Option<(&'a str, U256)> = None;
    for (address, flow) in per_address {
        if let Some(loss) = flow.loss() {
            if sender.map_or(true, |(_, best)| loss > best) {
                sender = Some((*address, loss));
            }
        }
        if let Some(gain) = flow.gain() {
            if receiver.map_or(true, |(_, best)| gain > best) {
                receiver = Some((*address, gain));
            }
        }
    }
    let (sender, _) = sender?;
    let (receiver, gained) = receiver?;
    Some((sender, receiver, gained))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TokenInfo;
    use whalewatch_core_types::{TxInput, TxOutput};

    const ALPH: u128 = 1_000_000_000_000_000_000;

    fn settings() -> ClassifierSettings {
        let mut tracked_tokens = HashMap::new();
        tracked_tokens.insert(
            "token-ayin".to_string(),
            TrackedToken {
                trigger: 500.0,
                decimals: None,
            },
        );
        ClassifierSettings {
            native_symbol: "ALPH".to_string(),
            native_decimals: 18,
            min_native_trigger: 5_000.0,
            tracked_tokens,
            ignored_pairs: HashSet::new(),
            emit_contract_transfers: false,
        }
    }

    fn registry() -> RegistrySnapshot {
        RegistrySnapshot::new(
            vec![TokenInfo {
                id: "token-ayin".to_string(),
                name: "Ayin".to_string(),
                symbol: "AYIN".to_string(),
                decimals: 18,
            }],
            Vec::new(),
        )
    }

    fn input(address: &str, native: u128, tokens: Vec<TokenAmount>) -> TxInput {
        TxInput {
            address: address.to_string(),
            native_amount: native.to_string(),
            tokens,
        }
    }

    fn output(kind: OutputKind, address: &str, native: u128, tokens: Vec<TokenAmount>) -> TxOutput {
        TxOutput {
            kind,
            address: address.to_string(),
            native_amount: native.to_string(),
            tokens,
        }
    }

    fn ayin(amount: u128) -> TokenAmount {
        TokenAmount {
            id: "token-ayin".to_string(),
            amount: amount.to_string(),
        }
    }

    fn tx(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> ResolvedTransaction {
        ResolvedTransaction {
            tx_id: "tx-1".to_string(),
            tx_type: "Accepted".to_string(),
            inputs,
            outputs,
            finalized: true,
        }
    }

    fn shard() -> ShardPair {
        ShardPair::new(0, 1)
    }

    #[test]
    fn native_transfer_over_threshold_emits_one_event() {
        let classifier = TransferClassifier::new(settings());
        let transaction = tx(
            vec![input("addr-a", 6_001 * ALPH, Vec::new())],
            vec![output(OutputKind::Asset, "addr-b", 6_000 * ALPH, Vec::new())],
        );
        let events = classifier.classify(&transaction, shard(), &registry());
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.from, "addr-a");
        assert_eq!(event.to, "addr-b");
        assert_eq!(event.amount, 6_000.0);
        assert!(event.asset.is_native());
        assert_eq!(event.kind, TransferKind::Direct);
        assert_eq!(event.shard, shard());
    }

    #[test]
    fn token_below_threshold_is_skipped_but_native_still_emits() {
        let classifier = TransferClassifier::new(settings());
        let transaction = tx(
            vec![input("addr-a", 6_001 * ALPH, vec![ayin(400 * ALPH)])],
            vec![output(
                OutputKind::Asset,
                "addr-b",
                6_000 * ALPH,
                vec![ayin(400 * ALPH)],
            )],
        );
        let events = classifier.classify(&transaction, shard(), &registry());
        assert_eq!(events.len(), 1);
        assert!(events[0].asset.is_native());
    }

    #[test]
    fn token_over_threshold_emits_without_native_leg() {
        let classifier = TransferClassifier::new(settings());
        let transaction = tx(
            vec![input("addr-a", 10 * ALPH, vec![ayin(800 * ALPH)])],
            vec![output(OutputKind::Asset, "addr-b", ALPH, vec![ayin(800 * ALPH)])],
        );
        let events = classifier.classify(&transaction, shard(), &registry());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].asset.symbol(), "AYIN");
        assert_eq!(events[0].amount, 800.0);
    }

    #[test]
    fn amount_exactly_at_threshold_is_alerted() {
        let classifier = TransferClassifier::new(settings());
        let transaction = tx(
            vec![input("addr-a", 5_000 * ALPH, Vec::new())],
            vec![output(OutputKind::Asset, "addr-b", 5_000 * ALPH, Vec::new())],
        );
        assert_eq!(classifier.classify(&transaction, shard(), &registry()).len(), 1);

        let below = tx(
            vec![input("addr-a", 5_000 * ALPH, Vec::new())],
            vec![output(OutputKind::Asset, "addr-b", 5_000 * ALPH - 1, Vec::new())],
        );
        assert!(classifier.classify(&below, shard(), &registry()).is_empty());
    }

    #[test]
    fn one_atto_below_threshold_is_never_alerted() {
        let classifier = TransferClassifier::new(settings());
        let transaction = tx(
            vec![input("addr-a", 9_000 * ALPH, vec![ayin(500 * ALPH - 1)])],
            vec![output(
                OutputKind::Asset,
                "addr-b",
                4_999_999_999_999_999_999_999,
                vec![ayin(500 * ALPH - 1)],
            )],
        );
        assert!(classifier.classify(&transaction, shard(), &registry()).is_empty());
    }

    #[test]
    fn fractional_triggers_round_up_in_raw_units() {
        assert_eq!(raw_trigger(5_000.0, 18), U256::from(5_000 * ALPH));
        assert_eq!(raw_trigger(0.1, 18), U256::exp10(17));
        assert_eq!(raw_trigger(1_234.5678, 2), U256::from(123_457u64));
        assert_eq!(raw_trigger(0.0, 18), U256::zero());

        let mut settings = settings();
        settings.min_native_trigger = 0.5;
        settings.native_decimals = 1;
        let classifier = TransferClassifier::new(settings);
        let at = tx(
            vec![input("addr-a", 10, Vec::new())],
            vec![output(OutputKind::Asset, "addr-b", 5, Vec::new())],
        );
        let below = tx(
            vec![input("addr-a", 10, Vec::new())],
            vec![output(OutputKind::Asset, "addr-b", 4, Vec::new())],
        );
        assert_eq!(classifier.classify(&at, shard(), &registry()).len(), 1);
        assert!(classifier.classify(&below, shard(), &registry()).is_empty());
    }

    #[test]
    fn token_amount_wider_than_u128_still_alerts() {
        let classifier = TransferClassifier::new(settings());
        let huge = TokenAmount {
            id: "token-ayin".to_string(),
            amount: format!("1{}", "0".repeat(39)),
        };
        let transaction = tx(
            vec![input("addr-a", ALPH, vec![huge.clone()])],
            vec![output(OutputKind::Asset, "addr-b", ALPH, vec![huge])],
        );
        let events = classifier.classify(&transaction, shard(), &registry());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].asset.symbol(), "AYIN");
        assert_eq!(events[0].amount, 1e21);
    }

    #[test]
    fn amounts_past_256_bits_saturate_and_garbage_is_zero() {
        assert_eq!(parse_amount("tx-1", &"9".repeat(90)), U256::MAX);
        assert_eq!(parse_amount("tx-1", "12abc"), U256::zero());
        assert_eq!(parse_amount("tx-1", "  "), U256::zero());
        assert_eq!(parse_amount("tx-1", "42"), U256::from(42u64));
    }

    #[test]
    fn change_output_back_to_sender_is_not_alerted() {
        let classifier = TransferClassifier::new(settings());
        let transaction = tx(
            vec![input("addr-a", 20_000 * ALPH, Vec::new())],
            vec![
                output(OutputKind::Asset, "addr-b", 6_000 * ALPH, Vec::new()),
                output(OutputKind::Asset, "addr-a", 14_000 * ALPH, Vec::new()),
            ],
        );
        let events = classifier.classify(&transaction, shard(), &registry());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].to, "addr-b");
    }

    #[test]
    fn ignored_pair_is_suppressed_in_one_direction_only() {
        let mut settings = settings();
        settings
            .ignored_pairs
            .insert(("addr-a".to_string(), "addr-b".to_string()));
        let classifier = TransferClassifier::new(settings);

        let forward = tx(
            vec![input("addr-a", 9_000 * ALPH, Vec::new())],
            vec![output(OutputKind::Asset, "addr-b", 9_000 * ALPH, Vec::new())],
        );
        assert!(classifier.classify(&forward, shard(), &registry()).is_empty());

        let reverse = tx(
            vec![input("addr-b", 9_000 * ALPH, Vec::new())],
            vec![output(OutputKind::Asset, "addr-a", 9_000 * ALPH, Vec::new())],
        );
        assert_eq!(classifier.classify(&reverse, shard(), &registry()).len(), 1);
    }

    #[test]
    fn tracked_token_without_decimals_is_skipped() {
        let mut settings = settings();
        settings.tracked_tokens.insert(
            "token-mystery".to_string(),
            TrackedToken {
                trigger: 1.0,
                decimals: None,
            },
        );
        let classifier = TransferClassifier::new(settings);
        let mystery = TokenAmount {
            id: "token-mystery".to_string(),
            amount: "1000000000".to_string(),
        };
        let transaction = tx(
            vec![input("addr-a", ALPH, vec![mystery.clone()])],
            vec![output(OutputKind::Asset, "addr-b", ALPH, vec![mystery])],
        );
        assert!(classifier.classify(&transaction, shard(), &registry()).is_empty());
    }

    #[test]
    fn configured_decimals_take_precedence_over_registry() {
        let mut settings = settings();
        settings.tracked_tokens.insert(
            "token-ayin".to_string(),
            TrackedToken {
                trigger: 500.0,
                decimals: Some(6),
            },
        );
        let classifier = TransferClassifier::new(settings);
        let transaction = tx(
            vec![input("addr-a", ALPH, vec![ayin(600_000_000)])],
            vec![output(OutputKind::Asset, "addr-b", ALPH, vec![ayin(600_000_000)])],
        );
        let events = classifier.classify(&transaction, shard(), &registry());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].amount, 600.0);
    }

    #[test]
    fn contract_outputs_are_not_evaluated_as_transfers() {
        let classifier = TransferClassifier::new(settings());
        let transaction = tx(
            vec![input("addr-a", 9_000 * ALPH, Vec::new())],
            vec![output(OutputKind::Contract, "contract-x", 9_000 * ALPH, Vec::new())],
        );
        assert!(classifier.classify(&transaction, shard(), &registry()).is_empty());
    }

    fn swap() -> ResolvedTransaction {
        tx(
            vec![
                input("addr-a", 7_000 * ALPH, Vec::new()),
                input("contract-pool", ALPH, vec![ayin(50_000 * ALPH)]),
            ],
            vec![
                output(OutputKind::Contract, "contract-pool", 7_001 * ALPH, vec![ayin(49_000 * ALPH)]),
                output(OutputKind::Asset, "addr-b", 0, vec![ayin(1_000 * ALPH)]),
            ],
        )
    }

    #[test]
    fn contract_mediated_flow_is_silent_by_default() {
        let classifier = TransferClassifier::new(settings());
        assert!(classifier.classify(&swap(), shard(), &registry()).is_empty());
    }

    #[test]
    fn contract_mediated_flow_nets_counterparties_when_enabled() {
        let mut settings = settings();
        settings.emit_contract_transfers = true;
        let classifier = TransferClassifier::new(settings);
        let events = classifier.classify(&swap(), shard(), &registry());

        // Native: addr-a lost 7000, nobody outside the pool gained. Token:
        // addr-b gained 1000 but no outside address lost any, so neither asset
        // has both a payer and a payee.
        assert!(events.is_empty());

        let two_sided = tx(
            vec![
                input("addr-a", 7_000 * ALPH, vec![ayin(2_000 * ALPH)]),
                input("contract-pool", ALPH, Vec::new()),
            ],
            vec![
                output(OutputKind::Contract, "contract-pool", 7_001 * ALPH, Vec::new()),
                output(OutputKind::Asset, "addr-b", 0, vec![ayin(2_000 * ALPH)]),
            ],
        );
        let events = classifier.classify(&two_sided, shard(), &registry());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].from, "addr-a");
        assert_eq!(events[0].to, "addr-b");
        assert_eq!(events[0].amount, 2_000.0);
        assert_eq!(events[0].kind, TransferKind::ContractMediated);
        assert_eq!(events[0].asset.symbol(), "AYIN");
    }

    #[test]
    fn classification_is_deterministic() {
        let classifier = TransferClassifier::new(settings());
        let transaction = tx(
            vec![input("addr-a", 30_000 * ALPH, vec![ayin(900 * ALPH)])],
            vec![
                output(OutputKind::Asset, "addr-c", 6_000 * ALPH, vec![ayin(900 * ALPH)]),
                output(OutputKind::Asset, "addr-b", 7_000 * ALPH, Vec::new()),
            ],
        );
        let first = classifier.classify(&transaction, shard(), &registry());
        let second = classifier.classify(&transaction, shard(), &registry());
        assert_eq!(first, second);
        let order: Vec<(&str, &str)> = first
            .iter()
            .map(|event| (event.to.as_str(), event.asset.symbol()))
            .collect();
        assert_eq!(
            order,
            vec![("addr-c", "ALPH"), ("addr-c", "AYIN"), ("addr-b", "ALPH")]
        );
    }
}
