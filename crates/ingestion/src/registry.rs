use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use whalewatch_config::RegistryConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub decimals: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownWallet {
    pub address: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "exchangeName")]
    pub exchange_name: String,
    #[serde(default)]
    pub state: String,
    #[serde(default, rename = "type")]
    pub kind: String,
}

impl KnownWallet {
    /// Human label, preferring the exchange name.
    pub fn label(&self) -> &str {
        if !self.exchange_name.trim().is_empty() {
            &self.exchange_name
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenListPayload {
    #[serde(default, rename = "networkId")]
    network_id: i64,
    #[serde(default)]
    tokens: Vec<TokenInfo>,
}

/// Immutable view of token metadata and wallet labels. Replaced wholesale on
/// refresh; never mutated once published.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    tokens: HashMap<String, TokenInfo>,
    known_wallets: HashMap<String, KnownWallet>,
    refreshed_at: Option<DateTime<Utc>>,
}

impl RegistrySnapshot {
    pub fn new(tokens: Vec<TokenInfo>, known_wallets: Vec<KnownWallet>) -> Self {
        Self {
            tokens: tokens
                .into_iter()
                .map(|token| (token.id.clone(), token))
                .collect(),
            known_wallets: known_wallets
                .into_iter()
                .map(|wallet| (wallet.address.clone(), wallet))
                .collect(),
            refreshed_at: Some(Utc::now()),
        }
    }

    pub fn token(&self, id: &str) -> Option<&TokenInfo> {
        self.tokens.get(id)
    }

    pub fn wallet(&self, address: &str) -> Option<&KnownWallet> {
        self.known_wallets.get(address)
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn wallet_count(&self) -> usize {
        self.known_wallets.len()
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }
}

#[derive(Debug, Default)]
pub struct AssetRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
}

impl AssetRegistry {
    pub fn new(initial: RegistrySnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        let guard = self
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    pub fn replace(&self, next: RegistrySnapshot) {
        let next = Arc::new(next);
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = next;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshReport {
    pub tokens_refreshed: bool,
    pub wallets_refreshed: bool,
}

pub struct RegistryRefresher {
    http: Client,
    token_list_url: String,
    known_wallets_url: String,
    refresh_every: Duration,
    registry: Arc<AssetRegistry>,
}

impl RegistryRefresher {
    pub fn new(
        config: &RegistryConfig,
        request_timeout: Duration,
        registry: Arc<AssetRegistry>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed building registry http client")?;
        Ok(Self {
            http,
            token_list_url: config.token_list_url.trim().to_string(),
            known_wallets_url: config.known_wallets_url.trim().to_string(),
            refresh_every: Duration::from_secs(config.refresh_seconds.max(1)),
            registry,
        })
    }

    /// Fetches both sources and publishes a new snapshot. A source that fails
    /// keeps its previous contents.
    pub async fn refresh_once(&self) -> RefreshReport {
        let previous = self.registry.snapshot();

        let tokens = if self.token_list_url.is_empty() {
            None
        } else {
            match self.fetch_token_list().await {
                Ok(tokens) => Some(tokens),
                Err(error) => {
                    warn!(
                        error = %format!("{error:#}"),
                        url = %self.token_list_url,
                        "token list refresh failed"
                    );
                    None
                }
            }
        };
        let wallets = if self.known_wallets_url.is_empty() {
            None
        } else {
            match self.fetch_known_wallets().await {
                Ok(wallets) => Some(wallets),
                Err(error) => {
                    warn!(
                        error = %format!("{error:#}"),
                        url = %self.known_wallets_url,
                        "known wallets refresh failed"
                    );
                    None
                }
            }
        };

        let report = RefreshReport {
            tokens_refreshed: tokens.is_some(),
            wallets_refreshed: wallets.is_some(),
        };
        if !report.tokens_refreshed && !report.wallets_refreshed {
            return report;
        }

        let next = RegistrySnapshot {
            tokens: tokens.unwrap_or_else(|| previous.tokens.clone()),
            known_wallets: wallets.unwrap_or_else(|| previous.known_wallets.clone()),
            refreshed_at: Some(Utc::now()),
        };
        info!(
            tokens = next.token_count(),
            known_wallets = next.wallet_count(),
            tokens_refreshed = report.tokens_refreshed,
            wallets_refreshed = report.wallets_refreshed,
            "asset registry refreshed"
        );
        self.registry.replace(next);
        report
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = time::interval(self.refresh_every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick completes immediately; the caller already refreshed once.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("registry refresher stopping");
                    return;
                }
                _ = interval.tick() => {
                    let _ = self.refresh_once().await;
                }
            }
        }
    }

    async fn fetch_token_list(&self) -> Result<HashMap<String, TokenInfo>> {
        let payload: TokenListPayload = self.get_json(&self.token_list_url).await?;
        debug!(
            network_id = payload.network_id,
            tokens = payload.tokens.len(),
            "token list fetched"
        );
        Ok(payload
            .tokens
            .into_iter()
            .filter(|token| !token.id.trim().is_empty())
            .map(|token| (token.id.clone(), token))
            .collect())
    }

    async fn fetch_known_wallets(&self) -> Result<HashMap<String, KnownWallet>> {
        let wallets: Vec<KnownWallet> = self.get_json(&self.known_wallets_url).await?;
        Ok(wallets
            .into_iter()
            .filter(|wallet| !wallet.address.trim().is_empty())
            .map(|wallet| (wallet.address.clone(), wallet))
            .collect())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed GET {url}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("non-success status {status} from {url}"));
        }
        response
            .json::<T>()
            .await
            .with_context(|| format!("failed decoding json from {url}"))
    }
}
