use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub system: SystemConfig,
    pub feed: FeedConfig,
    pub node: NodeConfig,
    pub admission: AdmissionConfig,
    pub confirmation: ConfirmationConfig,
    pub resolver: ResolverConfig,
    pub alerts: AlertsConfig,
    pub registry: RegistryConfig,
    pub metrics: MetricsConfig,
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub env: String,
    pub log_level: String,
    pub log_json: bool,
    pub shutdown_grace_ms: u64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            env: "dev".to_string(),
            log_level: "info".to_string(),
            log_json: false,
            shutdown_grace_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub ws_url: String,
    pub notify_method: String,
    pub ping_interval_seconds: u64,
    pub close_timeout_ms: u64,
    pub reconnect_on_disconnect: bool,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:12973/events".to_string(),
            notify_method: "block_notify".to_string(),
            ping_interval_seconds: 10,
            close_timeout_ms: 2_000,
            reconnect_on_disconnect: false,
            reconnect_initial_ms: 500,
            reconnect_max_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub fullnode_http_url: String,
    pub explorer_http_url: String,
    pub request_timeout_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            fullnode_http_url: "http://127.0.0.1:12973".to_string(),
            explorer_http_url: "https://backend.mainnet.alephium.org".to_string(),
            request_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    pub queue_capacity: usize,
    pub workers: usize,
    pub max_concurrent: usize,
    pub retry_base_delay_ms: u64,
    pub submit_backoff_initial_ms: u64,
    pub submit_backoff_max_ms: u64,
    pub report_seconds: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1_000,
            workers: 48,
            max_concurrent: 32,
            retry_base_delay_ms: 1_000,
            submit_backoff_initial_ms: 100,
            submit_backoff_max_ms: 10_000,
            report_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    pub depth: u64,
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
    pub max_wait_seconds: u64,
    pub seen_tx_ttl_seconds: u64,
    pub seen_tx_limit: usize,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            depth: 10,
            poll_interval_ms: 4_000,
            max_attempts: 600,
            max_wait_seconds: 1_800,
            seen_tx_ttl_seconds: 3_600,
            seen_tx_limit: 50_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub workers: usize,
    pub candidate_queue_capacity: usize,
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
    pub max_wait_seconds: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            workers: 30,
            candidate_queue_capacity: 100,
            poll_interval_ms: 1_000,
            max_attempts: 3_600,
            max_wait_seconds: 7_200,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TrackedTokenConfig {
    pub trigger: f64,
    #[serde(default)]
    pub decimals: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub native_symbol: String,
    pub native_decimals: u32,
    pub min_native_trigger: f64,
    pub tracked_tokens: BTreeMap<String, TrackedTokenConfig>,
    /// Directional `from:to` address pairs whose transfers are never alerted.
    pub ignored_pairs: Vec<String>,
    pub emit_contract_transfers: bool,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            native_symbol: "ALPH".to_string(),
            native_decimals: 18,
            min_native_trigger: 5_000.0,
            tracked_tokens: BTreeMap::new(),
            ignored_pairs: Vec::new(),
            emit_contract_transfers: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub token_list_url: String,
    pub known_wallets_url: String,
    pub refresh_seconds: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            token_list_url: String::new(),
            known_wallets_url: String::new(),
            refresh_seconds: 3_600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub bind_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: "0.0.0.0:2112".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub event_queue_capacity: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            event_queue_capacity: 100,
        }
    }
}
