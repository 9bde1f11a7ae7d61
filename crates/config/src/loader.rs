use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::env_parsing::{
    parse_csv_list, parse_env_bool, parse_tracked_tokens_env, validate_app_config,
};
use super::AppConfig;

pub const CONFIG_PATH_ENV: &str = "WHALEWATCH_CONFIG";

pub fn load_from_path(path: impl AsRef<Path>) -> Result<AppConfig> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse TOML: {}", path.display()))?;
    Ok(cfg)
}

pub fn load_from_env_or_default(default_path: &Path) -> Result<(AppConfig, PathBuf)> {
    let configured = env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_path.to_path_buf());
    let mut config = load_from_path(&configured)?;

    apply_env_overrides(&mut config)?;
    validate_app_config(&config)
        .with_context(|| format!("invalid configuration: {}", configured.display()))?;

    Ok((config, configured))
}

fn env_parsed<T: FromStr>(key: &str) -> Option<T> {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
}

fn env_non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn apply_env_overrides(config: &mut AppConfig) -> Result<()> {
    if let Some(log_level) = env_non_empty("WHALEWATCH_LOG_LEVEL") {
        config.system.log_level = log_level;
    }
    if let Some(log_json) = env::var("WHALEWATCH_LOG_JSON").ok().and_then(parse_env_bool) {
        config.system.log_json = log_json;
    }

    if let Some(ws_url) = env_non_empty("WHALEWATCH_FEED_WS_URL") {
        config.feed.ws_url = ws_url;
    }
    if let Some(ping_interval_seconds) = env_parsed::<u64>("WHALEWATCH_FEED_PING_INTERVAL_SECONDS")
    {
        config.feed.ping_interval_seconds = ping_interval_seconds;
    }
    if let Some(reconnect) = env::var("WHALEWATCH_FEED_RECONNECT_ON_DISCONNECT")
        .ok()
        .and_then(parse_env_bool)
    {
        config.feed.reconnect_on_disconnect = reconnect;
    }

    if let Some(fullnode_http_url) = env_non_empty("WHALEWATCH_NODE_FULLNODE_HTTP_URL") {
        config.node.fullnode_http_url = fullnode_http_url;
    }
    if let Some(explorer_http_url) = env_non_empty("WHALEWATCH_NODE_EXPLORER_HTTP_URL") {
        config.node.explorer_http_url = explorer_http_url;
    }
    if let Some(request_timeout_ms) = env_parsed::<u64>("WHALEWATCH_NODE_REQUEST_TIMEOUT_MS") {
        config.node.request_timeout_ms = request_timeout_ms;
    }

    if let Some(queue_capacity) = env_parsed::<usize>("WHALEWATCH_ADMISSION_QUEUE_CAPACITY") {
        config.admission.queue_capacity = queue_capacity;
    }
    if let Some(workers) = env_parsed::<usize>("WHALEWATCH_ADMISSION_WORKERS") {
        config.admission.workers = workers;
    }
    if let Some(max_concurrent) = env_parsed::<usize>("WHALEWATCH_ADMISSION_MAX_CONCURRENT") {
        config.admission.max_concurrent = max_concurrent;
    }
    if let Some(retry_base_delay_ms) = env_parsed::<u64>("WHALEWATCH_ADMISSION_RETRY_BASE_DELAY_MS")
    {
        config.admission.retry_base_delay_ms = retry_base_delay_ms;
    }
    if let Some(report_seconds) = env_parsed::<u64>("WHALEWATCH_ADMISSION_REPORT_SECONDS") {
        config.admission.report_seconds = report_seconds;
    }

    if let Some(depth) = env_parsed::<u64>("WHALEWATCH_CONFIRMATION_DEPTH") {
        config.confirmation.depth = depth;
    }
    if let Some(poll_interval_ms) = env_parsed::<u64>("WHALEWATCH_CONFIRMATION_POLL_INTERVAL_MS") {
        config.confirmation.poll_interval_ms = poll_interval_ms;
    }
    if let Some(max_wait_seconds) = env_parsed::<u64>("WHALEWATCH_CONFIRMATION_MAX_WAIT_SECONDS") {
        config.confirmation.max_wait_seconds = max_wait_seconds;
    }

    if let Some(workers) = env_parsed::<usize>("WHALEWATCH_RESOLVER_WORKERS") {
        config.resolver.workers = workers;
    }
    if let Some(poll_interval_ms) = env_parsed::<u64>("WHALEWATCH_RESOLVER_POLL_INTERVAL_MS") {
        config.resolver.poll_interval_ms = poll_interval_ms;
    }
    if let Some(max_attempts) = env_parsed::<u32>("WHALEWATCH_RESOLVER_MAX_ATTEMPTS") {
        config.resolver.max_attempts = max_attempts;
    }

    if let Some(min_native_trigger) = env_parsed::<f64>("WHALEWATCH_ALERTS_MIN_NATIVE_TRIGGER") {
        config.alerts.min_native_trigger = min_native_trigger;
    }
    if let Ok(tokens_csv) = env::var("WHALEWATCH_ALERTS_TRACKED_TOKENS") {
        let tracked =
            parse_tracked_tokens_env(&tokens_csv, "WHALEWATCH_ALERTS_TRACKED_TOKENS")?;
        if !tracked.is_empty() {
            config.alerts.tracked_tokens = tracked;
        }
    }
    if let Ok(pairs_csv) = env::var("WHALEWATCH_ALERTS_IGNORED_PAIRS") {
        let pairs = parse_csv_list(&pairs_csv);
        if !pairs.is_empty() {
            config.alerts.ignored_pairs = pairs;
        }
    }
    if let Some(emit) = env::var("WHALEWATCH_ALERTS_EMIT_CONTRACT_TRANSFERS")
        .ok()
        .and_then(parse_env_bool)
    {
        config.alerts.emit_contract_transfers = emit;
    }

    if let Some(token_list_url) = env_non_empty("WHALEWATCH_REGISTRY_TOKEN_LIST_URL") {
        config.registry.token_list_url = token_list_url;
    }
    if let Some(known_wallets_url) = env_non_empty("WHALEWATCH_REGISTRY_KNOWN_WALLETS_URL") {
        config.registry.known_wallets_url = known_wallets_url;
    }
    if let Some(refresh_seconds) = env_parsed::<u64>("WHALEWATCH_REGISTRY_REFRESH_SECONDS") {
        config.registry.refresh_seconds = refresh_seconds;
    }

    if let Some(enabled) = env::var("WHALEWATCH_METRICS_ENABLED")
        .ok()
        .and_then(parse_env_bool)
    {
        config.metrics.enabled = enabled;
    }
    if let Some(bind_addr) = env_non_empty("WHALEWATCH_METRICS_BIND_ADDR") {
        config.metrics.bind_addr = bind_addr;
    }

    Ok(())
}
