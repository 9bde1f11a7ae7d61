use anyhow::{anyhow, Result};
use std::collections::{BTreeMap, HashSet};

use super::{AlertsConfig, AppConfig, TrackedTokenConfig};

pub(crate) fn parse_env_bool(value: String) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub(crate) fn parse_csv_list(csv: &str) -> Vec<String> {
    csv.trim()
        .trim_matches('"')
        .trim_matches('\'')
        .split(',')
        .map(str::trim)
        .map(|value| value.trim_matches('"').trim_matches('\''))
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Parses `tokenId;trigger[;decimals]` entries separated by commas.
pub(crate) fn parse_tracked_tokens_env(
    csv: &str,
    env_name: &str,
) -> Result<BTreeMap<String, TrackedTokenConfig>> {
    let mut values = BTreeMap::new();
    for token in parse_csv_list(csv) {
        let mut parts = token.split(';').map(str::trim);
        let id = parts.next().unwrap_or_default();
        if id.is_empty() {
            return Err(anyhow!(
                "{env_name} contains empty token id in entry: {}",
                token
            ));
        }
        let Some(raw_trigger) = parts.next() else {
            return Err(anyhow!(
                "{env_name} contains malformed entry (expected id;trigger[;decimals]): {}",
                token
            ));
        };
        let Some(trigger) = raw_trigger.parse::<f64>().ok().filter(|v| v.is_finite()) else {
            return Err(anyhow!(
                "{env_name} contains invalid trigger for token={}: {}",
                id,
                raw_trigger
            ));
        };
        let decimals = match parts.next() {
            Some(raw) => Some(raw.parse::<u32>().map_err(|_| {
                anyhow!("{env_name} contains invalid decimals for token={id}: {raw}")
            })?),
            None => None,
        };
        if parts.next().is_some() {
            return Err(anyhow!(
                "{env_name} contains malformed entry (too many fields): {}",
                token
            ));
        }
        if values
            .insert(id.to_string(), TrackedTokenConfig { trigger, decimals })
            .is_some()
        {
            return Err(anyhow!("{env_name} contains duplicate token id: {}", id));
        }
    }
    Ok(values)
}

pub(crate) fn parse_address_pair(token: &str) -> Option<(String, String)> {
    let (from, to) = token.split_once(':')?;
    let from = from.trim();
    let to = to.trim();
    if from.is_empty() || to.is_empty() || to.contains(':') {
        return None;
    }
    Some((from.to_string(), to.to_string()))
}

impl AlertsConfig {
    pub fn ignored_pair_list(&self) -> Result<Vec<(String, String)>> {
        self.ignored_pairs
            .iter()
            .map(|token| {
                parse_address_pair(token).ok_or_else(|| {
                    anyhow!(
                        "alerts.ignored_pairs contains malformed pair (expected from:to): {}",
                        token
                    )
                })
            })
            .collect()
    }
}

pub(crate) fn validate_app_config(config: &AppConfig) -> Result<()> {
    if config.feed.ws_url.trim().is_empty() {
        return Err(anyhow!("feed.ws_url must not be empty"));
    }
    if config.feed.notify_method.trim().is_empty() {
        return Err(anyhow!("feed.notify_method must not be empty"));
    }
    for (name, url) in [
        ("node.fullnode_http_url", &config.node.fullnode_http_url),
        ("node.explorer_http_url", &config.node.explorer_http_url),
    ] {
        let trimmed = url.trim();
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(anyhow!(
                "{name} must be an explicit http(s):// URL, got: {}",
                trimmed
            ));
        }
    }
    if config.admission.queue_capacity == 0 {
        return Err(anyhow!("admission.queue_capacity must be >= 1"));
    }
    if config.admission.workers == 0 {
        return Err(anyhow!("admission.workers must be >= 1"));
    }
    if config.admission.max_concurrent == 0 {
        return Err(anyhow!("admission.max_concurrent must be >= 1"));
    }
    if config.admission.submit_backoff_max_ms < config.admission.submit_backoff_initial_ms {
        return Err(anyhow!(
            "admission.submit_backoff_max_ms ({}) must be >= submit_backoff_initial_ms ({})",
            config.admission.submit_backoff_max_ms,
            config.admission.submit_backoff_initial_ms
        ));
    }
    if config.confirmation.depth == 0 {
        return Err(anyhow!("confirmation.depth must be >= 1"));
    }
    if config.confirmation.max_attempts == 0 || config.confirmation.max_wait_seconds == 0 {
        return Err(anyhow!(
            "confirmation.max_attempts and confirmation.max_wait_seconds must be >= 1"
        ));
    }
    if config.resolver.workers == 0 {
        return Err(anyhow!("resolver.workers must be >= 1"));
    }
    if config.resolver.candidate_queue_capacity == 0 {
        return Err(anyhow!("resolver.candidate_queue_capacity must be >= 1"));
    }
    if config.resolver.max_attempts == 0 || config.resolver.max_wait_seconds == 0 {
        return Err(anyhow!(
            "resolver.max_attempts and resolver.max_wait_seconds must be >= 1"
        ));
    }
    if config.notify.event_queue_capacity == 0 {
        return Err(anyhow!("notify.event_queue_capacity must be >= 1"));
    }
    if !config.alerts.min_native_trigger.is_finite() || config.alerts.min_native_trigger < 0.0 {
        return Err(anyhow!(
            "alerts.min_native_trigger must be a non-negative number"
        ));
    }
    for (id, tracked) in &config.alerts.tracked_tokens {
        if !tracked.trigger.is_finite() || tracked.trigger < 0.0 {
            return Err(anyhow!(
                "alerts.tracked_tokens.{id}.trigger must be a non-negative number"
            ));
        }
    }
    let pairs = config.alerts.ignored_pair_list()?;
    let mut seen = HashSet::new();
    for pair in pairs {
        if !seen.insert(pair.clone()) {
            return Err(anyhow!(
                "alerts.ignored_pairs contains duplicate pair: {}:{}",
                pair.0,
                pair.1
            ));
        }
    }
    Ok(())
}
