use std::{env, path::PathBuf, time::Duration};

use anyhow::{Context, bail};
use async_trait::async_trait;
use channel_signal::{FilterFlags, RelayConfig};
use dashmap::DashMap;
use tracing::{debug, info, warn};

pub const API_URL: &str = "SIGNAL_API_URL";
pub const ACCOUNT: &str = "SIGNAL_ACCOUNT";
pub const API_TOKEN: &str = "SIGNAL_API_TOKEN";
pub const RECONNECT_DELAY_MS: &str = "SIGNAL_RECONNECT_DELAY_MS";
pub const IGNORE_MESSAGES: &str = "SIGNAL_IGNORE_MESSAGES";
pub const IGNORE_ATTACHMENTS: &str = "SIGNAL_IGNORE_ATTACHMENTS";
pub const IGNORE_REACTIONS: &str = "SIGNAL_IGNORE_REACTIONS";
pub const MARK_AS_READ: &str = "SIGNAL_MARK_AS_READ";
pub const RECEIPT_TIMEOUT_MS: &str = "SIGNAL_RECEIPT_TIMEOUT_MS";
pub const MAX_INFLIGHT_RECEIPTS: &str = "SIGNAL_MAX_INFLIGHT_RECEIPTS";

/// Source of key/value settings.
#[async_trait]
pub trait ConfigManagerType: Send + Sync {
    async fn keys(&self) -> Vec<String>;
    async fn get(&self, key: &str) -> Option<String>;
}

/// Process environment, optionally seeded from a `.env` file. Variables
/// already set in the environment win over the file.
#[derive(Clone, Debug)]
pub struct EnvConfigManager {
    env_file: Option<PathBuf>,
}

impl EnvConfigManager {
    pub fn new(env_file: Option<PathBuf>) -> Self {
        match &env_file {
            Some(path) if path.exists() => match dotenvy::from_path(path) {
                Ok(()) => info!("Loaded .env from {}", path.display()),
                Err(err) => warn!(error = %err, "could not load .env from {}", path.display()),
            },
            Some(path) => debug!("no .env at {}, using the process environment", path.display()),
            None => {}
        }
        EnvConfigManager { env_file }
    }

    pub fn env_file(&self) -> Option<&PathBuf> {
        self.env_file.as_ref()
    }
}

#[async_trait]
impl ConfigManagerType for EnvConfigManager {
    async fn keys(&self) -> Vec<String> {
        env::vars().map(|(k, _)| k).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }
}

/// In-memory settings, for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct MapConfigManager {
    map: DashMap<String, String>,
}

impl MapConfigManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, value: &str) {
        self.map.insert(key.to_string(), value.to_string());
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapConfigManager {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        MapConfigManager {
            map: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

#[async_trait]
impl ConfigManagerType for MapConfigManager {
    async fn keys(&self) -> Vec<String> {
        self.map.iter().map(|entry| entry.key().clone()).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).map(|v| v.clone())
    }
}

/// Builds and validates the relay settings. Fails before anything connects.
pub async fn load_relay_config(config: &dyn ConfigManagerType) -> anyhow::Result<RelayConfig> {
    let present = config
        .keys()
        .await
        .into_iter()
        .filter(|k| k.starts_with("SIGNAL_"))
        .count();
    debug!(present, "reading SIGNAL_* settings");

    let api_url = required(config, API_URL).await?;
    let account = required(config, ACCOUNT).await?;
    let mut relay = RelayConfig::new(&api_url, account)
        .with_context(|| format!("{API_URL} is not a valid url"))?;

    if let Some(token) = optional(config, API_TOKEN).await {
        relay = relay.with_auth_token(token);
    }
    if let Some(raw) = optional(config, RECONNECT_DELAY_MS).await {
        relay = relay.with_reconnect_delay_ms(parse_number(RECONNECT_DELAY_MS, &raw)?);
    }
    relay = relay
        .with_filters(FilterFlags {
            ignore_messages: flag(config, IGNORE_MESSAGES).await?,
            ignore_attachments: flag(config, IGNORE_ATTACHMENTS).await?,
            ignore_reactions: flag(config, IGNORE_REACTIONS).await?,
        })
        .with_mark_as_read(flag(config, MARK_AS_READ).await?);
    if let Some(raw) = optional(config, RECEIPT_TIMEOUT_MS).await {
        relay = relay.with_receipt_timeout(Duration::from_millis(parse_number(
            RECEIPT_TIMEOUT_MS,
            &raw,
        )?));
    }
    if let Some(raw) = optional(config, MAX_INFLIGHT_RECEIPTS).await {
        relay.max_inflight_receipts = parse_number(MAX_INFLIGHT_RECEIPTS, &raw)? as usize;
    }

    relay.validate()?;
    Ok(relay)
}

/// Accepts `true/false`, `1/0`, `yes/no`, `on/off`, case-insensitive.
pub fn parse_bool(key: &str, raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => bail!("{key}: expected a boolean, got `{other}`"),
    }
}

fn parse_number(key: &str, raw: &str) -> anyhow::Result<u64> {
    raw.trim()
        .parse::<u64>()
        .with_context(|| format!("{key}: expected a non-negative integer, got `{raw}`"))
}

async fn optional(config: &dyn ConfigManagerType, key: &str) -> Option<String> {
    config
        .get(key)
        .await
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn required(config: &dyn ConfigManagerType, key: &str) -> anyhow::Result<String> {
    match optional(config, key).await {
        Some(value) => Ok(value),
        None => bail!("{key} is required"),
    }
}

async fn flag(config: &dyn ConfigManagerType, key: &str) -> anyhow::Result<bool> {
    match optional(config, key).await {
        Some(raw) => parse_bool(key, &raw),
        None => Ok(false),
    }
}
