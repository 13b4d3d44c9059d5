//! Handler configuration.

use crate::address::{is_address, normalize_address, normalize_address_keys};
use crate::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_NETWORK: u64 = 1;
pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_KEY_EXPIRY_SKEW_MS: u64 = 1000;
pub const DEFAULT_REQUIRED_CONFIRMATIONS: u64 = 12;
pub const DEFAULT_LOCKSMITH_HOST: &str = "http://127.0.0.1:8080";

/// Per-lock settings from the paywall configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockConfig {
    /// Shown instead of the on-chain name
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub currency_contract_address: Option<String>,
}

/// Supplied once at construction; never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerConfig {
    pub locks: HashMap<String, LockConfig>,
    #[serde(default = "default_network")]
    pub default_network: u64,
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
    #[serde(default = "default_key_expiry_skew_ms")]
    pub key_expiry_skew_ms: u64,
    #[serde(default = "default_required_confirmations")]
    pub required_confirmations: u64,
    #[serde(default = "default_locksmith_host")]
    pub locksmith_host: String,
}

fn default_network() -> u64 {
    DEFAULT_NETWORK
}

fn default_polling_interval_ms() -> u64 {
    DEFAULT_POLLING_INTERVAL_MS
}

fn default_key_expiry_skew_ms() -> u64 {
    DEFAULT_KEY_EXPIRY_SKEW_MS
}

fn default_required_confirmations() -> u64 {
    DEFAULT_REQUIRED_CONFIRMATIONS
}

fn default_locksmith_host() -> String {
    DEFAULT_LOCKSMITH_HOST.to_string()
}

impl HandlerConfig {
    /// Config watching `lock_addresses` with every other setting at its default.
    pub fn new<I, S>(lock_addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let locks = lock_addresses
            .into_iter()
            .map(|address| (normalize_address(address.as_ref()), LockConfig::default()))
            .collect();
        Self {
            locks,
            default_network: DEFAULT_NETWORK,
            polling_interval_ms: DEFAULT_POLLING_INTERVAL_MS,
            key_expiry_skew_ms: DEFAULT_KEY_EXPIRY_SKEW_MS,
            required_confirmations: DEFAULT_REQUIRED_CONFIRMATIONS,
            locksmith_host: DEFAULT_LOCKSMITH_HOST.to_string(),
        }
    }

    pub fn with_lock(mut self, address: &str, lock: LockConfig) -> Self {
        self.locks.insert(normalize_address(address), lock);
        self
    }

    pub fn with_default_network(mut self, network: u64) -> Self {
        self.default_network = network;
        self
    }

    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_key_expiry_skew(mut self, skew: Duration) -> Self {
        self.key_expiry_skew_ms = skew.as_millis() as u64;
        self
    }

    pub fn with_required_confirmations(mut self, confirmations: u64) -> Self {
        self.required_confirmations = confirmations;
        self
    }

    pub fn with_locksmith_host(mut self, host: impl Into<String>) -> Self {
        self.locksmith_host = host.into();
        self
    }

    /// Parses and validates a JSON configuration. Lock addresses are normalized.
    pub fn from_json(json: &str) -> SyncResult<Self> {
        let mut config: HandlerConfig =
            serde_json::from_str(json).map_err(|e| SyncError::Config(e.to_string()))?;
        config.locks = normalize_address_keys(config.locks);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> SyncResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SyncError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_json(&content)
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.locks.is_empty() {
            return Err(SyncError::Config("at least one lock is required".into()));
        }
        if let Some(bad) = self.locks.keys().find(|address| !is_address(address)) {
            return Err(SyncError::Config(format!("invalid lock address: {}", bad)));
        }
        if self.default_network == 0 {
            return Err(SyncError::Config("network id must be positive".into()));
        }
        if self.polling_interval_ms == 0 {
            return Err(SyncError::Config("polling interval must be positive".into()));
        }
        Ok(())
    }

    /// Configured lock addresses, normalized and sorted.
    pub fn lock_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.locks.keys().map(|a| normalize_address(a)).collect();
        addresses.sort();
        addresses.dedup();
        addresses
    }

    pub fn lock_name(&self, address: &str) -> Option<&str> {
        self.locks.get(address).and_then(|lock| lock.name.as_deref())
    }

    /// Distinct token currencies named in the configuration.
    pub fn configured_currencies(&self) -> Vec<String> {
        let mut currencies: Vec<String> = self
            .locks
            .values()
            .filter_map(|lock| lock.currency_contract_address.as_deref())
            .map(normalize_address)
            .collect();
        currencies.sort();
        currencies.dedup();
        currencies
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn key_expiry_skew(&self) -> Duration {
        Duration::from_millis(self.key_expiry_skew_ms)
    }
}
