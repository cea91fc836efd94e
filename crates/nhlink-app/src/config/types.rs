//! Configuration types

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings from `.nhlink/config.toml`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub relay: RelaySettings,

    #[serde(default)]
    pub refresh: RefreshSettings,

    #[serde(default)]
    pub nhctl: NhctlSettings,

    #[serde(default)]
    pub store: StoreSettings,
}

/// Cross-session relay settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelaySettings {
    /// Broker address shared by every session on this machine
    #[serde(default = "default_relay_addr")]
    pub addr: String,

    /// Upper bound for a single publish
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Delay between reconnect attempts while subscribed
    #[serde(default = "default_reconnect_ms")]
    pub reconnect_ms: u64,
}

impl RelaySettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_ms)
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            addr: default_relay_addr(),
            timeout_ms: default_timeout_ms(),
            reconnect_ms: default_reconnect_ms(),
        }
    }
}

/// Background tree refresh settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RefreshSettings {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl RefreshSettings {
    pub fn interval(&self) -> Duration {
        // A zero interval would spin the timer
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NhctlSettings {
    /// Path to the nhctl binary (empty = resolve on PATH)
    #[serde(default)]
    pub binary: String,
}

impl NhctlSettings {
    pub fn binary(&self) -> Option<&str> {
        Some(self.binary.trim()).filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StoreSettings {
    /// Durable state directory (empty = per-user data directory)
    #[serde(default)]
    pub dir: String,
}

impl StoreSettings {
    pub fn dir(&self) -> Option<PathBuf> {
        Some(self.dir.trim())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
    }
}

fn default_relay_addr() -> String {
    "127.0.0.1:47621".to_string()
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_reconnect_ms() -> u64 {
    1000
}

fn default_interval_secs() -> u64 {
    10
}
