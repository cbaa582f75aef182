//! Driver configuration
//!
//! Defaults match the shipped devices; every value can be overridden from the
//! environment when the host starts a session.

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

/// Switch driver configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchConfig {
    /// First gang endpoint
    #[serde(default = "default_first_endpoint")]
    pub first_endpoint: u8,
    /// Last gang endpoint (inclusive)
    #[serde(default = "default_last_endpoint")]
    pub last_endpoint: u8,
    /// Debounce window for switch and scene frames, in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_first_endpoint() -> u8 {
    1
}

fn default_last_endpoint() -> u8 {
    3
}

fn default_debounce_ms() -> u64 {
    900
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            first_endpoint: default_first_endpoint(),
            last_endpoint: default_last_endpoint(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl SwitchConfig {
    /// Load from `SWITCH_FIRST_ENDPOINT`, `SWITCH_LAST_ENDPOINT` and `SWITCH_DEBOUNCE_MS`
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        env_override("SWITCH_FIRST_ENDPOINT", &mut config.first_endpoint);
        env_override("SWITCH_LAST_ENDPOINT", &mut config.last_endpoint);
        env_override("SWITCH_DEBOUNCE_MS", &mut config.debounce_ms);

        if config.first_endpoint > config.last_endpoint {
            tracing::warn!(
                "Switch endpoint range {}..={} is empty, falling back to defaults",
                config.first_endpoint,
                config.last_endpoint
            );
            config.first_endpoint = default_first_endpoint();
            config.last_endpoint = default_last_endpoint();
        }
        config
    }

    #[must_use]
    pub fn endpoints(&self) -> RangeInclusive<u8> {
        self.first_endpoint..=self.last_endpoint
    }

    #[must_use]
    pub fn contains(&self, endpoint: u8) -> bool {
        self.endpoints().contains(&endpoint)
    }

    #[must_use]
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Curtain driver configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurtainConfig {
    /// Endpoint carrying the Window Covering cluster
    #[serde(default = "default_cover_endpoint")]
    pub endpoint: u8,
    /// How long lift reports are treated as echoes of a local set, in milliseconds
    #[serde(default = "default_echo_window_ms")]
    pub report_echo_ms: u64,
}

fn default_cover_endpoint() -> u8 {
    1
}

fn default_echo_window_ms() -> u64 {
    5000
}

impl Default for CurtainConfig {
    fn default() -> Self {
        Self {
            endpoint: default_cover_endpoint(),
            report_echo_ms: default_echo_window_ms(),
        }
    }
}

impl CurtainConfig {
    /// Load from `CURTAIN_ENDPOINT` and `CURTAIN_ECHO_WINDOW_MS`
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        env_override("CURTAIN_ENDPOINT", &mut config.endpoint);
        env_override("CURTAIN_ECHO_WINDOW_MS", &mut config.report_echo_ms);
        config
    }

    #[must_use]
    pub fn report_echo_window(&self) -> Duration {
        Duration::from_millis(self.report_echo_ms)
    }
}

fn env_override<T: FromStr>(key: &str, target: &mut T) {
    let Ok(raw) = std::env::var(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!("Ignoring invalid {}={:?}", key, raw),
    }
}
