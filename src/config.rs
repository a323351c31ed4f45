//! Market configuration
//!
//! Timing bounds, generation model constants and the identity of the
//! evaluating peer organization. Loaded from TOML with env overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration shared by every contract operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Maximum age (seconds) of a sensor reading or registration timestamp.
    #[serde(default = "default_accepted_delay_secs")]
    pub accepted_delay_secs: u64,

    /// How far (seconds) a generation window may end past ledger time.
    #[serde(default = "default_accepted_clock_drift_secs")]
    pub accepted_clock_drift_secs: u64,

    /// Solar bound constant: irradiance mean x panels x this.
    #[serde(default = "default_conversion")]
    pub solar_conversion: f64,

    /// Wind bound constant: wind speed mean x turbines x this.
    #[serde(default = "default_conversion")]
    pub wind_conversion: f64,

    /// Organization of the peer evaluating generation claims. Its trust set
    /// decides which sensors count as evidence.
    #[serde(default)]
    pub peer_msp: String,
}

fn default_accepted_delay_secs() -> u64 {
    30
}

fn default_accepted_clock_drift_secs() -> u64 {
    10
}

fn default_conversion() -> f64 {
    10_000_000.0
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            accepted_delay_secs: default_accepted_delay_secs(),
            accepted_clock_drift_secs: default_accepted_clock_drift_secs(),
            solar_conversion: default_conversion(),
            wind_conversion: default_conversion(),
            peer_msp: String::new(),
        }
    }
}

impl MarketConfig {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load from `ENERGY_CONFIG_PATH` (or the default path), then apply
    /// individual env overrides.
    pub fn from_env() -> Self {
        let path = std::env::var("ENERGY_CONFIG_PATH")
            .unwrap_or_else(|_| "energy_market.toml".to_string());

        let mut config = Self::load(&path).unwrap_or_else(|e| {
            tracing::debug!("Using default market config ({}): {}", path, e);
            Self::default()
        });

        if let Ok(msp) = std::env::var("ENERGY_PEER_MSP") {
            config.peer_msp = msp;
        }
        if let Ok(delay) = std::env::var("ENERGY_ACCEPTED_DELAY_SECS") {
            if let Ok(n) = delay.parse() {
                config.accepted_delay_secs = n;
            }
        }
        if let Ok(drift) = std::env::var("ENERGY_ACCEPTED_CLOCK_DRIFT_SECS") {
            if let Ok(n) = drift.parse() {
                config.accepted_clock_drift_secs = n;
            }
        }

        config
    }

    /// Save to TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn with_peer_msp(mut self, msp: impl Into<String>) -> Self {
        self.peer_msp = msp.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MarketConfig::default();
        assert_eq!(config.accepted_delay_secs, 30);
        assert_eq!(config.accepted_clock_drift_secs, 10);
        assert_eq!(config.solar_conversion, 10_000_000.0);
        assert_eq!(config.wind_conversion, 10_000_000.0);
        assert!(config.peer_msp.is_empty());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: MarketConfig = toml::from_str("peer_msp = \"Org1MSP\"\n").unwrap();
        assert_eq!(config.peer_msp, "Org1MSP");
        assert_eq!(config.accepted_delay_secs, 30);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("market.toml");
        let config = MarketConfig {
            accepted_delay_secs: 45,
            ..MarketConfig::default()
        }
        .with_peer_msp("Org2MSP");
        config.save(&path).unwrap();

        let loaded = MarketConfig::load(&path).unwrap();
        assert_eq!(loaded.accepted_delay_secs, 45);
        assert_eq!(loaded.peer_msp, "Org2MSP");
    }
}
