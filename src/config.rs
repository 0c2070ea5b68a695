//! Startup configuration, read once from a TOML file. No hot reload.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::risk::RiskLimits;
use crate::types::{Price, PRICE_SCALE};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// The single symbol this book trades.
    pub symbol: String,
    /// Arena capacity: maximum simultaneously resting orders.
    pub order_capacity: u32,
    /// Number of ingestion shards; power of two, at least the expected
    /// producer thread count.
    pub command_shards: usize,
    /// Per-shard ring capacity; power of two.
    pub command_shard_capacity: usize,
    /// Shards for the external market-update pathway.
    pub update_shards: usize,
    pub update_shard_capacity: usize,
    /// Levels per side in published depth snapshots.
    pub published_depth: usize,
    /// Pin the matching thread to the last core.
    pub pin_consumer: bool,
    /// Pre-fault arena pages before processing.
    pub warm_up: bool,
    /// Default subscriber filter for binaries (e.g. "info").
    pub log_level: String,
    pub risk: RiskConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbol: "AAPL".to_string(),
            order_capacity: 1 << 20,
            command_shards: 8,
            command_shard_capacity: 1 << 17,
            update_shards: 4,
            update_shard_capacity: 1 << 17,
            published_depth: 5,
            pin_consumer: false,
            warm_up: true,
            log_level: "info".to_string(),
            risk: RiskConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Attach the limit risk manager at all.
    pub enabled: bool,
    /// Runtime bypass, settable without recompiling (benchmarks).
    pub bypass: bool,
    pub max_order_size: u64,
    /// Whole currency units; converted to ticks at load.
    pub min_price: f64,
    pub max_price: f64,
    pub min_position: i64,
    pub max_position: i64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bypass: false,
            max_order_size: 10_000,
            min_price: 0.0001,
            max_price: 1_000_000.0,
            min_position: -100_000,
            max_position: 100_000,
        }
    }
}

impl RiskConfig {
    pub fn limits(&self) -> RiskLimits {
        RiskLimits {
            max_order_size: self.max_order_size,
            min_price: price_from_f64(self.min_price),
            max_price: price_from_f64(self.max_price),
            min_position: self.min_position,
            max_position: self.max_position,
        }
    }
}

fn price_from_f64(value: f64) -> Price {
    Price((value * PRICE_SCALE as f64).round().max(0.0) as u64)
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&text)?;
        config.validated()
    }

    pub fn from_str(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validated()
    }

    fn validated(self) -> Result<Self, ConfigError> {
        for (name, value) in [
            ("command_shards", self.command_shards),
            ("command_shard_capacity", self.command_shard_capacity),
            ("update_shards", self.update_shards),
            ("update_shard_capacity", self.update_shard_capacity),
        ] {
            if !value.is_power_of_two() {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a power of two, got {value}"
                )));
            }
        }
        if self.order_capacity == 0 {
            return Err(ConfigError::Invalid("order_capacity must be positive".into()));
        }
        if self.symbol.is_empty() {
            return Err(ConfigError::Invalid("symbol must not be empty".into()));
        }
        if self.risk.max_price <= self.risk.min_price {
            return Err(ConfigError::Invalid(
                "risk.max_price must exceed risk.min_price".into(),
            ));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default().validated().unwrap();
        assert_eq!(config.symbol, "AAPL");
        assert_eq!(config.published_depth, 5);
        assert!(config.risk.enabled);
    }

    #[test]
    fn parses_partial_toml() {
        let config = EngineConfig::from_str(
            r#"
            symbol = "BTCUSD"
            order_capacity = 65536
            command_shards = 4

            [risk]
            bypass = true
            max_order_size = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.symbol, "BTCUSD");
        assert_eq!(config.order_capacity, 65536);
        assert_eq!(config.command_shards, 4);
        assert!(config.risk.bypass);
        assert_eq!(config.risk.max_order_size, 500);
        // untouched fields keep their defaults
        assert_eq!(config.command_shard_capacity, 1 << 17);
    }

    #[test]
    fn rejects_non_power_of_two_shards() {
        let err = EngineConfig::from_str("command_shards = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_inverted_price_bounds() {
        let err = EngineConfig::from_str(
            r#"
            [risk]
            min_price = 10.0
            max_price = 1.0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn risk_limits_scale_prices() {
        let limits = RiskConfig {
            min_price: 0.5,
            max_price: 100.25,
            ..RiskConfig::default()
        }
        .limits();
        assert_eq!(limits.min_price, Price(5_000));
        assert_eq!(limits.max_price, Price(1_002_500));
    }
}
