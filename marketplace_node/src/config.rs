//! Node configuration.
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! `MARKET_*` environment variables (`__` separates nested keys, e.g.
//! `MARKET_CHAIN__RPC_URL`).

use ethereum_types::H160;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Source(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub pinning: PinningConfig,
    pub chain: ChainConfig,
    pub listing: ListingConfig,
    pub subscription: SubscriptionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 secret shared with the identity provider that issues bearer tokens
    pub jwt_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PinningConfig {
    pub endpoint: String,
    pub gateway_url: String,
    /// Bearer credential for the pinning provider
    pub jwt: String,
    pub timeout_secs: u64,
}

impl Default for PinningConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.pinata.cloud/pinning/pinJSONToIPFS".to_string(),
            gateway_url: "https://gateway.pinata.cloud/ipfs/".to_string(),
            jwt: String::new(),
            timeout_secs: 30,
        }
    }
}

impl PinningConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub registry_address: String,
    /// Contract whose `PaymentProcessed` logs settle subscriptions
    pub payment_address: String,
    pub register_method: String,
    pub details_method: String,
    pub timeout_secs: u64,
    pub min_confirmations: u64,
    /// Non-production mode allows confirming transactions that are still in
    /// the head block
    pub production: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            registry_address: "0x0000000000000000000000000000000000000000".to_string(),
            payment_address: "0x0000000000000000000000000000000000000000".to_string(),
            register_method: "registerBot".to_string(),
            details_method: "getBotDetails".to_string(),
            timeout_secs: 15,
            min_confirmations: 1,
            production: true,
        }
    }
}

impl ChainConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn registry_address(&self) -> Result<H160, ConfigError> {
        parse_address(&self.registry_address)
            .ok_or_else(|| ConfigError::Invalid(format!("bad registry address {}", self.registry_address)))
    }

    pub fn payment_address(&self) -> Result<H160, ConfigError> {
        parse_address(&self.payment_address)
            .ok_or_else(|| ConfigError::Invalid(format!("bad payment address {}", self.payment_address)))
    }

    /// Production never accepts fewer than one confirmation.
    pub fn effective_min_confirmations(&self) -> u64 {
        if self.production {
            self.min_confirmations.max(1)
        } else {
            self.min_confirmations
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingConfig {
    /// A pin request left in flight longer than this may be reclaimed
    pub pin_stale_after_secs: u64,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            pin_stale_after_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    pub period_days: u32,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self { period_days: 30 }
    }
}

impl Config {
    /// Load configuration from an optional file plus the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let cfg: Config = builder
            .add_source(
                config::Environment::with_prefix("MARKET")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chain.production && self.chain.min_confirmations == 0 {
            return Err(ConfigError::Invalid(
                "min_confirmations must be at least 1 in production".to_string(),
            ));
        }
        if self.chain.timeout_secs == 0 || self.pinning.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".to_string()));
        }
        if self.subscription.period_days == 0 {
            return Err(ConfigError::Invalid("subscription period must be positive".to_string()));
        }
        self.chain.registry_address()?;
        self.chain.payment_address()?;
        Ok(())
    }
}

/// Parse a 20-byte hex address, with or without the `0x` prefix.
pub fn parse_address(value: &str) -> Option<H160> {
    let raw = value.strip_prefix("0x").unwrap_or(value);
    if raw.len() != 40 {
        return None;
    }
    let bytes = hex::decode(raw).ok()?;
    Some(H160::from_slice(&bytes))
}
