//! File configuration for the `spotlink` binary.
//!
//! Every field is optional; anything missing falls back to the built-in
//! defaults. Command-line flags are applied on top afterwards.

use anyhow::{Context, Result};
use serde::Deserialize;
use spotlink_brokers_binance::{ExchangeConfig, Network};
use spotlink_engine::{
    BalanceDeltaMode, LatencyConfig, MarketConfig, SessionConfig, SupervisorConfig,
};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Network for balances, the session token, the user stream and probes.
    pub account_network: Network,
    /// Network for 24h statistics and trade streams.
    pub market_network: Network,
    pub delta_mode: BalanceDeltaMode,
    pub session: SessionConfig,
    pub ranking: MarketConfig,
    pub latency: LatencyConfig,
    /// Endpoint overrides for the account side.
    pub account: EndpointOverrides,
    /// Endpoint overrides for the market side.
    pub market: EndpointOverrides,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            account_network: Network::Testnet,
            // Testnet volume says nothing about the real market.
            market_network: Network::Mainnet,
            delta_mode: BalanceDeltaMode::default(),
            session: SessionConfig::default(),
            ranking: MarketConfig::default(),
            latency: LatencyConfig::default(),
            account: EndpointOverrides::default(),
            market: EndpointOverrides::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EndpointOverrides {
    pub rest_base_url: Option<String>,
    pub rest_path_prefix: Option<String>,
    pub ws_base_url: Option<String>,
    pub ws_path_prefix: Option<String>,
    pub ws_stream_path: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

impl EndpointOverrides {
    fn apply(&self, mut preset: ExchangeConfig) -> ExchangeConfig {
        if let Some(url) = &self.rest_base_url {
            preset.rest_base_url = url.clone();
        }
        if let Some(prefix) = &self.rest_path_prefix {
            preset.rest_path_prefix = prefix.clone();
        }
        if let Some(url) = &self.ws_base_url {
            preset.ws_base_url = url.clone();
        }
        if let Some(prefix) = &self.ws_path_prefix {
            preset.ws_path_prefix = prefix.clone();
        }
        if let Some(path) = &self.ws_stream_path {
            preset.ws_stream_path = path.clone();
        }
        if let Some(secs) = self.request_timeout_secs {
            preset.request_timeout_secs = secs;
        }
        preset
    }
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML config")
    }

    pub fn account_endpoints(&self) -> ExchangeConfig {
        self.account
            .apply(ExchangeConfig::for_network(self.account_network))
    }

    pub fn market_endpoints(&self) -> ExchangeConfig {
        self.market.apply(ExchangeConfig::for_network(self.market_network))
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            account: self.account_endpoints(),
            market: self.market_endpoints(),
            session: self.session.clone(),
            ranking: self.ranking.clone(),
            latency: self.latency.clone(),
            delta_mode: self.delta_mode,
        }
    }
}
