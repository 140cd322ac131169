use serde::{Deserialize, Serialize};
use spotlink_core::{GatewayError, SessionToken};
use std::fmt;
use std::str::FromStr;

/// Which Binance environment a component talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    Testnet,
    Mainnet,
}

impl Network {
    /// Environment variable names holding this network's API key and secret.
    pub fn credential_vars(&self) -> (&'static str, &'static str) {
        match self {
            Network::Testnet => ("TESTNET_API_KEY", "TESTNET_SECRET_KEY"),
            Network::Mainnet => ("MAINNET_API_KEY", "MAINNET_SECRET_KEY"),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Testnet => write!(f, "testnet"),
            Network::Mainnet => write!(f, "mainnet"),
        }
    }
}

impl FromStr for Network {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "testnet" | "test" => Ok(Network::Testnet),
            "mainnet" | "main" | "live" => Ok(Network::Mainnet),
            other => Err(GatewayError::Configuration(format!(
                "unknown network '{}'",
                other
            ))),
        }
    }
}

/// REST and WebSocket endpoints for one Binance environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub network: Network,
    /// e.g. "https://testnet.binance.vision"
    pub rest_base_url: String,
    /// Prefix for every REST path, e.g. "/api/v3/".
    pub rest_path_prefix: String,
    /// e.g. "wss://testnet.binance.vision"
    pub ws_base_url: String,
    /// Path for single raw streams, e.g. "/ws".
    pub ws_path_prefix: String,
    /// Path for combined streams, e.g. "/stream".
    pub ws_stream_path: String,
    /// Request timeout for REST calls in seconds.
    pub request_timeout_secs: u64,
}

impl ExchangeConfig {
    pub fn testnet() -> Self {
        Self {
            network: Network::Testnet,
            rest_base_url: "https://testnet.binance.vision".to_string(),
            rest_path_prefix: "/api/v3/".to_string(),
            ws_base_url: "wss://testnet.binance.vision".to_string(),
            ws_path_prefix: "/ws".to_string(),
            ws_stream_path: "/stream".to_string(),
            request_timeout_secs: 10,
        }
    }

    pub fn mainnet() -> Self {
        Self {
            network: Network::Mainnet,
            rest_base_url: "https://api.binance.com".to_string(),
            rest_path_prefix: "/api/v3/".to_string(),
            ws_base_url: "wss://stream.binance.com:9443".to_string(),
            ws_path_prefix: "/ws".to_string(),
            ws_stream_path: "/stream".to_string(),
            request_timeout_secs: 10,
        }
    }

    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Testnet => Self::testnet(),
            Network::Mainnet => Self::mainnet(),
        }
    }

    /// Full URL of a REST endpoint, e.g. `rest_url("account")`.
    pub fn rest_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}/{}",
            self.rest_base_url.trim_end_matches('/'),
            self.rest_path_prefix.trim_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    /// Address of the private user-data stream for a session token.
    pub fn user_stream_url(&self, token: &SessionToken) -> String {
        format!(
            "{}/{}/{}",
            self.ws_base_url.trim_end_matches('/'),
            self.ws_path_prefix.trim_matches('/'),
            token.as_str()
        )
    }

    /// Address of a combined stream carrying `<symbol><suffix>` for every symbol.
    ///
    /// Symbols are lower-cased as the stream names require.
    pub fn combined_stream_url<S: AsRef<str>>(&self, symbols: &[S], suffix: &str) -> String {
        let streams: Vec<String> = symbols
            .iter()
            .map(|s| format!("{}{}", s.as_ref().to_lowercase(), suffix))
            .collect();
        format!(
            "{}/{}?streams={}",
            self.ws_base_url.trim_end_matches('/'),
            self.ws_stream_path.trim_matches('/'),
            streams.join("/")
        )
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self::testnet()
    }
}

/// API key and secret. Immutable once loaded.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub secret_key: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>) -> Result<Self, GatewayError> {
        let api_key = api_key.into();
        let secret_key = secret_key.into();
        if api_key.trim().is_empty() {
            return Err(GatewayError::Configuration("API key is empty".to_string()));
        }
        if secret_key.trim().is_empty() {
            return Err(GatewayError::Configuration("secret key is empty".to_string()));
        }
        Ok(Self {
            api_key,
            secret_key,
        })
    }

    /// Read the network's credential pair from the process environment.
    pub fn from_env(network: Network) -> Result<Self, GatewayError> {
        let (key_var, secret_var) = network.credential_vars();
        let api_key = std::env::var(key_var)
            .map_err(|_| GatewayError::Configuration(format!("{} is not set", key_var)))?;
        let secret_key = std::env::var(secret_var)
            .map_err(|_| GatewayError::Configuration(format!("{} is not set", secret_var)))?;
        Self::new(api_key, secret_key)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}
