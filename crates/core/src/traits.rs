use crate::events::*;
use crate::models::*;
use async_trait::async_trait;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Gateway Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by the exchange gateway and stream connections.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Exchange returned HTTP {status}: {body}")]
    Exchange { status: u16, body: String },
}

impl GatewayError {
    /// Transport and exchange failures are worth another attempt; bad
    /// configuration or undecodable responses are not going to improve.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transport(_) | GatewayError::Exchange { .. })
    }
}

// ---------------------------------------------------------------------------
// Exchange Gateway Trait
// ---------------------------------------------------------------------------

/// REST access to the exchange. Implementations never retry; retry policy
/// belongs to the caller.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Signed account listing, reduced to non-empty balances.
    async fn fetch_account_snapshot(&self) -> Result<BalanceMap, GatewayError>;

    /// Issue a new session token for the private account stream.
    async fn issue_session_token(&self) -> Result<SessionToken, GatewayError>;

    /// Extend the lifetime of an existing session token.
    async fn renew_session_token(&self, token: &SessionToken) -> Result<(), GatewayError>;

    /// Rolling 24h statistics for every listed pair.
    async fn fetch_24h_stats(&self) -> Result<Vec<TickerStats>, GatewayError>;

    /// Base/quote assets for every listed pair.
    async fn fetch_symbol_metadata(&self) -> Result<Vec<SymbolInfo>, GatewayError>;

    /// Lightweight connectivity request; returns time to first response byte.
    async fn probe(&self) -> Result<Duration, GatewayError>;
}

// ---------------------------------------------------------------------------
// Stream Handler Trait
// ---------------------------------------------------------------------------

/// Callbacks for one persistent stream connection.
///
/// Callbacks run to completion on the connection's task, in frame order.
pub trait StreamHandler: Send {
    /// Called once the connection handshake completed.
    fn on_open(&mut self) {}

    /// Called for every text (or UTF-8 binary) frame.
    fn on_text(&mut self, text: &str);

    /// Called once when the connection ends, whatever the cause.
    fn on_close(&mut self, _close: &StreamClose) {}
}
