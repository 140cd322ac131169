use crate::models::*;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Events delivered on the private account stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AccountEvent {
    /// Full position of every asset that changed in one account update.
    Position {
        event_time: DateTime<Utc>,
        balances: Vec<BalanceEntry>,
    },
    /// Single-asset balance change (deposit, withdrawal, transfer).
    BalanceDelta {
        event_time: DateTime<Utc>,
        asset: String,
        delta: Decimal,
    },
    /// An event type this client does not act on.
    Unrecognized { event_type: String },
}

/// One public trade from the multiplexed market stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub symbol: String,
    pub trade_id: u64,
    pub price: Decimal,
    pub quantity: Decimal,
    pub event_time: DateTime<Utc>,
    pub trade_time: DateTime<Utc>,
}

/// How a stream connection ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamClose {
    pub code: Option<u16>,
    pub reason: String,
}

impl StreamClose {
    pub fn new(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}
