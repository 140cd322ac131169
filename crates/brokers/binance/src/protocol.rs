//! Binance wire formats and their conversion into core types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use spotlink_core::*;

// ---------------------------------------------------------------------------
// REST responses
// ---------------------------------------------------------------------------

/// `GET /api/v3/account` (only the fields this client reads).
#[derive(Debug, Clone, Deserialize)]
pub struct AccountResponse {
    pub balances: Vec<AccountBalance>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountBalance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

impl AccountResponse {
    pub fn into_balance_map(self) -> BalanceMap {
        BalanceMap::from_entries(
            self.balances
                .into_iter()
                .map(|b| BalanceEntry::new(b.asset, b.free, b.locked)),
        )
    }
}

/// `POST /api/v3/userDataStream`
#[derive(Debug, Clone, Deserialize)]
pub struct ListenKeyResponse {
    #[serde(rename = "listenKey")]
    pub listen_key: String,
}

/// One element of `GET /api/v3/ticker/24hr`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24h {
    pub symbol: String,
    pub weighted_avg_price: Decimal,
    pub volume: Decimal,
    pub quote_volume: Decimal,
}

impl From<Ticker24h> for TickerStats {
    fn from(t: Ticker24h) -> Self {
        TickerStats {
            symbol: t.symbol,
            weighted_avg_price: t.weighted_avg_price,
            volume: t.volume,
            quote_volume: t.quote_volume,
        }
    }
}

/// `GET /api/v3/exchangeInfo` (symbols only).
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfoResponse {
    pub symbols: Vec<ExchangeSymbol>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeSymbol {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
}

impl From<ExchangeSymbol> for SymbolInfo {
    fn from(s: ExchangeSymbol) -> Self {
        SymbolInfo {
            symbol: s.symbol,
            base_asset: s.base_asset,
            quote_asset: s.quote_asset,
        }
    }
}

// ---------------------------------------------------------------------------
// User data stream
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct OutboundAccountPosition {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "B")]
    balances: Vec<PositionBalance>,
}

#[derive(Debug, Clone, Deserialize)]
struct PositionBalance {
    #[serde(rename = "a")]
    asset: String,
    #[serde(rename = "f")]
    free: Decimal,
    #[serde(rename = "l")]
    locked: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
struct BalanceUpdate {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "a")]
    asset: String,
    #[serde(rename = "d")]
    delta: Decimal,
}

/// Decode one user-data stream frame.
///
/// Frames with an unknown `e` are returned as [`AccountEvent::Unrecognized`];
/// only malformed JSON or a known event with a bad payload is an error.
pub fn decode_account_event(text: &str) -> Result<AccountEvent, GatewayError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| GatewayError::Decode(format!("invalid JSON frame: {}", e)))?;
    let event_type = value
        .get("e")
        .and_then(|v| v.as_str())
        .ok_or_else(|| GatewayError::Decode("frame has no event type".to_string()))?
        .to_string();

    match event_type.as_str() {
        "outboundAccountPosition" => {
            let event: OutboundAccountPosition = serde_json::from_value(value)
                .map_err(|e| GatewayError::Decode(format!("outboundAccountPosition: {}", e)))?;
            Ok(AccountEvent::Position {
                event_time: millis_to_datetime(event.event_time)?,
                balances: event
                    .balances
                    .into_iter()
                    .map(|b| BalanceEntry::new(b.asset, b.free, b.locked))
                    .collect(),
            })
        }
        "balanceUpdate" => {
            let event: BalanceUpdate = serde_json::from_value(value)
                .map_err(|e| GatewayError::Decode(format!("balanceUpdate: {}", e)))?;
            Ok(AccountEvent::BalanceDelta {
                event_time: millis_to_datetime(event.event_time)?,
                asset: event.asset,
                delta: event.delta,
            })
        }
        _ => Ok(AccountEvent::Unrecognized { event_type }),
    }
}

// ---------------------------------------------------------------------------
// Combined market stream
// ---------------------------------------------------------------------------

/// Envelope of every frame on a `/stream?streams=...` connection.
#[derive(Debug, Clone, Deserialize)]
struct CombinedFrame {
    stream: String,
    data: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
struct RawTrade {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    /// `t` on `@trade` payloads, `a` on `@aggTrade` payloads.
    #[serde(rename = "t", alias = "a")]
    trade_id: u64,
    #[serde(rename = "p")]
    price: Decimal,
    #[serde(rename = "q")]
    quantity: Decimal,
    #[serde(rename = "T")]
    trade_time: i64,
}

/// Decode one combined-stream frame. Returns `Ok(None)` for frames whose
/// stream name does not end with `channel_suffix`.
pub fn decode_trade_frame(
    text: &str,
    channel_suffix: &str,
) -> Result<Option<TradeEvent>, GatewayError> {
    let frame: CombinedFrame = serde_json::from_str(text)
        .map_err(|e| GatewayError::Decode(format!("invalid combined frame: {}", e)))?;
    if !frame.stream.ends_with(channel_suffix) {
        return Ok(None);
    }
    let trade: RawTrade = serde_json::from_value(frame.data)
        .map_err(|e| GatewayError::Decode(format!("trade payload: {}", e)))?;
    Ok(Some(TradeEvent {
        symbol: trade.symbol,
        trade_id: trade.trade_id,
        price: trade.price,
        quantity: trade.quantity,
        event_time: millis_to_datetime(trade.event_time)?,
        trade_time: millis_to_datetime(trade.trade_time)?,
    }))
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>, GatewayError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| GatewayError::Decode(format!("timestamp out of range: {}", ms)))
}
