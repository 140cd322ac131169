use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spotlink_brokers_binance::protocol::decode_trade_frame;
use spotlink_brokers_binance::stream::run_stream;
use spotlink_brokers_binance::ExchangeConfig;
use spotlink_core::*;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingMode {
    /// Volume converted into the reference currency.
    #[default]
    QuoteVolume,
    /// Raw base-asset volume, not comparable across pairs.
    Relative,
}

impl fmt::Display for RankingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RankingMode::QuoteVolume => write!(f, "quote_volume"),
            RankingMode::Relative => write!(f, "relative"),
        }
    }
}

impl FromStr for RankingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "quote_volume" | "quote" => Ok(RankingMode::QuoteVolume),
            "relative" => Ok(RankingMode::Relative),
            other => Err(format!("unknown ranking mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub reference_currency: String,
    pub top_n: usize,
    /// Appended to each lower-cased symbol to form a stream name.
    pub channel_suffix: String,
    pub ranking: RankingMode,
    /// Capacity of the trade channel; trades beyond it are dropped.
    pub trade_buffer: usize,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            reference_currency: "USDT".to_string(),
            top_n: 10,
            channel_suffix: "@trade".to_string(),
            ranking: RankingMode::QuoteVolume,
            trade_buffer: 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

/// Rank pairs by 24h volume expressed in `reference`.
///
/// Pairs quoted in `reference` use their own quote volume and also price
/// their base asset. Every other pair is converted through its base asset's
/// reference price and dropped when there is none. Ties keep input order:
/// reference-quoted pairs in stats order first, then the rest in metadata
/// order.
pub fn rank_by_quote_volume(
    stats: &[TickerStats],
    symbols: &[SymbolInfo],
    reference: &str,
    top_n: usize,
) -> Vec<PairStat> {
    let mut ranked = Vec::new();
    let mut prices: HashMap<&str, Decimal> = HashMap::new();
    let mut quoted: HashSet<&str> = HashSet::new();

    for s in stats {
        let Some(base) = s
            .symbol
            .strip_suffix(reference)
            .filter(|base| !base.is_empty())
        else {
            continue;
        };
        prices.insert(base, s.weighted_avg_price);
        quoted.insert(s.symbol.as_str());
        ranked.push(PairStat {
            symbol: s.symbol.clone(),
            weighted_avg_price: s.weighted_avg_price,
            volume: s.volume,
            quote_volume_in_reference: s.quote_volume,
        });
    }

    let by_symbol: HashMap<&str, &TickerStats> =
        stats.iter().map(|s| (s.symbol.as_str(), s)).collect();

    for info in symbols {
        if quoted.contains(info.symbol.as_str()) {
            continue;
        }
        let Some(s) = by_symbol.get(info.symbol.as_str()) else {
            continue;
        };
        let Some(price) = prices
            .get(info.base_asset.as_str())
            .filter(|p| !p.is_zero())
        else {
            continue;
        };
        match price.checked_mul(s.volume) {
            Some(converted) => ranked.push(PairStat {
                symbol: s.symbol.clone(),
                weighted_avg_price: s.weighted_avg_price,
                volume: s.volume,
                quote_volume_in_reference: converted,
            }),
            None => warn!(symbol = %s.symbol, "Volume conversion overflowed, pair skipped"),
        }
    }

    // sort_by is stable
    ranked.sort_by(|a, b| b.quote_volume_in_reference.cmp(&a.quote_volume_in_reference));
    ranked.truncate(top_n);
    ranked
}

/// Rank pairs by raw base-asset volume.
pub fn rank_by_relative_volume(stats: &[TickerStats], top_n: usize) -> Vec<PairStat> {
    let mut ranked: Vec<PairStat> = stats
        .iter()
        .map(|s| PairStat {
            symbol: s.symbol.clone(),
            weighted_avg_price: s.weighted_avg_price,
            volume: s.volume,
            // Not converted: the pair's own quote volume.
            quote_volume_in_reference: s.quote_volume,
        })
        .collect();
    ranked.sort_by(|a, b| b.volume.cmp(&a.volume));
    ranked.truncate(top_n);
    ranked
}

/// Fetch statistics (and metadata when needed) and rank them.
pub async fn resolve_top_pairs(
    gateway: &dyn ExchangeGateway,
    config: &MarketConfig,
) -> Result<Vec<PairStat>, GatewayError> {
    let stats = gateway.fetch_24h_stats().await?;
    let pairs = match config.ranking {
        RankingMode::QuoteVolume => {
            let symbols = gateway.fetch_symbol_metadata().await?;
            rank_by_quote_volume(&stats, &symbols, &config.reference_currency, config.top_n)
        }
        RankingMode::Relative => rank_by_relative_volume(&stats, config.top_n),
    };
    info!(
        ranking = %config.ranking,
        candidates = stats.len(),
        selected = pairs.len(),
        "Ranked pairs by 24h volume"
    );
    Ok(pairs)
}

// ---------------------------------------------------------------------------
// Trade stream
// ---------------------------------------------------------------------------

/// Decodes combined-stream frames into trades for a bounded channel.
///
/// A full channel drops the trade; delivery is best effort. Frames from
/// streams other than `channel_suffix` are counted as skipped.
pub struct TradeStreamHandler {
    trades: mpsc::Sender<TradeEvent>,
    channel_suffix: String,
    forwarded: u64,
    dropped: u64,
    skipped: u64,
}

impl TradeStreamHandler {
    pub fn new(trades: mpsc::Sender<TradeEvent>, channel_suffix: impl Into<String>) -> Self {
        Self {
            trades,
            channel_suffix: channel_suffix.into(),
            forwarded: 0,
            dropped: 0,
            skipped: 0,
        }
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl StreamHandler for TradeStreamHandler {
    fn on_open(&mut self) {
        info!("Trade stream open");
    }

    fn on_text(&mut self, text: &str) {
        let trade = match decode_trade_frame(text, &self.channel_suffix) {
            Ok(Some(trade)) => trade,
            Ok(None) => {
                self.skipped += 1;
                if self.skipped % 1000 == 1 {
                    let snippet: String = text.chars().take(120).collect();
                    warn!(
                        expected = %self.channel_suffix,
                        skipped = self.skipped,
                        frame = %snippet,
                        "Skipping frame from unexpected stream"
                    );
                }
                return;
            }
            Err(e) => {
                let snippet: String = text.chars().take(120).collect();
                error!(error = %e, frame = %snippet, "Dropping malformed trade frame");
                return;
            }
        };
        match self.trades.try_send(trade) {
            Ok(()) => self.forwarded += 1,
            Err(TrySendError::Full(trade)) => {
                self.dropped += 1;
                // Log the first drop and then every thousandth.
                if self.dropped % 1000 == 1 {
                    warn!(symbol = %trade.symbol, dropped = self.dropped, "Trade channel full, dropping trades");
                }
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped += 1;
                debug!("Trade consumer gone");
            }
        }
    }

    fn on_close(&mut self, close: &StreamClose) {
        info!(
            code = ?close.code,
            reason = %close.reason,
            forwarded = self.forwarded,
            dropped = self.dropped,
            skipped = self.skipped,
            "Trade stream closed"
        );
    }
}

/// Open one combined trade stream for `pairs` and run it to completion.
pub async fn stream_trades(
    exchange: &ExchangeConfig,
    market: &MarketConfig,
    pairs: &[PairStat],
    trades: mpsc::Sender<TradeEvent>,
    shutdown: ShutdownSignal,
) -> Result<StreamClose, GatewayError> {
    if pairs.is_empty() {
        return Err(GatewayError::Configuration(
            "no pairs to subscribe to".to_string(),
        ));
    }
    let symbols: Vec<&str> = pairs.iter().map(|p| p.symbol.as_str()).collect();
    let url = exchange.combined_stream_url(&symbols, &market.channel_suffix);
    info!(streams = %symbols.join(", ").to_lowercase(), "Opening trade streams");

    let mut handler = TradeStreamHandler::new(trades, market.channel_suffix.as_str());
    run_stream(&url, &mut handler, shutdown).await
}

/// Default trade consumer: log each trade with its delivery lag.
pub async fn log_trades(mut trades: mpsc::Receiver<TradeEvent>) {
    while let Some(trade) = trades.recv().await {
        let lag_ms = (Utc::now() - trade.event_time).num_milliseconds();
        debug!(
            symbol = %trade.symbol,
            trade_id = trade.trade_id,
            price = %trade.price,
            quantity = %trade.quantity,
            lag_ms,
            "Trade"
        );
    }
}
