use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Opaque exchange-issued token authorizing the private account stream.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken({})", self)
    }
}

/// Only the first few characters are shown; the full token grants stream access.
impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(8).collect();
        write!(f, "{}…", prefix)
    }
}

// ---------------------------------------------------------------------------
// Balances
// ---------------------------------------------------------------------------

/// Free and locked quantity of a single asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceEntry {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

impl BalanceEntry {
    pub fn new(asset: impl Into<String>, free: Decimal, locked: Decimal) -> Self {
        Self {
            asset: asset.into(),
            free,
            locked,
        }
    }

    /// True when neither free nor locked holds a positive quantity.
    pub fn is_empty(&self) -> bool {
        self.free <= Decimal::ZERO && self.locked <= Decimal::ZERO
    }
}

/// Asset symbol -> balance, holding only non-empty entries.
///
/// Every mutation goes through [`BalanceMap::apply`], which removes an asset
/// instead of storing a zero/zero entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BalanceMap {
    entries: BTreeMap<String, BalanceEntry>,
}

impl BalanceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map from a full account listing, dropping empty balances.
    pub fn from_entries(entries: impl IntoIterator<Item = BalanceEntry>) -> Self {
        let mut map = Self::new();
        for entry in entries {
            map.apply(entry);
        }
        map
    }

    /// Upsert a non-empty entry or remove the asset when the entry is empty.
    pub fn apply(&mut self, entry: BalanceEntry) {
        if entry.is_empty() {
            self.entries.remove(&entry.asset);
        } else {
            self.entries.insert(entry.asset.clone(), entry);
        }
    }

    pub fn get(&self, asset: &str) -> Option<&BalanceEntry> {
        self.entries.get(asset)
    }

    pub fn contains(&self, asset: &str) -> bool {
        self.entries.contains_key(asset)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BalanceEntry> {
        self.entries.values()
    }

    pub fn assets(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl fmt::Display for BalanceMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, entry) in self.entries.values().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(
                f,
                "{}: free={} locked={}",
                entry.asset, entry.free, entry.locked
            )?;
        }
        write!(f, "}}")
    }
}

// ---------------------------------------------------------------------------
// Market statistics
// ---------------------------------------------------------------------------

/// Rolling 24h statistics for one trading pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerStats {
    pub symbol: String,
    pub weighted_avg_price: Decimal,
    /// Traded volume in the base asset.
    pub volume: Decimal,
    /// Traded volume in the quote asset.
    pub quote_volume: Decimal,
}

/// Exchange metadata for one trading pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
}

/// A pair with its volume expressed in the ranking reference currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairStat {
    pub symbol: String,
    pub weighted_avg_price: Decimal,
    pub volume: Decimal,
    pub quote_volume_in_reference: Decimal,
}

// ---------------------------------------------------------------------------
// Latency
// ---------------------------------------------------------------------------

/// Running time-to-first-byte statistics in nanoseconds.
///
/// The mean is always derived from `sum / count` (integer division).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub count: u64,
    pub sum_ns: u128,
    pub min_ns: Option<u128>,
    pub max_ns: Option<u128>,
}

impl LatencyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, sample: Duration) {
        self.record_nanos(sample.as_nanos());
    }

    pub fn record_nanos(&mut self, sample_ns: u128) {
        self.count += 1;
        self.sum_ns += sample_ns;
        self.min_ns = Some(self.min_ns.map_or(sample_ns, |min| min.min(sample_ns)));
        self.max_ns = Some(self.max_ns.map_or(sample_ns, |max| max.max(sample_ns)));
    }

    pub fn mean_ns(&self) -> Option<u128> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum_ns / u128::from(self.count))
        }
    }
}
