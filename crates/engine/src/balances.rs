use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spotlink_brokers_binance::protocol::decode_account_event;
use spotlink_core::*;
use std::fmt;
use std::str::FromStr;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// How a single-asset `balanceUpdate` delta is applied.
///
/// The following account-position event always carries the authoritative
/// balance, so ignoring deltas loses nothing but latency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceDeltaMode {
    #[default]
    Ignore,
    /// `free += delta` (delta is a signed change).
    Add,
    /// `free -= delta` (delta is an amount leaving the account).
    Subtract,
}

impl fmt::Display for BalanceDeltaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalanceDeltaMode::Ignore => write!(f, "ignore"),
            BalanceDeltaMode::Add => write!(f, "add"),
            BalanceDeltaMode::Subtract => write!(f, "subtract"),
        }
    }
}

impl FromStr for BalanceDeltaMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ignore" => Ok(BalanceDeltaMode::Ignore),
            "add" => Ok(BalanceDeltaMode::Add),
            "subtract" => Ok(BalanceDeltaMode::Subtract),
            other => Err(format!("unknown balance delta mode '{}'", other)),
        }
    }
}

/// Keeps the non-zero balance map current from account stream events.
///
/// The tracker is the only writer of its map. After every event that
/// changes (or re-reports) balances, one full snapshot goes out on the
/// snapshot channel.
pub struct BalanceTracker {
    balances: BalanceMap,
    delta_mode: BalanceDeltaMode,
    snapshots: mpsc::UnboundedSender<BalanceMap>,
    dropped_frames: u64,
}

impl BalanceTracker {
    pub fn new(
        initial: BalanceMap,
        delta_mode: BalanceDeltaMode,
        snapshots: mpsc::UnboundedSender<BalanceMap>,
    ) -> Self {
        Self {
            balances: initial,
            delta_mode,
            snapshots,
            dropped_frames: 0,
        }
    }

    pub fn balances(&self) -> &BalanceMap {
        &self.balances
    }

    /// Frames dropped because they could not be decoded.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    /// Apply one decoded event. Returns true if a snapshot was emitted.
    pub fn apply(&mut self, event: AccountEvent) -> bool {
        match event {
            AccountEvent::Position { balances, .. } => {
                for entry in balances {
                    self.balances.apply(entry);
                }
                self.emit();
                true
            }
            AccountEvent::BalanceDelta { asset, delta, .. } => self.apply_delta(asset, delta),
            AccountEvent::Unrecognized { event_type } => {
                debug!(event_type = %event_type, "Ignoring account event");
                false
            }
        }
    }

    fn apply_delta(&mut self, asset: String, delta: Decimal) -> bool {
        let signed = match self.delta_mode {
            BalanceDeltaMode::Ignore => {
                debug!(asset = %asset, delta = %delta, "Balance delta ignored");
                return false;
            }
            BalanceDeltaMode::Add => delta,
            BalanceDeltaMode::Subtract => -delta,
        };
        let (free, locked) = self
            .balances
            .get(&asset)
            .map(|e| (e.free, e.locked))
            .unwrap_or((Decimal::ZERO, Decimal::ZERO));

        let mut new_free = free + signed;
        if new_free < Decimal::ZERO {
            warn!(asset = %asset, free = %free, delta = %delta, "Balance delta drives free below zero, clamping");
            new_free = Decimal::ZERO;
        }
        self.balances.apply(BalanceEntry::new(asset, new_free, locked));
        self.emit();
        true
    }

    fn emit(&self) {
        if self.snapshots.send(self.balances.clone()).is_err() {
            debug!("Balance snapshot receiver dropped");
        }
    }
}

impl StreamHandler for BalanceTracker {
    fn on_open(&mut self) {
        info!(assets = self.balances.len(), "Account stream open");
    }

    fn on_text(&mut self, text: &str) {
        match decode_account_event(text) {
            Ok(event) => {
                self.apply(event);
            }
            Err(e) => {
                self.dropped_frames += 1;
                let snippet: String = text.chars().take(120).collect();
                error!(error = %e, frame = %snippet, "Dropping malformed account frame");
            }
        }
    }

    fn on_close(&mut self, close: &StreamClose) {
        info!(code = ?close.code, reason = %close.reason, "Account stream closed");
    }
}

/// Log every balance snapshot until the tracker goes away.
pub async fn log_balance_snapshots(mut snapshots: mpsc::UnboundedReceiver<BalanceMap>) {
    while let Some(balances) = snapshots.recv().await {
        info!(assets = balances.len(), "Current non-zero spot account balances: {}", balances);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn tracker(
        initial: BalanceMap,
        mode: BalanceDeltaMode,
    ) -> (BalanceTracker, mpsc::UnboundedReceiver<BalanceMap>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (BalanceTracker::new(initial, mode, tx), rx)
    }

    fn position(entries: Vec<BalanceEntry>) -> AccountEvent {
        AccountEvent::Position {
            event_time: Utc::now(),
            balances: entries,
        }
    }

    fn delta(asset: &str, amount: Decimal) -> AccountEvent {
        AccountEvent::BalanceDelta {
            event_time: Utc::now(),
            asset: asset.to_string(),
            delta: amount,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<BalanceMap>) -> Vec<BalanceMap> {
        let mut out = Vec::new();
        while let Ok(snapshot) = rx.try_recv() {
            out.push(snapshot);
        }
        out
    }

    #[test]
    fn test_position_upserts_and_removes() {
        let initial = BalanceMap::from_entries(vec![
            BalanceEntry::new("BTC", dec!(1), dec!(0)),
            BalanceEntry::new("ETH", dec!(2), dec!(0)),
        ]);
        let (mut tracker, mut rx) = tracker(initial, BalanceDeltaMode::Ignore);

        tracker.apply(position(vec![
            BalanceEntry::new("BTC", dec!(0.00000000), dec!(0.00000000)),
            BalanceEntry::new("ETH", dec!(1.5), dec!(0.5)),
            BalanceEntry::new("USDT", dec!(100), dec!(0)),
        ]));

        let balances = tracker.balances();
        assert!(!balances.contains("BTC"));
        assert_eq!(balances.get("ETH").unwrap().locked, dec!(0.5));
        assert_eq!(balances.get("USDT").unwrap().free, dec!(100));

        let snapshots = drain(&mut rx);
        assert_eq!(snapshots.len(), 1);
        assert_eq!(&snapshots[0], balances);
    }

    #[test]
    fn test_only_locked_balance_is_kept() {
        let (mut tracker, _rx) = tracker(BalanceMap::new(), BalanceDeltaMode::Ignore);
        tracker.apply(position(vec![BalanceEntry::new("BNB", dec!(0), dec!(3))]));
        assert!(tracker.balances().contains("BNB"));
    }

    #[test]
    fn test_empty_position_emits_one_unchanged_snapshot() {
        let initial = BalanceMap::from_entries(vec![BalanceEntry::new("BTC", dec!(1), dec!(0))]);
        let (mut tracker, mut rx) = tracker(initial.clone(), BalanceDeltaMode::Ignore);

        assert!(tracker.apply(position(vec![])));
        assert_eq!(tracker.balances(), &initial);
        assert_eq!(drain(&mut rx), vec![initial]);
    }

    #[test]
    fn test_removed_asset_stays_removed() {
        let (mut tracker, _rx) = tracker(BalanceMap::new(), BalanceDeltaMode::Ignore);
        tracker.apply(position(vec![BalanceEntry::new("DOGE", dec!(5), dec!(0))]));
        tracker.apply(position(vec![BalanceEntry::new("DOGE", dec!(0), dec!(0))]));
        tracker.apply(position(vec![BalanceEntry::new("BTC", dec!(1), dec!(0))]));
        tracker.apply(position(vec![]));
        assert!(!tracker.balances().contains("DOGE"));

        tracker.apply(position(vec![BalanceEntry::new("DOGE", dec!(7), dec!(0))]));
        assert_eq!(tracker.balances().get("DOGE").unwrap().free, dec!(7));
    }

    #[test]
    fn test_unrecognized_event_is_silent() {
        let (mut tracker, mut rx) = tracker(BalanceMap::new(), BalanceDeltaMode::Ignore);
        assert!(!tracker.apply(AccountEvent::Unrecognized {
            event_type: "executionReport".to_string()
        }));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_malformed_frame_is_dropped_and_stream_continues() {
        let (mut tracker, mut rx) = tracker(BalanceMap::new(), BalanceDeltaMode::Ignore);
        tracker.on_text("{\"e\":\"outboundAccountPosition\",");
        assert_eq!(tracker.dropped_frames(), 1);
        assert!(drain(&mut rx).is_empty());

        tracker.on_text(
            r#"{"e":"outboundAccountPosition","E":1564034571105,"u":1564034571073,
                "B":[{"a":"ETH","f":"10000.000000","l":"0.000000"}]}"#,
        );
        assert_eq!(tracker.balances().get("ETH").unwrap().free, dec!(10000));
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn test_delta_ignored_by_default() {
        let initial = BalanceMap::from_entries(vec![BalanceEntry::new("BTC", dec!(1), dec!(0))]);
        let (mut tracker, mut rx) = tracker(initial.clone(), BalanceDeltaMode::Ignore);
        assert!(!tracker.apply(delta("BTC", dec!(-0.4))));
        assert_eq!(tracker.balances(), &initial);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_delta_add_treats_delta_as_signed_change() {
        let initial = BalanceMap::from_entries(vec![BalanceEntry::new("BTC", dec!(1), dec!(0))]);
        let (mut tracker, mut rx) = tracker(initial, BalanceDeltaMode::Add);

        tracker.apply(delta("BTC", dec!(-0.4)));
        assert_eq!(tracker.balances().get("BTC").unwrap().free, dec!(0.6));
        tracker.apply(delta("BTC", dec!(0.4)));
        assert_eq!(tracker.balances().get("BTC").unwrap().free, dec!(1.0));
        tracker.apply(delta("BTC", dec!(-1)));
        assert!(!tracker.balances().contains("BTC"));
        assert_eq!(drain(&mut rx).len(), 3);
    }

    #[test]
    fn test_delta_subtract_treats_delta_as_outflow() {
        let initial = BalanceMap::from_entries(vec![BalanceEntry::new("BTC", dec!(1), dec!(0))]);
        let (mut tracker, _rx) = tracker(initial, BalanceDeltaMode::Subtract);

        tracker.apply(delta("BTC", dec!(0.25)));
        assert_eq!(tracker.balances().get("BTC").unwrap().free, dec!(0.75));
        tracker.apply(delta("BTC", dec!(-0.25)));
        assert_eq!(tracker.balances().get("BTC").unwrap().free, dec!(1.00));
    }

    #[test]
    fn test_delta_keeps_locked_and_clamps_free() {
        let initial = BalanceMap::from_entries(vec![BalanceEntry::new("ETH", dec!(1), dec!(2))]);
        let (mut tracker, _rx) = tracker(initial, BalanceDeltaMode::Add);
        tracker.apply(delta("ETH", dec!(-5)));
        let entry = tracker.balances().get("ETH").unwrap();
        assert_eq!(entry.free, Decimal::ZERO);
        assert_eq!(entry.locked, dec!(2));
    }

    #[test]
    fn test_delta_for_unknown_asset_starts_from_zero() {
        let (mut tracker, _rx) = tracker(BalanceMap::new(), BalanceDeltaMode::Add);
        tracker.apply(delta("SOL", dec!(3)));
        assert_eq!(tracker.balances().get("SOL").unwrap().free, dec!(3));
    }

    #[test]
    fn test_delta_mode_parse() {
        assert_eq!("Add".parse::<BalanceDeltaMode>().unwrap(), BalanceDeltaMode::Add);
        assert_eq!(
            "subtract".parse::<BalanceDeltaMode>().unwrap(),
            BalanceDeltaMode::Subtract
        );
        assert!("both".parse::<BalanceDeltaMode>().is_err());
    }

    fn amount() -> impl Strategy<Value = Decimal> {
        prop_oneof![Just(Decimal::ZERO), (1u32..1_000_000).prop_map(|n| Decimal::new(n as i64, 4))]
    }

    fn entry() -> impl Strategy<Value = BalanceEntry> {
        (prop::sample::select(vec!["BTC", "ETH", "BNB", "USDT"]), amount(), amount())
            .prop_map(|(asset, free, locked)| BalanceEntry::new(asset, free, locked))
    }

    proptest! {
        #[test]
        fn prop_map_matches_last_nonzero_report(
            events in prop::collection::vec(prop::collection::vec(entry(), 0..5), 0..20)
        ) {
            let (mut tracker, mut rx) = tracker(BalanceMap::new(), BalanceDeltaMode::Ignore);
            let mut last: HashMap<String, BalanceEntry> = HashMap::new();

            for entries in &events {
                for e in entries {
                    last.insert(e.asset.clone(), e.clone());
                }
                tracker.apply(position(entries.clone()));
            }

            let expected: Vec<&BalanceEntry> = {
                let mut v: Vec<&BalanceEntry> = last.values().filter(|e| !e.is_empty()).collect();
                v.sort_by(|a, b| a.asset.cmp(&b.asset));
                v
            };
            let actual: Vec<&BalanceEntry> = tracker.balances().iter().collect();
            prop_assert_eq!(actual, expected);
            prop_assert_eq!(drain(&mut rx).len(), events.len());
        }

        #[test]
        fn prop_replaying_an_event_is_idempotent(
            seed in prop::collection::vec(entry(), 0..6),
            replay in prop::collection::vec(entry(), 0..6),
        ) {
            let (mut tracker, _rx) = tracker(BalanceMap::new(), BalanceDeltaMode::Ignore);
            tracker.apply(position(seed));
            tracker.apply(position(replay.clone()));
            let once = tracker.balances().clone();
            tracker.apply(position(replay));
            prop_assert_eq!(tracker.balances(), &once);
        }
    }
}
