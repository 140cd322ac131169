//! In-memory gateway for component tests.

use async_trait::async_trait;
use spotlink_core::*;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct Script {
    issue_error: Option<GatewayError>,
    issued: u32,
    renewals: VecDeque<Result<(), GatewayError>>,
    renewed: Vec<SessionToken>,
    snapshot: Option<Result<BalanceMap, GatewayError>>,
    market_error: Option<GatewayError>,
    stats: Vec<TickerStats>,
    symbols: Vec<SymbolInfo>,
    probes: VecDeque<Result<Duration, GatewayError>>,
    probe_calls: u32,
}

/// Gateway whose answers are scripted up front. Unscripted calls succeed.
#[derive(Default)]
pub struct ScriptedGateway {
    script: Mutex<Script>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_issue(&self, error: GatewayError) {
        self.script.lock().unwrap().issue_error = Some(error);
    }

    pub fn script_renewals(&self, results: Vec<Result<(), GatewayError>>) {
        self.script.lock().unwrap().renewals.extend(results);
    }

    pub fn set_snapshot(&self, snapshot: Result<BalanceMap, GatewayError>) {
        self.script.lock().unwrap().snapshot = Some(snapshot);
    }

    pub fn set_market(&self, stats: Vec<TickerStats>, symbols: Vec<SymbolInfo>) {
        let mut script = self.script.lock().unwrap();
        script.stats = stats;
        script.symbols = symbols;
    }

    pub fn fail_market(&self, error: GatewayError) {
        self.script.lock().unwrap().market_error = Some(error);
    }

    pub fn script_probes(&self, results: Vec<Result<Duration, GatewayError>>) {
        self.script.lock().unwrap().probes.extend(results);
    }

    pub fn renew_calls(&self) -> usize {
        self.script.lock().unwrap().renewed.len()
    }

    pub fn renewed_tokens(&self) -> Vec<SessionToken> {
        self.script.lock().unwrap().renewed.clone()
    }

    pub fn probe_calls(&self) -> u32 {
        self.script.lock().unwrap().probe_calls
    }
}

#[async_trait]
impl ExchangeGateway for ScriptedGateway {
    async fn fetch_account_snapshot(&self) -> Result<BalanceMap, GatewayError> {
        self.script
            .lock()
            .unwrap()
            .snapshot
            .clone()
            .unwrap_or_else(|| Ok(BalanceMap::new()))
    }

    async fn issue_session_token(&self) -> Result<SessionToken, GatewayError> {
        let mut script = self.script.lock().unwrap();
        if let Some(error) = script.issue_error.clone() {
            return Err(error);
        }
        script.issued += 1;
        Ok(SessionToken::new(format!("listen-key-{}", script.issued)))
    }

    async fn renew_session_token(&self, token: &SessionToken) -> Result<(), GatewayError> {
        let mut script = self.script.lock().unwrap();
        script.renewed.push(token.clone());
        script.renewals.pop_front().unwrap_or(Ok(()))
    }

    async fn fetch_24h_stats(&self) -> Result<Vec<TickerStats>, GatewayError> {
        let script = self.script.lock().unwrap();
        match &script.market_error {
            Some(error) => Err(error.clone()),
            None => Ok(script.stats.clone()),
        }
    }

    async fn fetch_symbol_metadata(&self) -> Result<Vec<SymbolInfo>, GatewayError> {
        Ok(self.script.lock().unwrap().symbols.clone())
    }

    async fn probe(&self) -> Result<Duration, GatewayError> {
        let mut script = self.script.lock().unwrap();
        script.probe_calls += 1;
        script
            .probes
            .pop_front()
            .unwrap_or(Ok(Duration::from_millis(1)))
    }
}
