use serde::{Deserialize, Serialize};
use spotlink_brokers_binance::stream::run_stream;
use spotlink_brokers_binance::ExchangeConfig;
use spotlink_core::*;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, info_span, warn, Instrument};

use crate::balances::{log_balance_snapshots, BalanceDeltaMode, BalanceTracker};
use crate::latency::{LatencyConfig, LatencySampler};
use crate::market::{log_trades, resolve_top_pairs, stream_trades, MarketConfig};
use crate::session::{SessionConfig, SessionError, SessionManager};

/// Everything the supervisor needs besides the two gateways.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Endpoints for the account side (snapshot, session, user stream, probes).
    pub account: ExchangeConfig,
    /// Endpoints for the market side (ranking, trade streams).
    pub market: ExchangeConfig,
    pub session: SessionConfig,
    pub ranking: MarketConfig,
    pub latency: LatencyConfig,
    pub delta_mode: BalanceDeltaMode,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            account: ExchangeConfig::testnet(),
            market: ExchangeConfig::mainnet(),
            session: SessionConfig::default(),
            ranking: MarketConfig::default(),
            latency: LatencyConfig::default(),
            delta_mode: BalanceDeltaMode::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("startup failed: {0}")]
    Startup(GatewayError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("task {name} failed: {source}")]
    Task {
        name: &'static str,
        #[source]
        source: JoinError,
    },
}

/// Owns every component and coordinates their shutdown.
pub struct Supervisor {
    config: SupervisorConfig,
    account_gateway: Arc<dyn ExchangeGateway>,
    market_gateway: Arc<dyn ExchangeGateway>,
}

impl Supervisor {
    pub fn new(
        config: SupervisorConfig,
        account_gateway: Arc<dyn ExchangeGateway>,
        market_gateway: Arc<dyn ExchangeGateway>,
    ) -> Self {
        Self {
            config,
            account_gateway,
            market_gateway,
        }
    }

    /// Start all components and run until `stop` resolves or the session
    /// fails.
    ///
    /// Startup failures (snapshot, token issue, ranking) are returned before
    /// anything is spawned. A failed session is returned after every other
    /// task has been shut down.
    pub async fn run<F>(self, stop: F) -> Result<(), SupervisorError>
    where
        F: Future<Output = ()> + Send,
    {
        self.run_inner(stop).instrument(info_span!("supervisor")).await
    }

    async fn run_inner<F>(self, stop: F) -> Result<(), SupervisorError>
    where
        F: Future<Output = ()> + Send,
    {
        let Supervisor {
            config,
            account_gateway,
            market_gateway,
        } = self;

        let snapshot = account_gateway
            .fetch_account_snapshot()
            .instrument(info_span!("balances"))
            .await
            .map_err(SupervisorError::Startup)?;
        info!(
            assets = snapshot.len(),
            "Current non-zero spot account balances: {}", snapshot
        );

        let mut session = SessionManager::new(account_gateway.clone(), config.session.clone());
        let token = session
            .start()
            .instrument(info_span!("session"))
            .await
            .map_err(|e| match e {
                SessionError::Issue(e) => SupervisorError::Startup(e),
                other => SupervisorError::Session(other),
            })?;

        let pairs = resolve_top_pairs(market_gateway.as_ref(), &config.ranking)
            .instrument(info_span!("market"))
            .await
            .map_err(SupervisorError::Startup)?;

        let (trigger, signal) = shutdown_channel();
        let mut workers: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

        let mut session_task = tokio::spawn(session.run(signal.clone()).instrument(info_span!("session")));

        // Account stream and its snapshot logger.
        let (snapshot_tx, snapshot_rx) = mpsc::unbounded_channel();
        let mut tracker = BalanceTracker::new(snapshot, config.delta_mode, snapshot_tx);
        let url = config.account.user_stream_url(&token);
        let shutdown = signal.clone();
        workers.push((
            "balances",
            tokio::spawn(
                async move {
                    match run_stream(&url, &mut tracker, shutdown).await {
                        Ok(close) => info!(code = ?close.code, "Account stream finished"),
                        Err(e) => error!(error = %e, "Account stream failed"),
                    }
                }
                .instrument(info_span!("balances")),
            ),
        ));
        workers.push((
            "balance_log",
            tokio::spawn(log_balance_snapshots(snapshot_rx).instrument(info_span!("balances"))),
        ));

        // Trade stream and its consumer.
        let (trade_tx, trade_rx) = mpsc::channel(config.ranking.trade_buffer.max(1));
        let market = config.market.clone();
        let ranking = config.ranking.clone();
        let shutdown = signal.clone();
        workers.push((
            "market",
            tokio::spawn(
                async move {
                    match stream_trades(&market, &ranking, &pairs, trade_tx, shutdown).await {
                        Ok(close) => info!(code = ?close.code, "Trade stream finished"),
                        Err(e) => error!(error = %e, "Trade stream failed"),
                    }
                }
                .instrument(info_span!("market")),
            ),
        ));
        workers.push((
            "trade_log",
            tokio::spawn(log_trades(trade_rx).instrument(info_span!("market"))),
        ));

        let sampler = LatencySampler::new(account_gateway.clone(), &config.latency);
        let shutdown = signal.clone();
        workers.push((
            "latency",
            tokio::spawn(
                async move {
                    sampler.run(shutdown).await;
                }
                .instrument(info_span!("latency")),
            ),
        ));

        info!(tasks = workers.len() + 1, "All components running");

        tokio::pin!(stop);
        let finished = tokio::select! {
            joined = &mut session_task => Some(joined),
            _ = &mut stop => None,
        };
        let outcome = match finished {
            Some(joined) => session_outcome(joined),
            None => {
                info!("Shutdown requested");
                trigger.trigger();
                session_outcome(session_task.await)
            }
        };
        if let Err(e) = &outcome {
            error!(error = %e, "Fatal error, shutting down");
        }
        trigger.trigger();

        for (name, handle) in workers {
            if let Err(e) = handle.await {
                warn!(task = name, error = %e, "Task ended abnormally");
            }
        }
        info!("Shutdown complete");
        outcome
    }
}

fn session_outcome(
    joined: Result<Result<(), SessionError>, JoinError>,
) -> Result<(), SupervisorError> {
    match joined {
        Ok(result) => result.map_err(SupervisorError::Session),
        Err(source) => Err(SupervisorError::Task {
            name: "session",
            source,
        }),
    }
}
