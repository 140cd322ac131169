use serde::{Deserialize, Serialize};
use spotlink_core::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

/// Lifecycle of the stream session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Active,
    Renewing,
    Failed,
}

/// Renewal cadence and retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Time between renewals. The exchange expires tokens after 60 minutes.
    pub renew_interval_secs: u64,
    /// Consecutive failed renewals that end the session.
    pub max_consecutive_failures: u32,
    /// Delay before the first retry; doubles per further failure. Zero
    /// retries immediately.
    pub retry_backoff_ms: u64,
    /// Upper bound for the retry delay.
    pub max_retry_backoff_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            renew_interval_secs: 30 * 60,
            max_consecutive_failures: 3,
            retry_backoff_ms: 0,
            max_retry_backoff_ms: 30_000,
        }
    }
}

impl SessionConfig {
    pub fn renew_interval(&self) -> Duration {
        Duration::from_secs(self.renew_interval_secs.max(1))
    }

    /// Delay before retry number `failures` (1-based).
    pub fn retry_delay(&self, failures: u32) -> Duration {
        if self.retry_backoff_ms == 0 || failures == 0 {
            return Duration::ZERO;
        }
        let factor = 1u64 << (failures - 1).min(20);
        let delay = self.retry_backoff_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_retry_backoff_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session token could not be issued: {0}")]
    Issue(GatewayError),
    #[error("session token renewal failed {attempts} consecutive times, last error: {last_error}")]
    RenewalExhausted { attempts: u32, last_error: GatewayError },
    #[error("session token renewal failed permanently: {0}")]
    RenewalRejected(GatewayError),
    #[error("session is {actual:?}, expected {expected:?}")]
    InvalidState {
        actual: SessionState,
        expected: SessionState,
    },
}

/// Owns the session token and keeps it alive.
///
/// The current token is published on a watch channel; it stays published
/// through renewals and is only withdrawn when the session fails. Renewals
/// are driven by `&mut self`, so at most one is ever in flight.
pub struct SessionManager {
    gateway: Arc<dyn ExchangeGateway>,
    config: SessionConfig,
    state: SessionState,
    consecutive_failures: u32,
    token_tx: watch::Sender<Option<SessionToken>>,
}

impl SessionManager {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, config: SessionConfig) -> Self {
        let (token_tx, _) = watch::channel(None);
        Self {
            gateway,
            config,
            state: SessionState::Uninitialized,
            consecutive_failures: 0,
            token_tx,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn token(&self) -> Option<SessionToken> {
        self.token_tx.borrow().clone()
    }

    /// Read-only view of the current token for stream consumers.
    pub fn subscribe(&self) -> watch::Receiver<Option<SessionToken>> {
        self.token_tx.subscribe()
    }

    /// Issue the first token (`Uninitialized -> Active`).
    pub async fn start(&mut self) -> Result<SessionToken, SessionError> {
        self.expect_state(SessionState::Uninitialized)?;
        let token = self
            .gateway
            .issue_session_token()
            .await
            .map_err(SessionError::Issue)?;
        self.token_tx.send_replace(Some(token.clone()));
        self.state = SessionState::Active;
        info!(token = %token, "Session token issued");
        Ok(token)
    }

    /// Run one renewal cycle, retrying transient failures up to the
    /// configured limit.
    ///
    /// Returns `RenewalExhausted` once, when the limit is reached, or
    /// `RenewalRejected` on the first non-transient failure; either way the
    /// manager is then `Failed` and the token is withdrawn.
    pub async fn renew(&mut self) -> Result<(), SessionError> {
        self.expect_state(SessionState::Active)?;
        let token = match self.token() {
            Some(token) => token,
            None => {
                return Err(SessionError::InvalidState {
                    actual: SessionState::Uninitialized,
                    expected: SessionState::Active,
                })
            }
        };

        self.state = SessionState::Renewing;
        loop {
            match self.gateway.renew_session_token(&token).await {
                Ok(()) => {
                    if self.consecutive_failures > 0 {
                        info!(
                            after_failures = self.consecutive_failures,
                            "Session token renewed after retry"
                        );
                    } else {
                        info!(token = %token, "Session token renewed");
                    }
                    self.consecutive_failures = 0;
                    self.state = SessionState::Active;
                    return Ok(());
                }
                Err(e) if !e.is_transient() => {
                    self.consecutive_failures += 1;
                    error!(
                        attempt = self.consecutive_failures,
                        error = %e,
                        "Session token renewal failed with a non-retryable error"
                    );
                    self.fail();
                    return Err(SessionError::RenewalRejected(e));
                }
                Err(e) => {
                    self.consecutive_failures += 1;
                    if self.consecutive_failures >= self.config.max_consecutive_failures {
                        error!(
                            attempts = self.consecutive_failures,
                            error = %e,
                            "Session token renewal exhausted"
                        );
                        self.fail();
                        return Err(SessionError::RenewalExhausted {
                            attempts: self.consecutive_failures,
                            last_error: e,
                        });
                    }

                    let delay = self.config.retry_delay(self.consecutive_failures);
                    warn!(
                        attempt = self.consecutive_failures,
                        max = self.config.max_consecutive_failures,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Session token renewal failed, retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    /// Renew on a fixed cadence until shutdown or exhaustion.
    pub async fn run(mut self, mut shutdown: ShutdownSignal) -> Result<(), SessionError> {
        let period = self.config.renew_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = period.as_secs(), "Session renewal scheduled");

        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    info!("Session renewal stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    // Shutdown also cuts short a renewal stuck in retry backoff.
                    tokio::select! {
                        _ = shutdown.wait() => {
                            info!(state = ?self.state, "Session renewal interrupted by shutdown");
                            return Ok(());
                        }
                        result = self.renew() => result?,
                    }
                }
            }
        }
    }

    fn fail(&mut self) {
        self.state = SessionState::Failed;
        self.token_tx.send_replace(None);
    }

    fn expect_state(&self, expected: SessionState) -> Result<(), SessionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                actual: self.state,
                expected,
            })
        }
    }
}
