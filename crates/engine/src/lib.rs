//! Account and market monitoring components.
//!
//! Each component runs as its own task under the [`Supervisor`], which owns
//! startup ordering and the shared shutdown signal.

pub mod balances;
pub mod latency;
pub mod market;
pub mod session;
pub mod supervisor;

#[cfg(test)]
mod testing;

pub use balances::{BalanceDeltaMode, BalanceTracker};
pub use latency::{LatencyConfig, LatencySampler};
pub use market::{resolve_top_pairs, MarketConfig, RankingMode};
pub use session::{SessionConfig, SessionError, SessionManager, SessionState};
pub use supervisor::{Supervisor, SupervisorConfig, SupervisorError};
