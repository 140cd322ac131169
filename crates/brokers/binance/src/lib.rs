//! Binance spot adapter.
//!
//! Signed and public REST calls plus the user-data and combined trade
//! WebSocket streams.

pub mod client;
pub mod config;
pub mod protocol;
pub mod signer;
pub mod stream;

pub use client::BinanceClient;
pub use config::{Credentials, ExchangeConfig, Network};
pub use signer::Signer;
