//! PerpWatch Library
//!
//! RSI cross alerts on perpetual swaps with pinned multi-exchange failover

pub mod alerts;
pub mod config;
pub mod error;
pub mod indicators;
pub mod monitor;
pub mod oracle;
pub mod signals;
pub mod types;
