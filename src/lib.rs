//! Energy Market Library
//!
//! Peer-to-peer energy market contract: sensor telemetry, validated
//! generation, bids and the double auction that clears them.
//! Exposes the contract and its building blocks for the binary and tests.

pub mod auction;
pub mod bids;
pub mod codec;
pub mod config;
pub mod contract;
pub mod error;
pub mod generation;
pub mod identity;
pub mod ledger;
pub mod records;
pub mod sensors;
pub mod settlement;
pub mod stats;
pub mod telemetry;
pub mod units;

#[cfg(test)]
mod auction_tests;

pub use config::MarketConfig;
pub use contract::{EnergyContract, Invocation, Operation, Response};
pub use error::{ChaincodeError, Result};
pub use ledger::{Ledger, MemoryLedger, SqliteLedger};
