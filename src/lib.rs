//! # Delta-Neutral Vault
//!
//! A leveraged position manager that keeps delta-neutral exposure to a volatile
//! reserve asset by supplying a stable collateral asset to a lending market and
//! borrowing the reserve asset against it. Position changes are funded with a
//! single flash loan and execute atomically.
//!
//! ## Architecture
//!
//! - `market`: collaborator traits (oracle, lending market, swaps, flash lender)
//!   and an in-memory simulated venue
//! - `vault`: share ledger, sizing engine, flash-loan executor and the
//!   transactional `PositionManager`
//! - `keeper`: interval-driven rebalance loop
//! - `persistence`: SQLite journal of events and position snapshots
//! - `simulation`: config-driven paper-run wiring
//! - `config`: configuration management and validation
//! - `utils`: decimal / fixed-point helpers

pub mod config;
pub mod keeper;
pub mod market;
pub mod persistence;
pub mod simulation;
pub mod utils;
pub mod vault;

pub use config::Config;
