//! External collaborators of the vault.
//!
//! - `traits`: oracle, token ledger, lending market, swap executor, flash lender
//!   and host journal interfaces
//! - `types`: addresses, account health data and venue errors
//! - `mock`: an in-memory venue implementing every interface at once

pub mod mock;
mod traits;
mod types;

pub use mock::{SimulatedAsset, SimulatedMarket};
pub use traits::*;
pub use types::*;
