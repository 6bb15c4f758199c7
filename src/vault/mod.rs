//! Delta-neutral vault core.
//!
//! - `ledger`: share accounting
//! - `sizing`: target-LTV drift computation
//! - `executor`: flash-loan state machine and legs
//! - `manager`: transactional entry points, owner and inspection surface

mod error;
mod events;
pub mod executor;
mod ledger;
mod manager;
pub mod math;
mod settings;
mod sizing;


pub use error::{VaultError, VaultResult};
pub use events::VaultEvent;
pub use executor::{FlashLeg, PositionAction, SWAP_SLIPPAGE_BUFFER_BPS};
pub use ledger::ShareLedger;
pub use manager::{ManagerParams, PositionManager};
pub use settings::{Settings, DEPOSIT_PAUSED, WITHDRAW_PAUSED};
pub use sizing::{
    flash_repay_base, required_change, target_ltv_bps, PositionChange, PositionSnapshot,
};
