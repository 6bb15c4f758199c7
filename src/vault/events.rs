//! Events emitted by committed vault transactions.

use super::settings::Settings;
use crate::market::Address;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VaultEvent {
    PositionDeposit {
        reserve_amount: u128,
        /// Net base value the deposit added to the position.
        base_value: u128,
        recipient: Address,
        shares_minted: u128,
    },
    PositionWithdraw {
        shares_burned: u128,
        base_value: u128,
        reserve_amount: u128,
        recipient: Address,
    },
    PositionClose {
        reserve_amount: u128,
    },
    PositionRebalance {
        debt_change_base: i128,
        collateral_change_base: i128,
        used_flash_loan: bool,
    },
    SettingsUpdated {
        settings: Settings,
    },
}

impl VaultEvent {
    pub fn name(&self) -> &'static str {
        match self {
            VaultEvent::PositionDeposit { .. } => "PositionDeposit",
            VaultEvent::PositionWithdraw { .. } => "PositionWithdraw",
            VaultEvent::PositionClose { .. } => "PositionClose",
            VaultEvent::PositionRebalance { .. } => "PositionRebalance",
            VaultEvent::SettingsUpdated { .. } => "SettingsUpdated",
        }
    }
}
