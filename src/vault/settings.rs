//! Owner-controlled vault settings.

use super::error::{VaultError, VaultResult};
use super::math::PERCENTAGE_FACTOR;
use crate::market::{Address, SwapRouter};
use serde::{Deserialize, Serialize};

/// Deposits are rejected while set.
pub const DEPOSIT_PAUSED: u32 = 1 << 1;
/// Withdrawals are rejected while set.
pub const WITHDRAW_PAUSED: u32 = 1 << 2;

const KNOWN_FLAGS: u32 = DEPOSIT_PAUSED | WITHDRAW_PAUSED;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Address of the swap executor, resolved through the venue's router.
    pub swap_executor: Address,
    /// Smallest accepted single deposit, in reserve units.
    pub min_deposit_amount: u128,
    /// Cap on cumulative net deposits, in reserve units.
    pub max_deposit_amount: u128,
    /// Safety margin subtracted from the market max LTV, in bps.
    pub additional_ltv_distance_bps: u32,
    pub flags: u32,
    /// Relative debt drift below which the position is left alone, in bps.
    pub min_rebalance_bps: u32,
}

impl Settings {
    pub fn is_deposit_paused(&self) -> bool {
        self.flags & DEPOSIT_PAUSED != 0
    }

    pub fn is_withdraw_paused(&self) -> bool {
        self.flags & WITHDRAW_PAUSED != 0
    }

    /// Check the settings against the venues they will be used with.
    pub fn validate(&self, swaps: &SwapRouter) -> VaultResult<()> {
        if self.flags & !KNOWN_FLAGS != 0 {
            return Err(VaultError::InvalidSettings(format!(
                "unknown flag bits {:#x}",
                self.flags & !KNOWN_FLAGS
            )));
        }
        if self.min_deposit_amount > self.max_deposit_amount {
            return Err(VaultError::InvalidSettings(
                "min_deposit_amount exceeds max_deposit_amount".to_string(),
            ));
        }
        if self.additional_ltv_distance_bps > PERCENTAGE_FACTOR {
            return Err(VaultError::InvalidSettings(
                "additional_ltv_distance_bps above 10000".to_string(),
            ));
        }
        if self.min_rebalance_bps > PERCENTAGE_FACTOR {
            return Err(VaultError::InvalidSettings(
                "min_rebalance_bps above 10000".to_string(),
            ));
        }
        if !swaps.contains(self.swap_executor) {
            return Err(VaultError::InvalidSettings(format!(
                "swap executor {} is not registered",
                self.swap_executor
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{MarketResult, SwapExecutor};
    use std::sync::Arc;

    struct NoopSwap;

    impl SwapExecutor for NoopSwap {
        fn swap(&self, _: Address, _: Address, _: Address, amount_in: u128) -> MarketResult<u128> {
            Ok(amount_in)
        }
    }

    const SWAP: Address = Address::repeat_byte(0x55);

    fn create_test_settings() -> Settings {
        Settings {
            swap_executor: SWAP,
            min_deposit_amount: 10,
            max_deposit_amount: 1_000,
            additional_ltv_distance_bps: 1_000,
            flags: 0,
            min_rebalance_bps: 100,
        }
    }

    fn router() -> SwapRouter {
        SwapRouter::new().with_executor(SWAP, Arc::new(NoopSwap))
    }

    #[test]
    fn test_valid_settings() {
        assert!(create_test_settings().validate(&router()).is_ok());
    }

    #[test]
    fn test_flags() {
        let mut settings = create_test_settings();
        settings.flags = DEPOSIT_PAUSED;
        assert!(settings.is_deposit_paused());
        assert!(!settings.is_withdraw_paused());

        settings.flags = DEPOSIT_PAUSED | WITHDRAW_PAUSED;
        assert!(settings.validate(&router()).is_ok());

        settings.flags = 1;
        assert!(matches!(
            settings.validate(&router()),
            Err(VaultError::InvalidSettings(_))
        ));
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        let mut settings = create_test_settings();
        settings.min_deposit_amount = 2_000;
        assert!(settings.validate(&router()).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_bps() {
        let mut settings = create_test_settings();
        settings.min_rebalance_bps = 10_001;
        assert!(settings.validate(&router()).is_err());

        let mut settings = create_test_settings();
        settings.additional_ltv_distance_bps = 10_001;
        assert!(settings.validate(&router()).is_err());
    }

    #[test]
    fn test_rejects_unregistered_swap_executor() {
        let mut settings = create_test_settings();
        settings.swap_executor = Address::repeat_byte(0x66);
        assert!(settings.validate(&router()).is_err());
    }
}
