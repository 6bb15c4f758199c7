//! Flash-loan state machine and the legs executed inside the callback.
//!
//! An entry point that needs liquidity stages a [`FlashContext`], asks the
//! lender for the reserve asset, and the lender calls back into
//! [`FlashLoanReceiver::receive_flash_loan`]. The callback consumes the context,
//! checks that the loan is the one that was requested and runs the matching
//! [`FlashLeg`]. The lender then pulls back amount plus fee.

use super::error::{OrOverflow, VaultError, VaultResult};
use super::manager::PositionManager;
use super::math::{percent_mul, PERCENTAGE_FACTOR};
use crate::market::{Address, FlashLoanReceiver};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Extra collateral withdrawn when swapping to cover a flash loan, in bps.
pub const SWAP_SLIPPAGE_BUFFER_BPS: u32 = 100;

/// Action tag carried in the flash loan `user_data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PositionAction {
    Deposit = 1,
    Withdraw = 2,
    RebalanceIncreaseDebt = 3,
    RebalanceDecreaseDebt = 4,
    Close = 5,
}

impl PositionAction {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Deposit),
            2 => Some(Self::Withdraw),
            3 => Some(Self::RebalanceIncreaseDebt),
            4 => Some(Self::RebalanceDecreaseDebt),
            5 => Some(Self::Close),
            _ => None,
        }
    }

    pub fn encode(self) -> Vec<u8> {
        vec![self.tag()]
    }

    /// Decode a single-byte payload.
    pub fn decode(user_data: &[u8]) -> Option<Self> {
        match user_data {
            [tag] => Self::from_tag(*tag),
            _ => None,
        }
    }
}

/// Work to do once the flash-borrowed reserve has arrived.
///
/// Debt increases never need flash liquidity, so there is no leg for
/// [`PositionAction::RebalanceIncreaseDebt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashLeg {
    /// Swap `swap_amount` reserve into collateral, supply it and borrow the loan back.
    Deposit { swap_amount: u128 },
    /// Repay a proportional slice of debt and convert the matching collateral.
    Withdraw {
        repay: u128,
        withdraw_collateral: u128,
        idle_collateral: u128,
    },
    /// Repay `repay` and free enough collateral to cover what idle reserve cannot.
    RebalanceDecreaseDebt { repay: u128 },
    /// Repay everything and convert all collateral back to reserve.
    Close,
}

impl FlashLeg {
    pub fn action(&self) -> PositionAction {
        match self {
            FlashLeg::Deposit { .. } => PositionAction::Deposit,
            FlashLeg::Withdraw { .. } => PositionAction::Withdraw,
            FlashLeg::RebalanceDecreaseDebt { .. } => PositionAction::RebalanceDecreaseDebt,
            FlashLeg::Close => PositionAction::Close,
        }
    }
}

/// Pending flash loan, alive between the request and the callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashContext {
    pub leg: FlashLeg,
    pub asset: Address,
    pub amount: u128,
}

impl PositionManager {
    /// Borrow `amount` reserve for the duration of `leg`.
    pub(super) fn flash(&self, leg: FlashLeg, amount: u128) -> VaultResult<()> {
        let action = leg.action();
        let reserve = self.reserve_asset;
        self.with_scope(|scope| {
            scope.flash = Some(FlashContext {
                leg,
                asset: reserve,
                amount,
            });
            scope.flash_outstanding = true;
            Ok(())
        })?;

        debug!(?action, amount, "Requesting flash loan");
        let result = self.venues.flash_lender.flash_loan(
            self,
            self.address,
            &[reserve],
            &[amount],
            &action.encode(),
        );

        let unconsumed = self.with_scope(|scope| {
            scope.flash_outstanding = false;
            Ok(scope.flash.take())
        })?;
        result?;

        // The lender reported success without ever calling back.
        if unconsumed.is_some() {
            return Err(VaultError::ImpossibleMode);
        }
        Ok(())
    }

    fn take_flash_context(&self) -> Option<FlashContext> {
        let guard = self.engine.lock();
        let mut engine = guard.borrow_mut();
        engine.tx.as_mut().and_then(|scope| scope.flash.take())
    }

    fn run_leg(&self, leg: FlashLeg, amount: u128, fee: u128) -> VaultResult<()> {
        match leg {
            FlashLeg::Deposit { swap_amount } => {
                self.leverage_legs(swap_amount, amount.checked_add(fee).or_overflow()?)
            }
            FlashLeg::Withdraw {
                repay,
                withdraw_collateral,
                idle_collateral,
            } => self.unwind_legs(repay, withdraw_collateral, idle_collateral),
            FlashLeg::RebalanceDecreaseDebt { repay } => {
                self.deleverage_legs(repay, amount.checked_add(fee).or_overflow()?)
            }
            FlashLeg::Close => self.close_legs(),
        }
    }

    /// Swap reserve into collateral, supply it, then borrow `borrow` reserve.
    pub(super) fn leverage_legs(&self, swap_amount: u128, borrow: u128) -> VaultResult<()> {
        let swaps = self.swap_executor()?;
        let supplied = swaps.swap(
            self.address,
            self.reserve_asset,
            self.collateral_asset,
            swap_amount,
        )?;
        self.venues
            .lending
            .supply(self.address, self.collateral_asset, supplied)?;
        if borrow > 0 {
            self.venues
                .lending
                .borrow(self.address, self.reserve_asset, borrow)?;
        }
        Ok(())
    }

    /// Repay `repay` reserve debt, withdraw collateral and swap it, together
    /// with `idle_collateral`, into reserve.
    pub(super) fn unwind_legs(
        &self,
        repay: u128,
        withdraw_collateral: u128,
        idle_collateral: u128,
    ) -> VaultResult<()> {
        if repay > 0 {
            self.venues
                .lending
                .repay(self.address, self.reserve_asset, repay)?;
        }
        let withdrawn = if withdraw_collateral > 0 {
            self.venues
                .lending
                .withdraw(self.address, self.collateral_asset, withdraw_collateral)?
        } else {
            0
        };
        self.swap_collateral_to_reserve(withdrawn.checked_add(idle_collateral).or_overflow()?)
    }

    /// Repay `repay` reserve debt; if idle reserve then falls short of `owed`,
    /// withdraw collateral worth the gap plus a swap buffer and convert it.
    fn deleverage_legs(&self, repay: u128, owed: u128) -> VaultResult<()> {
        self.venues
            .lending
            .repay(self.address, self.reserve_asset, repay)?;

        let idle = self.idle(self.reserve_asset);
        let missing = owed.saturating_sub(idle);
        if missing == 0 {
            return Ok(());
        }

        let missing_base = self.value_of(self.reserve_asset, missing)?;
        let buffered = percent_mul(missing_base, PERCENTAGE_FACTOR + SWAP_SLIPPAGE_BUFFER_BPS)
            .or_overflow()?;
        let collateral = self.amount_for(self.collateral_asset, buffered)?;
        debug!(missing, collateral, "Freeing collateral to cover flash loan");

        let withdrawn = self
            .venues
            .lending
            .withdraw(self.address, self.collateral_asset, collateral)?;
        self.swap_collateral_to_reserve(withdrawn)
    }

    /// Repay all debt, withdraw all collateral, convert every collateral unit held.
    pub(super) fn close_legs(&self) -> VaultResult<()> {
        let debt = self
            .venues
            .lending
            .debt_balance(self.address, self.reserve_asset)?;
        if debt > 0 {
            self.venues
                .lending
                .repay(self.address, self.reserve_asset, u128::MAX)?;
        }
        let supplied = self
            .venues
            .lending
            .collateral_balance(self.address, self.collateral_asset)?;
        if supplied > 0 {
            self.venues
                .lending
                .withdraw(self.address, self.collateral_asset, u128::MAX)?;
        }
        self.swap_collateral_to_reserve(self.idle(self.collateral_asset))
    }

    fn swap_collateral_to_reserve(&self, amount: u128) -> VaultResult<()> {
        if amount == 0 {
            return Ok(());
        }
        let swaps = self.swap_executor()?;
        swaps.swap(
            self.address,
            self.collateral_asset,
            self.reserve_asset,
            amount,
        )?;
        Ok(())
    }
}

impl FlashLoanReceiver for PositionManager {
    fn receive_flash_loan(
        &self,
        caller: Address,
        assets: &[Address],
        amounts: &[u128],
        fee_amounts: &[u128],
        user_data: &[u8],
    ) -> VaultResult<()> {
        if caller != self.venues.flash_lender.address() {
            return Err(VaultError::OnlyFlashLoanLender);
        }

        let context = self
            .take_flash_context()
            .ok_or(VaultError::UnknownFlashloanMode)?;

        let action = PositionAction::decode(user_data).ok_or(VaultError::ImpossibleMode)?;
        if action != context.leg.action() {
            return Err(VaultError::ImpossibleMode);
        }

        if assets.len() != 1
            || amounts.len() != 1
            || fee_amounts.len() != 1
            || assets[0] != context.asset
            || amounts[0] != context.amount
        {
            return Err(VaultError::IncorrectFlashLoanTokenReceived);
        }

        debug!(?action, amount = amounts[0], fee = fee_amounts[0], "Flash loan received");
        self.run_leg(context.leg, amounts[0], fee_amounts[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_tags_round_trip() {
        for action in [
            PositionAction::Deposit,
            PositionAction::Withdraw,
            PositionAction::RebalanceIncreaseDebt,
            PositionAction::RebalanceDecreaseDebt,
            PositionAction::Close,
        ] {
            assert_eq!(PositionAction::decode(&action.encode()), Some(action));
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(PositionAction::decode(&[]), None);
        assert_eq!(PositionAction::decode(&[0]), None);
        assert_eq!(PositionAction::decode(&[6]), None);
        assert_eq!(PositionAction::decode(&[1, 1]), None);
    }

    #[test]
    fn test_leg_actions() {
        assert_eq!(FlashLeg::Close.action(), PositionAction::Close);
        assert_eq!(
            FlashLeg::RebalanceDecreaseDebt { repay: 1 }.action(),
            PositionAction::RebalanceDecreaseDebt
        );
    }
}
