//! Position sizing: how far the debt is from the target LTV.
//!
//! Sizing is pure. It reads an account snapshot and the settings, and never
//! touches the market.

use super::error::{OrOverflow, VaultResult};
use super::math::{percent_mul, signed_delta, PERCENTAGE_FACTOR};
use super::settings::Settings;
use crate::market::UserAccountData;
use serde::{Deserialize, Serialize};

/// Required adjustment, in base units. Positive means "add".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionChange {
    pub collateral_change_base: i128,
    pub debt_change_base: i128,
}

impl PositionChange {
    pub const UNCHANGED: PositionChange = PositionChange {
        collateral_change_base: 0,
        debt_change_base: 0,
    };

    pub fn is_unchanged(&self) -> bool {
        *self == Self::UNCHANGED
    }
}

/// Point-in-time view of the position, in base units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub collateral_base: u128,
    pub debt_base: u128,
    pub idle_reserve_base: u128,
    pub idle_collateral_base: u128,
    pub total_base: u128,
    /// Current debt / collateral, in bps.
    pub current_ltv_bps: u32,
    /// LTV the vault steers toward, in bps.
    pub target_ltv_bps: u32,
    pub health_factor: u128,
    pub total_shares: u128,
    pub closed: bool,
}

/// Market max LTV minus the configured safety distance.
pub fn target_ltv_bps(market_ltv_bps: u32, settings: &Settings) -> u32 {
    market_ltv_bps.saturating_sub(settings.additional_ltv_distance_bps)
}

/// Debt change that brings the account back to its target LTV.
///
/// Changes smaller than `min_rebalance_bps` of the current debt (of the target
/// debt when there is none yet) are reported as [`PositionChange::UNCHANGED`].
pub fn required_change(account: &UserAccountData, settings: &Settings) -> VaultResult<PositionChange> {
    let collateral = account.total_collateral_base;
    if collateral == 0 {
        return Ok(PositionChange::UNCHANGED);
    }

    let target_debt = percent_mul(collateral, target_ltv_bps(account.ltv, settings)).or_overflow()?;
    let current_debt = account.total_debt_base;
    let debt_change = signed_delta(target_debt, current_debt).or_overflow()?;

    let reference = if current_debt > 0 { current_debt } else { target_debt };
    if reference == 0 {
        return Ok(PositionChange::UNCHANGED);
    }

    let drift = debt_change
        .unsigned_abs()
        .checked_mul(PERCENTAGE_FACTOR as u128)
        .or_overflow()?;
    let threshold = reference
        .checked_mul(settings.min_rebalance_bps as u128)
        .or_overflow()?;
    if drift < threshold {
        return Ok(PositionChange::UNCHANGED);
    }

    Ok(PositionChange {
        collateral_change_base: 0,
        debt_change_base: debt_change,
    })
}

/// Debt to repay when the repayment is flash-funded and partly covered by
/// withdrawing collateral, so that the LTV lands on `target_ltv_bps` after the
/// withdrawal.
///
/// With `k = target · (1 + buffer)`, solves `x = (excess − k · idle) / (1 − k)`.
/// `excess_debt_base` is the debt above target before the repayment and
/// `idle_reserve_base` the reserve already available to repay the lender.
/// Flash fees are left to the deadband. `None` when `k >= 1`.
pub fn flash_repay_base(
    excess_debt_base: u128,
    idle_reserve_base: u128,
    target_ltv_bps: u32,
    buffer_bps: u32,
) -> Option<u128> {
    let scale = (PERCENTAGE_FACTOR as u128).checked_mul(PERCENTAGE_FACTOR as u128)?;
    let k = (target_ltv_bps as u128).checked_mul((PERCENTAGE_FACTOR as u128).checked_add(buffer_bps as u128)?)?;
    if k >= scale {
        return None;
    }
    let numerator = excess_debt_base
        .checked_mul(scale)?
        .saturating_sub(k.checked_mul(idle_reserve_base)?);
    Some(numerator / (scale - k))
}
