//! In-memory venue used for paper runs and tests.
//!
//! One [`SimulatedMarket`] plays every external role at once: token ledger,
//! price oracle, lending pool, swap venue, flash lender and host journal. Swaps
//! execute at oracle price minus a configurable slippage, flash loans charge a
//! configurable fee, and pool liquidity is unbounded.

use super::traits::{
    AssetLedger, Checkpoint, FlashLender, FlashLoanReceiver, Journaled, LendingMarket,
    PriceOracle, SwapExecutor,
};
use super::types::{
    Address, MarketError, MarketResult, UserAccountData, HEALTH_FACTOR_ONE,
};
use crate::vault::math::{amount_for_base, base_value, percent_mul, PERCENTAGE_FACTOR};
use crate::vault::VaultError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Listing parameters of a simulated asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedAsset {
    pub symbol: String,
    pub decimals: u8,
    /// Base units per whole token.
    pub price: u128,
    /// Max LTV when used as collateral, in bps.
    pub ltv_bps: u32,
    /// Liquidation threshold when used as collateral, in bps.
    pub liquidation_threshold_bps: u32,
}

impl SimulatedAsset {
    pub fn new(symbol: &str, decimals: u8, price: u128) -> Self {
        Self {
            symbol: symbol.to_string(),
            decimals,
            price,
            ltv_bps: 0,
            liquidation_threshold_bps: 0,
        }
    }

    pub fn with_collateral_params(mut self, ltv_bps: u32, liquidation_threshold_bps: u32) -> Self {
        self.ltv_bps = ltv_bps;
        self.liquidation_threshold_bps = liquidation_threshold_bps;
        self
    }
}

#[derive(Debug, Clone, Default)]
struct WorldState {
    assets: HashMap<Address, SimulatedAsset>,
    /// (asset, holder) -> amount
    balances: HashMap<(Address, Address), u128>,
    /// (account, asset) -> supplied amount
    supplied: HashMap<(Address, Address), u128>,
    /// (account, asset) -> borrowed amount
    borrowed: HashMap<(Address, Address), u128>,
}

impl WorldState {
    fn asset(&self, asset: Address) -> MarketResult<&SimulatedAsset> {
        self.assets.get(&asset).ok_or(MarketError::UnknownAsset(asset))
    }

    fn value_of(&self, asset: Address, amount: u128) -> MarketResult<u128> {
        let info = self.asset(asset)?;
        base_value(amount, info.price, info.decimals).ok_or(MarketError::Overflow)
    }

    fn amount_of(&self, asset: Address, base: u128) -> MarketResult<u128> {
        let info = self.asset(asset)?;
        if info.price == 0 {
            return Err(MarketError::PriceUnavailable(asset));
        }
        amount_for_base(base, info.price, info.decimals).ok_or(MarketError::Overflow)
    }

    fn balance(&self, asset: Address, holder: Address) -> u128 {
        self.balances.get(&(asset, holder)).copied().unwrap_or(0)
    }

    fn credit(&mut self, asset: Address, holder: Address, amount: u128) -> MarketResult<()> {
        self.asset(asset)?;
        let entry = self.balances.entry((asset, holder)).or_insert(0);
        *entry = entry.checked_add(amount).ok_or(MarketError::Overflow)?;
        Ok(())
    }

    fn debit(&mut self, asset: Address, holder: Address, amount: u128) -> MarketResult<()> {
        let available = self.balance(asset, holder);
        if available < amount {
            return Err(MarketError::InsufficientBalance {
                asset,
                holder,
                needed: amount,
                available,
            });
        }
        self.balances.insert((asset, holder), available - amount);
        Ok(())
    }

    fn account_data(&self, account: Address) -> MarketResult<UserAccountData> {
        let mut collateral_base = 0u128;
        let mut ltv_weighted = 0u128;
        let mut threshold_weighted = 0u128;
        for ((owner, asset), amount) in &self.supplied {
            if *owner != account || *amount == 0 {
                continue;
            }
            let info = self.asset(*asset)?;
            let value = self.value_of(*asset, *amount)?;
            collateral_base = collateral_base.checked_add(value).ok_or(MarketError::Overflow)?;
            ltv_weighted = ltv_weighted
                .checked_add(value.checked_mul(info.ltv_bps as u128).ok_or(MarketError::Overflow)?)
                .ok_or(MarketError::Overflow)?;
            threshold_weighted = threshold_weighted
                .checked_add(
                    value
                        .checked_mul(info.liquidation_threshold_bps as u128)
                        .ok_or(MarketError::Overflow)?,
                )
                .ok_or(MarketError::Overflow)?;
        }

        let mut debt_base = 0u128;
        for ((owner, asset), amount) in &self.borrowed {
            if *owner != account || *amount == 0 {
                continue;
            }
            debt_base = debt_base
                .checked_add(self.value_of(*asset, *amount)?)
                .ok_or(MarketError::Overflow)?;
        }

        let (ltv, liquidation_threshold) = if collateral_base == 0 {
            (0, 0)
        } else {
            (
                (ltv_weighted / collateral_base) as u32,
                (threshold_weighted / collateral_base) as u32,
            )
        };

        let max_debt = percent_mul(collateral_base, ltv).ok_or(MarketError::Overflow)?;
        let adjusted_collateral =
            percent_mul(collateral_base, liquidation_threshold).ok_or(MarketError::Overflow)?;
        let health_factor = if debt_base == 0 {
            u128::MAX
        } else {
            adjusted_collateral
                .checked_mul(HEALTH_FACTOR_ONE)
                .map(|v| v / debt_base)
                .unwrap_or(u128::MAX)
        };

        Ok(UserAccountData {
            total_collateral_base: collateral_base,
            total_debt_base: debt_base,
            available_borrows_base: max_debt.saturating_sub(debt_base),
            health_factor,
            ltv,
            liquidation_threshold,
        })
    }
}

/// Single-process stand-in for oracle, pool, swap venue and flash lender.
pub struct SimulatedMarket {
    address: Address,
    flash_fee_bps: u32,
    swap_slippage_bps: u32,
    state: Mutex<WorldState>,
    checkpoints: Mutex<Vec<(Checkpoint, WorldState)>>,
    next_checkpoint: AtomicU64,
}

impl SimulatedMarket {
    /// Create an empty market whose lender/venue identity is `address`.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            flash_fee_bps: 0,
            swap_slippage_bps: 0,
            state: Mutex::new(WorldState::default()),
            checkpoints: Mutex::new(Vec::new()),
            next_checkpoint: AtomicU64::new(1),
        }
    }

    pub fn with_flash_fee_bps(mut self, bps: u32) -> Self {
        self.flash_fee_bps = bps;
        self
    }

    pub fn with_swap_slippage_bps(mut self, bps: u32) -> Self {
        self.swap_slippage_bps = bps;
        self
    }

    pub fn list_asset(&self, asset: Address, listing: SimulatedAsset) {
        debug!(%asset, symbol = %listing.symbol, price = listing.price, "Listing simulated asset");
        self.state.lock().assets.insert(asset, listing);
    }

    pub fn set_price(&self, asset: Address, price: u128) -> MarketResult<()> {
        let mut state = self.state.lock();
        let info = state
            .assets
            .get_mut(&asset)
            .ok_or(MarketError::UnknownAsset(asset))?;
        debug!(%asset, old = info.price, new = price, "Simulated price update");
        info.price = price;
        Ok(())
    }

    pub fn price(&self, asset: Address) -> MarketResult<u128> {
        Ok(self.state.lock().asset(asset)?.price)
    }

    pub fn mint(&self, asset: Address, to: Address, amount: u128) -> MarketResult<()> {
        self.state.lock().credit(asset, to, amount)
    }

    /// Liquidate part of `account`'s debt the way an external keeper would.
    ///
    /// Covers at most half of the outstanding debt and seizes collateral worth the
    /// covered debt plus `bonus_bps`. Returns `(debt_covered, collateral_seized)`.
    pub fn liquidate(
        &self,
        account: Address,
        collateral_asset: Address,
        debt_asset: Address,
        debt_to_cover: u128,
        bonus_bps: u32,
    ) -> MarketResult<(u128, u128)> {
        let mut state = self.state.lock();
        if !state.account_data(account)?.is_liquidatable() {
            return Err(MarketError::NotLiquidatable);
        }

        let debt = state.borrowed.get(&(account, debt_asset)).copied().unwrap_or(0);
        let covered = debt_to_cover.min(debt / 2);
        let covered_base = state.value_of(debt_asset, covered)?;
        let seize_base = percent_mul(covered_base, PERCENTAGE_FACTOR + bonus_bps)
            .ok_or(MarketError::Overflow)?;
        let supplied = state
            .supplied
            .get(&(account, collateral_asset))
            .copied()
            .unwrap_or(0);
        let seized = state.amount_of(collateral_asset, seize_base)?.min(supplied);

        state.borrowed.insert((account, debt_asset), debt - covered);
        state.supplied.insert((account, collateral_asset), supplied - seized);

        warn!(%account, covered, seized, "Simulated liquidation");
        Ok((covered, seized))
    }

    fn flash_fee(&self, amount: u128) -> MarketResult<u128> {
        percent_mul(amount, self.flash_fee_bps).ok_or(MarketError::Overflow)
    }
}

impl PriceOracle for SimulatedMarket {
    fn asset_price(&self, asset: Address) -> MarketResult<u128> {
        let price = self.price(asset)?;
        if price == 0 {
            return Err(MarketError::PriceUnavailable(asset));
        }
        Ok(price)
    }
}

impl AssetLedger for SimulatedMarket {
    fn balance_of(&self, asset: Address, holder: Address) -> u128 {
        self.state.lock().balance(asset, holder)
    }

    fn decimals(&self, asset: Address) -> MarketResult<u8> {
        Ok(self.state.lock().asset(asset)?.decimals)
    }

    fn transfer(
        &self,
        asset: Address,
        from: Address,
        to: Address,
        amount: u128,
    ) -> MarketResult<()> {
        let mut state = self.state.lock();
        state.debit(asset, from, amount)?;
        state.credit(asset, to, amount)
    }
}

impl LendingMarket for SimulatedMarket {
    fn supply(&self, account: Address, asset: Address, amount: u128) -> MarketResult<()> {
        let mut state = self.state.lock();
        state.debit(asset, account, amount)?;
        let entry = state.supplied.entry((account, asset)).or_insert(0);
        *entry = entry.checked_add(amount).ok_or(MarketError::Overflow)?;
        Ok(())
    }

    fn withdraw(&self, account: Address, asset: Address, amount: u128) -> MarketResult<u128> {
        let mut state = self.state.lock();
        let supplied = state.supplied.get(&(account, asset)).copied().unwrap_or(0);
        let amount = amount.min(supplied);
        if amount == 0 {
            return Ok(0);
        }

        state.supplied.insert((account, asset), supplied - amount);
        let data = state.account_data(account)?;
        if data.total_debt_base > 0 && data.health_factor < HEALTH_FACTOR_ONE {
            state.supplied.insert((account, asset), supplied);
            return Err(MarketError::HealthFactorTooLow);
        }

        state.credit(asset, account, amount)?;
        Ok(amount)
    }

    fn borrow(&self, account: Address, asset: Address, amount: u128) -> MarketResult<()> {
        let mut state = self.state.lock();
        let data = state.account_data(account)?;
        let requested_base = state.value_of(asset, amount)?;
        if requested_base > data.available_borrows_base {
            return Err(MarketError::BorrowCapacityExceeded {
                requested_base,
                available_base: data.available_borrows_base,
            });
        }

        let entry = state.borrowed.entry((account, asset)).or_insert(0);
        *entry = entry.checked_add(amount).ok_or(MarketError::Overflow)?;
        state.credit(asset, account, amount)
    }

    fn repay(&self, account: Address, asset: Address, amount: u128) -> MarketResult<u128> {
        let mut state = self.state.lock();
        let debt = state.borrowed.get(&(account, asset)).copied().unwrap_or(0);
        if debt == 0 {
            return Err(MarketError::NothingToRepay(asset));
        }

        let amount = amount.min(debt);
        state.debit(asset, account, amount)?;
        state.borrowed.insert((account, asset), debt - amount);
        Ok(amount)
    }

    fn user_account_data(&self, account: Address) -> MarketResult<UserAccountData> {
        self.state.lock().account_data(account)
    }

    fn max_ltv_bps(&self, asset: Address) -> MarketResult<u32> {
        Ok(self.state.lock().asset(asset)?.ltv_bps)
    }

    fn collateral_balance(&self, account: Address, asset: Address) -> MarketResult<u128> {
        Ok(self.state.lock().supplied.get(&(account, asset)).copied().unwrap_or(0))
    }

    fn debt_balance(&self, account: Address, asset: Address) -> MarketResult<u128> {
        Ok(self.state.lock().borrowed.get(&(account, asset)).copied().unwrap_or(0))
    }
}

impl SwapExecutor for SimulatedMarket {
    fn swap(
        &self,
        account: Address,
        from: Address,
        to: Address,
        amount_in: u128,
    ) -> MarketResult<u128> {
        if from == to {
            return Err(MarketError::SwapFailed("identical assets".to_string()));
        }

        let mut state = self.state.lock();
        let value = state.value_of(from, amount_in)?;
        let gross = state.amount_of(to, value)?;
        let amount_out = percent_mul(gross, PERCENTAGE_FACTOR - self.swap_slippage_bps.min(PERCENTAGE_FACTOR))
            .ok_or(MarketError::Overflow)?;

        state.debit(from, account, amount_in)?;
        state.credit(to, account, amount_out)?;

        debug!(%from, %to, amount_in, amount_out, "Simulated swap");
        Ok(amount_out)
    }
}

impl FlashLender for SimulatedMarket {
    fn address(&self) -> Address {
        self.address
    }

    fn flash_loan(
        &self,
        receiver: &dyn FlashLoanReceiver,
        recipient: Address,
        assets: &[Address],
        amounts: &[u128],
        user_data: &[u8],
    ) -> Result<(), VaultError> {
        if assets.is_empty() || assets.len() != amounts.len() {
            return Err(MarketError::MalformedFlashLoan.into());
        }

        let fees = amounts
            .iter()
            .map(|amount| self.flash_fee(*amount))
            .collect::<MarketResult<Vec<_>>>()?;

        {
            let mut state = self.state.lock();
            for (asset, amount) in assets.iter().zip(amounts) {
                state.credit(*asset, recipient, *amount)?;
            }
        }

        // The lock is released while the receiver runs; it calls back into us.
        receiver.receive_flash_loan(self.address, assets, amounts, &fees, user_data)?;

        let mut state = self.state.lock();
        for ((asset, amount), fee) in assets.iter().zip(amounts).zip(&fees) {
            let owed = amount.checked_add(*fee).ok_or(MarketError::Overflow)?;
            state.debit(*asset, recipient, owed).map_err(|_| MarketError::FlashLoanNotRepaid {
                asset: *asset,
                amount: *amount,
                fee: *fee,
            })?;
        }
        Ok(())
    }
}

impl Journaled for SimulatedMarket {
    fn checkpoint(&self) -> Checkpoint {
        let id = self.next_checkpoint.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.state.lock().clone();
        self.checkpoints.lock().push((id, snapshot));
        id
    }

    fn revert_to(&self, checkpoint: Checkpoint) {
        let mut checkpoints = self.checkpoints.lock();
        match checkpoints.iter().position(|(id, _)| *id == checkpoint) {
            Some(index) => {
                let (_, snapshot) = checkpoints.swap_remove(index);
                checkpoints.truncate(index);
                *self.state.lock() = snapshot;
            }
            None => warn!(checkpoint, "Revert to unknown checkpoint ignored"),
        }
    }

    fn discard(&self, checkpoint: Checkpoint) {
        let mut checkpoints = self.checkpoints.lock();
        if let Some(index) = checkpoints.iter().position(|(id, _)| *id == checkpoint) {
            checkpoints.truncate(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WETH: Address = Address::repeat_byte(0xee);
    const USDC: Address = Address::repeat_byte(0xcc);
    const ALICE: Address = Address::repeat_byte(0xa1);
    const ONE_ETHER: u128 = 1_000_000_000_000_000_000;

    fn create_test_market() -> SimulatedMarket {
        let market = SimulatedMarket::new(Address::repeat_byte(0x99));
        market.list_asset(WETH, SimulatedAsset::new("WETH", 18, 2_000_00000000));
        market.list_asset(
            USDC,
            SimulatedAsset::new("USDC", 6, 1_00000000).with_collateral_params(8000, 8500),
        );
        market
    }

    #[test]
    fn test_supply_and_borrow_within_ltv() {
        let market = create_test_market();
        market.mint(USDC, ALICE, 2_000_000_000).unwrap();
        market.supply(ALICE, USDC, 2_000_000_000).unwrap();

        let data = market.user_account_data(ALICE).unwrap();
        assert_eq!(data.total_collateral_base, 2_000_00000000);
        assert_eq!(data.ltv, 8000);
        assert_eq!(data.available_borrows_base, 1_600_00000000);

        market.borrow(ALICE, WETH, ONE_ETHER / 2).unwrap();
        assert_eq!(market.balance_of(WETH, ALICE), ONE_ETHER / 2);
        assert_eq!(market.user_account_data(ALICE).unwrap().total_debt_base, 1_000_00000000);

        let err = market.borrow(ALICE, WETH, ONE_ETHER).unwrap_err();
        assert!(matches!(err, MarketError::BorrowCapacityExceeded { .. }));
    }

    #[test]
    fn test_withdraw_respects_health_factor() {
        let market = create_test_market();
        market.mint(USDC, ALICE, 2_000_000_000).unwrap();
        market.supply(ALICE, USDC, 2_000_000_000).unwrap();
        market.borrow(ALICE, WETH, ONE_ETHER * 7 / 10).unwrap();

        assert_eq!(
            market.withdraw(ALICE, USDC, u128::MAX),
            Err(MarketError::HealthFactorTooLow)
        );
        assert_eq!(market.withdraw(ALICE, USDC, 100_000_000).unwrap(), 100_000_000);
    }

    #[test]
    fn test_repay_caps_at_outstanding_debt() {
        let market = create_test_market();
        market.mint(USDC, ALICE, 2_000_000_000).unwrap();
        market.supply(ALICE, USDC, 2_000_000_000).unwrap();
        market.borrow(ALICE, WETH, ONE_ETHER / 2).unwrap();
        market.mint(WETH, ALICE, ONE_ETHER).unwrap();

        assert_eq!(market.repay(ALICE, WETH, u128::MAX).unwrap(), ONE_ETHER / 2);
        assert_eq!(market.debt_balance(ALICE, WETH).unwrap(), 0);
        assert_eq!(
            market.repay(ALICE, WETH, 1),
            Err(MarketError::NothingToRepay(WETH))
        );
    }

    #[test]
    fn test_swap_uses_oracle_price_and_slippage() {
        let market = create_test_market().with_swap_slippage_bps(100);
        market.mint(WETH, ALICE, ONE_ETHER).unwrap();

        let out = market.swap(ALICE, WETH, USDC, ONE_ETHER).unwrap();
        assert_eq!(out, 1_980_000_000);
        assert_eq!(market.balance_of(WETH, ALICE), 0);
        assert_eq!(market.balance_of(USDC, ALICE), 1_980_000_000);
    }

    #[test]
    fn test_revert_restores_snapshot() {
        let market = create_test_market();
        market.mint(WETH, ALICE, ONE_ETHER).unwrap();

        let checkpoint = market.checkpoint();
        market.transfer(WETH, ALICE, USDC, ONE_ETHER).unwrap();
        market.set_price(WETH, 1).unwrap();
        market.revert_to(checkpoint);

        assert_eq!(market.balance_of(WETH, ALICE), ONE_ETHER);
        assert_eq!(market.price(WETH).unwrap(), 2_000_00000000);
    }

    #[test]
    fn test_discard_keeps_changes() {
        let market = create_test_market();
        let outer = market.checkpoint();
        let inner = market.checkpoint();
        market.mint(WETH, ALICE, 5).unwrap();
        market.discard(inner);
        market.revert_to(outer);
        assert_eq!(market.balance_of(WETH, ALICE), 0);
    }

    #[test]
    fn test_liquidation_requires_unhealthy_account() {
        let market = create_test_market();
        market.mint(USDC, ALICE, 2_000_000_000).unwrap();
        market.supply(ALICE, USDC, 2_000_000_000).unwrap();
        market.borrow(ALICE, WETH, ONE_ETHER * 7 / 10).unwrap();

        assert_eq!(
            market.liquidate(ALICE, USDC, WETH, u128::MAX, 500),
            Err(MarketError::NotLiquidatable)
        );

        market.set_price(WETH, 2_600_00000000).unwrap();
        let (covered, seized) = market.liquidate(ALICE, USDC, WETH, u128::MAX, 500).unwrap();
        assert_eq!(covered, ONE_ETHER * 35 / 100);
        assert!(seized > 0);
        assert_eq!(market.debt_balance(ALICE, WETH).unwrap(), ONE_ETHER * 35 / 100);
    }
}
