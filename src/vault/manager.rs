//! The position manager service object.
//!
//! Every public entry point runs as one transaction: vault state is staged in a
//! [`TxScope`], the host journal is checkpointed, and both are committed only if
//! the whole operation (flash callback included) succeeds. Other threads wait on
//! the re-entrant lock; the flash callback re-enters on the owning thread.

use super::error::{OrOverflow, VaultError, VaultResult};
use super::events::VaultEvent;
use super::executor::{FlashContext, FlashLeg, SWAP_SLIPPAGE_BUFFER_BPS};
use super::ledger::ShareLedger;
use super::math::{
    amount_for_base, base_value, mul_div, percent_mul, signed_delta, PERCENTAGE_FACTOR,
};
use super::settings::Settings;
use super::sizing::{
    flash_repay_base, required_change, target_ltv_bps, PositionChange, PositionSnapshot,
};
use crate::market::{Address, Checkpoint, MarketError, SwapExecutor, Venues};
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Static wiring of a vault.
#[derive(Debug, Clone)]
pub struct ManagerParams {
    /// Account the vault holds funds and the lending position under.
    pub address: Address,
    pub owner: Address,
    /// Volatile asset users deposit and the position borrows.
    pub reserve_asset: Address,
    /// Stable asset supplied to the lending market.
    pub collateral_asset: Address,
    pub settings: Settings,
}

#[derive(Debug, Clone)]
pub(super) struct VaultState {
    pub settings: Settings,
    pub ledger: ShareLedger,
    pub owner: Address,
    pub closed: bool,
    /// Net reserve deposited, capped by `max_deposit_amount`.
    pub cumulative_deposits: u128,
}

pub(super) struct TxScope {
    pub staged: VaultState,
    pub flash: Option<FlashContext>,
    pub flash_outstanding: bool,
    pub events: Vec<VaultEvent>,
    checkpoint: Checkpoint,
}

pub(super) struct Engine {
    committed: VaultState,
    pub tx: Option<TxScope>,
    events: Vec<VaultEvent>,
}

pub struct PositionManager {
    pub(super) address: Address,
    pub(super) reserve_asset: Address,
    pub(super) collateral_asset: Address,
    pub(super) venues: Venues,
    pub(super) engine: ReentrantMutex<RefCell<Engine>>,
}

impl PositionManager {
    pub fn new(params: ManagerParams, venues: Venues) -> VaultResult<Self> {
        if params.reserve_asset == params.collateral_asset {
            return Err(VaultError::InvalidSettings(
                "reserve and collateral assets must differ".to_string(),
            ));
        }
        params.settings.validate(&venues.swaps)?;

        info!(
            vault = %params.address,
            owner = %params.owner,
            reserve = %params.reserve_asset,
            collateral = %params.collateral_asset,
            "Position manager initialized"
        );

        Ok(Self {
            address: params.address,
            reserve_asset: params.reserve_asset,
            collateral_asset: params.collateral_asset,
            venues,
            engine: ReentrantMutex::new(RefCell::new(Engine {
                committed: VaultState {
                    settings: params.settings,
                    ledger: ShareLedger::new(),
                    owner: params.owner,
                    closed: false,
                    cumulative_deposits: 0,
                },
                tx: None,
                events: Vec::new(),
            })),
        })
    }

    // ==================== Transactions ====================

    fn transact<T>(&self, op: &'static str, body: impl FnOnce() -> VaultResult<T>) -> VaultResult<T> {
        let guard = self.engine.lock();
        {
            let mut engine = guard.borrow_mut();
            if engine.tx.is_some() {
                warn!(op, "Rejected re-entrant call");
                return Err(VaultError::Reentrancy);
            }
            let checkpoint = self.venues.journal.checkpoint();
            engine.tx = Some(TxScope {
                staged: engine.committed.clone(),
                flash: None,
                flash_outstanding: false,
                events: Vec::new(),
                checkpoint,
            });
        }

        let result = body();

        let mut engine = guard.borrow_mut();
        let scope = engine.tx.take().ok_or(VaultError::ImpossibleMode)?;
        match result {
            Ok(value) => {
                self.venues.journal.discard(scope.checkpoint);
                engine.committed = scope.staged;
                for event in scope.events {
                    info!(op, event = event.name(), details = ?event, "Vault event");
                    engine.events.push(event);
                }
                Ok(value)
            }
            Err(err) => {
                self.venues.journal.revert_to(scope.checkpoint);
                warn!(op, code = err.code(), error = %err, "Transaction reverted");
                Err(err)
            }
        }
    }

    /// Run `f` against the open transaction.
    pub(super) fn with_scope<R>(
        &self,
        f: impl FnOnce(&mut TxScope) -> VaultResult<R>,
    ) -> VaultResult<R> {
        let guard = self.engine.lock();
        let mut engine = guard.borrow_mut();
        let scope = engine.tx.as_mut().ok_or(VaultError::ImpossibleMode)?;
        f(scope)
    }

    fn staged<R>(&self, f: impl FnOnce(&VaultState) -> R) -> VaultResult<R> {
        self.with_scope(|scope| Ok(f(&scope.staged)))
    }

    fn emit(&self, event: VaultEvent) -> VaultResult<()> {
        self.with_scope(|scope| {
            scope.events.push(event);
            Ok(())
        })
    }

    fn committed<R>(&self, f: impl FnOnce(&VaultState) -> R) -> R {
        let guard = self.engine.lock();
        let engine = guard.borrow();
        f(&engine.committed)
    }

    fn flash_outstanding(&self) -> bool {
        let guard = self.engine.lock();
        let engine = guard.borrow();
        engine.tx.as_ref().is_some_and(|scope| scope.flash_outstanding)
    }

    fn require_owner(&self, caller: Address) -> VaultResult<()> {
        if self.staged(|state| state.owner)? != caller {
            return Err(VaultError::Unauthorized);
        }
        Ok(())
    }

    // ==================== Valuation ====================

    pub(super) fn idle(&self, asset: Address) -> u128 {
        self.venues.assets.balance_of(asset, self.address)
    }

    pub(super) fn value_of(&self, asset: Address, amount: u128) -> VaultResult<u128> {
        if amount == 0 {
            return Ok(0);
        }
        let price = self.venues.oracle.asset_price(asset)?;
        let decimals = self.venues.assets.decimals(asset)?;
        base_value(amount, price, decimals).or_overflow()
    }

    pub(super) fn amount_for(&self, asset: Address, base: u128) -> VaultResult<u128> {
        if base == 0 {
            return Ok(0);
        }
        let price = self.venues.oracle.asset_price(asset)?;
        let decimals = self.venues.assets.decimals(asset)?;
        amount_for_base(base, price, decimals).or_overflow()
    }

    pub(super) fn swap_executor(&self) -> VaultResult<Arc<dyn SwapExecutor>> {
        let address = self.staged(|state| state.settings.swap_executor)?;
        self.venues
            .swaps
            .resolve(address)
            .ok_or_else(|| MarketError::UnknownSwapExecutor(address).into())
    }

    /// Net base value of everything the vault owns.
    pub fn total_balance_base(&self) -> VaultResult<u128> {
        Ok(self.snapshot_parts()?.total_base)
    }

    fn snapshot_parts(&self) -> VaultResult<PositionSnapshot> {
        let account = self.venues.lending.user_account_data(self.address)?;
        let idle_reserve_base = self.value_of(self.reserve_asset, self.idle(self.reserve_asset))?;
        let idle_collateral_base =
            self.value_of(self.collateral_asset, self.idle(self.collateral_asset))?;

        let assets = account
            .total_collateral_base
            .checked_add(idle_reserve_base)
            .and_then(|v| v.checked_add(idle_collateral_base))
            .or_overflow()?;

        let current_ltv_bps = if account.total_collateral_base == 0 {
            0
        } else {
            mul_div(
                account.total_debt_base,
                PERCENTAGE_FACTOR as u128,
                account.total_collateral_base,
            )
            .or_overflow()?
            .min(u32::MAX as u128) as u32
        };

        Ok(PositionSnapshot {
            collateral_base: account.total_collateral_base,
            debt_base: account.total_debt_base,
            idle_reserve_base,
            idle_collateral_base,
            total_base: assets.saturating_sub(account.total_debt_base),
            current_ltv_bps,
            target_ltv_bps: 0,
            health_factor: account.health_factor,
            total_shares: 0,
            closed: false,
        })
    }

    fn required_change_with(&self, settings: &Settings) -> VaultResult<PositionChange> {
        let account = self.venues.lending.user_account_data(self.address)?;
        required_change(&account, settings)
    }

    // ==================== Entry points ====================

    /// Deposit `amount` reserve from `caller`, minting shares to `recipient`.
    ///
    /// Returns the number of shares minted.
    pub fn deposit(&self, caller: Address, amount: u128, recipient: Address) -> VaultResult<u128> {
        self.transact("deposit", || {
            let (settings, closed, cumulative) = self.staged(|state| {
                (state.settings.clone(), state.closed, state.cumulative_deposits)
            })?;

            if closed || settings.is_deposit_paused() {
                return Err(VaultError::OperationDisabledByFlags);
            }
            let cumulative = cumulative.checked_add(amount).or_overflow()?;
            if amount == 0 || amount < settings.min_deposit_amount || cumulative > settings.max_deposit_amount {
                return Err(VaultError::IncorrectDepositOrWithdrawalAmount);
            }

            let total_before = self.total_balance_base()?;
            self.venues
                .assets
                .transfer(self.reserve_asset, caller, self.address, amount)?;

            let max_ltv = self.venues.lending.max_ltv_bps(self.collateral_asset)?;
            let hedge = percent_mul(amount, target_ltv_bps(max_ltv, &settings)).or_overflow()?;
            debug!(%caller, amount, hedge, "Opening leveraged slice");

            if hedge > 0 {
                self.flash(FlashLeg::Deposit { swap_amount: amount }, hedge)?;
            } else {
                self.leverage_legs(amount, 0)?;
            }

            let total_after = self.total_balance_base()?;
            let contributed = total_after
                .checked_sub(total_before)
                .filter(|value| *value > 0)
                .ok_or(VaultError::IncorrectDepositOrWithdrawalAmount)?;

            let shares = self.with_scope(|scope| {
                let shares = scope
                    .staged
                    .ledger
                    .shares_for_contribution(contributed, total_before)?;
                if shares == 0 {
                    return Err(VaultError::IncorrectDepositOrWithdrawalAmount);
                }
                scope.staged.ledger.mint(recipient, shares)?;
                scope.staged.cumulative_deposits = cumulative;
                Ok(shares)
            })?;

            self.emit(VaultEvent::PositionDeposit {
                reserve_amount: amount,
                base_value: contributed,
                recipient,
                shares_minted: shares,
            })?;
            Ok(shares)
        })
    }

    /// Burn `shares` of `caller` and pay out the matching reserve.
    ///
    /// Returns the reserve amount sent to `caller`.
    pub fn withdraw(&self, caller: Address, shares: u128) -> VaultResult<u128> {
        if self.flash_outstanding() {
            warn!(%caller, "Withdrawal rejected during flash leg");
            return Err(VaultError::ContractNotReadyForWithdrawal);
        }

        self.transact("withdraw", || {
            let (settings, held, total_shares) = self.staged(|state| {
                (
                    state.settings.clone(),
                    state.ledger.shares_of(caller),
                    state.ledger.total_supply(),
                )
            })?;

            if settings.is_withdraw_paused() {
                return Err(VaultError::OperationDisabledByFlags);
            }
            if shares == 0 || shares > held || total_shares == 0 {
                return Err(VaultError::IncorrectDepositOrWithdrawalAmount);
            }

            let lending = &self.venues.lending;
            let debt = lending.debt_balance(self.address, self.reserve_asset)?;
            let supplied = lending.collateral_balance(self.address, self.collateral_asset)?;
            let idle_reserve = self.idle(self.reserve_asset);
            let idle_collateral = self.idle(self.collateral_asset);

            let slice = |amount: u128| mul_div(amount, shares, total_shares).or_overflow();
            let repay = slice(debt)?;
            let withdraw_collateral = slice(supplied)?;
            let reserve_share = slice(idle_reserve)?;
            let collateral_share = slice(idle_collateral)?;

            let base_value = mul_div(shares, self.total_balance_base()?, total_shares).or_overflow()?;

            let retained = idle_reserve - reserve_share;
            debug!(%caller, shares, repay, withdraw_collateral, "Unwinding slice");

            if repay > 0 {
                self.flash(
                    FlashLeg::Withdraw {
                        repay,
                        withdraw_collateral,
                        idle_collateral: collateral_share,
                    },
                    repay,
                )?;
            } else {
                self.unwind_legs(0, withdraw_collateral, collateral_share)?;
            }

            let payout = self
                .idle(self.reserve_asset)
                .checked_sub(retained)
                .filter(|value| *value > 0)
                .ok_or(VaultError::IncorrectDepositOrWithdrawalAmount)?;

            self.venues
                .assets
                .transfer(self.reserve_asset, self.address, caller, payout)?;

            self.with_scope(|scope| {
                scope.staged.ledger.burn(caller, shares)?;
                scope.staged.cumulative_deposits =
                    scope.staged.cumulative_deposits.saturating_sub(payout);
                Ok(())
            })?;

            self.emit(VaultEvent::PositionWithdraw {
                shares_burned: shares,
                base_value,
                reserve_amount: payout,
                recipient: caller,
            })?;
            Ok(payout)
        })
    }

    /// Bring the debt back to the target LTV. Callable by anyone.
    ///
    /// Returns the change actually applied to the position.
    pub fn rebalance(&self, caller: Address) -> VaultResult<PositionChange> {
        self.transact("rebalance", || {
            let (settings, closed) = self.staged(|state| (state.settings.clone(), state.closed))?;
            if closed {
                return Err(VaultError::PositionClosed);
            }

            let lending = &self.venues.lending;
            let before = lending.user_account_data(self.address)?;
            let change = required_change(&before, &settings)?;
            if change.is_unchanged() {
                return Err(VaultError::PositionUnchanged);
            }

            let excess_base = change.debt_change_base.unsigned_abs();
            let delta = self.amount_for(self.reserve_asset, excess_base)?;
            if delta == 0 {
                return Err(VaultError::PositionUnchanged);
            }

            let idle = self.idle(self.reserve_asset);
            let mut used_flash_loan = false;
            if change.debt_change_base > 0 {
                lending.borrow(self.address, self.reserve_asset, delta)?;
            } else if idle >= delta {
                lending.repay(self.address, self.reserve_asset, delta)?;
            } else {
                // Collateral freed to repay the lender lowers the LTV base too.
                let repay_base = flash_repay_base(
                    excess_base,
                    self.value_of(self.reserve_asset, idle)?,
                    target_ltv_bps(before.ltv, &settings),
                    SWAP_SLIPPAGE_BUFFER_BPS,
                )
                .or_overflow()?;
                let debt = lending.debt_balance(self.address, self.reserve_asset)?;
                let repay = self.amount_for(self.reserve_asset, repay_base)?.min(debt);
                used_flash_loan = true;
                self.flash(FlashLeg::RebalanceDecreaseDebt { repay }, repay)?;
            }

            let after = lending.user_account_data(self.address)?;
            let applied = PositionChange {
                collateral_change_base: signed_delta(
                    after.total_collateral_base,
                    before.total_collateral_base,
                )
                .or_overflow()?,
                debt_change_base: signed_delta(after.total_debt_base, before.total_debt_base)
                    .or_overflow()?,
            };

            info!(
                %caller,
                debt_change_base = applied.debt_change_base,
                collateral_change_base = applied.collateral_change_base,
                used_flash_loan,
                "Position rebalanced"
            );
            self.emit(VaultEvent::PositionRebalance {
                debt_change_base: applied.debt_change_base,
                collateral_change_base: applied.collateral_change_base,
                used_flash_loan,
            })?;
            Ok(applied)
        })
    }

    /// Unwind the whole position into reserve and latch the vault closed.
    ///
    /// Returns the reserve held afterwards.
    pub fn close_position(&self, caller: Address) -> VaultResult<u128> {
        self.transact("close_position", || {
            self.require_owner(caller)?;
            if self.staged(|state| state.closed)? {
                return Err(VaultError::PositionClosed);
            }

            let debt = self
                .venues
                .lending
                .debt_balance(self.address, self.reserve_asset)?;
            let shortfall = debt.saturating_sub(self.idle(self.reserve_asset));
            if shortfall > 0 {
                self.flash(FlashLeg::Close, shortfall)?;
            } else {
                self.close_legs()?;
            }

            let reserve_amount = self.idle(self.reserve_asset);
            self.with_scope(|scope| {
                scope.staged.closed = true;
                Ok(())
            })?;
            self.emit(VaultEvent::PositionClose { reserve_amount })?;
            Ok(reserve_amount)
        })
    }

    // ==================== Owner / holder surface ====================

    pub fn set_settings(&self, caller: Address, settings: Settings) -> VaultResult<()> {
        self.transact("set_settings", || {
            self.require_owner(caller)?;
            settings.validate(&self.venues.swaps)?;
            self.with_scope(|scope| {
                scope.staged.settings = settings.clone();
                Ok(())
            })?;
            self.emit(VaultEvent::SettingsUpdated { settings })
        })
    }

    /// Send the vault's whole idle balance of `asset` to `recipient`.
    pub fn rescue(&self, caller: Address, asset: Address, recipient: Address) -> VaultResult<u128> {
        self.transact("rescue", || {
            self.require_owner(caller)?;
            let amount = self.idle(asset);
            if amount > 0 {
                self.venues
                    .assets
                    .transfer(asset, self.address, recipient, amount)?;
            }
            warn!(%asset, %recipient, amount, "Idle balance rescued");
            Ok(amount)
        })
    }

    pub fn transfer_ownership(&self, caller: Address, new_owner: Address) -> VaultResult<()> {
        self.transact("transfer_ownership", || {
            self.require_owner(caller)?;
            if new_owner.is_zero() {
                return Err(VaultError::InvalidSettings("owner cannot be zero".to_string()));
            }
            self.with_scope(|scope| {
                scope.staged.owner = new_owner;
                Ok(())
            })?;
            info!(%new_owner, "Ownership transferred");
            Ok(())
        })
    }

    /// Move `shares` from `caller` to `to` without touching the position.
    pub fn transfer_shares(&self, caller: Address, to: Address, shares: u128) -> VaultResult<()> {
        self.transact("transfer_shares", || {
            self.with_scope(|scope| scope.staged.ledger.transfer(caller, to, shares))
        })
    }

    // ==================== Inspection ====================

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn reserve_asset(&self) -> Address {
        self.reserve_asset
    }

    pub fn collateral_asset(&self) -> Address {
        self.collateral_asset
    }

    pub fn settings(&self) -> Settings {
        self.committed(|state| state.settings.clone())
    }

    pub fn owner(&self) -> Address {
        self.committed(|state| state.owner)
    }

    pub fn is_position_closed(&self) -> bool {
        self.committed(|state| state.closed)
    }

    pub fn shares_of(&self, holder: Address) -> u128 {
        self.committed(|state| state.ledger.shares_of(holder))
    }

    pub fn total_supply(&self) -> u128 {
        self.committed(|state| state.ledger.total_supply())
    }

    pub fn cumulative_deposits(&self) -> u128 {
        self.committed(|state| state.cumulative_deposits)
    }

    /// Base value claimed by `holder`.
    pub fn balance_of(&self, holder: Address) -> VaultResult<u128> {
        let total = self.total_balance_base()?;
        self.committed(|state| state.ledger.claim(holder, total))
    }

    pub fn calculate_required_position_change(&self) -> VaultResult<PositionChange> {
        self.required_change_with(&self.settings())
    }

    pub fn position_snapshot(&self) -> VaultResult<PositionSnapshot> {
        let mut snapshot = self.snapshot_parts()?;
        let max_ltv = self.venues.lending.max_ltv_bps(self.collateral_asset)?;
        self.committed(|state| {
            snapshot.target_ltv_bps = target_ltv_bps(max_ltv, &state.settings);
            snapshot.total_shares = state.ledger.total_supply();
            snapshot.closed = state.closed;
        });
        Ok(snapshot)
    }

    /// Events committed since the last call.
    pub fn drain_events(&self) -> Vec<VaultEvent> {
        let guard = self.engine.lock();
        let mut engine = guard.borrow_mut();
        std::mem::take(&mut engine.events)
    }
}
