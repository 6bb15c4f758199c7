//! Venue-agnostic traits for the collaborators the vault depends on.
//!
//! The vault never implements a money market, an oracle or swap routing itself.
//! Everything it needs from the outside world goes through these traits so that
//! production adapters and the in-memory [`SimulatedMarket`](super::SimulatedMarket)
//! are interchangeable.

use super::types::{Address, MarketResult, UserAccountData};
use crate::vault::VaultError;
use std::collections::HashMap;
use std::sync::Arc;

/// Asset prices in base units (8 decimals) per whole token.
pub trait PriceOracle: Send + Sync {
    fn asset_price(&self, asset: Address) -> MarketResult<u128>;
}

/// Token balances and transfers.
pub trait AssetLedger: Send + Sync {
    fn balance_of(&self, asset: Address, holder: Address) -> u128;

    fn decimals(&self, asset: Address) -> MarketResult<u8>;

    fn transfer(&self, asset: Address, from: Address, to: Address, amount: u128)
        -> MarketResult<()>;
}

/// Collateral / debt operations on an external lending market.
///
/// `withdraw` and `repay` accept `u128::MAX` to mean "everything" and return the
/// amount actually moved.
pub trait LendingMarket: Send + Sync {
    fn supply(&self, account: Address, asset: Address, amount: u128) -> MarketResult<()>;

    fn withdraw(&self, account: Address, asset: Address, amount: u128) -> MarketResult<u128>;

    fn borrow(&self, account: Address, asset: Address, amount: u128) -> MarketResult<()>;

    fn repay(&self, account: Address, asset: Address, amount: u128) -> MarketResult<u128>;

    fn user_account_data(&self, account: Address) -> MarketResult<UserAccountData>;

    /// Max LTV granted to `asset` when used as collateral, in bps.
    fn max_ltv_bps(&self, asset: Address) -> MarketResult<u32>;

    /// Supplied amount of `asset`, in native units.
    fn collateral_balance(&self, account: Address, asset: Address) -> MarketResult<u128>;

    /// Outstanding debt of `asset`, in native units.
    fn debt_balance(&self, account: Address, asset: Address) -> MarketResult<u128>;
}

/// Opaque swap capability. Trusted for price, not for availability.
#[cfg_attr(test, mockall::automock)]
pub trait SwapExecutor: Send + Sync {
    /// Swap `amount_in` of `from` held by `account` into `to`, crediting `account`.
    fn swap(&self, account: Address, from: Address, to: Address, amount_in: u128)
        -> MarketResult<u128>;
}

/// Callback invoked by a [`FlashLender`] in the middle of `flash_loan`.
pub trait FlashLoanReceiver {
    fn receive_flash_loan(
        &self,
        caller: Address,
        assets: &[Address],
        amounts: &[u128],
        fee_amounts: &[u128],
        user_data: &[u8],
    ) -> Result<(), VaultError>;
}

/// Single-transaction lender.
///
/// Sends `amounts` to `recipient`, invokes `receiver`, then pulls back amount
/// plus fee. Any failure of the callback or of the repayment fails the loan.
pub trait FlashLender: Send + Sync {
    fn address(&self) -> Address;

    fn flash_loan(
        &self,
        receiver: &dyn FlashLoanReceiver,
        recipient: Address,
        assets: &[Address],
        amounts: &[u128],
        user_data: &[u8],
    ) -> Result<(), VaultError>;
}

/// Identifier of a journal checkpoint.
pub type Checkpoint = u64;

/// Host-level all-or-nothing rollback over every external effect.
pub trait Journaled: Send + Sync {
    fn checkpoint(&self) -> Checkpoint;

    /// Restore the state captured by `checkpoint` and drop it (and anything newer).
    fn revert_to(&self, checkpoint: Checkpoint);

    /// Keep the current state and drop `checkpoint` (and anything newer).
    fn discard(&self, checkpoint: Checkpoint);
}

/// Registry resolving a configured swap executor address to its implementation.
#[derive(Clone, Default)]
pub struct SwapRouter {
    executors: HashMap<Address, Arc<dyn SwapExecutor>>,
}

impl SwapRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_executor(mut self, address: Address, executor: Arc<dyn SwapExecutor>) -> Self {
        self.executors.insert(address, executor);
        self
    }

    pub fn resolve(&self, address: Address) -> Option<Arc<dyn SwapExecutor>> {
        self.executors.get(&address).cloned()
    }

    pub fn contains(&self, address: Address) -> bool {
        self.executors.contains_key(&address)
    }
}

/// Bundle of every collaborator a vault is wired to.
#[derive(Clone)]
pub struct Venues {
    pub oracle: Arc<dyn PriceOracle>,
    pub assets: Arc<dyn AssetLedger>,
    pub lending: Arc<dyn LendingMarket>,
    pub flash_lender: Arc<dyn FlashLender>,
    pub swaps: SwapRouter,
    pub journal: Arc<dyn Journaled>,
}
