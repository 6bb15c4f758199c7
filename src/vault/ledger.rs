//! Share accounting for holder claims on the position.
//!
//! Shares are plain integers. A holder's claim on the position is
//! `shares * total_base / total_supply`, floored.

use super::error::{OrOverflow, VaultError, VaultResult};
use super::math::mul_div;
use crate::market::Address;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShareLedger {
    balances: HashMap<Address, u128>,
    total_supply: u128,
}

impl ShareLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shares_of(&self, holder: Address) -> u128 {
        self.balances.get(&holder).copied().unwrap_or(0)
    }

    pub fn total_supply(&self) -> u128 {
        self.total_supply
    }

    /// Holders with a non-zero balance.
    pub fn holders(&self) -> impl Iterator<Item = (Address, u128)> + '_ {
        self.balances
            .iter()
            .filter(|(_, shares)| **shares > 0)
            .map(|(holder, shares)| (*holder, *shares))
    }

    /// Shares to mint for `contributed` base value added on top of `total_before`.
    ///
    /// The first deposit (or any deposit into a worthless position) mints 1:1.
    pub fn shares_for_contribution(&self, contributed: u128, total_before: u128) -> VaultResult<u128> {
        if self.total_supply == 0 || total_before == 0 {
            return Ok(contributed);
        }
        mul_div(contributed, self.total_supply, total_before).or_overflow()
    }

    /// Base value claimed by `holder` given the position's `total_base`.
    pub fn claim(&self, holder: Address, total_base: u128) -> VaultResult<u128> {
        self.claim_for_shares(self.shares_of(holder), total_base)
    }

    pub fn claim_for_shares(&self, shares: u128, total_base: u128) -> VaultResult<u128> {
        if self.total_supply == 0 {
            return Ok(0);
        }
        mul_div(shares, total_base, self.total_supply).or_overflow()
    }

    pub fn mint(&mut self, to: Address, shares: u128) -> VaultResult<()> {
        self.total_supply = self.total_supply.checked_add(shares).or_overflow()?;
        let balance = self.balances.entry(to).or_insert(0);
        *balance = balance.checked_add(shares).or_overflow()?;
        Ok(())
    }

    pub fn burn(&mut self, from: Address, shares: u128) -> VaultResult<()> {
        let available = self.shares_of(from);
        if available < shares {
            return Err(VaultError::InsufficientShares {
                needed: shares,
                available,
            });
        }
        self.balances.insert(from, available - shares);
        self.total_supply -= shares;
        Ok(())
    }

    pub fn transfer(&mut self, from: Address, to: Address, shares: u128) -> VaultResult<()> {
        self.burn(from, shares)?;
        self.mint(to, shares)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: Address = Address::repeat_byte(0xa1);
    const BOB: Address = Address::repeat_byte(0xb0);

    #[test]
    fn test_first_mint_is_one_to_one() {
        let ledger = ShareLedger::new();
        assert_eq!(ledger.shares_for_contribution(500, 0).unwrap(), 500);
    }

    #[test]
    fn test_proportional_mint() {
        let mut ledger = ShareLedger::new();
        ledger.mint(ALICE, 1_000).unwrap();
        // Position doubled in value since the first deposit.
        assert_eq!(ledger.shares_for_contribution(2_000, 2_000).unwrap(), 1_000);
        assert_eq!(ledger.shares_for_contribution(2_000, 4_000).unwrap(), 500);
    }

    #[test]
    fn test_claims_sum_to_total() {
        let mut ledger = ShareLedger::new();
        ledger.mint(ALICE, 1_000).unwrap();
        ledger.mint(BOB, 2_000).unwrap();

        assert_eq!(ledger.claim(ALICE, 9_000).unwrap(), 3_000);
        assert_eq!(ledger.claim(BOB, 9_000).unwrap(), 6_000);
        assert_eq!(ledger.claim(Address::ZERO, 9_000).unwrap(), 0);
        assert_eq!(ledger.holders().count(), 2);
    }

    #[test]
    fn test_claim_without_supply_is_zero() {
        assert_eq!(ShareLedger::new().claim(ALICE, 1_000).unwrap(), 0);
    }

    #[test]
    fn test_burn_and_transfer() {
        let mut ledger = ShareLedger::new();
        ledger.mint(ALICE, 100).unwrap();

        ledger.transfer(ALICE, BOB, 40).unwrap();
        assert_eq!(ledger.shares_of(ALICE), 60);
        assert_eq!(ledger.shares_of(BOB), 40);
        assert_eq!(ledger.total_supply(), 100);

        assert_eq!(
            ledger.burn(BOB, 41),
            Err(VaultError::InsufficientShares {
                needed: 41,
                available: 40
            })
        );

        ledger.burn(BOB, 40).unwrap();
        assert_eq!(ledger.total_supply(), 60);
        assert_eq!(ledger.holders().count(), 1);
    }
}
