//! Paper-run wiring: a vault on top of a [`SimulatedMarket`] built from config.

use crate::config::Config;
use crate::market::{Address, SimulatedAsset, SimulatedMarket, SwapRouter, Venues};
use crate::vault::{ManagerParams, PositionManager};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

pub const VAULT_ADDRESS: Address = Address::repeat_byte(0x70);
pub const LENDER_ADDRESS: Address = Address::repeat_byte(0x71);
pub const SWAP_ADDRESS: Address = Address::repeat_byte(0x72);
pub const RESERVE_ADDRESS: Address = Address::repeat_byte(0x73);
pub const COLLATERAL_ADDRESS: Address = Address::repeat_byte(0x74);

pub struct SimulatedVault {
    pub market: Arc<SimulatedMarket>,
    pub manager: Arc<PositionManager>,
    price_path: Vec<u128>,
}

impl SimulatedVault {
    /// List both assets, wire the vault and seed it with the owner's initial deposit.
    pub fn from_config(config: &Config) -> Result<Self> {
        let sim = &config.simulation;
        let market = SimulatedMarket::new(LENDER_ADDRESS)
            .with_flash_fee_bps(sim.flash_fee_bps)
            .with_swap_slippage_bps(sim.swap_slippage_bps);
        market.list_asset(
            RESERVE_ADDRESS,
            SimulatedAsset::new(&sim.reserve_symbol, sim.reserve_decimals, sim.price_base(sim.reserve_price)?),
        );
        market.list_asset(
            COLLATERAL_ADDRESS,
            SimulatedAsset::new(
                &sim.collateral_symbol,
                sim.collateral_decimals,
                sim.price_base(sim.collateral_price)?,
            )
            .with_collateral_params(sim.collateral_ltv_bps, sim.collateral_liquidation_threshold_bps),
        );
        let market = Arc::new(market);

        let venues = Venues {
            oracle: market.clone(),
            assets: market.clone(),
            lending: market.clone(),
            flash_lender: market.clone(),
            swaps: SwapRouter::new().with_executor(SWAP_ADDRESS, market.clone()),
            journal: market.clone(),
        };

        let owner = config.vault.owner_address()?;
        let params = ManagerParams {
            address: VAULT_ADDRESS,
            owner,
            reserve_asset: RESERVE_ADDRESS,
            collateral_asset: COLLATERAL_ADDRESS,
            settings: config.vault.to_settings(SWAP_ADDRESS, sim.reserve_decimals)?,
        };
        let manager = Arc::new(PositionManager::new(params, venues).context("Failed to create vault")?);

        let initial = sim.initial_deposit_amount()?;
        if initial > 0 {
            market.mint(RESERVE_ADDRESS, owner, initial)?;
            let shares = manager
                .deposit(owner, initial, owner)
                .context("Initial deposit failed")?;
            info!(amount = initial, shares, "Seeded vault with initial deposit");
        }

        let price_path = sim
            .price_path
            .iter()
            .map(|p| sim.price_base(*p))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            market,
            manager,
            price_path,
        })
    }

    /// Apply the reserve price for `tick`. Returns `false` once the path is exhausted.
    pub fn apply_tick(&self, tick: u64) -> Result<bool> {
        let Some(price) = usize::try_from(tick).ok().and_then(|i| self.price_path.get(i)) else {
            return Ok(false);
        };
        self.market.set_price(RESERVE_ADDRESS, *price)?;
        info!(tick, price = *price, "Applied simulated reserve price");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_default_config() {
        let config = Config::default();
        let sim = SimulatedVault::from_config(&config).unwrap();
        let owner = config.vault.owner_address().unwrap();

        assert!(sim.manager.shares_of(owner) > 0);
        assert_eq!(sim.manager.owner(), owner);
        assert!(sim.manager.total_balance_base().unwrap() > 0);
    }

    #[test]
    fn test_price_path_is_finite() {
        let mut config = Config::default();
        config.simulation.price_path = vec![rust_decimal_macros::dec!(1900)];
        let sim = SimulatedVault::from_config(&config).unwrap();

        assert!(sim.apply_tick(0).unwrap());
        assert_eq!(sim.market.price(RESERVE_ADDRESS).unwrap(), 1_900_00000000);
        assert!(!sim.apply_tick(1).unwrap());
    }
}
