//! Configuration management for the vault keeper.
//!
//! Loads settings from an optional `config.toml` and `DNV__*` environment
//! variables. Human-facing quantities are decimals and are converted to fixed
//! point when the vault is wired up.

use crate::market::{Address, BASE_DECIMALS};
use crate::utils::to_fixed;
use crate::vault::{Settings, DEPOSIT_PAUSED, WITHDRAW_PAUSED};
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Vault parameters owned by the operator
    #[serde(default)]
    pub vault: VaultConfig,
    /// Simulated venue used by paper runs
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Rebalance loop
    #[serde(default)]
    pub keeper: KeeperConfig,
    /// Event journal
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Owner address (hex)
    #[serde(default = "default_owner")]
    pub owner: String,
    /// Smallest single deposit, in reserve tokens
    #[serde(default = "default_min_deposit")]
    pub min_deposit: Decimal,
    /// Cap on cumulative net deposits, in reserve tokens
    #[serde(default = "default_max_deposit")]
    pub max_deposit: Decimal,
    /// Margin kept below the market max LTV, in bps
    #[serde(default = "default_additional_ltv_distance_bps")]
    pub additional_ltv_distance_bps: u32,
    /// Debt drift tolerated before rebalancing, in bps
    #[serde(default = "default_min_rebalance_bps")]
    pub min_rebalance_bps: u32,
    #[serde(default)]
    pub deposit_paused: bool,
    #[serde(default)]
    pub withdraw_paused: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_reserve_symbol")]
    pub reserve_symbol: String,
    #[serde(default = "default_reserve_decimals")]
    pub reserve_decimals: u8,
    /// Opening reserve price in the unit of account
    #[serde(default = "default_reserve_price")]
    pub reserve_price: Decimal,
    #[serde(default = "default_collateral_symbol")]
    pub collateral_symbol: String,
    #[serde(default = "default_collateral_decimals")]
    pub collateral_decimals: u8,
    #[serde(default = "default_collateral_price")]
    pub collateral_price: Decimal,
    /// Max LTV of the collateral asset, in bps
    #[serde(default = "default_collateral_ltv_bps")]
    pub collateral_ltv_bps: u32,
    #[serde(default = "default_collateral_liquidation_threshold_bps")]
    pub collateral_liquidation_threshold_bps: u32,
    #[serde(default = "default_flash_fee_bps")]
    pub flash_fee_bps: u32,
    #[serde(default = "default_swap_slippage_bps")]
    pub swap_slippage_bps: u32,
    /// Reserve deposited by the operator before the keeper starts
    #[serde(default = "default_initial_deposit")]
    pub initial_deposit: Decimal,
    /// Reserve prices applied one per keeper tick
    #[serde(default = "default_price_path")]
    pub price_path: Vec<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeeperConfig {
    /// Seconds between rebalance checks
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Address the keeper calls `rebalance` from (hex)
    #[serde(default = "default_keeper_address")]
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

// Default value functions
fn default_owner() -> String {
    Address::repeat_byte(0x01).to_string()
}

fn default_min_deposit() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn default_max_deposit() -> Decimal {
    Decimal::new(2, 0)
}

fn default_additional_ltv_distance_bps() -> u32 {
    1_000 // 10% below market max LTV
}

fn default_min_rebalance_bps() -> u32 {
    100 // 1% of current debt
}

fn default_reserve_symbol() -> String {
    "wstETH".to_string()
}

fn default_reserve_decimals() -> u8 {
    18
}

fn default_reserve_price() -> Decimal {
    Decimal::new(2000, 0)
}

fn default_collateral_symbol() -> String {
    "USDC".to_string()
}

fn default_collateral_decimals() -> u8 {
    6
}

fn default_collateral_price() -> Decimal {
    Decimal::ONE
}

fn default_collateral_ltv_bps() -> u32 {
    8_000
}

fn default_collateral_liquidation_threshold_bps() -> u32 {
    8_500
}

fn default_flash_fee_bps() -> u32 {
    5
}

fn default_swap_slippage_bps() -> u32 {
    10
}

fn default_initial_deposit() -> Decimal {
    Decimal::ONE
}

fn default_price_path() -> Vec<Decimal> {
    [2000, 1960, 1860, 1900, 2050, 2200, 2100]
        .into_iter()
        .map(Decimal::from)
        .collect()
}

fn default_interval_secs() -> u64 {
    5
}

fn default_keeper_address() -> String {
    Address::repeat_byte(0x0b).to_string()
}

fn default_db_path() -> String {
    "data/vault_journal.db".to_string()
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("DNV"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        self.vault.owner_address()?;
        self.keeper.keeper_address()?;

        anyhow::ensure!(
            self.vault.min_deposit <= self.vault.max_deposit,
            "min_deposit must not exceed max_deposit"
        );

        anyhow::ensure!(
            self.vault.additional_ltv_distance_bps < self.simulation.collateral_ltv_bps,
            "additional_ltv_distance_bps must be below the collateral LTV"
        );

        anyhow::ensure!(
            self.vault.min_rebalance_bps <= 10_000,
            "min_rebalance_bps must be at most 10000"
        );

        anyhow::ensure!(
            self.simulation.collateral_ltv_bps <= self.simulation.collateral_liquidation_threshold_bps
                && self.simulation.collateral_liquidation_threshold_bps <= 10_000,
            "collateral LTV must not exceed its liquidation threshold"
        );

        anyhow::ensure!(
            self.simulation.reserve_price > Decimal::ZERO
                && self.simulation.collateral_price > Decimal::ZERO,
            "prices must be positive"
        );

        anyhow::ensure!(
            self.simulation.price_path.iter().all(|p| *p > Decimal::ZERO),
            "price_path entries must be positive"
        );

        anyhow::ensure!(
            self.simulation.swap_slippage_bps <= 10_000 && self.simulation.flash_fee_bps <= 10_000,
            "fee and slippage must be at most 10000 bps"
        );

        anyhow::ensure!(self.keeper.interval_secs > 0, "interval_secs must be positive");

        Ok(())
    }
}

impl VaultConfig {
    pub fn owner_address(&self) -> Result<Address> {
        self.owner
            .parse()
            .with_context(|| format!("Invalid owner address {}", self.owner))
    }

    /// Vault settings in fixed point for a reserve asset with `reserve_decimals`.
    pub fn to_settings(&self, swap_executor: Address, reserve_decimals: u8) -> Result<Settings> {
        let decimals = reserve_decimals as u32;
        let mut flags = 0;
        if self.deposit_paused {
            flags |= DEPOSIT_PAUSED;
        }
        if self.withdraw_paused {
            flags |= WITHDRAW_PAUSED;
        }

        Ok(Settings {
            swap_executor,
            min_deposit_amount: to_fixed(self.min_deposit, decimals)
                .context("min_deposit out of range")?,
            max_deposit_amount: to_fixed(self.max_deposit, decimals)
                .context("max_deposit out of range")?,
            additional_ltv_distance_bps: self.additional_ltv_distance_bps,
            flags,
            min_rebalance_bps: self.min_rebalance_bps,
        })
    }
}

impl SimulationConfig {
    pub fn price_base(&self, price: Decimal) -> Result<u128> {
        to_fixed(price, BASE_DECIMALS).with_context(|| format!("Price {} out of range", price))
    }

    pub fn initial_deposit_amount(&self) -> Result<u128> {
        to_fixed(self.initial_deposit, self.reserve_decimals as u32)
            .context("initial_deposit out of range")
    }
}

impl KeeperConfig {
    pub fn keeper_address(&self) -> Result<Address> {
        self.address
            .parse()
            .with_context(|| format!("Invalid keeper address {}", self.address))
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            owner: default_owner(),
            min_deposit: default_min_deposit(),
            max_deposit: default_max_deposit(),
            additional_ltv_distance_bps: default_additional_ltv_distance_bps(),
            min_rebalance_bps: default_min_rebalance_bps(),
            deposit_paused: false,
            withdraw_paused: false,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            reserve_symbol: default_reserve_symbol(),
            reserve_decimals: default_reserve_decimals(),
            reserve_price: default_reserve_price(),
            collateral_symbol: default_collateral_symbol(),
            collateral_decimals: default_collateral_decimals(),
            collateral_price: default_collateral_price(),
            collateral_ltv_bps: default_collateral_ltv_bps(),
            collateral_liquidation_threshold_bps: default_collateral_liquidation_threshold_bps(),
            flash_fee_bps: default_flash_fee_bps(),
            swap_slippage_bps: default_swap_slippage_bps(),
            initial_deposit: default_initial_deposit(),
            price_path: default_price_path(),
        }
    }
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            address: default_keeper_address(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_inverted_deposit_bounds() {
        let mut config = Config::default();
        config.vault.min_deposit = dec!(5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_distance_beyond_ltv() {
        let mut config = Config::default();
        config.vault.additional_ltv_distance_bps = 8_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_owner() {
        let mut config = Config::default();
        config.vault.owner = "0x1234".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_settings_conversion() {
        let mut vault = VaultConfig::default();
        vault.withdraw_paused = true;
        let swap = Address::repeat_byte(0x55);

        let settings = vault.to_settings(swap, 18).unwrap();
        assert_eq!(settings.swap_executor, swap);
        assert_eq!(settings.min_deposit_amount, 10_000_000_000_000_000);
        assert_eq!(settings.max_deposit_amount, 2_000_000_000_000_000_000);
        assert_eq!(settings.flags, WITHDRAW_PAUSED);
        assert!(settings.is_withdraw_paused());
    }

    #[test]
    fn test_price_conversion() {
        let simulation = SimulationConfig::default();
        assert_eq!(
            simulation.price_base(dec!(1860.5)).unwrap(),
            186_050_000_000
        );
        assert_eq!(
            simulation.initial_deposit_amount().unwrap(),
            1_000_000_000_000_000_000
        );
    }
}
