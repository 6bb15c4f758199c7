//! Shared types for the external venues the vault talks to.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of fractional digits of the base unit every price is quoted in.
pub const BASE_DECIMALS: u32 = 8;

/// Health factor scale used by the lending market (1e18 == 1.0).
pub const HEALTH_FACTOR_ONE: u128 = 1_000_000_000_000_000_000;

/// 20-byte account / asset identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address([u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    /// Address with every byte set to `byte`. Handy for fixtures.
    pub const fn repeat_byte(byte: u8) -> Self {
        Self([byte; 20])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressParseError {
    #[error("invalid hex: {0}")]
    Hex(String),
    #[error("expected 20 bytes, got {0}")]
    Length(usize),
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw).map_err(|e| AddressParseError::Hex(e.to_string()))?;
        let bytes: [u8; 20] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| AddressParseError::Length(bytes.len()))?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for Address {
    type Error = AddressParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

/// Aggregated account health as reported by the lending market.
///
/// All `*_base` values are in base units (8 decimals). `ltv` and
/// `liquidation_threshold` are basis points. `health_factor` is scaled by
/// [`HEALTH_FACTOR_ONE`] and is `u128::MAX` for an account without debt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserAccountData {
    pub total_collateral_base: u128,
    pub total_debt_base: u128,
    pub available_borrows_base: u128,
    pub health_factor: u128,
    pub ltv: u32,
    pub liquidation_threshold: u32,
}

impl UserAccountData {
    /// True when the market would allow the account to be liquidated.
    pub fn is_liquidatable(&self) -> bool {
        self.total_debt_base > 0 && self.health_factor < HEALTH_FACTOR_ONE
    }
}

/// Failures raised by external venues.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MarketError {
    #[error("unknown asset {0}")]
    UnknownAsset(Address),

    #[error("no price for asset {0}")]
    PriceUnavailable(Address),

    #[error("insufficient {asset} balance for {holder}: needed {needed}, available {available}")]
    InsufficientBalance {
        asset: Address,
        holder: Address,
        needed: u128,
        available: u128,
    },

    #[error("borrow of {requested_base} base exceeds available {available_base} base")]
    BorrowCapacityExceeded {
        requested_base: u128,
        available_base: u128,
    },

    #[error("withdrawal would drop health factor below 1")]
    HealthFactorTooLow,

    #[error("nothing to repay for asset {0}")]
    NothingToRepay(Address),

    #[error("no swap executor registered at {0}")]
    UnknownSwapExecutor(Address),

    #[error("swap failed: {0}")]
    SwapFailed(String),

    #[error("flash loan of {amount} {asset} plus fee {fee} was not repaid")]
    FlashLoanNotRepaid {
        asset: Address,
        amount: u128,
        fee: u128,
    },

    #[error("flash loan arguments are malformed")]
    MalformedFlashLoan,

    #[error("account is healthy and cannot be liquidated")]
    NotLiquidatable,

    #[error("arithmetic overflow")]
    Overflow,
}

pub type MarketResult<T> = Result<T, MarketError>;
