//! Vault failure kinds.
//!
//! Each variant carries a stable `DNV-xx` tag (see [`VaultError::code`]) so that
//! logs and persisted events can be matched against a fixed vocabulary.

use crate::market::MarketError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VaultError {
    #[error("operation disabled by flags")]
    OperationDisabledByFlags,

    #[error("flash loan callback from an untrusted caller")]
    OnlyFlashLoanLender,

    #[error("flash loan delivered unexpected assets or amounts")]
    IncorrectFlashLoanTokenReceived,

    #[error("flash loan callback without a pending action")]
    UnknownFlashloanMode,

    #[error("incorrect deposit or withdrawal amount")]
    IncorrectDepositOrWithdrawalAmount,

    #[error("withdrawal attempted while a flash leg is outstanding")]
    ContractNotReadyForWithdrawal,

    #[error("position is closed")]
    PositionClosed,

    #[error("position is already within the rebalance band")]
    PositionUnchanged,

    #[error("flash loan action does not match the pending action")]
    ImpossibleMode,

    #[error("caller is not the owner")]
    Unauthorized,

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("re-entrant call while a transaction is open")]
    Reentrancy,

    #[error("insufficient shares: needed {needed}, available {available}")]
    InsufficientShares { needed: u128, available: u128 },

    #[error("arithmetic overflow")]
    MathOverflow,

    #[error("market: {0}")]
    Market(#[from] MarketError),
}

impl VaultError {
    /// Stable error tag.
    pub fn code(&self) -> &'static str {
        match self {
            VaultError::OperationDisabledByFlags => "DNV-01",
            VaultError::OnlyFlashLoanLender => "DNV-02",
            VaultError::IncorrectFlashLoanTokenReceived => "DNV-03",
            VaultError::UnknownFlashloanMode => "DNV-04",
            VaultError::IncorrectDepositOrWithdrawalAmount => "DNV-05",
            VaultError::ContractNotReadyForWithdrawal => "DNV-06",
            VaultError::PositionClosed => "DNV-07",
            VaultError::PositionUnchanged => "DNV-08",
            VaultError::ImpossibleMode => "DNV-09",
            VaultError::Unauthorized => "DNV-10",
            VaultError::InvalidSettings(_) => "DNV-11",
            VaultError::Reentrancy => "DNV-12",
            VaultError::InsufficientShares { .. } => "DNV-13",
            VaultError::MathOverflow => "DNV-14",
            VaultError::Market(_) => "DNV-15",
        }
    }
}

pub type VaultResult<T> = Result<T, VaultError>;

/// Lift an `Option` produced by checked arithmetic into a vault result.
pub(crate) trait OrOverflow<T> {
    fn or_overflow(self) -> VaultResult<T>;
}

impl<T> OrOverflow<T> for Option<T> {
    fn or_overflow(self) -> VaultResult<T> {
        self.ok_or(VaultError::MathOverflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::Address;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(VaultError::OperationDisabledByFlags.code(), "DNV-01");
        assert_eq!(VaultError::ImpossibleMode.code(), "DNV-09");
        assert_eq!(
            VaultError::from(MarketError::UnknownAsset(Address::ZERO)).code(),
            "DNV-15"
        );
    }

    #[test]
    fn test_market_error_is_wrapped() {
        let err: VaultError = MarketError::HealthFactorTooLow.into();
        assert_eq!(err, VaultError::Market(MarketError::HealthFactorTooLow));
        assert!(err.to_string().contains("health factor"));
    }
}
