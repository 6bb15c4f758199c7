//! Conversions between human-facing decimals and on-ledger fixed point.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Scale `value` to an integer with `decimals` fractional digits, truncating.
///
/// Returns `None` for negative values or when the result does not fit.
pub fn to_fixed(value: Decimal, decimals: u32) -> Option<u128> {
    if value.is_sign_negative() {
        return None;
    }
    let scale = Decimal::try_from_i128_with_scale(10i128.checked_pow(decimals)?, 0).ok()?;
    value.checked_mul(scale)?.trunc().to_u128()
}

/// Interpret `amount` as a fixed-point number with `decimals` fractional digits.
pub fn from_fixed(amount: u128, decimals: u32) -> Option<Decimal> {
    let amount = i128::try_from(amount).ok()?;
    Decimal::try_from_i128_with_scale(amount, decimals)
        .ok()
        .map(|value| value.normalize())
}

/// Basis points as a fraction (50 bp = 0.005).
pub fn from_basis_points(bps: u32) -> Decimal {
    Decimal::from(bps) / dec!(10000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_fixed() {
        assert_eq!(to_fixed(dec!(1), 18), Some(1_000_000_000_000_000_000));
        assert_eq!(to_fixed(dec!(2000), 8), Some(200_000_000_000));
        assert_eq!(to_fixed(dec!(0.0000001), 6), Some(0));
        assert_eq!(to_fixed(dec!(-1), 6), None);
    }

    #[test]
    fn test_from_fixed() {
        assert_eq!(from_fixed(150_000_000, 8), Some(dec!(1.5)));
        assert_eq!(from_fixed(1, 18), Some(dec!(0.000000000000000001)));
        assert_eq!(from_fixed(u128::MAX, 0), None);
    }

    #[test]
    fn test_basis_points() {
        assert_eq!(from_basis_points(50), dec!(0.005));
        assert_eq!(from_basis_points(10_000), dec!(1));
    }
}
