//! Fixed-point helpers shared by the ledger, the sizing engine and the legs.
//!
//! Every conversion rounds toward zero and reports overflow as `None`.

/// Basis-point denominator (100% == 10 000).
pub const PERCENTAGE_FACTOR: u32 = 10_000;

/// `value * bps / 10 000`, floored.
pub fn percent_mul(value: u128, bps: u32) -> Option<u128> {
    if value == 0 || bps == 0 {
        return Some(0);
    }
    mul_div(value, bps as u128, PERCENTAGE_FACTOR as u128)
}

/// `a * b / denominator`, floored. `None` on overflow or a zero denominator.
pub fn mul_div(a: u128, b: u128, denominator: u128) -> Option<u128> {
    if denominator == 0 {
        return None;
    }
    a.checked_mul(b).map(|product| product / denominator)
}

pub fn pow10(decimals: u8) -> Option<u128> {
    10u128.checked_pow(decimals as u32)
}

/// Base value of `amount` native units priced at `price` base units per whole token.
pub fn base_value(amount: u128, price: u128, decimals: u8) -> Option<u128> {
    mul_div(amount, price, pow10(decimals)?)
}

/// Native units worth `base` at `price`. `None` when the price is zero.
pub fn amount_for_base(base: u128, price: u128, decimals: u8) -> Option<u128> {
    mul_div(base, pow10(decimals)?, price)
}

/// Signed difference `a - b` of two unsigned quantities.
pub fn signed_delta(a: u128, b: u128) -> Option<i128> {
    let a = i128::try_from(a).ok()?;
    let b = i128::try_from(b).ok()?;
    a.checked_sub(b)
}
