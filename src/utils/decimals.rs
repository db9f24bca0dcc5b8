use anyhow::{anyhow, Result};
use rust_decimal::Decimal;

/// Raw smallest-unit amount to a whole-unit decimal, e.g. 5_000_000 with 6 decimals is 5.
pub fn raw_to_decimal(amount: u128, decimals: u8) -> Result<Decimal> {
    let amount = i128::try_from(amount).map_err(|_| anyhow!("amount {amount} out of range"))?;
    Decimal::try_from_i128_with_scale(amount, decimals as u32)
        .map(|d| d.normalize())
        .map_err(|e| anyhow!("amount {amount} with {decimals} decimals not representable: {e}"))
}

/// Raw amount kept in an integer NUMERIC column.
pub fn raw_to_numeric(amount: u128) -> Result<Decimal> {
    raw_to_decimal(amount, 0)
}

pub fn numeric_to_raw(amount: &Decimal) -> Result<u128> {
    if amount.is_sign_negative() || amount.fract() != Decimal::ZERO {
        return Err(anyhow!("{amount} is not a raw integer amount"));
    }
    amount
        .mantissa()
        .checked_div(10i128.pow(amount.scale()))
        .and_then(|m| u128::try_from(m).ok())
        .ok_or_else(|| anyhow!("{amount} out of range"))
}

pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / 1_000_000_000.0
}
