//! Fixed-point helpers. Intermediate products are computed in 256 bits.
use ethereum_types::U256;

use crate::EvaluationError;

/// Scale of share prices.
pub const PRICE_SCALE: u128 = 1_000_000_000_000_000_000;
/// Scale of the stake adjustment factor and of accumulated rewards per unit.
pub const STAKING_SCALE: u128 = 1_000_000_000_000;

pub(crate) fn credit(balance: &mut u128, amount: u128) -> Result<(), EvaluationError> {
    *balance = balance
        .checked_add(amount)
        .ok_or(EvaluationError::Overflow)?;
    Ok(())
}

pub(crate) fn debit(
    balance: &mut u128,
    amount: u128,
    what: &'static str,
) -> Result<(), EvaluationError> {
    let available = *balance;
    *balance = available
        .checked_sub(amount)
        .ok_or(EvaluationError::Insufficient {
            what,
            available,
            needed: amount,
        })?;
    Ok(())
}

fn to_u128(value: U256) -> Result<u128, EvaluationError> {
    if value > U256::from(u128::MAX) {
        return Err(EvaluationError::Overflow);
    }
    Ok(value.as_u128())
}

/// `a * b / denominator`, rounded down.
pub fn mul_div(a: u128, b: u128, denominator: u128) -> Result<u128, EvaluationError> {
    if denominator == 0 {
        return Err(EvaluationError::DivisionByZero);
    }
    to_u128(U256::from(a) * U256::from(b) / U256::from(denominator))
}

/// Integer square root by Babylonian iteration, rounded down.
pub fn sqrt(value: U256) -> U256 {
    if value.is_zero() {
        return value;
    }
    // ceil(value / 2) without overflowing at U256::MAX
    let mut next = (value >> 1) + (value & U256::one());
    let mut root = value;
    while next < root {
        root = next;
        next = (value / next + next) >> 1;
    }
    root
}

/// Weight of `shares` staked in a pool with adjustment `factor`:
/// `((SCALE - factor) * shares + sqrt(SCALE^2 * factor * shares)) / SCALE`.
///
/// A zero factor weighs shares linearly, `STAKING_SCALE` weighs them by their square root.
pub fn adjusted_stake(shares: u128, factor: u128) -> Result<u128, EvaluationError> {
    if factor > STAKING_SCALE {
        return Err(EvaluationError::Invalid(
            "stake adjustment factor exceeds its scale",
        ));
    }
    let scale = U256::from(STAKING_SCALE);
    let shares = U256::from(shares);
    let factor = U256::from(factor);
    let linear = (scale - factor) * shares;
    let curved = sqrt(scale * scale * factor * shares);
    to_u128((linear + curved) / scale)
}
