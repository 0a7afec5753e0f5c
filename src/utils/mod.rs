/*
 * Utility functions and helpers
 */

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;
use crate::models::{GatewayError, Result};

const MAX_DECIMAL_SCALE: u32 = 28;

pub fn calculate_price_impact(
    amount_in: Decimal,
    amount_out: Decimal,
    spot_price: Decimal,
) -> Result<Decimal> {
    let expected_out = amount_in
        .checked_mul(spot_price)
        .ok_or_else(|| overflow("price impact", amount_in, spot_price))?;
    if expected_out == Decimal::ZERO {
        return Ok(Decimal::ZERO);
    }
    let impact = expected_out
        .checked_sub(amount_out)
        .and_then(|shortfall| shortfall.checked_div(expected_out))
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .ok_or_else(|| overflow("price impact", amount_out, expected_out))?;
    Ok(impact.max(Decimal::ZERO))
}

/// Quote-token-per-base-token ratio, failing instead of overflowing on
/// extreme amounts.
pub fn checked_ratio(numerator: Decimal, denominator: Decimal) -> Result<Decimal> {
    numerator
        .checked_div(denominator)
        .ok_or_else(|| overflow("ratio", numerator, denominator))
}

fn overflow(what: &str, a: Decimal, b: Decimal) -> GatewayError {
    GatewayError::CalculationError(format!("{what} of {a} and {b} is out of range"))
}

pub fn format_address(address: &str) -> Result<String> {
    let valid = address.starts_with("0x")
        && address.len() == 42
        && address[2..].chars().all(|c| c.is_ascii_hexdigit());
    if !valid {
        return Err(GatewayError::BadRequest(format!("Invalid address format: {address}")));
    }
    Ok(address.to_lowercase())
}

#[must_use]
pub fn is_solana_address(address: &str) -> bool {
    let trimmed = address.trim();
    (32..=44).contains(&trimmed.len())
        && bs58::decode(trimmed)
            .into_vec()
            .is_ok_and(|bytes| bytes.len() == 32)
}

/// Converts a human amount to base units, truncating digits beyond the
/// token's precision.
pub fn to_raw_amount(amount: Decimal, decimals: u8) -> Result<BigUint> {
    if amount.is_sign_negative() {
        return Err(GatewayError::CalculationError(format!(
            "Cannot convert negative amount {amount} to base units"
        )));
    }
    let truncated = amount.round_dp_with_strategy(u32::from(decimals), RoundingStrategy::ToZero);
    let mantissa = u128::try_from(truncated.mantissa())
        .map_err(|e| GatewayError::CalculationError(format!("Mantissa conversion error: {e}")))?;
    let exponent = u32::from(decimals) - truncated.scale();
    Ok(BigUint::from(mantissa) * BigUint::from(10u32).pow(exponent))
}

pub fn to_raw_u64(amount: Decimal, decimals: u8) -> Result<u64> {
    to_raw_amount(amount, decimals)?
        .to_u64()
        .ok_or_else(|| GatewayError::CalculationError(format!("Amount {amount} exceeds u64 range")))
}

/// Converts base units back to a human amount. Values beyond the precision of
/// `Decimal` lose their least significant digits.
pub fn raw_to_decimal(raw: &BigUint, decimals: u8) -> Result<Decimal> {
    let limit = BigUint::from(1u128 << 96);
    let ten = BigUint::from(10u32);
    let mut value = raw.clone();
    let mut scale = u32::from(decimals);

    while value >= limit || scale > MAX_DECIMAL_SCALE {
        if scale == 0 {
            return Err(GatewayError::CalculationError(format!(
                "Amount {raw} is too large to represent"
            )));
        }
        value /= &ten;
        scale -= 1;
    }

    let mantissa = value
        .to_i128()
        .ok_or_else(|| GatewayError::CalculationError(format!("Amount {raw} overflows i128")))?;
    Decimal::try_from_i128_with_scale(mantissa, scale)
        .map(|d| d.normalize())
        .map_err(|e| GatewayError::CalculationError(format!("Decimal conversion error: {e}")))
}

pub fn raw_str_to_decimal(raw: &str, decimals: u8) -> Result<Decimal> {
    let value = BigUint::from_str(raw.trim())
        .map_err(|e| GatewayError::CalculationError(format!("Invalid raw amount '{raw}': {e}")))?;
    raw_to_decimal(&value, decimals)
}

#[must_use]
pub fn u256_to_biguint(value: ethers::types::U256) -> BigUint {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    BigUint::from_bytes_be(&bytes)
}

pub fn biguint_to_u256(value: &BigUint) -> Result<ethers::types::U256> {
    let bytes = value.to_bytes_be();
    if bytes.len() > 32 {
        return Err(GatewayError::CalculationError(format!("Amount {value} exceeds 256 bits")));
    }
    if value.is_zero() {
        return Ok(ethers::types::U256::zero());
    }
    Ok(ethers::types::U256::from_big_endian(&bytes))
}

pub fn u256_to_decimal(value: ethers::types::U256, decimals: u8) -> Result<Decimal> {
    raw_to_decimal(&u256_to_biguint(value), decimals)
}

/// Lower bound after tolerating `slippage_pct` percent of adverse movement.
pub fn apply_slippage_down(amount: Decimal, slippage_pct: Decimal) -> Result<Decimal> {
    slippage_factor(slippage_pct, false)
        .and_then(|factor| amount.checked_mul(factor))
        .ok_or_else(|| overflow("slippage bound", amount, slippage_pct))
}

pub fn apply_slippage_up(amount: Decimal, slippage_pct: Decimal) -> Result<Decimal> {
    slippage_factor(slippage_pct, true)
        .and_then(|factor| amount.checked_mul(factor))
        .ok_or_else(|| overflow("slippage bound", amount, slippage_pct))
}

fn slippage_factor(slippage_pct: Decimal, up: bool) -> Option<Decimal> {
    let fraction = slippage_pct.checked_div(Decimal::ONE_HUNDRED)?;
    if up {
        Decimal::ONE.checked_add(fraction)
    } else {
        Decimal::ONE.checked_sub(fraction)
    }
}

/// Slippage in basis points, as most DEX APIs expect it.
pub fn slippage_bps(slippage_pct: Decimal) -> Result<u16> {
    (slippage_pct * Decimal::ONE_HUNDRED)
        .round()
        .to_u16()
        .ok_or_else(|| GatewayError::BadRequest(format!("Invalid slippage: {slippage_pct}")))
}

pub fn parse_decimal(field: &str, value: &str) -> Result<Decimal> {
    Decimal::from_str(value.trim())
        .or_else(|_| Decimal::from_scientific(value.trim()))
        .map_err(|e| GatewayError::BadRequest(format!("Invalid {field}: {e}")))
}
