/*
 * Uniswap types: swap plans carried by quotes and V3 tick/price math
 */

use ethers::types::U256;
use num_traits::ToPrimitive;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use crate::models::{GatewayError, Result};
use crate::utils::{apply_slippage_down, u256_to_biguint};

pub const MIN_TICK: i32 = -887_272;
pub const MAX_TICK: i32 = 887_272;

/// Router call fixed at quote time. Raw amounts are base-unit integers in
/// decimal notation; `limit_raw` is the minimum output for exact-in swaps
/// and the maximum input for exact-out swaps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniswapSwapPlan {
    pub router: String,
    pub path: Vec<String>,
    pub exact_in: bool,
    pub amount_in_raw: String,
    pub amount_out_raw: String,
    pub limit_raw: String,
}

impl UniswapSwapPlan {
    pub fn amount_in(&self) -> Result<U256> {
        parse_raw("amountInRaw", &self.amount_in_raw)
    }

    pub fn amount_out(&self) -> Result<U256> {
        parse_raw("amountOutRaw", &self.amount_out_raw)
    }

    pub fn limit(&self) -> Result<U256> {
        parse_raw("limitRaw", &self.limit_raw)
    }

    /// Input amount the router may pull from the wallet.
    pub fn max_input(&self) -> Result<U256> {
        if self.exact_in {
            self.amount_in()
        } else {
            self.limit()
        }
    }
}

pub fn parse_raw(field: &str, raw: &str) -> Result<U256> {
    U256::from_dec_str(raw.trim())
        .map_err(|e| GatewayError::BadRequest(format!("Invalid {field} '{raw}': {e}")))
}

fn decimal_scale(decimals0: u8, decimals1: u8) -> f64 {
    10f64.powi(i32::from(decimals0) - i32::from(decimals1))
}

fn f64_to_price(value: f64) -> Result<Decimal> {
    if !value.is_finite() || value < 0.0 {
        return Err(GatewayError::CalculationError(format!("Invalid price {value}")));
    }
    // Prices at the extreme ticks do not fit in a Decimal.
    let price = Decimal::from_f64(value).unwrap_or(if value > 1.0 { Decimal::MAX } else { Decimal::ZERO });
    Ok(price.normalize())
}

/// Human price of token0 in token1 from a pool's `sqrtPriceX96`.
pub fn sqrt_price_x96_to_price(sqrt_price_x96: U256, decimals0: u8, decimals1: u8) -> Result<Decimal> {
    let sqrt = u256_to_biguint(sqrt_price_x96)
        .to_f64()
        .ok_or_else(|| GatewayError::CalculationError("sqrtPriceX96 out of range".to_string()))?
        / 2f64.powi(96);
    f64_to_price(sqrt * sqrt * decimal_scale(decimals0, decimals1))
}

/// Human price of token0 in token1 at `tick`.
pub fn tick_to_price(tick: i32, decimals0: u8, decimals1: u8) -> Result<Decimal> {
    f64_to_price(1.0001f64.powi(tick) * decimal_scale(decimals0, decimals1))
}

/// Greatest tick whose price does not exceed `price` (token0 in token1).
pub fn price_to_tick(price: Decimal, decimals0: u8, decimals1: u8) -> Result<i32> {
    let human = price
        .to_f64()
        .filter(|p| *p > 0.0)
        .ok_or_else(|| GatewayError::BadRequest(format!("Price must be positive, got {price}")))?;
    let raw = human / decimal_scale(decimals0, decimals1);
    let tick = (raw.ln() / 1.0001f64.ln()).floor();
    #[allow(clippy::cast_possible_truncation)]
    let tick = tick.clamp(f64::from(MIN_TICK), f64::from(MAX_TICK)) as i32;
    Ok(tick)
}

/// Snaps `tick` to a multiple of `spacing`, downwards or upwards, within the
/// usable tick range.
#[must_use]
pub fn align_tick(tick: i32, spacing: i32, round_up: bool) -> i32 {
    let spacing = spacing.max(1);
    let mut aligned = tick.div_euclid(spacing) * spacing;
    if round_up && aligned != tick {
        aligned += spacing;
    }
    let min_usable = (MIN_TICK / spacing) * spacing;
    let max_usable = (MAX_TICK / spacing) * spacing;
    aligned.clamp(min_usable, max_usable)
}

/// Tick range covering `[lower, upper]`, never empty.
pub fn range_to_ticks(
    lower: Decimal,
    upper: Decimal,
    decimals0: u8,
    decimals1: u8,
    spacing: i32,
) -> Result<(i32, i32)> {
    let lower_tick = align_tick(price_to_tick(lower, decimals0, decimals1)?, spacing, false);
    let mut upper_tick = align_tick(price_to_tick(upper, decimals0, decimals1)?, spacing, true);
    if upper_tick <= lower_tick {
        upper_tick = lower_tick + spacing.max(1);
    }
    Ok((lower_tick, upper_tick))
}

/// Pool fee in hundredths of a bip as a percentage (3000 -> 0.3).
#[must_use]
pub fn fee_to_pct(fee: u32) -> Decimal {
    Decimal::from(fee) / Decimal::from(10_000)
}

pub fn pct_to_fee(fee_pct: Decimal) -> Result<u32> {
    (fee_pct * Decimal::from(10_000))
        .round()
        .to_u32()
        .ok_or_else(|| GatewayError::CalculationError(format!("Invalid pool fee {fee_pct}%")))
}

fn u256_to_f64(value: U256) -> Result<f64> {
    u256_to_biguint(value)
        .to_f64()
        .ok_or_else(|| GatewayError::CalculationError(format!("{value} out of range")))
}

fn sqrt_price_at(tick: i32) -> f64 {
    1.0001f64.powf(f64::from(tick) / 2.0)
}

/// Current and bounding sqrt prices of a V3 position, in raw units.
#[derive(Debug, Clone, Copy)]
pub struct SqrtRange {
    current: f64,
    lower: f64,
    upper: f64,
}

impl SqrtRange {
    pub fn new(sqrt_price_x96: U256, tick_lower: i32, tick_upper: i32) -> Result<Self> {
        if tick_lower >= tick_upper {
            return Err(GatewayError::CalculationError(format!(
                "Empty tick range [{tick_lower}, {tick_upper}]"
            )));
        }
        Ok(Self {
            current: u256_to_f64(sqrt_price_x96)? / 2f64.powi(96),
            lower: sqrt_price_at(tick_lower),
            upper: sqrt_price_at(tick_upper),
        })
    }

    /// Liquidity minted by depositing at most `amount0` and `amount1`.
    fn liquidity_for(&self, amount0: f64, amount1: f64) -> f64 {
        let Self { current, lower, upper } = *self;
        if current <= lower {
            amount0 * lower * upper / (upper - lower)
        } else if current >= upper {
            amount1 / (upper - lower)
        } else {
            (amount0 * current * upper / (upper - current)).min(amount1 / (current - lower))
        }
    }

    /// Token amounts `liquidity` is worth at the current price.
    fn amounts_for(&self, liquidity: f64) -> (f64, f64) {
        let Self { current, lower, upper } = *self;
        if current <= lower {
            (liquidity * (upper - lower) / (lower * upper), 0.0)
        } else if current >= upper {
            (0.0, liquidity * (upper - lower))
        } else {
            (liquidity * (upper - current) / (current * upper), liquidity * (current - lower))
        }
    }

    /// `amount0Min`/`amount1Min` for a mint or increase of the desired
    /// amounts. Only the share the current price lets the pool take is
    /// expected; the excess of the other token stays in the wallet.
    pub fn deposit_minimums(&self, amount0: U256, amount1: U256, slippage_pct: Decimal) -> Result<(U256, U256)> {
        let liquidity = self.liquidity_for(u256_to_f64(amount0)?, u256_to_f64(amount1)?);
        let (used0, used1) = self.amounts_for(liquidity);
        Ok((
            minimum(used0, amount0, slippage_pct)?,
            minimum(used1, amount1, slippage_pct)?,
        ))
    }

    /// `amount0Min`/`amount1Min` for withdrawing `liquidity`.
    pub fn withdrawal_minimums(&self, liquidity: U256, slippage_pct: Decimal) -> Result<(U256, U256)> {
        let (out0, out1) = self.amounts_for(u256_to_f64(liquidity)?);
        Ok((
            minimum(out0, U256::MAX, slippage_pct)?,
            minimum(out1, U256::MAX, slippage_pct)?,
        ))
    }
}

/// `expected` raw units less `slippage_pct` percent, rounded down and never
/// above `cap`.
fn minimum(expected: f64, cap: U256, slippage_pct: Decimal) -> Result<U256> {
    let keep = apply_slippage_down(Decimal::ONE, slippage_pct)?
        .to_f64()
        .ok_or_else(|| GatewayError::CalculationError(format!("Invalid slippage {slippage_pct}%")))?;
    let value = (expected * keep).floor();
    if !value.is_finite() || value < 1.0 {
        return Ok(U256::zero());
    }
    Ok(U256::from_dec_str(&format!("{value:.0}")).map_or(cap, |v| v.min(cap)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn unit_price_sits_at_tick_zero() {
        assert_eq!(price_to_tick(Decimal::ONE, 18, 18).unwrap(), 0);
        assert_eq!(tick_to_price(0, 18, 18).unwrap(), Decimal::ONE);
        assert_eq!(price_to_tick(Decimal::from(2), 18, 18).unwrap(), 6931);
    }

    #[test]
    fn decimals_shift_the_tick() {
        // 1 USDC (6) = 0.0005 WETH (18)
        let price = Decimal::from_str("0.0005").unwrap();
        let tick = price_to_tick(price, 6, 18).unwrap();
        let back = tick_to_price(tick, 6, 18).unwrap();
        assert!(back <= price);
        assert!(tick_to_price(tick + 1, 6, 18).unwrap() > price);
        assert!(tick > 0);
    }

    #[test]
    fn aligns_negative_ticks_by_floor_and_ceiling() {
        assert_eq!(align_tick(-15, 10, false), -20);
        assert_eq!(align_tick(-15, 10, true), -10);
        assert_eq!(align_tick(120, 60, true), 120);
        assert_eq!(align_tick(MAX_TICK, 60, true), 887_220);
    }

    #[test]
    fn ranges_are_never_empty() {
        let (lower, upper) =
            range_to_ticks(Decimal::ONE, Decimal::from_str("1.00001").unwrap(), 18, 18, 60).unwrap();
        assert_eq!(lower, 0);
        assert_eq!(upper, 60);
    }

    #[test]
    fn sqrt_price_squares() {
        let q96 = U256::from(2).pow(U256::from(96));
        assert_eq!(sqrt_price_x96_to_price(q96, 18, 18).unwrap(), Decimal::ONE);
        assert_eq!(sqrt_price_x96_to_price(q96 * 2, 18, 18).unwrap(), Decimal::from(4));
    }

    #[test]
    fn fee_tiers() {
        assert_eq!(fee_to_pct(3000), Decimal::from_str("0.3").unwrap());
        assert_eq!(pct_to_fee(Decimal::from_str("0.05").unwrap()).unwrap(), 500);
    }

    #[test]
    fn plans_expose_the_pullable_input() {
        let plan = UniswapSwapPlan {
            router: "0x7a250d5630b4cf539739df2c5dacb4c659f2488d".into(),
            path: vec![],
            exact_in: false,
            amount_in_raw: "100".into(),
            amount_out_raw: "5".into(),
            limit_raw: "101".into(),
        };
        assert_eq!(plan.max_input().unwrap(), U256::from(101));
        assert!(parse_raw("limitRaw", "-1").is_err());
    }

    fn tokens(whole: u64) -> U256 {
        U256::from(whole) * U256::exp10(18)
    }

    fn between(value: U256, low: U256, high: U256) -> bool {
        low <= value && value <= high
    }

    /// Symmetric range around a unit price.
    fn unit_range() -> SqrtRange {
        SqrtRange::new(U256::from(2).pow(U256::from(96)), -1000, 1000).unwrap()
    }

    #[test]
    fn deposit_minimums_follow_the_scarcer_side() {
        let one_pct = Decimal::ONE;
        let (min0, min1) = unit_range().deposit_minimums(tokens(10), tokens(5), one_pct).unwrap();
        // only 5 of the 10 token0 fit next to 5 token1 at this price
        let expected = U256::from(4_950u64) * U256::exp10(15);
        let tolerance = U256::exp10(12);
        assert!(between(min0, expected - tolerance, expected + tolerance));
        assert!(between(min1, expected - tolerance, expected + tolerance));
    }

    #[test]
    fn minimums_never_exceed_the_desired_amounts() {
        let (min0, min1) = unit_range()
            .deposit_minimums(tokens(3), tokens(3), Decimal::ZERO)
            .unwrap();
        assert!(min0 <= tokens(3) && !min0.is_zero());
        assert!(min1 <= tokens(3) && !min1.is_zero());
    }

    #[test]
    fn out_of_range_deposits_expect_one_token() {
        let above = SqrtRange::new(U256::from(2).pow(U256::from(96)), 100, 2000).unwrap();
        let (min0, min1) = above.deposit_minimums(tokens(2), tokens(2), Decimal::ONE).unwrap();
        let hundredth = U256::exp10(16);
        assert!(between(min0, tokens(2) - hundredth * U256::from(3u64), tokens(2) - hundredth));
        assert!(min1.is_zero());
    }

    #[test]
    fn withdrawal_minimums_cover_the_current_worth() {
        let below = SqrtRange::new(U256::from(2).pow(U256::from(96)), -2000, -100).unwrap();
        let liquidity = tokens(1_000);
        let (min0, min1) = below.withdrawal_minimums(liquidity, Decimal::from(50)).unwrap();
        assert!(min0.is_zero());
        let worth = u256_to_f64(liquidity).unwrap() * (sqrt_price_at(-100) - sqrt_price_at(-2000));
        let half = U256::from_dec_str(&format!("{:.0}", (worth / 2.0).floor())).unwrap();
        assert!(between(min1, half - U256::exp10(6), half + U256::exp10(6)));

        let (_, none) = below.withdrawal_minimums(liquidity, Decimal::ONE_HUNDRED).unwrap();
        assert!(none.is_zero());
    }

    #[test]
    fn empty_ranges_are_rejected() {
        assert!(SqrtRange::new(U256::one(), 10, 10).is_err());
    }
}
