//! Newtype wrappers for fixed-point values.
//!
//! Prevents accidental mixing of WAD-scaled ratios (18 decimals) and
//! USD amounts (8 decimals, oracle convention) at the type level, and hosts
//! the checked `mul_div` every conversion goes through.

use alloy::primitives::U256;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::fmt;
use std::str::FromStr;

use crate::constants::{MAX_BPS, WAD};
use crate::errors::{StrategyError, StrategyResult};

// ---------------------------------------------------------------------------
// WAD (1e18): LTVs, collateral factors, APRs
// ---------------------------------------------------------------------------

/// WAD-scaled value (18 decimals). Used for LTVs, collateral factors and APRs.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Wad(pub U256);

const WAD_SCALE: Decimal = dec!(1_000_000_000_000_000_000);

impl Wad {
    pub const ONE: Wad = Wad(WAD);
    pub const ZERO: Wad = Wad(U256::ZERO);

    /// Lossy conversion for logs and reports. Values beyond `Decimal` range
    /// render as zero.
    pub fn to_decimal(self) -> Decimal {
        let raw = Decimal::from_str(&self.0.to_string()).unwrap_or_default();
        raw / WAD_SCALE
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    /// `self * bps / 10_000`.
    pub fn scale_bps(self, bps: u64) -> StrategyResult<Wad> {
        apply_bps(self.0, bps).map(Wad)
    }

    pub fn saturating_sub(self, other: Wad) -> Wad {
        Wad(self.0.saturating_sub(other.0))
    }
}

impl fmt::Debug for Wad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Wad({})", self.to_decimal())
    }
}

impl fmt::Display for Wad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

// ---------------------------------------------------------------------------
// USD (1e8): the common unit every token amount converts through
// ---------------------------------------------------------------------------

/// USD amount scaled at 1e8.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Usd(pub U256);

const USD_DECIMAL_SCALE: Decimal = dec!(100_000_000);

impl Usd {
    pub const ZERO: Usd = Usd(U256::ZERO);

    pub fn to_decimal(self) -> Decimal {
        let raw = Decimal::from_str(&self.0.to_string()).unwrap_or_default();
        raw / USD_DECIMAL_SCALE
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    /// `self * ratio / 1e18`.
    pub fn mul_wad(self, ratio: Wad) -> StrategyResult<Usd> {
        mul_div(self.0, ratio.0, WAD, "usd * wad").map(Usd)
    }

    pub fn saturating_sub(self, other: Usd) -> Usd {
        Usd(self.0.saturating_sub(other.0))
    }
}

impl fmt::Debug for Usd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Usd({})", self.to_decimal())
    }
}

impl fmt::Display for Usd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.to_decimal())
    }
}

// ---------------------------------------------------------------------------
// Checked arithmetic helpers
// ---------------------------------------------------------------------------

/// `a * b / denominator` with overflow and zero-denominator checks.
pub fn mul_div(
    a: U256,
    b: U256,
    denominator: U256,
    context: &'static str,
) -> StrategyResult<U256> {
    if denominator.is_zero() {
        return Err(StrategyError::ArithmeticOverflow { context });
    }
    a.checked_mul(b)
        .map(|product| product / denominator)
        .ok_or(StrategyError::ArithmeticOverflow { context })
}

/// `a * b / denominator`, rounded up.
pub fn mul_div_up(
    a: U256,
    b: U256,
    denominator: U256,
    context: &'static str,
) -> StrategyResult<U256> {
    if denominator.is_zero() {
        return Err(StrategyError::ArithmeticOverflow { context });
    }
    let product = a
        .checked_mul(b)
        .ok_or(StrategyError::ArithmeticOverflow { context })?;
    let quotient = product / denominator;
    if (product % denominator).is_zero() {
        Ok(quotient)
    } else {
        Ok(quotient + U256::from(1u64))
    }
}

/// `amount * bps / 10_000`.
pub fn apply_bps(amount: U256, bps: u64) -> StrategyResult<U256> {
    mul_div(amount, U256::from(bps), U256::from(MAX_BPS), "bps")
}

/// `amount * (10_000 + bps) / 10_000`, the upper bound for an input with slippage.
pub fn add_bps(amount: U256, bps: u64) -> StrategyResult<U256> {
    apply_bps(amount, MAX_BPS + bps)
}

/// `amount * (10_000 - bps) / 10_000`, the lower bound for an output with slippage.
pub fn sub_bps(amount: U256, bps: u64) -> StrategyResult<U256> {
    apply_bps(amount, MAX_BPS.saturating_sub(bps))
}
