use alloy::primitives::{uint, U256};

// ---------------------------------------------------------------------------
// Numeric Constants
// ---------------------------------------------------------------------------

/// WAD: 1e18, fixed-point scale for LTVs, collateral factors, APRs and rates.
pub const WAD: U256 = uint!(1_000_000_000_000_000_000_U256);

/// USD_SCALE: 1e8, the oracle price scale and the common USD unit.
pub const USD_SCALE: U256 = uint!(100_000_000_U256);

/// Price returned for the wrapped native token when the market quotes it 1:1
/// against itself with 18 decimals instead of 8.
pub const NATIVE_PRICE_WAD: U256 = WAD;

/// 100% in basis points.
pub const MAX_BPS: u64 = 10_000;

/// Upper bound for the warning multiplier (90% of the liquidation factor).
pub const MAX_WARNING_LTV_MULTIPLIER_BPS: u64 = 9_000;

/// Seconds in a non-leap year.
pub const SECONDS_PER_YEAR: u64 = 31_536_000;

pub const SECONDS_PER_DAY: u64 = 86_400;

pub const DAYS_PER_YEAR: u64 = 365;

/// 1 gwei in wei.
pub const GWEI: U256 = uint!(1_000_000_000_U256);

// ---------------------------------------------------------------------------
// Engine thresholds
// ---------------------------------------------------------------------------

/// Tend only when the position sits at least 10 LTV points under target.
pub const MIN_TEND_LTV_GAP: U256 = uint!(100_000_000_000_000_000_U256);

/// Asset amounts at or under this floor are rounding noise; no swap is issued.
pub const DUST_SWAP_FLOOR: U256 = uint!(10_U256);

// ---------------------------------------------------------------------------
// Default configuration values
// ---------------------------------------------------------------------------

pub const DEFAULT_TARGET_LTV_MULTIPLIER_BPS: u64 = 7_000;
pub const DEFAULT_WARNING_LTV_MULTIPLIER_BPS: u64 = 8_000;
pub const DEFAULT_SLIPPAGE_BPS: u64 = 500;
pub const DEFAULT_REWARD_PRICE_BUFFER_BPS: u64 = 1_000;
pub const DEFAULT_MAX_GAS_PRICE_TO_TEND_GWEI: u64 = 100;
pub const DEFAULT_UNISWAP_FEE: u32 = 3_000;
