use rust_decimal::Decimal;
use serde::Deserialize;

use crate::constants::{
    DEFAULT_MAX_GAS_PRICE_TO_TEND_GWEI, DEFAULT_REWARD_PRICE_BUFFER_BPS, DEFAULT_SLIPPAGE_BPS,
    DEFAULT_TARGET_LTV_MULTIPLIER_BPS, DEFAULT_WARNING_LTV_MULTIPLIER_BPS,
};
use crate::sim::SimMarketParams;

// ---------------------------------------------------------------------------
// Top-level aggregate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct LenderBorrowerConfig {
    pub app: AppConfig,
    pub market: MarketConfig,
    pub strategy: StrategyConfig,
}

// ---------------------------------------------------------------------------
// app.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub keeper: KeeperConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub log_dir: String,
    pub file_name: String,
    /// Used when `RUST_LOG` is unset.
    pub default_filter: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeeperConfig {
    /// Wall-clock pause between ticks.
    pub tick_interval_ms: u64,
    /// Simulated chain time each tick advances.
    pub seconds_per_tick: u64,
    /// Harvest and report every this many ticks.
    pub report_every_ticks: u64,
    pub max_consecutive_failures: u32,
}

// ---------------------------------------------------------------------------
// market.json
// ---------------------------------------------------------------------------

/// Addresses of the market, its tokens and the strategy's own accounts.
/// Kept as strings so validation can report every malformed entry.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketConfig {
    pub comet: String,
    pub swap_router: String,
    pub asset: String,
    pub base_token: String,
    pub reward_token: String,
    /// Empty falls back to the market's own feed.
    #[serde(default)]
    pub reward_price_feed: String,
    /// Empty when the chain has no wrapped native token in play.
    #[serde(default)]
    pub wrapped_native: String,
    pub strategy: String,
    pub management: String,
    pub reserve_holder: String,
}

// ---------------------------------------------------------------------------
// strategy.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    #[serde(default = "default_target_ltv_multiplier_bps")]
    pub target_ltv_multiplier_bps: u64,
    #[serde(default = "default_warning_ltv_multiplier_bps")]
    pub warning_ltv_multiplier_bps: u64,
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u64,
    #[serde(default = "default_reward_price_buffer_bps")]
    pub reward_price_buffer_bps: u64,
    #[serde(default = "default_max_gas_price_to_tend_gwei")]
    pub max_gas_price_to_tend_gwei: u64,
    #[serde(default)]
    pub preserve_debt_on_shortfall: bool,
    /// Raw units of the token being sold.
    #[serde(default)]
    pub min_amount_to_sell: u64,
    #[serde(default)]
    pub swap_fees: Vec<SwapFeeConfig>,
}

fn default_target_ltv_multiplier_bps() -> u64 {
    DEFAULT_TARGET_LTV_MULTIPLIER_BPS
}

fn default_warning_ltv_multiplier_bps() -> u64 {
    DEFAULT_WARNING_LTV_MULTIPLIER_BPS
}

fn default_slippage_bps() -> u64 {
    DEFAULT_SLIPPAGE_BPS
}

fn default_reward_price_buffer_bps() -> u64 {
    DEFAULT_REWARD_PRICE_BUFFER_BPS
}

fn default_max_gas_price_to_tend_gwei() -> u64 {
    DEFAULT_MAX_GAS_PRICE_TO_TEND_GWEI
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwapFeeConfig {
    pub token_a: String,
    pub token_b: String,
    pub fee: u32,
}

// ---------------------------------------------------------------------------
// scenario.json
// ---------------------------------------------------------------------------

/// The simulated world the keeper binary drives.
#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioConfig {
    pub market: SimMarketParams,
    pub depositor: String,
    /// Whole asset units deposited before the first tick.
    #[serde(with = "rust_decimal::serde::str")]
    pub initial_deposit: Decimal,
    pub price_path: Vec<PriceStep>,
}

/// One keeper tick's market move.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceStep {
    #[serde(with = "rust_decimal::serde::str")]
    pub asset_usd: Decimal,
    #[serde(default)]
    pub base_fee_gwei: Option<u64>,
}
