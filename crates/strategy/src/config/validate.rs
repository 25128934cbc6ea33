use anyhow::{bail, Result};
use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;

use crate::constants::{MAX_BPS, MAX_WARNING_LTV_MULTIPLIER_BPS};

use super::types::{LenderBorrowerConfig, ScenarioConfig};

/// Uniswap V3 pool fee tiers.
const FEE_TIERS: [u32; 4] = [100, 500, 3_000, 10_000];

/// Validate invariants across the merged config that serde alone cannot enforce.
/// Called automatically by [`super::load_config`].
pub fn validate_config(config: &LenderBorrowerConfig) -> Result<()> {
    let mut errors: Vec<String> = Vec::new();

    validate_app_config(config, &mut errors);
    validate_market_config(config, &mut errors);
    validate_strategy_config(config, &mut errors);

    finish(errors)
}

/// Validate a scenario file. Called by [`super::load_scenario`].
pub fn validate_scenario(scenario: &ScenarioConfig) -> Result<()> {
    let mut errors: Vec<String> = Vec::new();
    let market = &scenario.market;

    if let Err(e) = validate_address(&scenario.depositor) {
        errors.push(format!("scenario.depositor: {e}"));
    }
    if scenario.initial_deposit <= Decimal::ZERO {
        errors.push("scenario.initial_deposit: must be positive".into());
    }
    if scenario.price_path.is_empty() {
        errors.push("scenario.price_path: must have at least one step".into());
    }
    for (i, step) in scenario.price_path.iter().enumerate() {
        if step.asset_usd <= Decimal::ZERO {
            errors.push(format!(
                "scenario.price_path[{i}]: asset_usd must be positive, got {}",
                step.asset_usd
            ));
        }
    }

    for (name, token) in [
        ("asset", &market.asset),
        ("base", &market.base),
        ("reward", &market.reward),
    ] {
        if token.price_usd <= Decimal::ZERO {
            errors.push(format!("scenario.market.{name}: price_usd must be positive"));
        }
        if token.decimals > 36 {
            errors.push(format!(
                "scenario.market.{name}: decimals {} out of range",
                token.decimals
            ));
        }
    }
    if market.borrow_cf_bps >= market.liquidate_cf_bps || market.liquidate_cf_bps >= MAX_BPS {
        errors.push(format!(
            "scenario.market: need borrow_cf_bps ({}) < liquidate_cf_bps ({}) < {MAX_BPS}",
            market.borrow_cf_bps, market.liquidate_cf_bps
        ));
    }
    if market.external_borrow > market.external_supply {
        errors.push("scenario.market: external_borrow exceeds external_supply".into());
    }
    if market.swap_discount_bps >= MAX_BPS {
        errors.push(format!(
            "scenario.market.swap_discount_bps: {} must be below {MAX_BPS}",
            market.swap_discount_bps
        ));
    }

    finish(errors)
}

fn finish(errors: Vec<String>) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        let msg = format!(
            "Configuration validation failed ({} error{}):\n  - {}",
            errors.len(),
            if errors.len() == 1 { "" } else { "s" },
            errors.join("\n  - ")
        );
        bail!("{msg}");
    }
}

// ---------------------------------------------------------------------------
// App config
// ---------------------------------------------------------------------------

fn validate_app_config(config: &LenderBorrowerConfig, errors: &mut Vec<String>) {
    let logging = &config.app.logging;
    if logging.log_dir.is_empty() {
        errors.push("app.logging.log_dir: is empty".into());
    }
    if logging.file_name.is_empty() {
        errors.push("app.logging.file_name: is empty".into());
    }
    if let Err(e) = EnvFilter::try_new(&logging.default_filter) {
        errors.push(format!("app.logging.default_filter: {e}"));
    }

    let keeper = &config.app.keeper;
    if keeper.seconds_per_tick == 0 {
        errors.push("app.keeper.seconds_per_tick: must be > 0".into());
    }
    if keeper.report_every_ticks == 0 {
        errors.push("app.keeper.report_every_ticks: must be > 0".into());
    }
    if keeper.max_consecutive_failures == 0 {
        errors.push("app.keeper.max_consecutive_failures: must be > 0".into());
    }
}

// ---------------------------------------------------------------------------
// Market config
// ---------------------------------------------------------------------------

fn validate_market_config(config: &LenderBorrowerConfig, errors: &mut Vec<String>) {
    let market = &config.market;
    let required = [
        ("comet", &market.comet),
        ("swap_router", &market.swap_router),
        ("asset", &market.asset),
        ("base_token", &market.base_token),
        ("reward_token", &market.reward_token),
        ("strategy", &market.strategy),
        ("management", &market.management),
        ("reserve_holder", &market.reserve_holder),
    ];
    for (name, addr) in &required {
        if let Err(e) = validate_address(addr) {
            errors.push(format!("market.{name}: {e}"));
        }
    }

    // Optional, but if set must be valid.
    for (name, addr) in [
        ("reward_price_feed", &market.reward_price_feed),
        ("wrapped_native", &market.wrapped_native),
    ] {
        if !addr.is_empty() {
            if let Err(e) = validate_address(addr) {
                errors.push(format!("market.{name}: {e}"));
            }
        }
    }

    if market.asset.eq_ignore_ascii_case(&market.base_token) {
        errors.push("market: asset and base_token must differ".into());
    }
    if market.strategy.eq_ignore_ascii_case(&market.reserve_holder) {
        errors.push("market: strategy and reserve_holder must be separate accounts".into());
    }
}

// ---------------------------------------------------------------------------
// Strategy config
// ---------------------------------------------------------------------------

fn validate_strategy_config(config: &LenderBorrowerConfig, errors: &mut Vec<String>) {
    let s = &config.strategy;

    if s.warning_ltv_multiplier_bps > MAX_WARNING_LTV_MULTIPLIER_BPS {
        errors.push(format!(
            "strategy.warning_ltv_multiplier_bps: {} exceeds {MAX_WARNING_LTV_MULTIPLIER_BPS}",
            s.warning_ltv_multiplier_bps
        ));
    }
    if s.target_ltv_multiplier_bps >= s.warning_ltv_multiplier_bps {
        errors.push(format!(
            "strategy: target_ltv_multiplier_bps ({}) must be below warning_ltv_multiplier_bps ({})",
            s.target_ltv_multiplier_bps, s.warning_ltv_multiplier_bps
        ));
    }
    if s.slippage_bps >= MAX_BPS {
        errors.push(format!(
            "strategy.slippage_bps: {} must be below {MAX_BPS}",
            s.slippage_bps
        ));
    }
    if s.reward_price_buffer_bps >= MAX_BPS {
        errors.push(format!(
            "strategy.reward_price_buffer_bps: {} must be below {MAX_BPS}",
            s.reward_price_buffer_bps
        ));
    }
    if s.max_gas_price_to_tend_gwei == 0 {
        errors.push("strategy.max_gas_price_to_tend_gwei: must be > 0".into());
    }

    for (i, fee) in s.swap_fees.iter().enumerate() {
        if !FEE_TIERS.contains(&fee.fee) {
            errors.push(format!(
                "strategy.swap_fees[{i}]: fee {} is not a pool tier {FEE_TIERS:?}",
                fee.fee
            ));
        }
        for (side, addr) in [("token_a", &fee.token_a), ("token_b", &fee.token_b)] {
            if let Err(e) = validate_address(addr) {
                errors.push(format!("strategy.swap_fees[{i}].{side}: {e}"));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Validate an Ethereum-style address string: must be 0x-prefixed and 42 chars
/// of hex.
fn validate_address(addr: &str) -> Result<(), String> {
    if addr.is_empty() {
        return Err("address is empty".into());
    }
    if !addr.starts_with("0x") && !addr.starts_with("0X") {
        return Err(format!("address '{addr}' must start with 0x"));
    }
    if addr.len() != 42 {
        return Err(format!(
            "address '{addr}' has length {} (expected 42)",
            addr.len()
        ));
    }
    if !addr[2..].chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("address '{addr}' contains non-hex characters"));
    }
    Ok(())
}
