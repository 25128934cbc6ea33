pub mod types;
pub mod validate;

pub use types::*;

use std::path::Path;
use std::str::FromStr;

use alloy::primitives::{Address, U256};
use anyhow::{Context, Result};
use tracing::info;

use crate::core::strategy::{StrategyAccounts, StrategySettings};
use crate::sim::SimAddresses;

/// Load and merge all config JSON files into a single [`LenderBorrowerConfig`],
/// then apply environment variable overrides and validate.
///
/// Expected directory layout:
/// ```text
/// config/
///   app.json
///   market.json
///   strategy.json
/// ```
///
/// # Environment variable overrides
///
/// | Env Var                        | Config Field                              |
/// |--------------------------------|-------------------------------------------|
/// | `TARGET_LTV_MULTIPLIER`        | `strategy.target_ltv_multiplier_bps`      |
/// | `WARNING_LTV_MULTIPLIER`       | `strategy.warning_ltv_multiplier_bps`     |
/// | `SLIPPAGE_BPS`                 | `strategy.slippage_bps`                   |
/// | `MAX_GAS_PRICE_TO_TEND_GWEI`   | `strategy.max_gas_price_to_tend_gwei`     |
/// | `PRESERVE_DEBT_ON_SHORTFALL`   | `strategy.preserve_debt_on_shortfall`     |
/// | `REWARD_PRICE_BUFFER_BPS`      | `strategy.reward_price_buffer_bps`        |
pub fn load_config(config_dir: &Path) -> Result<LenderBorrowerConfig> {
    let read = |name: &str| -> Result<String> {
        let path = config_dir.join(name);
        std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.display()))
    };

    let app: AppConfig = serde_json::from_str(&read("app.json")?).context("parsing app.json")?;

    let market: MarketConfig =
        serde_json::from_str(&read("market.json")?).context("parsing market.json")?;

    let strategy: StrategyConfig =
        serde_json::from_str(&read("strategy.json")?).context("parsing strategy.json")?;

    let mut config = LenderBorrowerConfig {
        app,
        market,
        strategy,
    };

    apply_env_overrides(&mut config);
    validate::validate_config(&config)?;

    Ok(config)
}

/// Load and validate a scenario file for the simulated keeper run.
pub fn load_scenario(path: &Path) -> Result<ScenarioConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read scenario file: {}", path.display()))?;
    let scenario: ScenarioConfig = serde_json::from_str(&contents)
        .with_context(|| format!("parsing {}", path.display()))?;
    validate::validate_scenario(&scenario)?;
    Ok(scenario)
}

// ---------------------------------------------------------------------------
// Typed views
// ---------------------------------------------------------------------------

/// Parse a validated address string. Empty maps to the zero address.
pub fn parse_address(field: &str, value: &str) -> Result<Address> {
    if value.is_empty() {
        return Ok(Address::ZERO);
    }
    value
        .parse()
        .with_context(|| format!("failed to parse {field} address '{value}'"))
}

impl MarketConfig {
    pub fn accounts(&self) -> Result<StrategyAccounts> {
        Ok(StrategyAccounts {
            strategy: parse_address("strategy", &self.strategy)?,
            management: parse_address("management", &self.management)?,
            reserve_holder: parse_address("reserve_holder", &self.reserve_holder)?,
            asset: parse_address("asset", &self.asset)?,
            wrapped_native: parse_address("wrapped_native", &self.wrapped_native)?,
            reward_price_feed: parse_address("reward_price_feed", &self.reward_price_feed)?,
        })
    }

    pub fn sim_addresses(&self) -> Result<SimAddresses> {
        Ok(SimAddresses {
            market: parse_address("comet", &self.comet)?,
            router: parse_address("swap_router", &self.swap_router)?,
            asset: parse_address("asset", &self.asset)?,
            base: parse_address("base_token", &self.base_token)?,
            reward: parse_address("reward_token", &self.reward_token)?,
        })
    }
}

impl StrategyConfig {
    pub fn settings(&self) -> Result<StrategySettings> {
        StrategySettings::new(
            self.target_ltv_multiplier_bps,
            self.warning_ltv_multiplier_bps,
            self.slippage_bps,
            self.reward_price_buffer_bps,
            self.max_gas_price_to_tend_gwei,
            self.preserve_debt_on_shortfall,
        )
        .context("invalid strategy settings")
    }

    pub fn min_amount_to_sell(&self) -> U256 {
        U256::from(self.min_amount_to_sell)
    }

    /// Parsed `(token_a, token_b, fee)` triples.
    pub fn fee_tiers(&self) -> Result<Vec<(Address, Address, u32)>> {
        self.swap_fees
            .iter()
            .map(|f| {
                Ok((
                    parse_address("swap_fees.token_a", &f.token_a)?,
                    parse_address("swap_fees.token_b", &f.token_b)?,
                    f.fee,
                ))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Environment variable overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides to the loaded config.
///
/// Only non-empty env vars take effect. Parse failures are skipped (the JSON
/// value remains).
fn apply_env_overrides(config: &mut LenderBorrowerConfig) {
    let strategy = &mut config.strategy;

    if let Some(val) = env_parse::<u64>("TARGET_LTV_MULTIPLIER") {
        info!(val, "env override: TARGET_LTV_MULTIPLIER");
        strategy.target_ltv_multiplier_bps = val;
    }

    if let Some(val) = env_parse::<u64>("WARNING_LTV_MULTIPLIER") {
        info!(val, "env override: WARNING_LTV_MULTIPLIER");
        strategy.warning_ltv_multiplier_bps = val;
    }

    if let Some(val) = env_parse::<u64>("SLIPPAGE_BPS") {
        info!(val, "env override: SLIPPAGE_BPS");
        strategy.slippage_bps = val;
    }

    if let Some(val) = env_parse::<u64>("MAX_GAS_PRICE_TO_TEND_GWEI") {
        info!(val, "env override: MAX_GAS_PRICE_TO_TEND_GWEI");
        strategy.max_gas_price_to_tend_gwei = val;
    }

    if let Some(val) = env_bool("PRESERVE_DEBT_ON_SHORTFALL") {
        info!(val, "env override: PRESERVE_DEBT_ON_SHORTFALL");
        strategy.preserve_debt_on_shortfall = val;
    }

    if let Some(val) = env_parse::<u64>("REWARD_PRICE_BUFFER_BPS") {
        info!(val, "env override: REWARD_PRICE_BUFFER_BPS");
        strategy.reward_price_buffer_bps = val;
    }
}

/// Read a non-empty env var as a `String`.
fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Read a non-empty env var as a bool (`true`, `1`, `yes` → true).
fn env_bool(key: &str) -> Option<bool> {
    env_string(key).map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
}

/// Read a non-empty env var and parse it as `T`.
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serial_test::serial;
    use std::path::PathBuf;

    fn project_config_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("config")
    }

    // -----------------------------------------------------------------------
    // Helper: write a minimal set of config JSON files to a temp dir.
    // -----------------------------------------------------------------------

    fn write_test_configs(dir: &Path) {
        std::fs::write(
            dir.join("app.json"),
            r#"{
                "logging": { "log_dir": "logs", "file_name": "keeper.log", "default_filter": "lender_borrower=info,warn" },
                "keeper": { "tick_interval_ms": 10, "seconds_per_tick": 3600, "report_every_ticks": 24, "max_consecutive_failures": 5 }
            }"#,
        )
        .unwrap();

        std::fs::write(
            dir.join("market.json"),
            r#"{
                "comet": "0xc3d688B66703497DAA19211EEdff47f25384cdc3",
                "swap_router": "0xE592427A0AEce92De3Edee1F18E0157C05861564",
                "asset": "0x2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599",
                "base_token": "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
                "reward_token": "0xc00e94Cb662C3520282E6f5717214004A7f26888",
                "strategy": "0x0000000000000000000000000000000000000051",
                "management": "0x0000000000000000000000000000000000000052",
                "reserve_holder": "0x0000000000000000000000000000000000000053"
            }"#,
        )
        .unwrap();

        std::fs::write(
            dir.join("strategy.json"),
            r#"{
                "target_ltv_multiplier_bps": 7000,
                "warning_ltv_multiplier_bps": 8000,
                "slippage_bps": 500,
                "reward_price_buffer_bps": 1000,
                "max_gas_price_to_tend_gwei": 100,
                "swap_fees": [
                    { "token_a": "0x2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599", "token_b": "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", "fee": 500 }
                ]
            }"#,
        )
        .unwrap();
    }

    // -----------------------------------------------------------------------
    // Env cleanup helper, shared by the serial env tests.
    // -----------------------------------------------------------------------

    fn clean_strategy_env() {
        for key in [
            "TARGET_LTV_MULTIPLIER",
            "WARNING_LTV_MULTIPLIER",
            "SLIPPAGE_BPS",
            "MAX_GAS_PRICE_TO_TEND_GWEI",
            "PRESERVE_DEBT_ON_SHORTFALL",
            "REWARD_PRICE_BUFFER_BPS",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_load_real_configs() {
        clean_strategy_env();
        let dir = project_config_dir();
        if !dir.exists() {
            eprintln!("skipping: config dir not found at {}", dir.display());
            return;
        }
        let config = load_config(&dir).expect("config should load and validate");
        assert!(config.strategy.settings().is_ok());
        assert!(config.market.accounts().is_ok());

        let scenario = load_scenario(&dir.join("scenario.json")).expect("scenario should load");
        assert!(!scenario.price_path.is_empty());
    }

    #[test]
    #[serial]
    fn test_load_test_configs() {
        clean_strategy_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());
        let config = load_config(tmp.path()).expect("test config should load");
        assert_eq!(config.strategy.target_ltv_multiplier_bps, 7_000);
        assert!(!config.strategy.preserve_debt_on_shortfall);
        assert_eq!(config.app.keeper.report_every_ticks, 24);

        let accounts = config.market.accounts().unwrap();
        assert_eq!(accounts.strategy, Address::with_last_byte(0x51));
        assert_eq!(accounts.wrapped_native, Address::ZERO);
        assert_eq!(config.strategy.fee_tiers().unwrap().len(), 1);
    }

    #[test]
    #[serial]
    fn test_strategy_defaults_fill_omitted_fields() {
        clean_strategy_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());
        std::fs::write(tmp.path().join("strategy.json"), "{}").unwrap();
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.strategy.target_ltv_multiplier_bps, 7_000);
        assert_eq!(config.strategy.warning_ltv_multiplier_bps, 8_000);
        assert_eq!(config.strategy.slippage_bps, 500);
        assert_eq!(config.strategy.reward_price_buffer_bps, 1_000);
        assert_eq!(config.strategy.max_gas_price_to_tend_gwei, 100);
        assert!(config.strategy.swap_fees.is_empty());
    }

    #[test]
    #[serial]
    fn test_missing_config_file_errors() {
        clean_strategy_env();
        let tmp = tempfile::tempdir().unwrap();
        let err = load_config(tmp.path()).unwrap_err();
        assert!(format!("{err:#}").contains("app.json"));
    }

    #[test]
    #[serial]
    fn test_env_override_band() {
        clean_strategy_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());
        std::env::set_var("TARGET_LTV_MULTIPLIER", "6000");
        std::env::set_var("WARNING_LTV_MULTIPLIER", "7500");
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.strategy.target_ltv_multiplier_bps, 6_000);
        assert_eq!(config.strategy.warning_ltv_multiplier_bps, 7_500);
        clean_strategy_env();
    }

    #[test]
    #[serial]
    fn test_env_override_preserve_flag() {
        clean_strategy_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());
        std::env::set_var("PRESERVE_DEBT_ON_SHORTFALL", "yes");
        let config = load_config(tmp.path()).unwrap();
        assert!(config.strategy.preserve_debt_on_shortfall);
        clean_strategy_env();
    }

    #[test]
    #[serial]
    fn test_env_override_empty_string_ignored() {
        clean_strategy_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());
        std::env::set_var("SLIPPAGE_BPS", "");
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.strategy.slippage_bps, 500);
        clean_strategy_env();
    }

    #[test]
    #[serial]
    fn test_env_override_invalid_parse_ignored() {
        clean_strategy_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());
        std::env::set_var("MAX_GAS_PRICE_TO_TEND_GWEI", "lots");
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.strategy.max_gas_price_to_tend_gwei, 100);
        clean_strategy_env();
    }

    #[test]
    #[serial]
    fn test_inverted_band_rejected() {
        clean_strategy_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());
        std::env::set_var("TARGET_LTV_MULTIPLIER", "8500");
        let err = load_config(tmp.path()).unwrap_err().to_string();
        assert!(err.contains("target_ltv_multiplier_bps"), "{err}");
        clean_strategy_env();
    }

    #[test]
    #[serial]
    fn test_validation_reports_every_error() {
        clean_strategy_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());
        std::env::set_var("WARNING_LTV_MULTIPLIER", "9500");
        std::env::set_var("SLIPPAGE_BPS", "10000");
        std::env::set_var("REWARD_PRICE_BUFFER_BPS", "20000");
        let err = load_config(tmp.path()).unwrap_err().to_string();
        assert!(err.contains("(3 errors)"), "{err}");
        clean_strategy_env();
    }

    #[test]
    #[serial]
    fn test_bad_address_rejected() {
        clean_strategy_env();
        let tmp = tempfile::tempdir().unwrap();
        write_test_configs(tmp.path());
        let market = std::fs::read_to_string(tmp.path().join("market.json")).unwrap();
        std::fs::write(
            tmp.path().join("market.json"),
            market.replace("0x0000000000000000000000000000000000000053", "0x53"),
        )
        .unwrap();
        let err = load_config(tmp.path()).unwrap_err().to_string();
        assert!(err.contains("market.reserve_holder"), "{err}");
    }

    #[test]
    fn test_scenario_rejects_non_positive_prices() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("scenario.json");
        std::fs::write(
            &path,
            r#"{
                "market": {
                    "asset": { "decimals": 8, "price_usd": "60000" },
                    "base": { "decimals": 6, "price_usd": "1" },
                    "reward": { "decimals": 18, "price_usd": "50" },
                    "liquidate_cf_bps": 8500,
                    "borrow_cf_bps": 8000,
                    "supply_cap": "1000",
                    "base_borrow_min": "100",
                    "external_supply": "10000000",
                    "external_borrow": "5000000",
                    "rates": {
                        "kink_bps": 8000,
                        "supply_base_bps": 0, "supply_slope_low_bps": 400, "supply_slope_high_bps": 10000,
                        "borrow_base_bps": 150, "borrow_slope_low_bps": 500, "borrow_slope_high_bps": 15000
                    },
                    "reward_supply_per_day": "5",
                    "reward_borrow_per_day": "10",
                    "swap_discount_bps": 30,
                    "base_fee_gwei": 20
                },
                "depositor": "0x0000000000000000000000000000000000000061",
                "initial_deposit": "10",
                "price_path": [ { "asset_usd": "60000" }, { "asset_usd": "0" } ]
            }"#,
        )
        .unwrap();
        let err = load_scenario(&path).unwrap_err().to_string();
        assert!(err.contains("price_path[1]"), "{err}");

        let fixed = std::fs::read_to_string(&path)
            .unwrap()
            .replace(r#"{ "asset_usd": "0" }"#, r#"{ "asset_usd": "55000", "base_fee_gwei": 40 }"#);
        std::fs::write(&path, fixed).unwrap();
        let scenario = load_scenario(&path).unwrap();
        assert_eq!(scenario.initial_deposit, dec!(10));
        assert_eq!(scenario.price_path[1].base_fee_gwei, Some(40));
    }
}
