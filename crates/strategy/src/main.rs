use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use lender_borrower::config::{self, parse_address};
use lender_borrower::core::keeper::{Keeper, KeeperSettings};
use lender_borrower::core::strategy::Strategy;
use lender_borrower::logging;
use lender_borrower::sim::{to_raw, SimChain, SimVault};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignore if missing).
    let _ = dotenvy::dotenv();

    let config_dir = std::env::var("LENDER_BORROWER_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config"));

    let config = config::load_config(&config_dir)?;

    // Hold the guard for the process lifetime.
    let _guard = logging::init_tracing(&config.app.logging)?;

    let scenario_path = std::env::var("SCENARIO_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| config_dir.join("scenario.json"));
    let scenario = config::load_scenario(&scenario_path)?;

    info!(
        target_bps = config.strategy.target_ltv_multiplier_bps,
        warning_bps = config.strategy.warning_ltv_multiplier_bps,
        steps = scenario.price_path.len(),
        scenario = %scenario_path.display(),
        "lender-borrower keeper starting"
    );

    // -----------------------------------------------------------------------
    // World and strategy
    // -----------------------------------------------------------------------

    let mut chain = SimChain::new(&scenario.market, config.market.sim_addresses()?);
    let accounts = config.market.accounts()?;

    let mut strategy = Strategy::new(
        &chain,
        accounts,
        config.strategy.settings()?,
        config.strategy.min_amount_to_sell(),
    )
    .context("failed to wire strategy to market")?;
    for (a, b, fee) in config.strategy.fee_tiers()? {
        strategy.set_swap_fee(accounts.management, a, b, fee)?;
    }

    info!(
        strategy = %strategy.address(),
        asset = %strategy.asset(),
        base = %strategy.base_token(),
        reward = %strategy.reward_token(),
        "strategy initialized"
    );

    let mut vault = SimVault::new(strategy);
    let depositor = parse_address("depositor", &scenario.depositor)?;
    let deposit = to_raw(scenario.initial_deposit, scenario.market.asset.decimals);
    chain.mint(accounts.asset, depositor, deposit);
    vault
        .deposit(&mut chain, depositor, deposit)
        .context("initial deposit failed")?;

    // -----------------------------------------------------------------------
    // Keeper
    // -----------------------------------------------------------------------

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received, stopping gracefully...");
                signal_token.cancel();
            }
            Err(e) => warn!(error = %e, "failed to listen for Ctrl+C"),
        }
    });

    let mut keeper = Keeper::new(
        chain,
        vault,
        scenario.price_path,
        KeeperSettings::from(&config.app.keeper),
        shutdown,
    );

    info!("keeper running, press Ctrl+C to stop");
    let ticks = keeper.run().await?;

    let (chain, vault) = keeper.into_parts();
    info!(
        ticks,
        total_assets = %vault.total_assets(),
        shares = %vault.total_shares(),
        swaps = chain.swaps().len(),
        "shutdown complete"
    );
    Ok(())
}
