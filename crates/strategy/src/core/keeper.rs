//! Keeper loop: drives a simulated market along a price path and services
//! the strategy the way an off-chain keeper would.
//!
//! Each tick applies the next price step, advances chain time, tends when
//! the trigger fires and reports every `report_every_ticks` ticks. Failed
//! ticks are logged and retried on the next step; a run of
//! `max_consecutive_failures` stops the loop. Shutdown via CancellationToken.

use std::collections::VecDeque;
use std::time::Duration;

use alloy::primitives::U256;
use anyhow::{bail, Result};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{KeeperConfig, PriceStep};
use crate::constants::GWEI;
use crate::errors::StrategyResult;
use crate::sim::{SimChain, SimVault, VaultReport};
use crate::types::TendOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeeperSettings {
    pub tick_interval: Duration,
    pub seconds_per_tick: u64,
    pub report_every_ticks: u64,
    pub max_consecutive_failures: u32,
}

impl From<&KeeperConfig> for KeeperSettings {
    fn from(config: &KeeperConfig) -> Self {
        Self {
            tick_interval: Duration::from_millis(config.tick_interval_ms),
            seconds_per_tick: config.seconds_per_tick,
            report_every_ticks: config.report_every_ticks.max(1),
            max_consecutive_failures: config.max_consecutive_failures.max(1),
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub asset_usd: Decimal,
    pub tended: Option<TendOutcome>,
    pub report: Option<VaultReport>,
}

pub struct Keeper {
    chain: SimChain,
    vault: SimVault,
    path: VecDeque<PriceStep>,
    settings: KeeperSettings,
    shutdown: CancellationToken,
    ticks: u64,
    consecutive_failures: u32,
}

impl Keeper {
    pub fn new(
        chain: SimChain,
        vault: SimVault,
        path: Vec<PriceStep>,
        settings: KeeperSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            chain,
            vault,
            path: path.into(),
            settings,
            shutdown,
            ticks: 0,
            consecutive_failures: 0,
        }
    }

    pub fn chain(&self) -> &SimChain {
        &self.chain
    }

    pub fn vault(&self) -> &SimVault {
        &self.vault
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn into_parts(self) -> (SimChain, SimVault) {
        (self.chain, self.vault)
    }

    /// Main loop. Runs until the path is exhausted, the token is cancelled,
    /// or too many ticks fail in a row. Returns the number of ticks run.
    pub async fn run(&mut self) -> Result<u64> {
        info!(steps = self.path.len(), "keeper started");
        let shutdown = self.shutdown.clone();
        let interval = self.settings.tick_interval;

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    info!("keeper shutting down");
                    break;
                }
                () = tokio::time::sleep(interval) => {
                    match self.tick() {
                        Ok(Some(report)) => {
                            self.consecutive_failures = 0;
                            log_tick(&report);
                        }
                        Ok(None) => {
                            info!("price path exhausted");
                            break;
                        }
                        Err(e) => {
                            self.consecutive_failures += 1;
                            error!(
                                error = %e,
                                tick = self.ticks,
                                consecutive_failures = self.consecutive_failures,
                                "keeper tick failed"
                            );
                            if self.consecutive_failures >= self.settings.max_consecutive_failures {
                                bail!(
                                    "keeper stopped after {} consecutive failed ticks: {e}",
                                    self.consecutive_failures
                                );
                            }
                        }
                    }
                }
            }
        }

        self.log_final_state();
        Ok(self.ticks)
    }

    /// Apply the next price step and service the strategy. `None` once the
    /// path is exhausted.
    pub fn tick(&mut self) -> StrategyResult<Option<TickReport>> {
        let Some(step) = self.path.pop_front() else {
            return Ok(None);
        };
        self.ticks += 1;

        let asset = self.vault.strategy().asset();
        self.chain.set_price(asset, step.asset_usd);
        if let Some(gwei) = step.base_fee_gwei {
            self.chain.set_base_fee(U256::from(gwei) * GWEI);
        }
        self.chain.advance_time(self.settings.seconds_per_tick);

        let tended = if self.vault.tend_trigger(&self.chain)? {
            Some(self.vault.tend(&mut self.chain)?)
        } else {
            None
        };

        let report = if self.ticks % self.settings.report_every_ticks == 0 {
            Some(self.vault.report(&mut self.chain)?)
        } else {
            None
        };

        Ok(Some(TickReport {
            tick: self.ticks,
            asset_usd: step.asset_usd,
            tended,
            report,
        }))
    }

    fn log_final_state(&self) {
        match self.vault.strategy().summary(&self.chain) {
            Ok(summary) => info!(
                ticks = self.ticks,
                total_assets = %self.vault.total_assets(),
                ltv = %summary.current_ltv,
                collateral_usd = %summary.collateral_usd,
                debt_usd = %summary.debt_usd,
                "keeper finished"
            ),
            Err(e) => warn!(error = %e, ticks = self.ticks, "keeper finished, summary unavailable"),
        }
    }
}

fn log_tick(report: &TickReport) {
    match &report.tended {
        Some(TendOutcome::Unwound(w)) => {
            warn!(tick = report.tick, freed = %w.freed, repaid = %w.repaid, "tend unwound position")
        }
        Some(TendOutcome::Adjusted(adjustment)) => {
            info!(tick = report.tick, ?adjustment, "tended")
        }
        None => debug!(tick = report.tick, price = %report.asset_usd, "no tend needed"),
    }
    if let Some(r) = &report.report {
        info!(
            tick = report.tick,
            profit = %r.profit,
            loss = %r.loss,
            total_assets = %r.total_assets,
            "reported"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::to_raw;
    use crate::testkit::{deploy, fund, standard_settings, world, ALICE};
    use crate::types::Adjustment;
    use rust_decimal_macros::dec;

    fn settings(report_every_ticks: u64) -> KeeperSettings {
        KeeperSettings {
            tick_interval: Duration::ZERO,
            seconds_per_tick: 3_600,
            report_every_ticks,
            max_consecutive_failures: 3,
        }
    }

    fn path(prices: &[Decimal]) -> Vec<PriceStep> {
        prices
            .iter()
            .map(|p| PriceStep {
                asset_usd: *p,
                base_fee_gwei: None,
            })
            .collect()
    }

    fn keeper(prices: &[Decimal], report_every_ticks: u64) -> Keeper {
        let (mut sim, a) = world();
        let mut vault = SimVault::new(deploy(&sim, standard_settings()));
        let amount = to_raw(dec!(10), 8);
        fund(&mut sim, a.asset, ALICE, amount);
        vault.deposit(&mut sim, ALICE, amount).unwrap();
        Keeper::new(
            sim,
            vault,
            path(prices),
            settings(report_every_ticks),
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_tick_applies_price_and_time() {
        let mut k = keeper(&[dec!(61_000)], 10);
        let start = k.chain().now();
        let report = k.tick().unwrap().unwrap();
        assert_eq!(report.tick, 1);
        assert_eq!(k.chain().now(), start + 3_600);
        let summary = k.vault().strategy().summary(k.chain()).unwrap();
        assert_eq!(summary.collateral_usd, dec!(610_000));
        assert!(k.tick().unwrap().is_none());
    }

    #[test]
    fn test_price_drop_triggers_deleverage() {
        let mut k = keeper(&[dec!(60_000), dec!(45_000)], 10);
        let first = k.tick().unwrap().unwrap();
        assert_eq!(first.tended, None);

        let second = k.tick().unwrap().unwrap();
        assert!(
            matches!(
                second.tended,
                Some(TendOutcome::Adjusted(Adjustment::Repaid { .. }))
            ),
            "{:?}",
            second.tended
        );
        let summary = k.vault().strategy().summary(k.chain()).unwrap();
        assert!(summary.current_ltv <= summary.target_ltv);
    }

    #[test]
    fn test_reports_on_schedule() {
        let mut k = keeper(&[dec!(60_000), dec!(60_000), dec!(60_000)], 2);
        let reports: Vec<bool> = (0..3)
            .map(|_| k.tick().unwrap().unwrap().report.is_some())
            .collect();
        assert_eq!(reports, vec![false, true, false]);
    }

    #[tokio::test]
    async fn test_run_stops_when_path_exhausted() {
        let mut k = keeper(&[dec!(60_000), dec!(59_000), dec!(58_000)], 2);
        assert_eq!(k.run().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let mut k = keeper(&[dec!(60_000)], 1);
        k.shutdown.cancel();
        assert_eq!(k.run().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_bails_after_consecutive_failures() {
        let zero = Decimal::ZERO;
        let mut k = keeper(&[zero, zero, zero, zero], 1);
        let err = k.run().await.unwrap_err();
        assert!(err.to_string().contains("3 consecutive"), "{err}");
        assert_eq!(k.ticks(), 3);
    }

    #[test]
    fn test_failed_tick_leaves_position_untouched() {
        let mut k = keeper(&[Decimal::ZERO], 1);
        let debt_before = k.vault().strategy().position(k.chain()).debt;
        assert!(k.tick().is_err());
        assert_eq!(k.vault().strategy().position(k.chain()).debt, debt_before);
    }
}
