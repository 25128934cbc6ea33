//! Minimal accounting host: share bookkeeping around a single strategy.
//!
//! Every mutating call runs inside [`atomically`], so a failing hook leaves
//! both the chain and the vault's books untouched.

use std::collections::HashMap;

use alloy::primitives::{Address, U256};
use tracing::{info, warn};

use crate::core::strategy::{Strategy, StrategyHooks};
use crate::errors::{StrategyError, StrategyResult};
use crate::execution::market::{atomically, Chain, Transactional};
use crate::types::wad_ray::{apply_bps, mul_div, mul_div_up};
use crate::types::TendOutcome;

/// Profit or loss booked by one `report`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VaultReport {
    pub profit: U256,
    pub loss: U256,
    pub total_assets: U256,
}

#[derive(Debug, Clone)]
pub struct SimVault {
    strategy: Strategy,
    total_assets: U256,
    total_shares: U256,
    shares: HashMap<Address, U256>,
    is_shutdown: bool,
}

impl SimVault {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            total_assets: U256::ZERO,
            total_shares: U256::ZERO,
            shares: HashMap::new(),
            is_shutdown: false,
        }
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    pub fn strategy_mut(&mut self) -> &mut Strategy {
        &mut self.strategy
    }

    pub fn total_assets(&self) -> U256 {
        self.total_assets
    }

    pub fn total_shares(&self) -> U256 {
        self.total_shares
    }

    pub fn shares_of(&self, owner: Address) -> U256 {
        self.shares.get(&owner).copied().unwrap_or_default()
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown
    }

    /// Pull `assets` from `depositor`, mint shares and deploy.
    pub fn deposit<C>(&mut self, ctx: &mut C, depositor: Address, assets: U256) -> StrategyResult<U256>
    where
        C: Chain + Transactional,
    {
        if self.is_shutdown {
            return Err(StrategyError::host("deposits disabled after shutdown"));
        }
        if assets.is_zero() {
            return Err(StrategyError::host("zero deposit"));
        }
        let limit = self.strategy.available_deposit_limit(ctx);
        if assets > limit {
            return Err(StrategyError::host(format!(
                "deposit {assets} exceeds limit {limit}"
            )));
        }
        let shares = if self.total_shares.is_zero() || self.total_assets.is_zero() {
            assets
        } else {
            mul_div(assets, self.total_shares, self.total_assets, "shares minted")?
        };

        let strategy = &self.strategy;
        atomically(ctx, |ctx| {
            ctx.transfer(strategy.asset(), depositor, strategy.address(), assets)?;
            strategy.deploy_funds(ctx, assets)
        })?;

        *self.shares.entry(depositor).or_default() += shares;
        self.total_shares += shares;
        self.total_assets += assets;
        info!(%depositor, %assets, %shares, "deposit");
        Ok(shares)
    }

    /// Redeem enough of `owner`'s shares for `assets`. A shortfall up to
    /// `max_loss_bps` of the request is borne by the owner. Returns the
    /// asset actually received.
    pub fn withdraw<C>(
        &mut self,
        ctx: &mut C,
        owner: Address,
        assets: U256,
        max_loss_bps: u64,
    ) -> StrategyResult<U256>
    where
        C: Chain + Transactional,
    {
        if assets.is_zero() {
            return Err(StrategyError::host("zero withdrawal"));
        }
        let shares = mul_div_up(assets, self.total_shares, self.total_assets, "shares burned")?;
        if shares > self.shares_of(owner) {
            return Err(StrategyError::host(format!("{owner} holds too few shares")));
        }
        let limit = self.strategy.available_withdraw_limit(ctx)?;
        if assets > limit {
            return Err(StrategyError::host(format!(
                "withdrawal {assets} exceeds limit {limit}"
            )));
        }

        let strategy = &self.strategy;
        let received = atomically(ctx, |ctx| {
            let idle = ctx.token_balance(strategy.asset(), strategy.address());
            if assets > idle {
                strategy.free_funds(ctx, assets - idle)?;
            }
            let received = assets.min(ctx.token_balance(strategy.asset(), strategy.address()));
            let loss = assets - received;
            if loss > apply_bps(assets, max_loss_bps)? {
                return Err(StrategyError::host(format!(
                    "loss {loss} exceeds tolerance of {max_loss_bps} bps"
                )));
            }
            ctx.transfer(strategy.asset(), strategy.address(), owner, received)?;
            Ok(received)
        })?;

        if let Some(held) = self.shares.get_mut(&owner) {
            *held -= shares;
        }
        self.total_shares -= shares;
        self.total_assets = self.total_assets.saturating_sub(assets);
        if received < assets {
            warn!(%owner, requested = %assets, %received, "withdrawal realized a loss");
        }
        info!(%owner, %received, %shares, "withdraw");
        Ok(received)
    }

    /// Harvest through the strategy and book the change in total assets.
    pub fn report<C>(&mut self, ctx: &mut C) -> StrategyResult<VaultReport>
    where
        C: Chain + Transactional,
    {
        let strategy = &self.strategy;
        let shutdown = self.is_shutdown;
        let harvest = atomically(ctx, |ctx| strategy.harvest_and_report(ctx, shutdown))?;

        let report = VaultReport {
            profit: harvest.total_assets.saturating_sub(self.total_assets),
            loss: self.total_assets.saturating_sub(harvest.total_assets),
            total_assets: harvest.total_assets,
        };
        self.total_assets = harvest.total_assets;
        info!(profit = %report.profit, loss = %report.loss, total_assets = %report.total_assets, "report");
        Ok(report)
    }

    pub fn tend_trigger<C: Chain>(&self, ctx: &C) -> StrategyResult<bool> {
        self.strategy.tend_trigger(ctx)
    }

    pub fn tend<C>(&mut self, ctx: &mut C) -> StrategyResult<TendOutcome>
    where
        C: Chain + Transactional,
    {
        let strategy = &self.strategy;
        atomically(ctx, |ctx| {
            let idle = ctx.token_balance(strategy.asset(), strategy.address());
            strategy.tend(ctx, idle)
        })
    }

    pub fn shutdown(&mut self) {
        self.is_shutdown = true;
        warn!("vault shut down");
    }

    pub fn emergency_withdraw<C>(&mut self, ctx: &mut C, amount: U256) -> StrategyResult<()>
    where
        C: Chain + Transactional,
    {
        if !self.is_shutdown {
            return Err(StrategyError::host("emergency withdraw requires shutdown"));
        }
        let strategy = &self.strategy;
        atomically(ctx, |ctx| strategy.emergency_withdraw(ctx, amount))?;
        Ok(())
    }
}
