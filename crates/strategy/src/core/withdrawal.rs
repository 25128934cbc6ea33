//! Withdrawal planner: frees asset from collateral without ever leaving the
//! remaining position above target LTV.
//!
//! Repayment always happens before the withdrawal it enables. When the
//! reserve holder is empty and debt still blocks a full exit, rewards and
//! then the asset itself are sold for base to clear the debt. Collateral for
//! those sales is withdrawn against the market's borrow limit, a slice at a
//! time, since each repayment frees room for the next. That path realizes a
//! loss and is reserved for wind-downs.

use alloy::primitives::{Address, U256};
use tracing::{debug, info, warn};

use crate::constants::DUST_SWAP_FLOOR;
use crate::errors::StrategyResult;
use crate::execution::market::Chain;
use crate::execution::reserve_holder::ReserveHolder;
use crate::types::wad_ray::{add_bps, sub_bps};
use crate::types::{Position, Wad, Withdrawal};

use super::leverage_engine::{pull_from_reserve, repay_loose};
use super::ledger::PositionLedger;
use super::price_converter::PriceConverter;
use super::swapper::Swapper;

/// Withdraw, sell and repay rounds before the wind-down gives up on the
/// remaining debt.
const MAX_WIND_DOWN_ROUNDS: usize = 16;

#[derive(Debug, Clone, Copy)]
pub struct WithdrawalPlanner<'a> {
    strategy: Address,
    asset: Address,
    base_token: Address,
    reward_token: Address,
    ledger: PositionLedger<'a>,
    prices: PriceConverter<'a>,
    reserve: &'a ReserveHolder,
    swapper: Swapper<'a>,
    slippage_bps: u64,
    preserve_debt_on_shortfall: bool,
}

/// Token roles the planner moves between.
#[derive(Debug, Clone, Copy)]
pub struct PlannerTokens {
    pub strategy: Address,
    pub asset: Address,
    pub base_token: Address,
    pub reward_token: Address,
}

impl<'a> WithdrawalPlanner<'a> {
    pub fn new(
        tokens: PlannerTokens,
        ledger: PositionLedger<'a>,
        prices: PriceConverter<'a>,
        reserve: &'a ReserveHolder,
        swapper: Swapper<'a>,
        slippage_bps: u64,
        preserve_debt_on_shortfall: bool,
    ) -> Self {
        Self {
            strategy: tokens.strategy,
            asset: tokens.asset,
            base_token: tokens.base_token,
            reward_token: tokens.reward_token,
            ledger,
            prices,
            reserve,
            swapper,
            slippage_bps,
            preserve_debt_on_shortfall,
        }
    }

    /// Free up to `needed` asset from collateral into the strategy's balance.
    pub fn liquidate<C: Chain>(&self, ctx: &mut C, needed: U256) -> StrategyResult<Withdrawal> {
        ctx.accrue_account(self.strategy)?;
        let position = self.ledger.read(ctx);
        let target = self.ledger.ltv_band(ctx)?.target;
        let mut report = Withdrawal {
            requested: needed,
            ..Default::default()
        };

        let to_repay = self.amount_to_repay(ctx, &position, needed, target)?;
        if !to_repay.is_zero() {
            pull_from_reserve(ctx, self.reserve, self.strategy, self.base_token, to_repay)?;
            report.repaid += repay_loose(ctx, self.strategy, self.base_token)?;
        }

        report.freed += self.withdraw_safe(ctx, needed, target)?;

        if report.freed < needed && self.shortfall_allowed(ctx)? {
            let owed = self.unbacked_debt(ctx);
            if self.is_dust(ctx, owed)? {
                debug!(%owed, "shortfall is dust, no swap");
            } else {
                warn!(
                    requested = %needed,
                    freed = %report.freed,
                    owed = %owed,
                    "reserve exhausted, selling to clear remaining debt"
                );
                self.claim_rewards(ctx)?;
                self.sell_rewards_for_base(ctx, owed)?;
                report.repaid += repay_loose(ctx, self.strategy, self.base_token)?;
                self.wind_down(ctx, &mut report)?;
            }
            let remainder = needed.saturating_sub(report.freed);
            report.freed += self.withdraw_safe(ctx, remainder, target)?;
        }

        info!(
            requested = %report.requested,
            freed = %report.freed,
            repaid = %report.repaid,
            asset_sold = %report.asset_sold,
            "liquidated"
        );
        Ok(report)
    }

    /// Debt to clear so that the collateral left after withdrawing `needed`
    /// sits at or below target. All of it when `needed` covers everything.
    pub fn amount_to_repay<C: Chain>(
        &self,
        ctx: &C,
        position: &Position,
        needed: U256,
        target: Wad,
    ) -> StrategyResult<U256> {
        if needed >= position.collateral {
            return Ok(position.debt);
        }
        let target_debt = self
            .ledger
            .target_debt(ctx, position.collateral - needed, target)?;
        Ok(position.debt.saturating_sub(target_debt))
    }

    /// Withdraw `min(amount, max_safe_withdrawal)` of collateral.
    fn withdraw_safe<C: Chain>(&self, ctx: &mut C, amount: U256, target: Wad) -> StrategyResult<U256> {
        let position = self.ledger.read(ctx);
        let safe = self.ledger.max_safe_withdrawal(ctx, &position, target)?;
        let amount = amount.min(safe);
        if amount.is_zero() {
            return Ok(U256::ZERO);
        }
        ctx.withdraw(self.strategy, self.asset, amount)?;
        info!(%amount, "collateral withdrawn");
        Ok(amount)
    }

    fn shortfall_allowed<C: Chain>(&self, ctx: &mut C) -> StrategyResult<bool> {
        if self.preserve_debt_on_shortfall || ctx.borrow_balance_of(self.strategy).is_zero() {
            return Ok(false);
        }
        Ok(self.reserve.accrued_balance(ctx)?.is_zero())
    }

    /// Debt not covered by base the strategy already holds.
    fn unbacked_debt<C: Chain>(&self, ctx: &C) -> U256 {
        ctx.borrow_balance_of(self.strategy)
            .saturating_sub(ctx.token_balance(self.base_token, self.strategy))
    }

    /// Claim rewards for the strategy and reserve accounts into the strategy.
    pub fn claim_rewards<C: Chain>(&self, ctx: &mut C) -> StrategyResult<U256> {
        let own = if ctx.reward_owed(self.strategy).is_zero() {
            U256::ZERO
        } else {
            ctx.claim(self.strategy, true)?
        };
        let reserve = self.reserve.claim_rewards(ctx, self.strategy)?;
        if !(own + reserve).is_zero() {
            info!(own = %own, reserve = %reserve, "rewards claimed");
        }
        Ok(own + reserve)
    }

    /// Sell held rewards for up to `owed` base: exactly `owed` when the
    /// rewards are worth more, everything otherwise.
    pub fn sell_rewards_for_base<C: Chain>(&self, ctx: &mut C, owed: U256) -> StrategyResult<U256> {
        let rewards = ctx.token_balance(self.reward_token, self.strategy);
        if rewards.is_zero() || owed.is_zero() {
            return Ok(U256::ZERO);
        }
        if self.is_dust(ctx, owed)? {
            debug!(%owed, "reward swap skipped: dust");
            return Ok(U256::ZERO);
        }
        let value = self
            .prices
            .convert(ctx, rewards, self.reward_token, self.base_token)?;
        if value > owed {
            let reward_needed = self
                .prices
                .convert(ctx, owed, self.base_token, self.reward_token)?;
            let max_in = add_bps(reward_needed, self.slippage_bps)?;
            let spent = self
                .swapper
                .swap_to(ctx, self.reward_token, self.base_token, owed, max_in)?;
            Ok(if spent.is_zero() { U256::ZERO } else { owed })
        } else {
            let min_out = sub_bps(value, self.slippage_bps)?;
            self.swapper
                .swap_from(ctx, self.reward_token, self.base_token, rewards, min_out)
        }
    }

    /// Whether buying `owed` base is below the swap floor, measured in asset.
    fn is_dust<C: Chain>(&self, ctx: &C, owed: U256) -> StrategyResult<bool> {
        if owed.is_zero() {
            return Ok(true);
        }
        let asset_equivalent = self
            .prices
            .convert(ctx, owed, self.base_token, self.asset)?;
        Ok(asset_equivalent <= DUST_SWAP_FLOOR)
    }

    /// Sell asset for base until the debt is gone. Each round withdraws only
    /// what the market's borrow limit allows, sells it and repays, which
    /// opens room for the next round.
    fn wind_down<C: Chain>(&self, ctx: &mut C, report: &mut Withdrawal) -> StrategyResult<()> {
        let borrow_cf = ctx.asset_info(self.asset)?.borrow_collateral_factor;
        for round in 0..MAX_WIND_DOWN_ROUNDS {
            let owed = self.unbacked_debt(ctx);
            if self.is_dust(ctx, owed)? {
                break;
            }
            let asset_equivalent = self
                .prices
                .convert(ctx, owed, self.base_token, self.asset)?;
            let max_in = add_bps(asset_equivalent, self.slippage_bps)?;

            let idle = ctx.token_balance(self.asset, self.strategy);
            if idle < max_in {
                let position = self.ledger.read(ctx);
                let room = self.ledger.max_safe_withdrawal(ctx, &position, borrow_cf)?;
                let amount = (max_in - idle).min(room);
                if !amount.is_zero() {
                    ctx.withdraw(self.strategy, self.asset, amount)?;
                    report.freed += amount;
                }
            }

            let sold = self.buy_base_with_asset(ctx, owed, asset_equivalent, max_in)?;
            if sold.is_zero() {
                break;
            }
            report.asset_sold += sold;
            report.repaid += repay_loose(ctx, self.strategy, self.base_token)?;
            debug!(round, %sold, debt = %ctx.borrow_balance_of(self.strategy), "wind-down round");
        }
        Ok(())
    }

    /// Sell asset for `owed` base: exactly `owed` when `max_in` asset is on
    /// hand, otherwise up to the fair `asset_equivalent` of what is held so
    /// the proceeds never overshoot the debt. Returns the asset spent.
    fn buy_base_with_asset<C: Chain>(
        &self,
        ctx: &mut C,
        owed: U256,
        asset_equivalent: U256,
        max_in: U256,
    ) -> StrategyResult<U256> {
        let idle = ctx.token_balance(self.asset, self.strategy);
        if idle.is_zero() {
            return Ok(U256::ZERO);
        }
        let spent = if idle >= max_in {
            self.swapper
                .swap_to(ctx, self.asset, self.base_token, owed, max_in)?
        } else {
            let amount = idle.min(asset_equivalent);
            let expected = self
                .prices
                .convert(ctx, amount, self.asset, self.base_token)?;
            let min_out = sub_bps(expected, self.slippage_bps)?;
            let bought = self
                .swapper
                .swap_from(ctx, self.asset, self.base_token, amount, min_out)?;
            if bought.is_zero() {
                U256::ZERO
            } else {
                amount
            }
        };
        if !spent.is_zero() {
            warn!(asset_sold = %spent, "sold asset to repay debt");
        }
        Ok(spent)
    }
}
