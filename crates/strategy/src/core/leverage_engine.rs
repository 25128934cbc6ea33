//! Leverage control loop.
//!
//! `adjust_position` supplies new collateral, classifies the position into
//! one of three regimes and borrows, repays or holds accordingly. Nothing
//! about earlier calls is remembered; every call starts from fresh balances.

use alloy::primitives::{Address, U256};
use tracing::{debug, info, warn};

use crate::errors::StrategyResult;
use crate::execution::market::{Chain, MoneyMarket, TokenLedger};
use crate::execution::reserve_holder::ReserveHolder;
use crate::types::{Adjustment, BorrowSkip, Position, Regime, Wad};

use super::ledger::PositionLedger;
use super::price_converter::PriceConverter;
use super::yield_model::YieldModel;

#[derive(Debug, Clone, Copy)]
pub struct LeverageEngine<'a> {
    strategy: Address,
    asset: Address,
    base_token: Address,
    ledger: PositionLedger<'a>,
    prices: PriceConverter<'a>,
    yields: YieldModel<'a>,
    reserve: &'a ReserveHolder,
}

impl<'a> LeverageEngine<'a> {
    pub fn new(
        strategy: Address,
        asset: Address,
        base_token: Address,
        ledger: PositionLedger<'a>,
        prices: PriceConverter<'a>,
        yields: YieldModel<'a>,
        reserve: &'a ReserveHolder,
    ) -> Self {
        Self {
            strategy,
            asset,
            base_token,
            ledger,
            prices,
            yields,
            reserve,
        }
    }

    /// Supply `suppliable` asset, then move the position back into its band.
    pub fn adjust_position<C: Chain>(&self, ctx: &mut C, suppliable: U256) -> StrategyResult<Adjustment> {
        if !suppliable.is_zero() {
            ctx.supply(self.strategy, self.asset, suppliable)?;
            info!(amount = %suppliable, "collateral supplied");
        }

        // Balances are read only after the supply above has landed.
        let position = self.ledger.snapshot(ctx)?;
        let band = self.ledger.ltv_band(ctx)?;
        let current = self.ledger.current_ltv(ctx, &position)?;
        let regime = Regime::classify(current, band.target, band.warning);
        debug!(
            current_ltv = %current,
            target_ltv = %band.target,
            warning_ltv = %band.warning,
            regime = regime.as_str(),
            "position classified"
        );

        let outcome = match regime {
            Regime::Suboptimal => self.lever_up(ctx, &position, band.target)?,
            Regime::Unhealthy => self.lever_down(ctx, &position, band.target)?,
            Regime::Healthy => Adjustment::Held,
        };

        park_loose_base(ctx, self.reserve, self.strategy, self.base_token)?;
        Ok(outcome)
    }

    fn lever_up<C: Chain>(&self, ctx: &mut C, position: &Position, target: Wad) -> StrategyResult<Adjustment> {
        if ctx.is_withdraw_paused() {
            info!("borrow skipped: market withdrawals paused");
            return Ok(Adjustment::BorrowSkipped {
                reason: BorrowSkip::MarketPaused,
            });
        }
        let collateral_usd = self.ledger.collateral_usd(ctx, position)?;
        let debt_usd = self.ledger.debt_usd(ctx, position)?;
        let needed_usd = collateral_usd.mul_wad(target)?.saturating_sub(debt_usd);
        let needed = self
            .prices
            .from_usd(ctx, needed_usd, self.base_token)?
            .min(ctx.base_liquidity());

        if needed.is_zero() {
            return Ok(Adjustment::BorrowSkipped {
                reason: BorrowSkip::ZeroAmount,
            });
        }
        if self.yields.borrow_unprofitable(ctx, needed)? {
            info!(amount = %needed, "borrow skipped: projected cost exceeds rewards");
            return Ok(Adjustment::BorrowSkipped {
                reason: BorrowSkip::Unprofitable,
            });
        }
        if position.debt.saturating_add(needed) <= ctx.base_borrow_min() {
            debug!(amount = %needed, min = %ctx.base_borrow_min(), "borrow skipped: below market minimum");
            return Ok(Adjustment::BorrowSkipped {
                reason: BorrowSkip::BelowBorrowMin,
            });
        }

        ctx.withdraw(self.strategy, self.base_token, needed)?;
        info!(amount = %needed, "borrowed");
        Ok(Adjustment::Borrowed { amount: needed })
    }

    fn lever_down<C: Chain>(&self, ctx: &mut C, position: &Position, target: Wad) -> StrategyResult<Adjustment> {
        if ctx.is_supply_paused() {
            warn!(debt = %position.debt, "repay deferred: market supply paused");
            return Ok(Adjustment::RepayDeferred);
        }
        let target_debt = self.ledger.target_debt(ctx, position.collateral, target)?;
        let excess = position.debt.saturating_sub(target_debt);
        pull_from_reserve(ctx, self.reserve, self.strategy, self.base_token, excess)?;
        let repaid = repay_loose(ctx, self.strategy, self.base_token)?;
        Ok(Adjustment::Repaid { amount: repaid })
    }
}

// ---------------------------------------------------------------------------
// Shared repayment steps
// ---------------------------------------------------------------------------

/// Top loose base up to `amount` from the reserve holder, clamped to what the
/// reserve holds and what the market can pay out right now.
pub(crate) fn pull_from_reserve<C>(
    ctx: &mut C,
    reserve: &ReserveHolder,
    strategy: Address,
    base_token: Address,
    amount: U256,
) -> StrategyResult<U256>
where
    C: MoneyMarket + TokenLedger,
{
    if ctx.is_withdraw_paused() {
        return Ok(U256::ZERO);
    }
    let loose = ctx.token_balance(base_token, strategy);
    let wanted = amount.saturating_sub(loose);
    if wanted.is_zero() {
        return Ok(U256::ZERO);
    }
    let available = wanted
        .min(reserve.accrued_balance(ctx)?)
        .min(ctx.base_liquidity());
    if available.is_zero() {
        return Ok(U256::ZERO);
    }
    reserve.withdraw(ctx, strategy, available)?;
    debug!(amount = %available, "pulled from reserve");
    Ok(available)
}

/// Repay debt with whatever base the strategy holds.
pub(crate) fn repay_loose<C>(ctx: &mut C, strategy: Address, base_token: Address) -> StrategyResult<U256>
where
    C: MoneyMarket + TokenLedger,
{
    let amount = ctx
        .token_balance(base_token, strategy)
        .min(ctx.borrow_balance_of(strategy));
    if amount.is_zero() {
        return Ok(U256::ZERO);
    }
    ctx.supply(strategy, base_token, amount)?;
    info!(%amount, "debt repaid");
    Ok(amount)
}

/// Forward loose base to the reserve holder. Left loose while supply is paused.
pub(crate) fn park_loose_base<C>(
    ctx: &mut C,
    reserve: &ReserveHolder,
    strategy: Address,
    base_token: Address,
) -> StrategyResult<U256>
where
    C: MoneyMarket + TokenLedger,
{
    if ctx.is_supply_paused() || ctx.token_balance(base_token, strategy).is_zero() {
        return Ok(U256::ZERO);
    }
    reserve.deposit(ctx, strategy)
}
