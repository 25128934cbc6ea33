//! Position ledger: fresh reads of everything the strategy controls, the
//! risk band it must stay inside, and the LTV arithmetic built on both.

use alloy::primitives::{Address, U256};
use tracing::debug;

use crate::constants::{MAX_WARNING_LTV_MULTIPLIER_BPS, WAD};
use crate::errors::{StrategyError, StrategyResult};
use crate::execution::market::{MoneyMarket, TokenLedger};
use crate::execution::reserve_holder::ReserveHolder;
use crate::types::wad_ray::{mul_div, mul_div_up};
use crate::types::{Position, PositionSummary, Usd, Wad};

use super::price_converter::PriceConverter;

// ---------------------------------------------------------------------------
// RiskBand
// ---------------------------------------------------------------------------

/// Target and warning LTVs as fractions of the liquidation collateral factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskBand {
    target_bps: u64,
    warning_bps: u64,
}

impl RiskBand {
    /// Requires `target < warning <= 9000`.
    pub fn new(target_bps: u64, warning_bps: u64) -> StrategyResult<Self> {
        if target_bps >= warning_bps || warning_bps > MAX_WARNING_LTV_MULTIPLIER_BPS {
            return Err(StrategyError::InvalidRiskBand {
                target_bps,
                warning_bps,
                max_bps: MAX_WARNING_LTV_MULTIPLIER_BPS,
            });
        }
        Ok(Self {
            target_bps,
            warning_bps,
        })
    }

    pub fn target_bps(&self) -> u64 {
        self.target_bps
    }

    pub fn warning_bps(&self) -> u64 {
        self.warning_bps
    }

    pub fn target_ltv(&self, liquidate_cf: Wad) -> StrategyResult<Wad> {
        liquidate_cf.scale_bps(self.target_bps)
    }

    pub fn warning_ltv(&self, liquidate_cf: Wad) -> StrategyResult<Wad> {
        liquidate_cf.scale_bps(self.warning_bps)
    }
}

// ---------------------------------------------------------------------------
// PositionLedger
// ---------------------------------------------------------------------------

/// Target and warning LTV for the current market parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LtvBand {
    pub target: Wad,
    pub warning: Wad,
}

#[derive(Debug, Clone, Copy)]
pub struct PositionLedger<'a> {
    strategy: Address,
    asset: Address,
    base_token: Address,
    reserve: &'a ReserveHolder,
    prices: PriceConverter<'a>,
    band: RiskBand,
}

impl<'a> PositionLedger<'a> {
    pub fn new(
        strategy: Address,
        asset: Address,
        base_token: Address,
        reserve: &'a ReserveHolder,
        prices: PriceConverter<'a>,
        band: RiskBand,
    ) -> Self {
        Self {
            strategy,
            asset,
            base_token,
            reserve,
            prices,
            band,
        }
    }

    /// Accrue the strategy and reserve accounts, then read.
    pub fn snapshot<C>(&self, ctx: &mut C) -> StrategyResult<Position>
    where
        C: MoneyMarket + TokenLedger,
    {
        ctx.accrue_account(self.strategy)?;
        self.reserve.accrued_balance(ctx)?;
        Ok(self.read(ctx))
    }

    /// Read balances as last accrued.
    pub fn read<C>(&self, ctx: &C) -> Position
    where
        C: MoneyMarket + TokenLedger,
    {
        Position {
            collateral: ctx.user_collateral(self.strategy, self.asset),
            debt: ctx.borrow_balance_of(self.strategy),
            idle_asset: ctx.token_balance(self.asset, self.strategy),
            loose_debt_token: ctx.token_balance(self.base_token, self.strategy),
            reserve_balance: self.reserve.balance(ctx),
        }
    }

    pub fn collateral_usd<M: MoneyMarket + ?Sized>(&self, market: &M, position: &Position) -> StrategyResult<Usd> {
        self.prices.to_usd(market, position.collateral, self.asset)
    }

    pub fn debt_usd<M: MoneyMarket + ?Sized>(&self, market: &M, position: &Position) -> StrategyResult<Usd> {
        self.prices.to_usd(market, position.debt, self.base_token)
    }

    /// `debt_usd / collateral_usd`, zero without collateral.
    pub fn current_ltv<M: MoneyMarket + ?Sized>(&self, market: &M, position: &Position) -> StrategyResult<Wad> {
        let collateral_usd = self.collateral_usd(market, position)?;
        if collateral_usd.is_zero() {
            return Ok(Wad::ZERO);
        }
        let debt_usd = self.debt_usd(market, position)?;
        mul_div(debt_usd.0, WAD, collateral_usd.0, "current_ltv").map(Wad)
    }

    pub fn ltv_band<M: MoneyMarket + ?Sized>(&self, market: &M) -> StrategyResult<LtvBand> {
        let liquidate_cf = market.asset_info(self.asset)?.liquidate_collateral_factor;
        Ok(LtvBand {
            target: self.band.target_ltv(liquidate_cf)?,
            warning: self.band.warning_ltv(liquidate_cf)?,
        })
    }

    /// Debt, in base units, that `collateral` supports at `target`.
    pub fn target_debt<M: MoneyMarket + ?Sized>(
        &self,
        market: &M,
        collateral: U256,
        target: Wad,
    ) -> StrategyResult<U256> {
        let collateral_usd = self.prices.to_usd(market, collateral, self.asset)?;
        let debt_usd = collateral_usd.mul_wad(target)?;
        self.prices.from_usd(market, debt_usd, self.base_token)
    }

    /// Collateral that can leave while the remainder still backs the
    /// current debt at `target`. Rounds the retained collateral up.
    pub fn max_safe_withdrawal<M: MoneyMarket + ?Sized>(
        &self,
        market: &M,
        position: &Position,
        target: Wad,
    ) -> StrategyResult<U256> {
        if position.debt.is_zero() {
            return Ok(position.collateral);
        }
        if target.is_zero() {
            return Ok(U256::ZERO);
        }
        let debt_usd = self.debt_usd(market, position)?;
        let required_usd = Usd(mul_div_up(debt_usd.0, WAD, target.0, "required collateral")?);
        let required = self.prices.from_usd_up(market, required_usd, self.asset)?;
        let safe = position.collateral.saturating_sub(required);
        debug!(%safe, %required, collateral = %position.collateral, "max safe withdrawal");
        Ok(safe)
    }

    /// Owed base, converted to asset units.
    pub fn owed_in_asset<M: MoneyMarket + ?Sized>(&self, market: &M, position: &Position) -> StrategyResult<U256> {
        self.prices
            .convert(market, position.debt_token_owed(), self.base_token, self.asset)
    }

    pub fn summary<M: MoneyMarket + ?Sized>(&self, market: &M, position: &Position) -> StrategyResult<PositionSummary> {
        let band = self.ltv_band(market)?;
        Ok(PositionSummary::new(
            self.current_ltv(market, position)?,
            band.target,
            band.warning,
            self.collateral_usd(market, position)?,
            self.debt_usd(market, position)?,
        ))
    }
}
