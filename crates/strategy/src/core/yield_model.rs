//! Projected borrow cost against projected reward yield.
//!
//! All figures are annualized WAD ratios evaluated after a hypothetical
//! additional borrow of `delta` base units, so the borrow guard compares the
//! marginal position rather than today's.

use alloy::primitives::{Address, U256};
use tracing::debug;

use crate::constants::{DAYS_PER_YEAR, SECONDS_PER_DAY, SECONDS_PER_YEAR, WAD};
use crate::errors::{StrategyError, StrategyResult};
use crate::execution::market::MoneyMarket;
use crate::types::wad_ray::{mul_div, sub_bps};
use crate::types::{Usd, Wad};

use super::price_converter::PriceConverter;

#[derive(Debug, Clone, Copy)]
pub struct YieldModel<'a> {
    prices: PriceConverter<'a>,
    base_token: Address,
    reward_token: Address,
    reward_price_buffer_bps: u64,
}

impl<'a> YieldModel<'a> {
    pub fn new(
        prices: PriceConverter<'a>,
        base_token: Address,
        reward_token: Address,
        reward_price_buffer_bps: u64,
    ) -> Self {
        Self {
            prices,
            base_token,
            reward_token,
            reward_price_buffer_bps,
        }
    }

    /// `(total_borrow + delta) / (total_supply + delta)`, zero on an empty market.
    pub fn utilization<M: MoneyMarket + ?Sized>(&self, market: &M, delta: U256) -> StrategyResult<Wad> {
        let supply = market.total_supply().saturating_add(delta);
        if supply.is_zero() {
            return Ok(Wad::ZERO);
        }
        let borrow = market.total_borrow().saturating_add(delta);
        mul_div(borrow, WAD, supply, "utilization").map(Wad)
    }

    /// Borrow rate net of what the same dollars earn supplied, per year.
    pub fn net_borrow_apr<M: MoneyMarket + ?Sized>(&self, market: &M, delta: U256) -> StrategyResult<Wad> {
        let utilization = self.utilization(market, delta)?;
        let spread = market
            .borrow_rate(utilization)
            .saturating_sub(market.supply_rate(utilization));
        spread
            .0
            .checked_mul(U256::from(SECONDS_PER_YEAR))
            .map(Wad)
            .ok_or(StrategyError::ArithmeticOverflow {
                context: "net_borrow_apr",
            })
    }

    /// Reward APR earned by borrowing `delta` more: the borrower emission on
    /// the debt plus the supplier emission on the parked reserve.
    pub fn net_reward_apr<M: MoneyMarket + ?Sized>(&self, market: &M, delta: U256) -> StrategyResult<Wad> {
        let borrow_side = self.reward_apr(
            market,
            market.base_tracking_borrow_speed(),
            market.total_borrow().saturating_add(delta),
        )?;
        let supply_side = self.reward_apr(
            market,
            market.base_tracking_supply_speed(),
            market.total_supply().saturating_add(delta),
        )?;
        let apr = Wad(borrow_side.0.saturating_add(supply_side.0));
        debug!(%delta, borrow_side = %borrow_side, supply_side = %supply_side, "reward apr");
        Ok(apr)
    }

    /// Whether borrowing `delta` more costs more than it earns.
    pub fn borrow_unprofitable<M: MoneyMarket + ?Sized>(&self, market: &M, delta: U256) -> StrategyResult<bool> {
        let cost = self.net_borrow_apr(market, delta)?;
        let reward = self.net_reward_apr(market, delta)?;
        debug!(%delta, cost = %cost, reward = %reward, "borrow profitability");
        Ok(cost > reward)
    }

    fn reward_apr<M: MoneyMarket + ?Sized>(
        &self,
        market: &M,
        speed: U256,
        pool: U256,
    ) -> StrategyResult<Wad> {
        if speed.is_zero() || pool.is_zero() {
            return Ok(Wad::ZERO);
        }
        let per_day = mul_div(
            speed.saturating_mul(U256::from(SECONDS_PER_DAY)),
            WAD,
            market.tracking_index_scale(),
            "reward per day",
        )?;
        let reward_price = sub_bps(
            self.prices.price(market, self.reward_token)?,
            self.reward_price_buffer_bps,
        )?;
        let usd_per_day = mul_div(per_day, reward_price, WAD, "reward usd per day")?;
        let pool_usd: Usd = self.prices.to_usd(market, pool, self.base_token)?;
        if pool_usd.is_zero() {
            return Ok(Wad::ZERO);
        }
        let daily = mul_div(usd_per_day, WAD, pool_usd.0, "reward apr")?;
        Ok(Wad(daily.saturating_mul(U256::from(DAYS_PER_YEAR))))
    }
}
