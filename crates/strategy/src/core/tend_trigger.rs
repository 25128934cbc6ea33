//! Off-cycle maintenance heuristic. Read-only.

use alloy::primitives::{Address, U256};
use tracing::debug;

use crate::constants::MIN_TEND_LTV_GAP;
use crate::errors::StrategyResult;
use crate::execution::market::Chain;
use crate::types::wad_ray::mul_div;

use super::ledger::PositionLedger;
use super::price_converter::PriceConverter;
use super::yield_model::YieldModel;

#[derive(Debug, Clone, Copy)]
pub struct TendTrigger<'a> {
    strategy: Address,
    base_token: Address,
    ledger: PositionLedger<'a>,
    prices: PriceConverter<'a>,
    yields: YieldModel<'a>,
    /// Wei.
    max_gas_price: U256,
}

impl<'a> TendTrigger<'a> {
    pub fn new(
        strategy: Address,
        base_token: Address,
        ledger: PositionLedger<'a>,
        prices: PriceConverter<'a>,
        yields: YieldModel<'a>,
        max_gas_price: U256,
    ) -> Self {
        Self {
            strategy,
            base_token,
            ledger,
            prices,
            yields,
            max_gas_price,
        }
    }

    pub fn should_tend<C: Chain>(&self, ctx: &C) -> StrategyResult<bool> {
        if ctx.is_liquidatable(self.strategy) {
            debug!("tend: account liquidatable");
            return Ok(true);
        }

        let position = self.ledger.read(ctx);
        if position.collateral.is_zero() && position.idle_asset.is_zero() {
            return Ok(false);
        }

        let band = self.ledger.ltv_band(ctx)?;
        let current = self.ledger.current_ltv(ctx, &position)?;
        let fee = ctx.base_fee();

        if current > band.warning {
            // Deeper into the warning zone tolerates a higher fee.
            let ceiling = mul_div(self.max_gas_price, current.0, band.warning.0, "tend ceiling")?;
            debug!(current_ltv = %current, %fee, %ceiling, "tend: over warning");
            return Ok(fee <= ceiling);
        }

        if fee > self.max_gas_price {
            return Ok(false);
        }

        if position.debt > ctx.base_borrow_min() && self.yields.borrow_unprofitable(ctx, U256::ZERO)? {
            debug!("tend: borrowing unprofitable while levered");
            return Ok(true);
        }

        let gap = band.target.saturating_sub(current);
        if gap.0 > MIN_TEND_LTV_GAP {
            let collateral_usd = self.ledger.collateral_usd(ctx, &position)?;
            let debt_usd = self.ledger.debt_usd(ctx, &position)?;
            let needed_usd = collateral_usd.mul_wad(band.target)?.saturating_sub(debt_usd);
            let needed = self.prices.from_usd(ctx, needed_usd, self.base_token)?;
            let profitable = !self.yields.borrow_unprofitable(ctx, needed)?;
            debug!(gap = %gap, %needed, profitable, "tend: room to lever up");
            return Ok(profitable);
        }

        Ok(false)
    }
}
