//! Swap routing: fee tiers per token pair and a hop through the base token
//! for pairs that do not include it.

use std::collections::HashMap;

use alloy::primitives::{Address, U256};
use tracing::{debug, info};

use crate::constants::DEFAULT_UNISWAP_FEE;
use crate::errors::StrategyResult;
use crate::execution::market::{SwapRouter, TokenLedger};
use crate::types::SwapRoute;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapSettings {
    hop_token: Address,
    fees: HashMap<(Address, Address), u32>,
    min_amount_to_sell: U256,
}

impl SwapSettings {
    pub fn new(hop_token: Address, min_amount_to_sell: U256) -> Self {
        Self {
            hop_token,
            fees: HashMap::new(),
            min_amount_to_sell,
        }
    }

    /// Fee tier for the `a`/`b` pool, both directions.
    pub fn set_fee(&mut self, a: Address, b: Address, fee: u32) {
        self.fees.insert((a, b), fee);
        self.fees.insert((b, a), fee);
    }

    pub fn fee(&self, from: Address, to: Address) -> u32 {
        self.fees
            .get(&(from, to))
            .copied()
            .unwrap_or(DEFAULT_UNISWAP_FEE)
    }

    pub fn min_amount_to_sell(&self) -> U256 {
        self.min_amount_to_sell
    }

    pub fn set_min_amount_to_sell(&mut self, amount: U256) {
        self.min_amount_to_sell = amount;
    }

    pub fn route(&self, from: Address, to: Address) -> SwapRoute {
        if from == self.hop_token || to == self.hop_token {
            return SwapRoute {
                token_in: from,
                token_out: to,
                hop: None,
                fee: self.fee(from, to),
            };
        }
        SwapRoute {
            token_in: from,
            token_out: to,
            hop: Some((self.hop_token, self.fee(from, self.hop_token))),
            fee: self.fee(self.hop_token, to),
        }
    }
}

/// Executes swaps for one account.
#[derive(Debug, Clone, Copy)]
pub struct Swapper<'a> {
    settings: &'a SwapSettings,
    account: Address,
}

impl<'a> Swapper<'a> {
    pub fn new(settings: &'a SwapSettings, account: Address) -> Self {
        Self { settings, account }
    }

    /// Sell exactly `amount_in` of `from`. Amounts under the minimum are left
    /// alone and report zero output.
    pub fn swap_from<C>(
        &self,
        ctx: &mut C,
        from: Address,
        to: Address,
        amount_in: U256,
        min_out: U256,
    ) -> StrategyResult<U256>
    where
        C: SwapRouter + TokenLedger,
    {
        if amount_in.is_zero() || amount_in < self.settings.min_amount_to_sell {
            debug!(%amount_in, "swap skipped: under minimum");
            return Ok(U256::ZERO);
        }
        let route = self.settings.route(from, to);
        let out = ctx.swap_exact_in(self.account, &route, amount_in, min_out)?;
        info!(%from, %to, %amount_in, amount_out = %out, "swapped exact in");
        Ok(out)
    }

    /// Buy exactly `amount_out` of `to`, spending at most `max_in` (and never
    /// more than the account holds). Returns the amount spent.
    pub fn swap_to<C>(
        &self,
        ctx: &mut C,
        from: Address,
        to: Address,
        amount_out: U256,
        max_in: U256,
    ) -> StrategyResult<U256>
    where
        C: SwapRouter + TokenLedger,
    {
        if amount_out.is_zero() || max_in < self.settings.min_amount_to_sell {
            debug!(%amount_out, %max_in, "swap skipped: under minimum");
            return Ok(U256::ZERO);
        }
        let max_in = max_in.min(ctx.token_balance(from, self.account));
        let route = self.settings.route(from, to);
        let spent = ctx.swap_exact_out(self.account, &route, amount_out, max_in)?;
        info!(%from, %to, %amount_out, amount_in = %spent, "swapped exact out");
        Ok(spent)
    }
}
