//! USD conversion across tokens with heterogeneous decimals.
//!
//! Every amount the engine compares goes through USD at 1e8. Prices come from
//! the money market's oracle, one feed per token.

use std::collections::HashMap;

use alloy::primitives::{Address, U256};

use crate::constants::{NATIVE_PRICE_WAD, USD_SCALE};
use crate::errors::{StrategyError, StrategyResult};
use crate::execution::market::MoneyMarket;
use crate::types::wad_ray::{mul_div, mul_div_up};
use crate::types::{TokenInfo, Usd};

/// Borrowed view over the strategy's token table.
#[derive(Debug, Clone, Copy)]
pub struct PriceConverter<'a> {
    tokens: &'a HashMap<Address, TokenInfo>,
    wrapped_native: Address,
}

impl<'a> PriceConverter<'a> {
    pub fn new(tokens: &'a HashMap<Address, TokenInfo>, wrapped_native: Address) -> Self {
        Self {
            tokens,
            wrapped_native,
        }
    }

    fn info(&self, token: Address) -> StrategyResult<&'a TokenInfo> {
        self.tokens
            .get(&token)
            .ok_or(StrategyError::UnknownToken { token })
    }

    /// Oracle price of `token`, 8 decimals.
    pub fn price<M: MoneyMarket + ?Sized>(&self, market: &M, token: Address) -> StrategyResult<U256> {
        let info = self.info(token)?;
        let feed = if info.price_feed == Address::ZERO {
            default_feed(market, token)?
        } else {
            info.price_feed
        };
        let price = market.get_price(feed)?;
        if price.is_zero() {
            return Err(StrategyError::Oracle {
                feed,
                reason: "zero price".into(),
            });
        }
        // Markets quoting in the native token report it as exactly 1e8.
        if price == USD_SCALE && token == self.wrapped_native {
            return Ok(NATIVE_PRICE_WAD);
        }
        Ok(price)
    }

    pub fn to_usd<M: MoneyMarket + ?Sized>(
        &self,
        market: &M,
        amount: U256,
        token: Address,
    ) -> StrategyResult<Usd> {
        if amount.is_zero() {
            return Ok(Usd::ZERO);
        }
        let scale = self.info(token)?.decimals_scale;
        let price = self.price(market, token)?;
        mul_div(amount, price, scale, "to_usd").map(Usd)
    }

    pub fn from_usd<M: MoneyMarket + ?Sized>(
        &self,
        market: &M,
        usd: Usd,
        token: Address,
    ) -> StrategyResult<U256> {
        if usd.is_zero() {
            return Ok(U256::ZERO);
        }
        let scale = self.info(token)?.decimals_scale;
        let price = self.price(market, token)?;
        mul_div(usd.0, scale, price, "from_usd")
    }

    /// Like [`Self::from_usd`] but rounded up, for amounts that must cover `usd`.
    pub fn from_usd_up<M: MoneyMarket + ?Sized>(
        &self,
        market: &M,
        usd: Usd,
        token: Address,
    ) -> StrategyResult<U256> {
        if usd.is_zero() {
            return Ok(U256::ZERO);
        }
        let scale = self.info(token)?.decimals_scale;
        let price = self.price(market, token)?;
        mul_div_up(usd.0, scale, price, "from_usd_up")
    }

    /// Value of `amount` of `from` expressed in `to`.
    pub fn convert<M: MoneyMarket + ?Sized>(
        &self,
        market: &M,
        amount: U256,
        from: Address,
        to: Address,
    ) -> StrategyResult<U256> {
        let usd = self.to_usd(market, amount, from)?;
        self.from_usd(market, usd, to)
    }
}

/// Feed the market itself uses for `token`.
pub fn default_feed<M: MoneyMarket + ?Sized>(market: &M, token: Address) -> StrategyResult<Address> {
    if token == market.base_token() {
        Ok(market.base_token_price_feed())
    } else {
        Ok(market.asset_info(token)?.price_feed)
    }
}

/// A feed is accepted only if it quotes a non-zero price right now.
pub fn validate_feed<M: MoneyMarket + ?Sized>(
    market: &M,
    token: Address,
    feed: Address,
) -> StrategyResult<()> {
    let feed = if feed == Address::ZERO {
        default_feed(market, token)?
    } else {
        feed
    };
    match market.get_price(feed) {
        Ok(price) if !price.is_zero() => Ok(()),
        Ok(_) => Err(StrategyError::InvalidPriceFeed {
            token,
            feed,
            reason: "zero price".into(),
        }),
        Err(e) => Err(StrategyError::InvalidPriceFeed {
            token,
            feed,
            reason: e.to_string(),
        }),
    }
}
