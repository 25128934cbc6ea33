//! In-memory money market, token ledger, swap router and reward distributor.
//!
//! Models the parts of a Compound-III-style market the strategy depends on:
//! one borrowable base token, collateral assets with borrow/liquidate
//! factors and supply caps, kinked supply/borrow rate curves, and **lazy**
//! per-account interest: balances only move when the account is accrued,
//! exactly like the real market. Swaps fill at oracle price minus a
//! configurable discount.

use std::collections::HashMap;

use alloy::primitives::{Address, U256};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::constants::{MAX_BPS, SECONDS_PER_DAY, SECONDS_PER_YEAR, WAD};
use crate::errors::{StrategyError, StrategyResult};
use crate::execution::market::{
    MoneyMarket, NetworkFee, RewardDistributor, SwapRouter, TokenLedger, Transactional,
};
use crate::types::wad_ray::mul_div;
use crate::types::{AssetInfo, SwapRoute, Wad};

/// Tracking-index scale used for reward speeds.
const TRACKING_INDEX_SCALE: u64 = 1_000_000_000_000_000;

/// One basis point of a WAD.
const WAD_PER_BPS: u64 = 100_000_000_000_000;

// ---------------------------------------------------------------------------
// Scenario parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SimTokenParams {
    pub decimals: u8,
    #[serde(with = "rust_decimal::serde::str")]
    pub price_usd: Decimal,
}

/// Annualized rate curve in basis points, kinked at `kink_bps` utilization.
#[derive(Debug, Clone, Deserialize)]
pub struct SimRateParams {
    pub kink_bps: u64,
    pub supply_base_bps: u64,
    pub supply_slope_low_bps: u64,
    pub supply_slope_high_bps: u64,
    pub borrow_base_bps: u64,
    pub borrow_slope_low_bps: u64,
    pub borrow_slope_high_bps: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimMarketParams {
    pub asset: SimTokenParams,
    pub base: SimTokenParams,
    pub reward: SimTokenParams,
    pub liquidate_cf_bps: u64,
    pub borrow_cf_bps: u64,
    /// Whole asset units.
    #[serde(with = "rust_decimal::serde::str")]
    pub supply_cap: Decimal,
    /// Whole base units.
    #[serde(with = "rust_decimal::serde::str")]
    pub base_borrow_min: Decimal,
    /// Base supplied by other lenders, whole units.
    #[serde(with = "rust_decimal::serde::str")]
    pub external_supply: Decimal,
    /// Base borrowed by other borrowers, whole units.
    #[serde(with = "rust_decimal::serde::str")]
    pub external_borrow: Decimal,
    pub rates: SimRateParams,
    /// Whole reward tokens emitted to suppliers per day.
    #[serde(with = "rust_decimal::serde::str")]
    pub reward_supply_per_day: Decimal,
    /// Whole reward tokens emitted to borrowers per day.
    #[serde(with = "rust_decimal::serde::str")]
    pub reward_borrow_per_day: Decimal,
    /// Execution discount against the oracle price on every swap.
    pub swap_discount_bps: u64,
    pub base_fee_gwei: u64,
}

/// Addresses the simulated world is wired with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimAddresses {
    pub market: Address,
    pub router: Address,
    pub asset: Address,
    pub base: Address,
    pub reward: Address,
}

impl Default for SimAddresses {
    fn default() -> Self {
        Self {
            market: Address::with_last_byte(0xc0),
            router: Address::with_last_byte(0xd0),
            asset: Address::with_last_byte(0xa1),
            base: Address::with_last_byte(0xa2),
            reward: Address::with_last_byte(0xa3),
        }
    }
}

/// Deterministic feed address for a token.
pub fn feed_address(token: Address) -> Address {
    let mut bytes = token.0 .0;
    bytes[0] ^= 0xfe;
    Address::from(bytes)
}

/// `value * 10^decimals`, truncated.
pub fn to_raw(value: Decimal, decimals: u8) -> U256 {
    let mut scaled = value;
    let mut remaining = decimals;
    // Scale in steps so the Decimal mantissa never overflows on 18 decimals.
    while remaining > 0 {
        let step = remaining.min(9);
        scaled *= Decimal::from(10u64.pow(u32::from(step)));
        remaining -= step;
    }
    U256::from(scaled.trunc().to_u128().unwrap_or_default())
}

#[derive(Debug, Clone)]
struct RateCurve {
    kink: U256,
    base: U256,
    slope_low: U256,
    slope_high: U256,
}

impl RateCurve {
    fn from_annual_bps(kink_bps: u64, base: u64, low: u64, high: u64) -> Self {
        let per_second = |bps: u64| U256::from(bps) * U256::from(WAD_PER_BPS) / U256::from(SECONDS_PER_YEAR);
        Self {
            kink: U256::from(kink_bps) * U256::from(WAD_PER_BPS),
            base: per_second(base),
            slope_low: per_second(low),
            slope_high: per_second(high),
        }
    }

    fn rate(&self, utilization: U256) -> U256 {
        if utilization <= self.kink {
            self.base + self.slope_low.saturating_mul(utilization) / WAD
        } else {
            self.base
                + self.slope_low.saturating_mul(self.kink) / WAD
                + self.slope_high.saturating_mul(utilization - self.kink) / WAD
        }
    }
}

// ---------------------------------------------------------------------------
// SimChain
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SimChain {
    addresses: SimAddresses,
    base_borrow_min: U256,
    decimals: HashMap<Address, u8>,
    balances: HashMap<(Address, Address), U256>,
    prices: HashMap<Address, U256>,
    assets: HashMap<Address, AssetInfo>,
    collateral: HashMap<(Address, Address), U256>,
    total_collateral: HashMap<Address, U256>,
    supplied: HashMap<Address, U256>,
    borrowed: HashMap<Address, U256>,
    last_accrual: HashMap<Address, u64>,
    external_supply: U256,
    external_borrow: U256,
    now: u64,
    supply_curve: RateCurve,
    borrow_curve: RateCurve,
    supply_speed: U256,
    borrow_speed: U256,
    reward_owed: HashMap<Address, U256>,
    supply_paused: bool,
    withdraw_paused: bool,
    base_fee: U256,
    swap_discount_bps: u64,
    /// Cut taken from base paid out on withdraw, like a fee-on-transfer token.
    payout_haircut_bps: u64,
    swaps: Vec<SwapRoute>,
    accruals: Vec<Address>,
}

impl SimChain {
    pub fn new(params: &SimMarketParams, addresses: SimAddresses) -> Self {
        let mut chain = Self {
            addresses,
            base_borrow_min: to_raw(params.base_borrow_min, params.base.decimals),
            decimals: HashMap::new(),
            balances: HashMap::new(),
            prices: HashMap::new(),
            assets: HashMap::new(),
            collateral: HashMap::new(),
            total_collateral: HashMap::new(),
            supplied: HashMap::new(),
            borrowed: HashMap::new(),
            last_accrual: HashMap::new(),
            external_supply: to_raw(params.external_supply, params.base.decimals),
            external_borrow: to_raw(params.external_borrow, params.base.decimals),
            now: 0,
            supply_curve: RateCurve::from_annual_bps(
                params.rates.kink_bps,
                params.rates.supply_base_bps,
                params.rates.supply_slope_low_bps,
                params.rates.supply_slope_high_bps,
            ),
            borrow_curve: RateCurve::from_annual_bps(
                params.rates.kink_bps,
                params.rates.borrow_base_bps,
                params.rates.borrow_slope_low_bps,
                params.rates.borrow_slope_high_bps,
            ),
            supply_speed: reward_speed(params.reward_supply_per_day),
            borrow_speed: reward_speed(params.reward_borrow_per_day),
            reward_owed: HashMap::new(),
            supply_paused: false,
            withdraw_paused: false,
            base_fee: U256::from(params.base_fee_gwei) * crate::constants::GWEI,
            swap_discount_bps: params.swap_discount_bps,
            payout_haircut_bps: 0,
            swaps: Vec::new(),
            accruals: Vec::new(),
        };

        chain.register_token(addresses.base, &params.base);
        chain.register_token(addresses.asset, &params.asset);
        chain.register_token(addresses.reward, &params.reward);

        chain.list_asset(
            addresses.asset,
            params.asset.decimals,
            params.borrow_cf_bps,
            params.liquidate_cf_bps,
            to_raw(params.supply_cap, params.asset.decimals),
        );
        // Reward token is listed with zero factors so its feed is discoverable.
        chain.list_asset(addresses.reward, params.reward.decimals, 0, 0, U256::ZERO);

        let idle_liquidity = chain.external_supply.saturating_sub(chain.external_borrow);
        chain.mint(addresses.base, addresses.market, idle_liquidity);
        chain
    }

    fn register_token(&mut self, token: Address, params: &SimTokenParams) {
        self.decimals.insert(token, params.decimals);
        self.prices
            .insert(feed_address(token), to_raw(params.price_usd, 8));
    }

    fn list_asset(
        &mut self,
        asset: Address,
        decimals: u8,
        borrow_cf_bps: u64,
        liquidate_cf_bps: u64,
        supply_cap: U256,
    ) {
        self.assets.insert(
            asset,
            AssetInfo {
                asset,
                price_feed: feed_address(asset),
                scale: U256::from(10u64).pow(U256::from(decimals)),
                borrow_collateral_factor: Wad(U256::from(borrow_cf_bps) * U256::from(WAD_PER_BPS)),
                liquidate_collateral_factor: Wad(
                    U256::from(liquidate_cf_bps) * U256::from(WAD_PER_BPS),
                ),
                supply_cap,
            },
        );
    }

    // -----------------------------------------------------------------------
    // Scenario controls
    // -----------------------------------------------------------------------

    pub fn addresses(&self) -> SimAddresses {
        self.addresses
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    /// Move the clock. Interest is only applied when an account is accrued.
    pub fn advance_time(&mut self, seconds: u64) {
        self.now += seconds;
    }

    pub fn set_price(&mut self, token: Address, price_usd: Decimal) {
        self.prices
            .insert(feed_address(token), to_raw(price_usd, 8));
    }

    pub fn set_raw_price(&mut self, feed: Address, price: U256) {
        self.prices.insert(feed, price);
    }

    pub fn set_paused(&mut self, supply: bool, withdraw: bool) {
        self.supply_paused = supply;
        self.withdraw_paused = withdraw;
    }

    pub fn set_payout_haircut_bps(&mut self, bps: u64) {
        self.payout_haircut_bps = bps.min(MAX_BPS);
    }

    pub fn set_base_fee(&mut self, wei: U256) {
        self.base_fee = wei;
    }

    pub fn set_reward_owed(&mut self, account: Address, amount: U256) {
        self.reward_owed.insert(account, amount);
    }

    pub fn set_reward_speeds(&mut self, supply: U256, borrow: U256) {
        self.supply_speed = supply;
        self.borrow_speed = borrow;
    }

    pub fn mint(&mut self, token: Address, to: Address, amount: U256) {
        let balance = self.balances.entry((token, to)).or_default();
        *balance = balance.saturating_add(amount);
    }

    /// Drain base liquidity out of the market, as if other users borrowed it.
    pub fn drain_liquidity(&mut self, amount: U256) {
        let market = self.addresses.market;
        let base = self.addresses.base;
        let balance = self.balances.entry((base, market)).or_default();
        let drained = amount.min(*balance);
        *balance -= drained;
        self.external_borrow += drained;
    }

    /// Borrow on behalf of `account` without collateral checks, to set up
    /// over-levered states.
    pub fn force_borrow(&mut self, account: Address, amount: U256) {
        let market = self.addresses.market;
        let base = self.addresses.base;
        *self.borrowed.entry(account).or_default() += amount;
        let market_balance = self.balances.entry((base, market)).or_default();
        *market_balance = market_balance.saturating_sub(amount);
        self.mint(base, account, amount);
    }

    pub fn swaps(&self) -> &[SwapRoute] {
        &self.swaps
    }

    /// Accounts accrued so far, in call order.
    pub fn accruals(&self) -> &[Address] {
        &self.accruals
    }

    pub fn feed_of(&self, token: Address) -> Address {
        feed_address(token)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn utilization(&self) -> U256 {
        let supply = self.total_supply();
        if supply.is_zero() {
            return U256::ZERO;
        }
        self.total_borrow().saturating_mul(WAD) / supply
    }

    fn accrue(&mut self, account: Address) {
        let last = *self.last_accrual.get(&account).unwrap_or(&self.now);
        let elapsed = U256::from(self.now.saturating_sub(last));
        if !elapsed.is_zero() {
            let utilization = self.utilization();
            let supply_rate = self.supply_curve.rate(utilization);
            let borrow_rate = self.borrow_curve.rate(utilization);
            if let Some(supplied) = self.supplied.get_mut(&account) {
                *supplied += supplied.saturating_mul(supply_rate).saturating_mul(elapsed) / WAD;
            }
            if let Some(borrowed) = self.borrowed.get_mut(&account) {
                *borrowed += borrowed.saturating_mul(borrow_rate).saturating_mul(elapsed) / WAD;
            }
        }
        self.last_accrual.insert(account, self.now);
    }

    fn price_of(&self, token: Address) -> StrategyResult<U256> {
        self.get_price(feed_address(token))
    }

    fn scale_of(&self, token: Address) -> StrategyResult<U256> {
        Ok(U256::from(10u64).pow(U256::from(self.decimals(token)?)))
    }

    fn usd_value(&self, token: Address, amount: U256) -> StrategyResult<U256> {
        mul_div(amount, self.price_of(token)?, self.scale_of(token)?, "sim usd")
    }

    /// Whether `borrow` stays within `account`'s limit at `factor`.
    fn within_limit(
        &self,
        account: Address,
        borrow: U256,
        factor: fn(&AssetInfo) -> Wad,
    ) -> StrategyResult<bool> {
        if borrow.is_zero() {
            return Ok(true);
        }
        let mut capacity = U256::ZERO;
        for info in self.assets.values() {
            let amount = self.user_collateral(account, info.asset);
            if amount.is_zero() {
                continue;
            }
            let usd = self.usd_value(info.asset, amount)?;
            capacity += mul_div(usd, factor(info).0, WAD, "sim capacity")?;
        }
        Ok(self.usd_value(self.addresses.base, borrow)? <= capacity)
    }

    fn quote(&self, from: Address, to: Address, amount: U256) -> StrategyResult<U256> {
        let usd = self.usd_value(from, amount)?;
        mul_div(usd, self.scale_of(to)?, self.price_of(to)?, "sim quote")
    }

    fn validate_route(&self, route: &SwapRoute) -> StrategyResult<()> {
        for token in [Some(route.token_in), Some(route.token_out), route.hop.map(|h| h.0)]
            .into_iter()
            .flatten()
        {
            if !self.decimals.contains_key(&token) {
                return Err(StrategyError::swap(format!("unknown token {token} in route")));
            }
        }
        Ok(())
    }
}

/// Whole tokens per day to a per-second speed at `TRACKING_INDEX_SCALE`.
fn reward_speed(per_day: Decimal) -> U256 {
    to_raw(per_day, 15) / U256::from(SECONDS_PER_DAY)
}

// ---------------------------------------------------------------------------
// Trait implementations
// ---------------------------------------------------------------------------

impl MoneyMarket for SimChain {
    fn base_token(&self) -> Address {
        self.addresses.base
    }

    fn base_token_price_feed(&self) -> Address {
        feed_address(self.addresses.base)
    }

    fn base_borrow_min(&self) -> U256 {
        self.base_borrow_min
    }

    fn supply(&mut self, account: Address, token: Address, amount: U256) -> StrategyResult<()> {
        if amount.is_zero() {
            return Ok(());
        }
        if self.supply_paused {
            return Err(StrategyError::market("supply paused"));
        }
        self.accrue(account);
        let market = self.addresses.market;

        if token == self.addresses.base {
            self.transfer(token, account, market, amount)?;
            let borrowed = self.borrowed.entry(account).or_default();
            let repay = amount.min(*borrowed);
            *borrowed -= repay;
            *self.supplied.entry(account).or_default() += amount - repay;
            return Ok(());
        }

        let info = self
            .asset_info(token)
            .map_err(|_| StrategyError::market(format!("bad asset {token}")))?;
        let total = self.total_collateral(token);
        if total.saturating_add(amount) > info.supply_cap {
            return Err(StrategyError::market("supply cap exceeded"));
        }
        self.transfer(token, account, market, amount)?;
        *self.collateral.entry((account, token)).or_default() += amount;
        *self.total_collateral.entry(token).or_default() += amount;
        Ok(())
    }

    fn withdraw(
        &mut self,
        account: Address,
        token: Address,
        amount: U256,
    ) -> StrategyResult<()> {
        if amount.is_zero() {
            return Ok(());
        }
        if self.withdraw_paused {
            return Err(StrategyError::market("withdraw paused"));
        }
        self.accrue(account);
        let market = self.addresses.market;

        if token == self.addresses.base {
            if self.base_liquidity() < amount {
                return Err(StrategyError::market("insufficient base liquidity"));
            }
            let supplied = self.balance_of(account);
            let from_supply = amount.min(supplied);
            let new_borrow = self.borrow_balance_of(account) + (amount - from_supply);
            if amount > from_supply {
                if new_borrow < self.base_borrow_min {
                    return Err(StrategyError::market("borrow too small"));
                }
                if !self.within_limit(account, new_borrow, |i| i.borrow_collateral_factor)? {
                    return Err(StrategyError::market("not collateralized"));
                }
            }
            self.supplied.insert(account, supplied - from_supply);
            self.borrowed.insert(account, new_borrow);
            let cut = mul_div(amount, U256::from(self.payout_haircut_bps), U256::from(MAX_BPS), "sim haircut")?;
            return self.transfer(token, market, account, amount - cut);
        }

        let held = self.user_collateral(account, token);
        if held < amount {
            return Err(StrategyError::market("withdraw exceeds collateral"));
        }
        self.collateral.insert((account, token), held - amount);
        let borrow = self.borrow_balance_of(account);
        if !self.within_limit(account, borrow, |i| i.borrow_collateral_factor)? {
            self.collateral.insert((account, token), held);
            return Err(StrategyError::market("not collateralized"));
        }
        if let Some(total) = self.total_collateral.get_mut(&token) {
            *total -= amount;
        }
        self.transfer(token, market, account, amount)
    }

    fn accrue_account(&mut self, account: Address) -> StrategyResult<()> {
        self.accrue(account);
        self.accruals.push(account);
        Ok(())
    }

    fn borrow_balance_of(&self, account: Address) -> U256 {
        self.borrowed.get(&account).copied().unwrap_or_default()
    }

    fn balance_of(&self, account: Address) -> U256 {
        self.supplied.get(&account).copied().unwrap_or_default()
    }

    fn user_collateral(&self, account: Address, asset: Address) -> U256 {
        self.collateral
            .get(&(account, asset))
            .copied()
            .unwrap_or_default()
    }

    fn get_price(&self, feed: Address) -> StrategyResult<U256> {
        self.prices
            .get(&feed)
            .copied()
            .ok_or_else(|| StrategyError::Oracle {
                feed,
                reason: "unknown feed".into(),
            })
    }

    fn asset_info(&self, asset: Address) -> StrategyResult<AssetInfo> {
        self.assets
            .get(&asset)
            .cloned()
            .ok_or_else(|| StrategyError::market(format!("asset {asset} not listed")))
    }

    fn total_supply(&self) -> U256 {
        self.supplied.values().fold(self.external_supply, |acc, v| acc + *v)
    }

    fn total_borrow(&self) -> U256 {
        self.borrowed.values().fold(self.external_borrow, |acc, v| acc + *v)
    }

    fn total_collateral(&self, asset: Address) -> U256 {
        self.total_collateral
            .get(&asset)
            .copied()
            .unwrap_or_default()
    }

    fn base_liquidity(&self) -> U256 {
        self.token_balance(self.addresses.base, self.addresses.market)
    }

    fn supply_rate(&self, utilization: Wad) -> Wad {
        Wad(self.supply_curve.rate(utilization.0))
    }

    fn borrow_rate(&self, utilization: Wad) -> Wad {
        Wad(self.borrow_curve.rate(utilization.0))
    }

    fn base_tracking_supply_speed(&self) -> U256 {
        self.supply_speed
    }

    fn base_tracking_borrow_speed(&self) -> U256 {
        self.borrow_speed
    }

    fn tracking_index_scale(&self) -> U256 {
        U256::from(TRACKING_INDEX_SCALE)
    }

    fn is_supply_paused(&self) -> bool {
        self.supply_paused
    }

    fn is_withdraw_paused(&self) -> bool {
        self.withdraw_paused
    }

    fn is_liquidatable(&self, account: Address) -> bool {
        let borrow = self.borrow_balance_of(account);
        !self
            .within_limit(account, borrow, |i| i.liquidate_collateral_factor)
            .unwrap_or(true)
    }
}

impl RewardDistributor for SimChain {
    fn reward_token(&self) -> Address {
        self.addresses.reward
    }

    fn reward_owed(&self, account: Address) -> U256 {
        self.reward_owed.get(&account).copied().unwrap_or_default()
    }

    fn claim(&mut self, account: Address, _accrue: bool) -> StrategyResult<U256> {
        let amount = self.reward_owed.remove(&account).unwrap_or_default();
        let reward = self.addresses.reward;
        self.mint(reward, account, amount);
        Ok(amount)
    }
}

impl SwapRouter for SimChain {
    fn swap_exact_in(
        &mut self,
        account: Address,
        route: &SwapRoute,
        amount_in: U256,
        min_out: U256,
    ) -> StrategyResult<U256> {
        self.validate_route(route)?;
        let fair = self.quote(route.token_in, route.token_out, amount_in)?;
        let out = mul_div(
            fair,
            U256::from(MAX_BPS - self.swap_discount_bps),
            U256::from(MAX_BPS),
            "sim swap",
        )?;
        if out < min_out {
            return Err(StrategyError::swap("too little received"));
        }
        let router = self.addresses.router;
        self.transfer(route.token_in, account, router, amount_in)?;
        self.mint(route.token_out, account, out);
        self.swaps.push(route.clone());
        Ok(out)
    }

    fn swap_exact_out(
        &mut self,
        account: Address,
        route: &SwapRoute,
        amount_out: U256,
        max_in: U256,
    ) -> StrategyResult<U256> {
        self.validate_route(route)?;
        let fair_in = self.quote(route.token_out, route.token_in, amount_out)?;
        let amount_in = mul_div(
            fair_in,
            U256::from(MAX_BPS),
            U256::from(MAX_BPS - self.swap_discount_bps),
            "sim swap",
        )? + U256::from(1u64);
        if amount_in > max_in {
            return Err(StrategyError::swap("too much requested"));
        }
        let router = self.addresses.router;
        self.transfer(route.token_in, account, router, amount_in)?;
        self.mint(route.token_out, account, amount_out);
        self.swaps.push(route.clone());
        Ok(amount_in)
    }
}

impl TokenLedger for SimChain {
    fn decimals(&self, token: Address) -> StrategyResult<u8> {
        self.decimals
            .get(&token)
            .copied()
            .ok_or(StrategyError::UnknownToken { token })
    }

    fn token_balance(&self, token: Address, account: Address) -> U256 {
        self.balances
            .get(&(token, account))
            .copied()
            .unwrap_or_default()
    }

    fn transfer(
        &mut self,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> StrategyResult<()> {
        if amount.is_zero() {
            return Ok(());
        }
        let from_balance = self.token_balance(token, from);
        if from_balance < amount {
            return Err(StrategyError::Transfer {
                reason: format!("{from} holds {from_balance} of {token}, needs {amount}"),
            });
        }
        self.balances.insert((token, from), from_balance - amount);
        self.mint(token, to, amount);
        Ok(())
    }
}

impl NetworkFee for SimChain {
    fn base_fee(&self) -> U256 {
        self.base_fee
    }
}

impl Transactional for SimChain {
    type Checkpoint = SimChain;

    fn checkpoint(&self) -> Self::Checkpoint {
        self.clone()
    }

    fn rollback(&mut self, checkpoint: Self::Checkpoint) {
        *self = checkpoint;
    }
}
