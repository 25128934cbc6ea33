//! Lender/borrower strategy.
//!
//! Supplies the vault's asset as collateral, borrows the market's base token
//! up to a target LTV and parks the borrowed funds with a reserve holder that
//! lends them back into the same market. The accounting host drives it
//! through [`StrategyHooks`]; management tunes it through validated setters.
//!
//! The strategy owns configuration only. Every position figure is re-read
//! from the market on each call, and each call borrows the execution context
//! for its own duration.

use std::collections::HashMap;

use alloy::primitives::{Address, U256};
use tracing::{info, warn};

use crate::constants::{GWEI, MAX_BPS};
use crate::errors::{StrategyError, StrategyResult};
use crate::execution::market::Chain;
use crate::execution::reserve_holder::ReserveHolder;
use crate::types::wad_ray::sub_bps;
use crate::types::{
    Adjustment, HarvestReport, Position, PositionSummary, TendOutcome, TokenInfo, Withdrawal,
};

use super::leverage_engine::{pull_from_reserve, repay_loose, LeverageEngine};
use super::ledger::{PositionLedger, RiskBand};
use super::price_converter::{validate_feed, PriceConverter};
use super::swapper::{SwapSettings, Swapper};
use super::tend_trigger::TendTrigger;
use super::withdrawal::{PlannerTokens, WithdrawalPlanner};
use super::yield_model::YieldModel;

// ---------------------------------------------------------------------------
// Host interface
// ---------------------------------------------------------------------------

/// Hooks the accounting host calls. Each call runs against one execution
/// context; the host is expected to wrap mutating calls in
/// [`crate::execution::market::atomically`].
pub trait StrategyHooks {
    /// Put `amount` of newly deposited asset to work.
    fn deploy_funds<C: Chain>(&self, ctx: &mut C, amount: U256) -> StrategyResult<Adjustment>;

    /// Free `amount` of asset into the strategy's idle balance.
    fn free_funds<C: Chain>(&self, ctx: &mut C, amount: U256) -> StrategyResult<Withdrawal>;

    /// Harvest rewards, re-lever unless shut down and report total assets.
    fn harvest_and_report<C: Chain>(&self, ctx: &mut C, is_shutdown: bool) -> StrategyResult<HarvestReport>;

    /// Off-cycle maintenance with `idle` asset available.
    fn tend<C: Chain>(&self, ctx: &mut C, idle: U256) -> StrategyResult<TendOutcome>;

    fn tend_trigger<C: Chain>(&self, ctx: &C) -> StrategyResult<bool>;

    fn available_deposit_limit<C: Chain>(&self, ctx: &C) -> U256;

    fn available_withdraw_limit<C: Chain>(&self, ctx: &C) -> StrategyResult<U256>;

    /// Pull up to `amount` out of the market after a shutdown.
    fn emergency_withdraw<C: Chain>(&self, ctx: &mut C, amount: U256) -> StrategyResult<Withdrawal>;
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Validated tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategySettings {
    pub band: RiskBand,
    pub slippage_bps: u64,
    pub reward_price_buffer_bps: u64,
    /// Wei.
    pub max_gas_price_to_tend: U256,
    pub preserve_debt_on_shortfall: bool,
}

impl StrategySettings {
    pub fn new(
        target_ltv_multiplier_bps: u64,
        warning_ltv_multiplier_bps: u64,
        slippage_bps: u64,
        reward_price_buffer_bps: u64,
        max_gas_price_to_tend_gwei: u64,
        preserve_debt_on_shortfall: bool,
    ) -> StrategyResult<Self> {
        let band = RiskBand::new(target_ltv_multiplier_bps, warning_ltv_multiplier_bps)?;
        check_slippage(slippage_bps)?;
        check_buffer(reward_price_buffer_bps)?;
        Ok(Self {
            band,
            slippage_bps,
            reward_price_buffer_bps,
            max_gas_price_to_tend: U256::from(max_gas_price_to_tend_gwei) * GWEI,
            preserve_debt_on_shortfall,
        })
    }
}

fn check_slippage(bps: u64) -> StrategyResult<()> {
    if bps >= MAX_BPS {
        return Err(StrategyError::InvalidSlippage { bps });
    }
    Ok(())
}

fn check_buffer(bps: u64) -> StrategyResult<()> {
    if bps >= MAX_BPS {
        return Err(StrategyError::InvalidBuffer { bps });
    }
    Ok(())
}

/// Accounts and tokens a strategy is wired to. The base and reward tokens
/// come from the market itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyAccounts {
    pub strategy: Address,
    pub management: Address,
    pub reserve_holder: Address,
    pub asset: Address,
    pub wrapped_native: Address,
    /// Zero falls back to the market's own feed for the reward token.
    pub reward_price_feed: Address,
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Strategy {
    address: Address,
    management: Address,
    asset: Address,
    base_token: Address,
    reward_token: Address,
    wrapped_native: Address,
    settings: StrategySettings,
    tokens: HashMap<Address, TokenInfo>,
    swaps: SwapSettings,
    reserve: ReserveHolder,
}

impl Strategy {
    /// Wire a strategy to the market behind `ctx`. Fails if the asset is not
    /// listed or any token's feed does not quote.
    pub fn new<C: Chain>(
        ctx: &C,
        accounts: StrategyAccounts,
        settings: StrategySettings,
        min_amount_to_sell: U256,
    ) -> StrategyResult<Self> {
        let base_token = ctx.base_token();
        let reward_token = ctx.reward_token();
        let asset_info = ctx.asset_info(accounts.asset)?;

        let mut tokens = HashMap::new();
        tokens.insert(
            accounts.asset,
            TokenInfo::new(asset_info.price_feed, ctx.decimals(accounts.asset)?),
        );
        tokens.insert(
            base_token,
            TokenInfo::new(ctx.base_token_price_feed(), ctx.decimals(base_token)?),
        );
        tokens.insert(
            reward_token,
            TokenInfo::new(accounts.reward_price_feed, ctx.decimals(reward_token)?),
        );
        for (token, info) in &tokens {
            validate_feed(ctx, *token, info.price_feed)?;
        }

        info!(
            strategy = %accounts.strategy,
            asset = %accounts.asset,
            base = %base_token,
            reward = %reward_token,
            target_bps = settings.band.target_bps(),
            warning_bps = settings.band.warning_bps(),
            "strategy initialized"
        );

        Ok(Self {
            address: accounts.strategy,
            management: accounts.management,
            asset: accounts.asset,
            base_token,
            reward_token,
            wrapped_native: accounts.wrapped_native,
            settings,
            tokens,
            swaps: SwapSettings::new(base_token, min_amount_to_sell),
            reserve: ReserveHolder::for_strategy(accounts.reserve_holder, accounts.strategy, base_token),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn asset(&self) -> Address {
        self.asset
    }

    pub fn base_token(&self) -> Address {
        self.base_token
    }

    pub fn reward_token(&self) -> Address {
        self.reward_token
    }

    pub fn management(&self) -> Address {
        self.management
    }

    pub fn settings(&self) -> &StrategySettings {
        &self.settings
    }

    pub fn swap_settings(&self) -> &SwapSettings {
        &self.swaps
    }

    pub fn reserve(&self) -> &ReserveHolder {
        &self.reserve
    }

    pub fn token_info(&self, token: Address) -> Option<&TokenInfo> {
        self.tokens.get(&token)
    }

    // -- component views ----------------------------------------------------

    fn prices(&self) -> PriceConverter<'_> {
        PriceConverter::new(&self.tokens, self.wrapped_native)
    }

    fn yields(&self) -> YieldModel<'_> {
        YieldModel::new(
            self.prices(),
            self.base_token,
            self.reward_token,
            self.settings.reward_price_buffer_bps,
        )
    }

    fn ledger(&self) -> PositionLedger<'_> {
        PositionLedger::new(
            self.address,
            self.asset,
            self.base_token,
            &self.reserve,
            self.prices(),
            self.settings.band,
        )
    }

    fn engine(&self) -> LeverageEngine<'_> {
        LeverageEngine::new(
            self.address,
            self.asset,
            self.base_token,
            self.ledger(),
            self.prices(),
            self.yields(),
            &self.reserve,
        )
    }

    fn swapper(&self) -> Swapper<'_> {
        Swapper::new(&self.swaps, self.address)
    }

    fn planner(&self) -> WithdrawalPlanner<'_> {
        WithdrawalPlanner::new(
            PlannerTokens {
                strategy: self.address,
                asset: self.asset,
                base_token: self.base_token,
                reward_token: self.reward_token,
            },
            self.ledger(),
            self.prices(),
            &self.reserve,
            self.swapper(),
            self.settings.slippage_bps,
            self.settings.preserve_debt_on_shortfall,
        )
    }

    fn trigger(&self) -> TendTrigger<'_> {
        TendTrigger::new(
            self.address,
            self.base_token,
            self.ledger(),
            self.prices(),
            self.yields(),
            self.settings.max_gas_price_to_tend,
        )
    }

    // -- reads ---------------------------------------------------------------

    /// Balances as last accrued.
    pub fn position<C: Chain>(&self, ctx: &C) -> Position {
        self.ledger().read(ctx)
    }

    pub fn summary<C: Chain>(&self, ctx: &C) -> StrategyResult<PositionSummary> {
        let ledger = self.ledger();
        ledger.summary(ctx, &ledger.read(ctx))
    }

    /// `idle + collateral - owed debt in asset terms`.
    pub fn total_assets<C: Chain>(&self, ctx: &C) -> StrategyResult<U256> {
        let ledger = self.ledger();
        let position = ledger.read(ctx);
        let owed = ledger.owed_in_asset(ctx, &position)?;
        Ok(position
            .idle_asset
            .saturating_add(position.collateral)
            .saturating_sub(owed))
    }

    pub fn net_borrow_apr<C: Chain>(&self, ctx: &C, delta: U256) -> StrategyResult<crate::types::Wad> {
        self.yields().net_borrow_apr(ctx, delta)
    }

    pub fn net_reward_apr<C: Chain>(&self, ctx: &C, delta: U256) -> StrategyResult<crate::types::Wad> {
        self.yields().net_reward_apr(ctx, delta)
    }

    // -- management ----------------------------------------------------------

    fn only_management(&self, caller: Address) -> StrategyResult<()> {
        if caller != self.management {
            return Err(StrategyError::Unauthorized { caller });
        }
        Ok(())
    }

    pub fn set_ltv_multipliers(&mut self, caller: Address, target_bps: u64, warning_bps: u64) -> StrategyResult<()> {
        self.only_management(caller)?;
        self.settings.band = RiskBand::new(target_bps, warning_bps)?;
        info!(target_bps, warning_bps, "ltv multipliers updated");
        Ok(())
    }

    /// Override the feed for a known token. The feed must quote right now.
    pub fn set_price_feed<C: Chain>(
        &mut self,
        ctx: &C,
        caller: Address,
        token: Address,
        feed: Address,
    ) -> StrategyResult<()> {
        self.only_management(caller)?;
        if !self.tokens.contains_key(&token) {
            return Err(StrategyError::UnknownToken { token });
        }
        validate_feed(ctx, token, feed)?;
        if let Some(info) = self.tokens.get_mut(&token) {
            info.price_feed = feed;
        }
        info!(%token, %feed, "price feed updated");
        Ok(())
    }

    pub fn set_swap_fee(&mut self, caller: Address, a: Address, b: Address, fee: u32) -> StrategyResult<()> {
        self.only_management(caller)?;
        self.swaps.set_fee(a, b, fee);
        info!(%a, %b, fee, "swap fee updated");
        Ok(())
    }

    pub fn set_slippage_bps(&mut self, caller: Address, bps: u64) -> StrategyResult<()> {
        self.only_management(caller)?;
        check_slippage(bps)?;
        self.settings.slippage_bps = bps;
        info!(bps, "slippage updated");
        Ok(())
    }

    pub fn set_preserve_debt_on_shortfall(&mut self, caller: Address, preserve: bool) -> StrategyResult<()> {
        self.only_management(caller)?;
        self.settings.preserve_debt_on_shortfall = preserve;
        info!(preserve, "preserve debt on shortfall updated");
        Ok(())
    }

    pub fn set_max_gas_price_to_tend(&mut self, caller: Address, wei: U256) -> StrategyResult<()> {
        self.only_management(caller)?;
        self.settings.max_gas_price_to_tend = wei;
        info!(%wei, "max gas price to tend updated");
        Ok(())
    }

    pub fn set_reward_price_buffer_bps(&mut self, caller: Address, bps: u64) -> StrategyResult<()> {
        self.only_management(caller)?;
        check_buffer(bps)?;
        self.settings.reward_price_buffer_bps = bps;
        info!(bps, "reward price buffer updated");
        Ok(())
    }

    pub fn set_min_amount_to_sell(&mut self, caller: Address, amount: U256) -> StrategyResult<()> {
        self.only_management(caller)?;
        self.swaps.set_min_amount_to_sell(amount);
        info!(%amount, "min amount to sell updated");
        Ok(())
    }

    // -- manual operations ---------------------------------------------------

    /// Repay as much debt as the reserve and loose base allow.
    pub fn manual_repay_debt<C: Chain>(&self, ctx: &mut C, caller: Address) -> StrategyResult<U256> {
        self.only_management(caller)?;
        self.repay_all_possible(ctx)
    }

    /// Withdraw collateral into the idle balance, bounded by what keeps the
    /// rest at target.
    pub fn manual_withdraw_collateral<C: Chain>(
        &self,
        ctx: &mut C,
        caller: Address,
        amount: U256,
    ) -> StrategyResult<U256> {
        self.only_management(caller)?;
        let ledger = self.ledger();
        let position = ledger.snapshot(ctx)?;
        let target = ledger.ltv_band(ctx)?.target;
        let amount = amount.min(ledger.max_safe_withdrawal(ctx, &position, target)?);
        if !amount.is_zero() {
            ctx.withdraw(self.address, self.asset, amount)?;
            info!(%amount, "manual collateral withdrawal");
        }
        Ok(amount)
    }

    /// Sell base held beyond the debt for asset. Returns the asset bought.
    pub fn sell_surplus_debt_token<C: Chain>(&self, ctx: &mut C, caller: Address) -> StrategyResult<U256> {
        self.only_management(caller)?;
        let position = self.ledger().snapshot(ctx)?;
        let surplus = position.debt_token_surplus();
        if surplus.is_zero() {
            return Ok(U256::ZERO);
        }
        let loose = position.loose_debt_token;
        if surplus > loose {
            let wanted = (surplus - loose).min(ctx.base_liquidity());
            self.reserve.withdraw(ctx, self.address, wanted)?;
        }
        let amount = surplus.min(ctx.token_balance(self.base_token, self.address));
        let expected = self
            .prices()
            .convert(ctx, amount, self.base_token, self.asset)?;
        let min_out = sub_bps(expected, self.settings.slippage_bps)?;
        let bought = self
            .swapper()
            .swap_from(ctx, self.base_token, self.asset, amount, min_out)?;
        info!(sold = %amount, %bought, "surplus base sold");
        Ok(bought)
    }

    pub fn claim_and_sell_rewards<C: Chain>(&self, ctx: &mut C, caller: Address) -> StrategyResult<()> {
        self.only_management(caller)?;
        self.harvest_rewards(ctx)
    }

    // -- internals -----------------------------------------------------------

    /// Claim rewards, cover owed base first, sell the rest for asset.
    fn harvest_rewards<C: Chain>(&self, ctx: &mut C) -> StrategyResult<()> {
        let planner = self.planner();
        planner.claim_rewards(ctx)?;
        let owed = self.ledger().snapshot(ctx)?.debt_token_owed();
        if !owed.is_zero() {
            planner.sell_rewards_for_base(ctx, owed)?;
        }
        let rest = ctx.token_balance(self.reward_token, self.address);
        if rest.is_zero() {
            return Ok(());
        }
        let expected = self
            .prices()
            .convert(ctx, rest, self.reward_token, self.asset)?;
        let min_out = sub_bps(expected, self.settings.slippage_bps)?;
        self.swapper()
            .swap_from(ctx, self.reward_token, self.asset, rest, min_out)?;
        Ok(())
    }

    fn repay_all_possible<C: Chain>(&self, ctx: &mut C) -> StrategyResult<U256> {
        ctx.accrue_account(self.address)?;
        let debt = ctx.borrow_balance_of(self.address);
        pull_from_reserve(ctx, &self.reserve, self.address, self.base_token, debt)?;
        repay_loose(ctx, self.address, self.base_token)
    }
}

impl StrategyHooks for Strategy {
    fn deploy_funds<C: Chain>(&self, ctx: &mut C, amount: U256) -> StrategyResult<Adjustment> {
        self.engine().adjust_position(ctx, amount)
    }

    fn free_funds<C: Chain>(&self, ctx: &mut C, amount: U256) -> StrategyResult<Withdrawal> {
        self.planner().liquidate(ctx, amount)
    }

    fn harvest_and_report<C: Chain>(&self, ctx: &mut C, is_shutdown: bool) -> StrategyResult<HarvestReport> {
        let mut adjustment = None;
        if !is_shutdown {
            self.harvest_rewards(ctx)?;
            let idle = ctx.token_balance(self.asset, self.address);
            let deployable = idle.min(self.available_deposit_limit(ctx));
            adjustment = Some(self.engine().adjust_position(ctx, deployable)?);
        }
        self.ledger().snapshot(ctx)?;
        let total_assets = self.total_assets(ctx)?;
        info!(%total_assets, is_shutdown, "harvested");
        Ok(HarvestReport {
            total_assets,
            adjustment,
        })
    }

    fn tend<C: Chain>(&self, ctx: &mut C, idle: U256) -> StrategyResult<TendOutcome> {
        if self.yields().borrow_unprofitable(ctx, U256::ZERO)? {
            warn!("borrowing unprofitable, unwinding position");
            let collateral = ctx.user_collateral(self.address, self.asset);
            let withdrawal = self.planner().liquidate(ctx, collateral)?;
            self.repay_all_possible(ctx)?;
            return Ok(TendOutcome::Unwound(withdrawal));
        }
        let deployable = idle.min(self.available_deposit_limit(ctx));
        self.engine()
            .adjust_position(ctx, deployable)
            .map(TendOutcome::Adjusted)
    }

    fn tend_trigger<C: Chain>(&self, ctx: &C) -> StrategyResult<bool> {
        self.trigger().should_tend(ctx)
    }

    fn available_deposit_limit<C: Chain>(&self, ctx: &C) -> U256 {
        if ctx.is_supply_paused() || ctx.is_withdraw_paused() {
            return U256::ZERO;
        }
        match ctx.asset_info(self.asset) {
            Ok(info) => info
                .supply_cap
                .saturating_sub(ctx.total_collateral(self.asset)),
            Err(_) => U256::ZERO,
        }
    }

    fn available_withdraw_limit<C: Chain>(&self, ctx: &C) -> StrategyResult<U256> {
        if ctx.is_withdraw_paused() {
            return Ok(U256::ZERO);
        }
        let ledger = self.ledger();
        let position = ledger.read(ctx);
        // Debt the reserve and loose base can actually clear right now.
        let repayable = position
            .reserve_balance
            .min(ctx.base_liquidity())
            .saturating_add(position.loose_debt_token)
            .min(position.debt);
        let after_repay = Position {
            debt: position.debt - repayable,
            ..position
        };
        let target = ledger.ltv_band(ctx)?.target;
        let achievable = ledger.max_safe_withdrawal(ctx, &after_repay, target)?;
        Ok(position.idle_asset.saturating_add(achievable))
    }

    fn emergency_withdraw<C: Chain>(&self, ctx: &mut C, amount: U256) -> StrategyResult<Withdrawal> {
        let collateral = ctx.user_collateral(self.address, self.asset);
        let withdrawal = self.planner().liquidate(ctx, amount.min(collateral))?;
        self.repay_all_possible(ctx)?;
        Ok(withdrawal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::WAD;
    use crate::execution::market::{atomically, MoneyMarket, TokenLedger};
    use crate::sim::{to_raw, SimAddresses, SimChain};
    use crate::testkit::{deploy, fund, standard_settings, world, ALICE, MANAGEMENT, STRATEGY};
    use crate::types::{BorrowSkip, Regime, Wad};
    use alloy::primitives::uint;
    use rust_decimal_macros::dec;

    fn btc(v: rust_decimal::Decimal) -> U256 {
        to_raw(v, 8)
    }

    fn usdc(v: rust_decimal::Decimal) -> U256 {
        to_raw(v, 6)
    }

    fn ltv(s: &Strategy, sim: &SimChain) -> Wad {
        let ledger = s.ledger();
        ledger.current_ltv(sim, &ledger.read(sim)).unwrap()
    }

    fn target(s: &Strategy, sim: &SimChain) -> Wad {
        s.ledger().ltv_band(sim).unwrap().target
    }

    /// Strategy with `amount` BTC supplied and levered to target.
    fn levered(amount: U256) -> (SimChain, SimAddresses, Strategy) {
        let (mut sim, a) = world();
        let s = deploy(&sim, standard_settings());
        fund(&mut sim, a.asset, STRATEGY, amount);
        let outcome = s.deploy_funds(&mut sim, amount).unwrap();
        assert!(matches!(outcome, Adjustment::Borrowed { .. }), "{outcome:?}");
        (sim, a, s)
    }

    // -- lever up ------------------------------------------------------------

    #[test]
    fn test_basic_lever_up_hits_target() {
        let (sim, _, s) = levered(btc(dec!(10)));
        // CF 0.85 * 7000 bps
        assert_eq!(target(&s, &sim), Wad(uint!(595_000_000_000_000_000_U256)));

        let summary = s.summary(&sim).unwrap();
        // 10 BTC * $60,000 * 0.595
        let expected = dec!(357_000);
        assert!((summary.debt_usd - expected).abs() < dec!(0.01), "{}", summary.debt_usd);
        assert_eq!(summary.regime, Regime::Healthy);

        let gap = target(&s, &sim).saturating_sub(ltv(&s, &sim));
        assert!(gap.0 < WAD / U256::from(10_000u64), "ltv {} off target", ltv(&s, &sim));
    }

    #[test]
    fn test_borrowed_funds_parked_with_reserve() {
        let (sim, a, s) = levered(btc(dec!(10)));
        let p = s.position(&sim);
        assert_eq!(sim.token_balance(a.base, STRATEGY), U256::ZERO);
        assert_eq!(p.reserve_balance, p.debt);
        assert_eq!(p.debt_token_owed(), U256::ZERO);
    }

    #[test]
    fn test_unprofitable_borrow_skipped() {
        let (mut sim, a) = world();
        sim.set_reward_speeds(U256::ZERO, U256::ZERO);
        let s = deploy(&sim, standard_settings());
        fund(&mut sim, a.asset, STRATEGY, btc(dec!(1)));
        let outcome = s.deploy_funds(&mut sim, btc(dec!(1))).unwrap();
        assert_eq!(
            outcome,
            Adjustment::BorrowSkipped {
                reason: BorrowSkip::Unprofitable
            }
        );
        assert_eq!(sim.borrow_balance_of(STRATEGY), U256::ZERO);
        assert_eq!(sim.user_collateral(STRATEGY, a.asset), btc(dec!(1)));
    }

    #[test]
    fn test_borrow_below_market_minimum_skipped() {
        let (mut sim, a) = world();
        let s = deploy(&sim, standard_settings());
        // 0.0001 BTC => ~$3.57 borrow, under the 100 USDC minimum
        fund(&mut sim, a.asset, STRATEGY, btc(dec!(0.0001)));
        let outcome = s.deploy_funds(&mut sim, btc(dec!(0.0001))).unwrap();
        assert_eq!(
            outcome,
            Adjustment::BorrowSkipped {
                reason: BorrowSkip::BelowBorrowMin
            }
        );
    }

    #[test]
    fn test_zero_deposit_still_rebalances() {
        let (mut sim, a, s) = levered(btc(dec!(10)));
        sim.set_price(a.asset, dec!(66_000));
        let outcome = s.deploy_funds(&mut sim, U256::ZERO).unwrap();
        assert!(matches!(outcome, Adjustment::Borrowed { .. }));
    }

    // -- deleverage ----------------------------------------------------------

    #[test]
    fn test_warning_band_repay_reduces_debt_not_collateral() {
        let (mut sim, a, s) = levered(btc(dec!(10)));
        // Push LTV to 85% of the collateral factor (warning is 80%).
        let collateral_before = sim.user_collateral(STRATEGY, a.asset);
        let debt_target = usdc(dec!(600_000)) * U256::from(85u64) * U256::from(85u64)
            / U256::from(10_000u64);
        let extra = debt_target - sim.borrow_balance_of(STRATEGY);
        sim.force_borrow(STRATEGY, extra);
        sim.transfer(a.base, STRATEGY, ALICE, extra).unwrap();
        let debt_before = sim.borrow_balance_of(STRATEGY);
        assert_eq!(s.summary(&sim).unwrap().regime, Regime::Unhealthy);

        let outcome = s.deploy_funds(&mut sim, U256::ZERO).unwrap();
        assert!(matches!(outcome, Adjustment::Repaid { .. }), "{outcome:?}");
        assert!(sim.borrow_balance_of(STRATEGY) < debt_before);
        assert_eq!(sim.user_collateral(STRATEGY, a.asset), collateral_before);
    }

    #[test]
    fn test_deleverage_never_exceeds_target() {
        let (mut sim, a, s) = levered(btc(dec!(10)));
        sim.set_price(a.asset, dec!(50_000));
        assert_eq!(s.summary(&sim).unwrap().regime, Regime::Unhealthy);
        s.deploy_funds(&mut sim, U256::ZERO).unwrap();
        let p = s.position(&sim);
        let allowed = s
            .ledger()
            .target_debt(&sim, p.collateral, target(&s, &sim))
            .unwrap();
        assert!(p.debt <= allowed, "debt {} allowed {}", p.debt, allowed);
    }

    #[test]
    fn test_price_shock_then_tend_decreases_debt() {
        let (mut sim, a, s) = levered(btc(dec!(10)));
        let debt_before = sim.borrow_balance_of(STRATEGY);
        sim.set_price(a.asset, dec!(48_000));
        assert!(s.tend_trigger(&sim).unwrap());
        let outcome = s.tend(&mut sim, U256::ZERO).unwrap();
        assert!(matches!(outcome, TendOutcome::Adjusted(Adjustment::Repaid { .. })));
        assert!(sim.borrow_balance_of(STRATEGY) < debt_before);
    }

    // -- withdrawals ---------------------------------------------------------

    #[test]
    fn test_partial_withdrawal_keeps_remaining_at_target() {
        let (mut sim, a, s) = levered(btc(dec!(10)));
        let report = s.free_funds(&mut sim, btc(dec!(4))).unwrap();
        assert_eq!(report.freed, btc(dec!(4)));
        assert!(!report.used_shortfall_swap());
        assert_eq!(sim.token_balance(a.asset, STRATEGY), btc(dec!(4)));
        assert!(ltv(&s, &sim) <= target(&s, &sim));
    }

    #[test]
    fn test_full_withdrawal_repays_everything() {
        let (mut sim, a, s) = levered(btc(dec!(10)));
        let report = s.free_funds(&mut sim, btc(dec!(10))).unwrap();
        assert_eq!(report.freed, btc(dec!(10)));
        assert_eq!(sim.borrow_balance_of(STRATEGY), U256::ZERO);
        assert_eq!(sim.user_collateral(STRATEGY, a.asset), U256::ZERO);
        assert!(!report.used_shortfall_swap());
    }

    #[test]
    fn test_shortfall_windup_sells_asset_once() {
        let (mut sim, a, s) = levered(btc(dec!(10)));
        // Borrow interest outruns the reserve's supply interest.
        sim.advance_time(30 * 86_400);
        sim.accrue_account(STRATEGY).unwrap();
        sim.accrue_account(s.reserve().account()).unwrap();
        let residual = sim.borrow_balance_of(STRATEGY) - sim.balance_of(s.reserve().account());

        let report = s.free_funds(&mut sim, btc(dec!(10))).unwrap();
        assert_eq!(sim.borrow_balance_of(STRATEGY), U256::ZERO);
        assert!(report.used_shortfall_swap());
        assert_eq!(sim.swaps().len(), 1);

        // Loss equals the swap cost, within the slippage budget.
        let fair = s.prices().convert(&sim, residual, a.base, a.asset).unwrap();
        let loss = report.asset_sold;
        assert!(loss >= fair);
        assert!(loss <= fair * U256::from(10_500u64) / U256::from(10_000u64));
        assert_eq!(report.freed, btc(dec!(10)));
        assert_eq!(
            sim.token_balance(a.asset, STRATEGY),
            btc(dec!(10)) - report.asset_sold
        );
    }

    #[test]
    fn test_shortfall_windup_with_empty_reserve_clears_debt() {
        let (mut sim, a) = world();
        let s = deploy(&sim, standard_settings());
        let collateral = btc(dec!(10));
        fund(&mut sim, a.asset, STRATEGY, collateral);
        sim.supply(STRATEGY, a.asset, collateral).unwrap();
        // Debt at target with nothing parked in the reserve.
        let debt = usdc(dec!(357_000));
        sim.force_borrow(STRATEGY, debt);
        sim.transfer(a.base, STRATEGY, ALICE, debt).unwrap();
        assert_eq!(s.reserve().balance(&sim), U256::ZERO);

        let report = s.free_funds(&mut sim, collateral).unwrap();
        assert_eq!(sim.borrow_balance_of(STRATEGY), U256::ZERO);
        assert_eq!(sim.user_collateral(STRATEGY, a.asset), U256::ZERO);
        assert_eq!(report.freed, collateral);
        assert_eq!(report.repaid, debt);
        assert!(sim.swaps().len() > 1, "took {} swaps", sim.swaps().len());

        let fair = s.prices().convert(&sim, debt, a.base, a.asset).unwrap();
        assert!(report.asset_sold >= fair);
        assert!(report.asset_sold <= fair * U256::from(10_500u64) / U256::from(10_000u64));
        assert_eq!(
            sim.token_balance(a.asset, STRATEGY),
            collateral - report.asset_sold
        );
    }

    #[test]
    fn test_shortfall_preserved_when_flag_set() {
        let (mut sim, a) = world();
        let mut settings = standard_settings();
        settings.preserve_debt_on_shortfall = true;
        let s = deploy(&sim, settings);
        fund(&mut sim, a.asset, STRATEGY, btc(dec!(10)));
        s.deploy_funds(&mut sim, btc(dec!(10))).unwrap();
        sim.advance_time(30 * 86_400);

        let report = s.free_funds(&mut sim, btc(dec!(10))).unwrap();
        assert!(!report.used_shortfall_swap());
        assert!(report.freed < btc(dec!(10)));
        assert!(sim.swaps().is_empty());
        assert!(!sim.borrow_balance_of(STRATEGY).is_zero());
    }

    #[test]
    fn test_dust_shortfall_issues_no_swap() {
        let (mut sim, a) = world();
        let s = deploy(&sim, standard_settings());
        fund(&mut sim, a.asset, STRATEGY, btc(dec!(1)));
        sim.supply(STRATEGY, a.asset, btc(dec!(1))).unwrap();
        // 0.005 USDC of debt is worth ~8 sats
        sim.force_borrow(STRATEGY, U256::from(5_000u64));
        sim.transfer(a.base, STRATEGY, ALICE, U256::from(5_000u64)).unwrap();

        let report = s.free_funds(&mut sim, btc(dec!(1))).unwrap();
        assert!(sim.swaps().is_empty());
        assert_eq!(report.asset_sold, U256::ZERO);
        assert!(report.freed < btc(dec!(1)));
    }

    #[test]
    fn test_dust_shortfall_leaves_rewards_unsold() {
        let (mut sim, a) = world();
        let s = deploy(&sim, standard_settings());
        fund(&mut sim, a.asset, STRATEGY, btc(dec!(1)));
        sim.supply(STRATEGY, a.asset, btc(dec!(1))).unwrap();
        sim.force_borrow(STRATEGY, U256::from(5_000u64));
        sim.transfer(a.base, STRATEGY, ALICE, U256::from(5_000u64)).unwrap();
        sim.set_reward_owed(STRATEGY, to_raw(dec!(1), 18));
        fund(&mut sim, a.reward, STRATEGY, to_raw(dec!(1), 18));

        let report = s.free_funds(&mut sim, btc(dec!(1))).unwrap();
        assert!(sim.swaps().is_empty());
        assert_eq!(report.asset_sold, U256::ZERO);
        assert_eq!(sim.token_balance(a.reward, STRATEGY), to_raw(dec!(1), 18));
    }

    #[test]
    fn test_failed_liquidation_rolls_back() {
        let (mut sim, a, s) = levered(btc(dec!(10)));
        sim.advance_time(30 * 86_400);
        // Zero slippage cannot absorb the router's discount.
        let before = sim.clone();
        let mut tight = s.clone();
        tight.set_slippage_bps(MANAGEMENT, 0).unwrap();
        let result = atomically(&mut sim, |ctx| tight.free_funds(ctx, btc(dec!(10))));
        assert!(result.is_err());
        assert_eq!(sim.user_collateral(STRATEGY, a.asset), before.user_collateral(STRATEGY, a.asset));
        assert_eq!(sim.borrow_balance_of(STRATEGY), before.borrow_balance_of(STRATEGY));
        assert_eq!(sim.token_balance(a.asset, STRATEGY), U256::ZERO);
    }

    // -- limits and accounting -----------------------------------------------

    #[test]
    fn test_total_assets_counts_idle_and_collateral() {
        let (mut sim, a, s) = levered(btc(dec!(10)));
        fund(&mut sim, a.asset, STRATEGY, btc(dec!(1)));
        assert_eq!(s.total_assets(&sim).unwrap(), btc(dec!(11)));
    }

    #[test]
    fn test_limits_zero_when_paused() {
        let (mut sim, _, s) = levered(btc(dec!(1)));
        sim.set_paused(true, false);
        assert_eq!(s.available_deposit_limit(&sim), U256::ZERO);
        assert!(!s.available_withdraw_limit(&sim).unwrap().is_zero());
        sim.set_paused(false, true);
        assert_eq!(s.available_deposit_limit(&sim), U256::ZERO);
        assert_eq!(s.available_withdraw_limit(&sim).unwrap(), U256::ZERO);
    }

    #[test]
    fn test_deposit_limit_is_remaining_cap() {
        let (sim, a, s) = levered(btc(dec!(10)));
        let cap = sim.asset_info(a.asset).unwrap().supply_cap;
        assert_eq!(s.available_deposit_limit(&sim), cap - btc(dec!(10)));
    }

    #[test]
    fn test_withdraw_limit_shrinks_with_liquidity() {
        let (mut sim, _, s) = levered(btc(dec!(10)));
        assert_eq!(s.available_withdraw_limit(&sim).unwrap(), btc(dec!(10)));
        let drained = sim.base_liquidity() - usdc(dec!(100_000));
        sim.drain_liquidity(drained);
        let limit = s.available_withdraw_limit(&sim).unwrap();
        assert!(limit < btc(dec!(10)));
        assert!(!limit.is_zero());
    }

    #[test]
    fn test_harvest_sells_rewards_and_relevers() {
        let (mut sim, a, s) = levered(btc(dec!(10)));
        sim.set_reward_owed(STRATEGY, to_raw(dec!(100), 18));
        let before = s.total_assets(&sim).unwrap();
        let report = s.harvest_and_report(&mut sim, false).unwrap();
        assert!(report.total_assets > before);
        assert_eq!(sim.token_balance(a.reward, STRATEGY), U256::ZERO);
        // Proceeds were supplied, not left idle.
        assert_eq!(sim.token_balance(a.asset, STRATEGY), U256::ZERO);
        assert!(report.adjustment.is_some());
    }

    #[test]
    fn test_harvest_while_withdraw_paused_skips_borrow() {
        let (mut sim, a, s) = levered(btc(dec!(10)));
        sim.set_price(a.asset, dec!(66_000));
        sim.set_paused(false, true);
        let debt_before = sim.borrow_balance_of(STRATEGY);

        let report = s.harvest_and_report(&mut sim, false).unwrap();
        assert_eq!(
            report.adjustment,
            Some(Adjustment::BorrowSkipped {
                reason: BorrowSkip::MarketPaused
            })
        );
        assert_eq!(sim.borrow_balance_of(STRATEGY), debt_before);
    }

    #[test]
    fn test_repay_deferred_while_supply_paused() {
        let (mut sim, a, s) = levered(btc(dec!(10)));
        sim.set_price(a.asset, dec!(50_000));
        sim.set_paused(true, false);
        let debt_before = sim.borrow_balance_of(STRATEGY);

        let outcome = s.tend(&mut sim, U256::ZERO).unwrap();
        assert_eq!(outcome, TendOutcome::Adjusted(Adjustment::RepayDeferred));
        assert_eq!(sim.borrow_balance_of(STRATEGY), debt_before);

        sim.set_paused(false, false);
        let outcome = s.tend(&mut sim, U256::ZERO).unwrap();
        assert!(matches!(outcome, TendOutcome::Adjusted(Adjustment::Repaid { .. })));
    }

    #[test]
    fn test_harvest_when_shutdown_only_reports() {
        let (mut sim, _, s) = levered(btc(dec!(10)));
        sim.set_reward_owed(STRATEGY, to_raw(dec!(100), 18));
        let report = s.harvest_and_report(&mut sim, true).unwrap();
        assert_eq!(report.adjustment, None);
        assert!(sim.swaps().is_empty());
        assert_eq!(report.total_assets, btc(dec!(10)));
    }

    #[test]
    fn test_tend_unwinds_when_unprofitable() {
        let (mut sim, a, s) = levered(btc(dec!(10)));
        sim.set_reward_speeds(U256::ZERO, U256::ZERO);
        let outcome = s.tend(&mut sim, U256::ZERO).unwrap();
        assert!(matches!(outcome, TendOutcome::Unwound(_)));
        assert_eq!(sim.borrow_balance_of(STRATEGY), U256::ZERO);
        assert_eq!(sim.user_collateral(STRATEGY, a.asset), U256::ZERO);
    }

    #[test]
    fn test_emergency_withdraw_bounded_by_collateral() {
        let (mut sim, a, s) = levered(btc(dec!(2)));
        let report = s.emergency_withdraw(&mut sim, btc(dec!(5))).unwrap();
        assert_eq!(report.requested, btc(dec!(2)));
        assert_eq!(sim.user_collateral(STRATEGY, a.asset), U256::ZERO);
        assert_eq!(sim.borrow_balance_of(STRATEGY), U256::ZERO);
    }

    // -- management ----------------------------------------------------------

    #[test]
    fn test_setters_require_management() {
        let (sim, _) = world();
        let mut s = deploy(&sim, standard_settings());
        let err = s.set_slippage_bps(ALICE, 100).unwrap_err();
        assert_eq!(err, StrategyError::Unauthorized { caller: ALICE });
        assert_eq!(s.settings().slippage_bps, 500);
    }

    #[test]
    fn test_invalid_band_leaves_settings_untouched() {
        let (sim, _) = world();
        let mut s = deploy(&sim, standard_settings());
        let before = s.settings().clone();
        assert!(s.set_ltv_multipliers(MANAGEMENT, 8_000, 7_000).is_err());
        assert!(s.set_ltv_multipliers(MANAGEMENT, 7_000, 9_500).is_err());
        assert!(s.set_slippage_bps(MANAGEMENT, 10_000).is_err());
        assert!(s.set_reward_price_buffer_bps(MANAGEMENT, 10_000).is_err());
        assert_eq!(s.settings(), &before);
        s.set_ltv_multipliers(MANAGEMENT, 6_000, 7_500).unwrap();
        assert_eq!(s.settings().band, RiskBand::new(6_000, 7_500).unwrap());
    }

    #[test]
    fn test_price_feed_must_quote() {
        let (sim, a) = world();
        let mut s = deploy(&sim, standard_settings());
        let bogus = Address::with_last_byte(0x99);
        let err = s.set_price_feed(&sim, MANAGEMENT, a.asset, bogus).unwrap_err();
        assert!(matches!(err, StrategyError::InvalidPriceFeed { .. }));
        assert_eq!(s.token_info(a.asset).unwrap().price_feed, sim.feed_of(a.asset));
        s.set_price_feed(&sim, MANAGEMENT, a.asset, sim.feed_of(a.asset))
            .unwrap();
    }

    #[test]
    fn test_manual_withdraw_bounded_by_safe_amount() {
        let (mut sim, a, s) = levered(btc(dec!(10)));
        let got = s
            .manual_withdraw_collateral(&mut sim, MANAGEMENT, btc(dec!(10)))
            .unwrap();
        // At target nothing is free without repaying first.
        assert!(got < btc(dec!(0.001)));
        s.manual_repay_debt(&mut sim, MANAGEMENT).unwrap();
        assert_eq!(sim.borrow_balance_of(STRATEGY), U256::ZERO);
        let got = s
            .manual_withdraw_collateral(&mut sim, MANAGEMENT, btc(dec!(10)))
            .unwrap();
        assert_eq!(got, btc(dec!(10)));
        assert_eq!(sim.user_collateral(STRATEGY, a.asset), U256::ZERO);
    }

    #[test]
    fn test_sell_surplus_debt_token() {
        let (mut sim, a, s) = levered(btc(dec!(10)));
        // Base held beyond the debt.
        fund(&mut sim, a.base, STRATEGY, usdc(dec!(6_000)));
        let bought = s.sell_surplus_debt_token(&mut sim, MANAGEMENT).unwrap();
        assert!(bought > btc(dec!(0.09)));
        assert_eq!(s.position(&sim).debt_token_surplus(), U256::ZERO);
    }
}
