//! Collaborator seams: the money market, reward distributor, swap router,
//! token ledger and fee oracle the strategy drives.
//!
//! All calls are synchronous and act on an explicit account. A single
//! execution context implements every trait (see [`Chain`]); the strategy
//! borrows it mutably for the duration of one entry point and never keeps it.

use alloy::primitives::{Address, U256};

use crate::errors::StrategyResult;
use crate::types::{AssetInfo, SwapRoute, Wad};

/// Compound-III-style money market with one borrowable base token.
pub trait MoneyMarket {
    fn base_token(&self) -> Address;
    fn base_token_price_feed(&self) -> Address;
    /// Minimum outstanding borrow the market accepts, in base units.
    fn base_borrow_min(&self) -> U256;

    /// Supply `amount` of `token` from `account`. Supplying base repays
    /// debt first.
    fn supply(&mut self, account: Address, token: Address, amount: U256) -> StrategyResult<()>;

    /// Withdraw `amount` of `token` to `account`. Withdrawing base beyond the
    /// supplied balance borrows.
    fn withdraw(&mut self, account: Address, token: Address, amount: U256)
        -> StrategyResult<()>;

    /// Apply pending interest to `account`. Balances read without it are stale.
    fn accrue_account(&mut self, account: Address) -> StrategyResult<()>;

    fn borrow_balance_of(&self, account: Address) -> U256;
    /// Base supplied by `account`.
    fn balance_of(&self, account: Address) -> U256;
    fn user_collateral(&self, account: Address, asset: Address) -> U256;

    /// Oracle quote for `feed`, 8 decimals (18 for some native quotes).
    fn get_price(&self, feed: Address) -> StrategyResult<U256>;
    fn asset_info(&self, asset: Address) -> StrategyResult<AssetInfo>;

    fn total_supply(&self) -> U256;
    fn total_borrow(&self) -> U256;
    fn total_collateral(&self, asset: Address) -> U256;
    /// Base token held by the market and free to withdraw.
    fn base_liquidity(&self) -> U256;

    /// Per-second supply rate at `utilization` (both WAD).
    fn supply_rate(&self, utilization: Wad) -> Wad;
    /// Per-second borrow rate at `utilization` (both WAD).
    fn borrow_rate(&self, utilization: Wad) -> Wad;

    /// Reward emission per second to suppliers, scaled by `tracking_index_scale`.
    fn base_tracking_supply_speed(&self) -> U256;
    /// Reward emission per second to borrowers, scaled by `tracking_index_scale`.
    fn base_tracking_borrow_speed(&self) -> U256;
    fn tracking_index_scale(&self) -> U256;

    fn is_supply_paused(&self) -> bool;
    fn is_withdraw_paused(&self) -> bool;
    fn is_liquidatable(&self, account: Address) -> bool;
}

/// Reward emission claims for market participants.
pub trait RewardDistributor {
    fn reward_token(&self) -> Address;
    /// Accrued and unclaimed rewards for `account`.
    fn reward_owed(&self, account: Address) -> U256;
    /// Transfer owed rewards to `account`; returns the amount claimed.
    fn claim(&mut self, account: Address, accrue: bool) -> StrategyResult<U256>;
}

/// Price-bounded swap primitive.
pub trait SwapRouter {
    /// Sell exactly `amount_in`; fails when the output is under `min_out`.
    /// Returns the output amount.
    fn swap_exact_in(
        &mut self,
        account: Address,
        route: &SwapRoute,
        amount_in: U256,
        min_out: U256,
    ) -> StrategyResult<U256>;

    /// Buy exactly `amount_out`; fails when the input would exceed `max_in`.
    /// Returns the input spent.
    fn swap_exact_out(
        &mut self,
        account: Address,
        route: &SwapRoute,
        amount_out: U256,
        max_in: U256,
    ) -> StrategyResult<U256>;
}

/// ERC-20 style balances.
pub trait TokenLedger {
    fn decimals(&self, token: Address) -> StrategyResult<u8>;
    fn token_balance(&self, token: Address, account: Address) -> U256;
    fn transfer(
        &mut self,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> StrategyResult<()>;
}

/// Prevailing network fee, in wei.
pub trait NetworkFee {
    fn base_fee(&self) -> U256;
}

/// Everything one strategy call touches.
pub trait Chain: MoneyMarket + RewardDistributor + SwapRouter + TokenLedger + NetworkFee {}

impl<T> Chain for T where T: MoneyMarket + RewardDistributor + SwapRouter + TokenLedger + NetworkFee
{}

/// Checkpoint/rollback support, so a failed multi-step operation leaves no
/// partial state behind.
pub trait Transactional {
    type Checkpoint;

    fn checkpoint(&self) -> Self::Checkpoint;
    fn rollback(&mut self, checkpoint: Self::Checkpoint);
}

/// Run `op` against `ctx`; on error every mutation it made is undone.
pub fn atomically<C, T, E, F>(ctx: &mut C, op: F) -> Result<T, E>
where
    C: Transactional,
    F: FnOnce(&mut C) -> Result<T, E>,
{
    let checkpoint = ctx.checkpoint();
    match op(ctx) {
        Ok(value) => Ok(value),
        Err(e) => {
            ctx.rollback(checkpoint);
            Err(e)
        }
    }
}
