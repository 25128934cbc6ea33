//! Reserve holder: parks a strategy's idle debt token in the money market.
//!
//! The strategy's own market account carries the borrow, so lending the
//! borrowed funds back from that account would just repay it. The reserve
//! holder owns a separate account that supplies the debt token and returns
//! it on demand, only to the strategy it is bound to.

use alloy::primitives::{Address, U256};
use tracing::{debug, info};

use crate::errors::{StrategyError, StrategyResult};

use super::market::{MoneyMarket, RewardDistributor, TokenLedger};

/// One reserve holder per strategy, all sharing the same code and market.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveHolder {
    account: Address,
    strategy: Address,
    base_token: Address,
}

impl ReserveHolder {
    /// Bind a fresh reserve-holder account to `strategy`.
    pub fn for_strategy(account: Address, strategy: Address, base_token: Address) -> Self {
        Self {
            account,
            strategy,
            base_token,
        }
    }

    pub fn account(&self) -> Address {
        self.account
    }

    pub fn strategy(&self) -> Address {
        self.strategy
    }

    fn only_strategy(&self, caller: Address) -> StrategyResult<()> {
        if caller != self.strategy {
            return Err(StrategyError::Unauthorized { caller });
        }
        Ok(())
    }

    /// Pull the caller's whole debt-token balance and supply it.
    pub fn deposit<C>(&self, ctx: &mut C, caller: Address) -> StrategyResult<U256>
    where
        C: MoneyMarket + TokenLedger,
    {
        self.only_strategy(caller)?;
        let amount = ctx.token_balance(self.base_token, caller);
        if amount.is_zero() {
            return Ok(U256::ZERO);
        }
        ctx.transfer(self.base_token, caller, self.account, amount)?;
        ctx.supply(self.account, self.base_token, amount)?;
        debug!(%amount, "reserve deposit");
        Ok(amount)
    }

    /// Withdraw `amount` from the market and forward it to the caller.
    /// Fails if the market delivered less than requested.
    pub fn withdraw<C>(&self, ctx: &mut C, caller: Address, amount: U256) -> StrategyResult<()>
    where
        C: MoneyMarket + TokenLedger,
    {
        self.only_strategy(caller)?;
        if amount.is_zero() {
            return Ok(());
        }
        let before = ctx.token_balance(self.base_token, self.account);
        ctx.withdraw(self.account, self.base_token, amount)?;
        let received = ctx
            .token_balance(self.base_token, self.account)
            .saturating_sub(before);
        if received < amount {
            return Err(StrategyError::ReserveShortfall {
                requested: amount,
                received,
            });
        }
        ctx.transfer(self.base_token, self.account, caller, amount)?;
        debug!(%amount, "reserve withdraw");
        Ok(())
    }

    /// Supplied balance after forcing interest accrual.
    pub fn accrued_balance<C: MoneyMarket>(&self, ctx: &mut C) -> StrategyResult<U256> {
        ctx.accrue_account(self.account)?;
        Ok(ctx.balance_of(self.account))
    }

    /// Supplied balance as last accrued.
    pub fn balance<C: MoneyMarket>(&self, ctx: &C) -> U256 {
        ctx.balance_of(self.account)
    }

    /// Claim supplier rewards and hand them to the strategy.
    pub fn claim_rewards<C>(&self, ctx: &mut C, caller: Address) -> StrategyResult<U256>
    where
        C: RewardDistributor + TokenLedger,
    {
        self.only_strategy(caller)?;
        if !ctx.reward_owed(self.account).is_zero() {
            ctx.claim(self.account, true)?;
        }
        let reward_token = ctx.reward_token();
        let amount = ctx.token_balance(reward_token, self.account);
        if !amount.is_zero() {
            ctx.transfer(reward_token, self.account, caller, amount)?;
            info!(%amount, "reserve rewards forwarded");
        }
        Ok(amount)
    }
}
