use alloy::primitives::U256;
use serde::{Deserialize, Serialize};

use super::wad_ray::{Usd, Wad};

/// Risk regime of the position, re-evaluated from scratch on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    /// LTV below target: room to borrow.
    Suboptimal,
    /// Between target and warning: hold.
    Healthy,
    /// Above warning: must repay.
    Unhealthy,
}

impl Regime {
    pub fn classify(current: Wad, target: Wad, warning: Wad) -> Self {
        if current < target {
            Self::Suboptimal
        } else if current > warning {
            Self::Unhealthy
        } else {
            Self::Healthy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Suboptimal => "suboptimal",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
        }
    }
}

/// Fresh read of every balance the strategy controls. Never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Position {
    /// Collateral supplied to the money market, in asset units.
    pub collateral: U256,
    /// Outstanding borrow, in debt-token units.
    pub debt: U256,
    /// Asset held by the strategy and not supplied.
    pub idle_asset: U256,
    /// Debt token held by the strategy and not yet parked.
    pub loose_debt_token: U256,
    /// Debt token parked with the reserve holder.
    pub reserve_balance: U256,
}

impl Position {
    /// Debt not covered by the reserve holder plus loose debt token.
    pub fn debt_token_owed(&self) -> U256 {
        self.debt
            .saturating_sub(self.reserve_balance.saturating_add(self.loose_debt_token))
    }

    /// Debt token held beyond what is owed.
    pub fn debt_token_surplus(&self) -> U256 {
        self.reserve_balance
            .saturating_add(self.loose_debt_token)
            .saturating_sub(self.debt)
    }
}

/// Why a borrow was computed but not executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BorrowSkip {
    /// Projected borrow cost exceeds projected reward yield.
    Unprofitable,
    /// Resulting debt would not clear the market's minimum borrow.
    BelowBorrowMin,
    /// Nothing to borrow after rounding, or no base liquidity left.
    ZeroAmount,
    /// The market is not paying out base right now.
    MarketPaused,
}

/// Outcome of one `adjust_position` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    Borrowed { amount: U256 },
    BorrowSkipped { reason: BorrowSkip },
    Repaid { amount: U256 },
    /// Over target but the market is refusing repayments; retried next tend.
    RepayDeferred,
    Held,
}

/// Outcome of one `liquidate` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Withdrawal {
    pub requested: U256,
    /// Asset actually withdrawn from collateral.
    pub freed: U256,
    /// Debt token repaid.
    pub repaid: U256,
    /// Asset sold for debt token on the shortfall path.
    pub asset_sold: U256,
}

impl Withdrawal {
    pub fn used_shortfall_swap(&self) -> bool {
        !self.asset_sold.is_zero()
    }
}

/// What a `tend` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TendOutcome {
    /// Position moved back toward target.
    Adjusted(Adjustment),
    /// Borrowing stopped paying; everything was unwound.
    Unwound(Withdrawal),
}

/// Result handed back to the accounting host after a harvest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarvestReport {
    pub total_assets: U256,
    pub adjustment: Option<Adjustment>,
}

/// Snapshot for dashboards and the keeper's logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSummary {
    pub regime: Regime,
    #[serde(with = "rust_decimal::serde::str")]
    pub current_ltv: rust_decimal::Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub target_ltv: rust_decimal::Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub warning_ltv: rust_decimal::Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub collateral_usd: rust_decimal::Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub debt_usd: rust_decimal::Decimal,
}

impl PositionSummary {
    pub fn new(
        current: Wad,
        target: Wad,
        warning: Wad,
        collateral_usd: Usd,
        debt_usd: Usd,
    ) -> Self {
        Self {
            regime: Regime::classify(current, target, warning),
            current_ltv: current.to_decimal(),
            target_ltv: target.to_decimal(),
            warning_ltv: warning.to_decimal(),
            collateral_usd: collateral_usd.to_decimal(),
            debt_usd: debt_usd.to_decimal(),
        }
    }
}
