use alloy::primitives::{Address, U256};
use thiserror::Error;

/// Typed error hierarchy for the lender/borrower strategy.
///
/// Library-internal errors use specific variants; application code wraps with
/// `anyhow::Context` for propagation. Any variant returned from an entry point
/// aborts the whole operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StrategyError {
    // -- Configuration ------------------------------------------------------
    #[error("invalid risk band: target {target_bps} bps must be < warning {warning_bps} bps <= {max_bps} bps")]
    InvalidRiskBand {
        target_bps: u64,
        warning_bps: u64,
        max_bps: u64,
    },

    #[error("invalid slippage: {bps} bps must be < 10000")]
    InvalidSlippage { bps: u64 },

    #[error("invalid reward price buffer: {bps} bps must be < 10000")]
    InvalidBuffer { bps: u64 },

    #[error("invalid price feed {feed} for token {token}: {reason}")]
    InvalidPriceFeed {
        token: Address,
        feed: Address,
        reason: String,
    },

    #[error("unknown token {token}")]
    UnknownToken { token: Address },

    // -- Access -------------------------------------------------------------
    #[error("unauthorized caller {caller}")]
    Unauthorized { caller: Address },

    // -- Collaborators ------------------------------------------------------
    #[error("money market error: {reason}")]
    Market { reason: String },

    #[error("oracle error for feed {feed}: {reason}")]
    Oracle { feed: Address, reason: String },

    #[error("swap error: {reason}")]
    Swap { reason: String },

    #[error("token transfer error: {reason}")]
    Transfer { reason: String },

    #[error("reserve holder returned {received} but {requested} was requested")]
    ReserveShortfall { requested: U256, received: U256 },

    #[error("accounting host rejected the call: {reason}")]
    Host { reason: String },

    // -- Arithmetic ---------------------------------------------------------
    #[error("arithmetic overflow in {context}")]
    ArithmeticOverflow { context: &'static str },
}

impl StrategyError {
    pub fn market(reason: impl Into<String>) -> Self {
        Self::Market {
            reason: reason.into(),
        }
    }

    pub fn host(reason: impl Into<String>) -> Self {
        Self::Host {
            reason: reason.into(),
        }
    }

    pub fn swap(reason: impl Into<String>) -> Self {
        Self::Swap {
            reason: reason.into(),
        }
    }
}

pub type StrategyResult<T> = Result<T, StrategyError>;
