use alloy::primitives::{Address, U256};

use super::wad_ray::Wad;

/// Per-collateral configuration reported by the money market.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetInfo {
    pub asset: Address,
    pub price_feed: Address,
    /// 10^decimals of the collateral token.
    pub scale: U256,
    /// Max debt/collateral ratio at which new borrows are accepted (WAD).
    pub borrow_collateral_factor: Wad,
    /// Debt/collateral ratio at which the account becomes liquidatable (WAD).
    pub liquidate_collateral_factor: Wad,
    /// Market-wide cap on supplied collateral, in collateral units.
    pub supply_cap: U256,
}

/// Price feed and decimal scale used to convert a token to and from USD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenInfo {
    pub price_feed: Address,
    /// 10^decimals.
    pub decimals_scale: U256,
}

impl TokenInfo {
    pub fn new(price_feed: Address, decimals: u8) -> Self {
        Self {
            price_feed,
            decimals_scale: U256::from(10u64).pow(U256::from(decimals)),
        }
    }
}

/// A swap path: one hop, or two hops through an intermediate token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapRoute {
    pub token_in: Address,
    pub token_out: Address,
    /// `(intermediate token, fee of the first leg)`; `None` for a direct swap.
    pub hop: Option<(Address, u32)>,
    /// Fee tier of the final leg.
    pub fee: u32,
}
