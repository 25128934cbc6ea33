pub mod market;
pub mod position;
pub mod wad_ray;

pub use market::{AssetInfo, SwapRoute, TokenInfo};
pub use position::{
    Adjustment, BorrowSkip, HarvestReport, Position, PositionSummary, Regime, TendOutcome,
    Withdrawal,
};
pub use wad_ray::{Usd, Wad};
