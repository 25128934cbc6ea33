//! Simulated world the strategy runs against in tests and in the keeper
//! binary: a money market with its token ledger, swap router and reward
//! distributor, plus a minimal vault host.

mod chain;
mod vault;

pub use chain::{
    feed_address, to_raw, SimAddresses, SimChain, SimMarketParams, SimRateParams, SimTokenParams,
};
pub use vault::{SimVault, VaultReport};
