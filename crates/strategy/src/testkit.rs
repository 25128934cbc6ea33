//! Shared fixtures for unit tests: a WBTC/USDC market with COMP rewards.

use alloy::primitives::{Address, U256};
use rust_decimal_macros::dec;

use crate::core::strategy::{Strategy, StrategyAccounts, StrategySettings};
use crate::sim::{SimAddresses, SimChain, SimMarketParams, SimRateParams, SimTokenParams};

pub const STRATEGY: Address = Address::with_last_byte(0x51);
pub const MANAGEMENT: Address = Address::with_last_byte(0x52);
pub const RESERVE_HOLDER: Address = Address::with_last_byte(0x53);
pub const ALICE: Address = Address::with_last_byte(0x61);
pub const BOB: Address = Address::with_last_byte(0x62);

/// Utilization 50%, borrow spread ~2% APR, rewards ~4% APR after a 10% buffer.
pub fn standard_params() -> SimMarketParams {
    SimMarketParams {
        asset: SimTokenParams {
            decimals: 8,
            price_usd: dec!(60_000),
        },
        base: SimTokenParams {
            decimals: 6,
            price_usd: dec!(1),
        },
        reward: SimTokenParams {
            decimals: 18,
            price_usd: dec!(50),
        },
        liquidate_cf_bps: 8_500,
        borrow_cf_bps: 8_000,
        supply_cap: dec!(1_000),
        base_borrow_min: dec!(100),
        external_supply: dec!(10_000_000),
        external_borrow: dec!(5_000_000),
        rates: SimRateParams {
            kink_bps: 8_000,
            supply_base_bps: 0,
            supply_slope_low_bps: 400,
            supply_slope_high_bps: 10_000,
            borrow_base_bps: 150,
            borrow_slope_low_bps: 500,
            borrow_slope_high_bps: 15_000,
        },
        reward_supply_per_day: dec!(5),
        reward_borrow_per_day: dec!(10),
        swap_discount_bps: 30,
        base_fee_gwei: 20,
    }
}

pub fn standard_settings() -> StrategySettings {
    StrategySettings::new(7_000, 8_000, 500, 1_000, 100, false).unwrap()
}

pub fn world() -> (SimChain, SimAddresses) {
    let addresses = SimAddresses::default();
    (SimChain::new(&standard_params(), addresses), addresses)
}

pub fn deploy(sim: &SimChain, settings: StrategySettings) -> Strategy {
    let accounts = StrategyAccounts {
        strategy: STRATEGY,
        management: MANAGEMENT,
        reserve_holder: RESERVE_HOLDER,
        asset: sim.addresses().asset,
        wrapped_native: Address::ZERO,
        reward_price_feed: Address::ZERO,
    };
    Strategy::new(sim, accounts, settings, U256::ZERO).unwrap()
}

pub fn fund(sim: &mut SimChain, token: Address, to: Address, amount: U256) {
    sim.mint(token, to, amount);
}
