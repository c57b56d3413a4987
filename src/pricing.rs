//! Pricing Core (spec.md §4.4): derives SOL/USD prices, market cap, and
//! bonding-curve progress from reserve snapshots.
//!
//! All intermediate products are computed in `u128` and divided last (the
//! §9 redesign flag replacing "BigInt for u64 arithmetic" with a native
//! wider-than-u64 checked-arithmetic path). Final values are
//! `rust_decimal::Decimal` so callers get exact fixed-point output instead of
//! `f64` drift.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use crate::parser::constants::{
    DEFAULT_TOKEN_DECIMALS, DEFAULT_TOTAL_SUPPLY_RAW, GRADUATION_BAND_HIGH_LAMPORTS,
    GRADUATION_BAND_LOW_LAMPORTS,
};

const LAMPORTS_PER_SOL: u128 = 1_000_000_000;

/// Whether circulating supply for market-cap purposes comes from the bonding
/// curve's `token_total_supply` or from AMM pool-held tokens. spec.md §4.4
/// and §9 freeze the divergent "fixer" convention: AMM uses pool-held tokens,
/// not total supply.
#[derive(Debug, Clone, Copy)]
pub enum SupplyMode {
    /// Bonding-curve mode: circulating supply is `token_total_supply`.
    BondingCurveTotalSupply(u64),
    /// AMM mode: circulating supply is the tokens currently held by the pool.
    AmmPoolHeldTokens(u64),
}

/// Inputs needed to price one reserve snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ReserveSnapshot {
    pub virtual_sol_reserves: u64,
    pub virtual_token_reserves: u64,
    pub token_decimals: u8,
}

impl ReserveSnapshot {
    pub fn new(virtual_sol_reserves: u64, virtual_token_reserves: u64) -> Self {
        Self {
            virtual_sol_reserves,
            virtual_token_reserves,
            token_decimals: DEFAULT_TOKEN_DECIMALS,
        }
    }

    pub fn with_decimals(mut self, decimals: u8) -> Self {
        self.token_decimals = decimals;
        self
    }
}

/// Fully derived pricing output for a single observation.
#[derive(Debug, Clone, Copy)]
pub struct PricingResult {
    pub price_sol: Decimal,
    pub price_usd: Decimal,
    pub market_cap_usd: Decimal,
    pub progress: Decimal,
}

/// `price_sol = (virtual_sol_reserves / 10^9) / (virtual_token_reserves / 10^decimals)`,
/// computed as `virtual_sol_reserves * 10^decimals` over
/// `virtual_token_reserves * 10^9` in `u128` so the division happens exactly
/// once at the end (spec.md §4.4: "divide last").
pub fn price_sol(snapshot: ReserveSnapshot) -> Decimal {
    if snapshot.virtual_token_reserves == 0 {
        return Decimal::ZERO;
    }
    let token_scale = 10u128.pow(snapshot.token_decimals as u32);
    let numerator = (snapshot.virtual_sol_reserves as u128).saturating_mul(token_scale);
    let denominator = (snapshot.virtual_token_reserves as u128).saturating_mul(LAMPORTS_PER_SOL);

    let numerator = Decimal::from_u128(numerator).unwrap_or(Decimal::MAX);
    let denominator = Decimal::from_u128(denominator).unwrap_or(Decimal::ONE);
    (numerator / denominator).round_dp(12)
}

pub fn price_usd(price_sol: Decimal, sol_usd: Decimal) -> Decimal {
    (price_sol * sol_usd).round_dp(4)
}

/// Market cap uses `circulating_supply / 10^decimals` tokens priced at
/// `price_sol * sol_usd`. Which supply figure to use is decided by
/// `SupplyMode` (spec.md §4.4: BC uses `token_total_supply`, AMM uses
/// pool-held tokens).
///
/// Takes the *unrounded* SOL price rather than the 4dp-rounded `price_usd`
/// field: every pump.fun token prices several orders of magnitude below
/// $0.0001, so rounding before multiplying by circulating supply collapses
/// `price_usd` to zero and every market cap with it. The product is rounded
/// once, at the end, per spec.md §4.4's "divide last" discipline.
pub fn market_cap_usd(price_sol: Decimal, sol_usd: Decimal, supply: SupplyMode, token_decimals: u8) -> Decimal {
    let raw_supply = match supply {
        SupplyMode::BondingCurveTotalSupply(s) => s,
        SupplyMode::AmmPoolHeldTokens(s) => s,
    };
    let scale = Decimal::from_u128(10u128.pow(token_decimals as u32)).unwrap_or(Decimal::ONE);
    let circulating = Decimal::from(raw_supply) / scale;
    (price_sol * sol_usd * circulating).round_dp(4)
}

/// `progress = clamp(((virtual_sol - 30e9) / 55e9) * 100, 0, 100)` (spec.md §3, §4.4).
pub fn bonding_curve_progress(virtual_sol_reserves: u64) -> Decimal {
    let low = Decimal::from(GRADUATION_BAND_LOW_LAMPORTS);
    let high = Decimal::from(GRADUATION_BAND_HIGH_LAMPORTS);
    let span = high - low;
    let sol = Decimal::from(virtual_sol_reserves);

    let raw = ((sol - low) / span) * Decimal::from(100);
    raw.clamp(Decimal::ZERO, Decimal::from(100)).round_dp(4)
}

/// Convenience wrapper computing every derived figure for a BC snapshot,
/// defaulting total supply to the spec's assumed 10^9-at-6-decimals figure
/// until the real bonding-curve account has been observed.
pub fn price_bonding_curve(
    snapshot: ReserveSnapshot,
    sol_usd: Decimal,
    token_total_supply: Option<u64>,
) -> PricingResult {
    let p_sol = price_sol(snapshot);
    let p_usd = price_usd(p_sol, sol_usd);
    let supply = SupplyMode::BondingCurveTotalSupply(
        token_total_supply.unwrap_or(DEFAULT_TOTAL_SUPPLY_RAW),
    );
    let cap = market_cap_usd(p_sol, sol_usd, supply, snapshot.token_decimals);
    let progress = bonding_curve_progress(snapshot.virtual_sol_reserves);
    PricingResult {
        price_sol: p_sol,
        price_usd: p_usd,
        market_cap_usd: cap,
        progress,
    }
}

/// AMM equivalent: same reserve-ratio price formula, but market cap is
/// computed against pool-held tokens and progress is always 100 (graduated).
pub fn price_amm(
    snapshot: ReserveSnapshot,
    sol_usd: Decimal,
    pool_held_tokens: u64,
) -> PricingResult {
    let p_sol = price_sol(snapshot);
    let p_usd = price_usd(p_sol, sol_usd);
    let cap = market_cap_usd(
        p_sol,
        sol_usd,
        SupplyMode::AmmPoolHeldTokens(pool_held_tokens),
        snapshot.token_decimals,
    );
    PricingResult {
        price_sol: p_sol,
        price_usd: p_usd,
        market_cap_usd: cap,
        progress: Decimal::from(100),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_s1_bc_buy_pricing() {
        // spec.md §8 S1: virtual_sol=31e9, virtual_token=780e9(at 6 decimals), sol_usd=180.
        let snapshot = ReserveSnapshot::new(31_000_000_000, 780_000_000_000_000);
        let result = price_bonding_curve(snapshot, Decimal::from(180), None);

        let expected_price_sol = Decimal::from_str("0.0000000397").unwrap();
        assert!((result.price_sol - expected_price_sol).abs() < Decimal::from_str("0.000000001").unwrap());

        assert!(result.market_cap_usd > Decimal::from(7000) && result.market_cap_usd < Decimal::from(7300));

        let expected_progress = Decimal::from_str("1.8182").unwrap();
        assert!((result.progress - expected_progress).abs() < Decimal::from_str("0.01").unwrap());
    }

    #[test]
    fn progress_clamps_at_floor_and_ceiling() {
        assert_eq!(bonding_curve_progress(30_000_000_000), Decimal::ZERO);
        assert_eq!(bonding_curve_progress(20_000_000_000), Decimal::ZERO);
        assert_eq!(bonding_curve_progress(85_000_000_000), Decimal::from(100));
        assert_eq!(bonding_curve_progress(200_000_000_000), Decimal::from(100));
    }

    #[test]
    fn price_sol_zero_token_reserves_is_zero_not_panic() {
        let snapshot = ReserveSnapshot::new(1_000_000_000, 0);
        assert_eq!(price_sol(snapshot), Decimal::ZERO);
    }

    #[test]
    fn amm_and_bc_market_cap_conventions_diverge_on_same_price() {
        let snapshot = ReserveSnapshot::new(50_000_000_000, 500_000_000_000_000);
        let sol_usd = Decimal::from(150);

        let bc = price_bonding_curve(snapshot, sol_usd, Some(1_000_000_000_000_000));
        let amm = price_amm(snapshot, sol_usd, 400_000_000_000_000);

        assert_eq!(bc.price_usd, amm.price_usd);
        assert_ne!(bc.market_cap_usd, amm.market_cap_usd);
    }

    proptest::proptest! {
        /// Progress is clamped to [0, 100] for every possible reserve value,
        /// not just the boundary cases above.
        #[test]
        fn progress_is_always_within_bounds(virtual_sol_reserves: u64) {
            let progress = bonding_curve_progress(virtual_sol_reserves);
            proptest::prop_assert!(progress >= Decimal::ZERO);
            proptest::prop_assert!(progress <= Decimal::from(100));
        }

        /// `price_sol` never panics or overflows across the full u64 range,
        /// and a zero token-reserve input is always priced at zero.
        #[test]
        fn price_sol_never_panics(virtual_sol_reserves: u64, virtual_token_reserves: u64) {
            let snapshot = ReserveSnapshot::new(virtual_sol_reserves, virtual_token_reserves);
            let price = price_sol(snapshot);
            if virtual_token_reserves == 0 {
                proptest::prop_assert_eq!(price, Decimal::ZERO);
            } else {
                proptest::prop_assert!(price >= Decimal::ZERO);
            }
        }
    }
}
