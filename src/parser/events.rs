//! The closed set of typed events the parser can emit (spec.md §4.3, and the
//! §9 redesign flag replacing an "event bus with untyped payloads" with a
//! closed sum type).

use chrono::{DateTime, Utc};

/// Reserve snapshot carried alongside a trade or account update, when known.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reserves {
    pub virtual_sol_reserves: u64,
    pub virtual_token_reserves: u64,
    pub real_sol_reserves: u64,
    pub real_token_reserves: u64,
}

#[derive(Debug, Clone)]
pub struct BcTrade {
    pub signature: String,
    pub slot: u64,
    pub block_time: DateTime<Utc>,
    pub mint: String,
    pub bonding_curve: Option<String>,
    pub user: String,
    pub is_buy: bool,
    pub sol_amount: u64,
    pub token_amount: u64,
    pub reserves: Reserves,
}

#[derive(Debug, Clone)]
pub struct AmmTrade {
    pub signature: String,
    pub slot: u64,
    pub block_time: DateTime<Utc>,
    pub mint: String,
    pub pool: String,
    pub user: String,
    pub is_buy: bool,
    pub sol_amount: u64,
    pub token_amount: u64,
    pub reserves: Option<Reserves>,
    /// Which of the three extraction strategies (§4.3) supplied the amounts.
    pub amount_source: AmmAmountSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmmAmountSource {
    InnerInstructionTransfers,
    TokenBalanceDeltas,
    LogHeuristic,
}

#[derive(Debug, Clone)]
pub struct TokenDiscovered {
    pub mint: String,
    pub bonding_curve: Option<String>,
    pub user: String,
    pub name: String,
    pub symbol: String,
    pub uri: String,
    pub decimals: u8,
    pub initial_reserves: Reserves,
    pub slot: u64,
}

#[derive(Debug, Clone)]
pub struct Graduation {
    /// `None` when the signal came from a bare BC account update and the
    /// mint has not yet been resolved via the bonding_curve↔mint mapping
    /// table (the Graduation Tracker resolves it before persisting).
    pub mint: Option<String>,
    pub bonding_curve: String,
    pub timestamp: DateTime<Utc>,
    pub reason: GraduationReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraduationReason {
    CompleteEvent,
    AccountComplete,
    AmmObserved,
}

#[derive(Debug, Clone)]
pub struct BondingCurveProgressUpdate {
    pub mint: String,
    pub bonding_curve: String,
    pub progress: f64,
    pub slot: u64,
}

#[derive(Debug, Clone)]
pub struct PoolCreated {
    pub pool: String,
    pub mint: String,
    pub slot: u64,
    pub initial_reserves: Reserves,
}

#[derive(Debug, Clone)]
pub struct LiquidityAdd {
    pub pool: String,
    pub mint: String,
    pub slot: u64,
    pub base_amount_in: u64,
    pub quote_amount_in: u64,
}

#[derive(Debug, Clone)]
pub struct LiquidityRemove {
    pub pool: String,
    pub mint: String,
    pub slot: u64,
    pub lp_amount_in: u64,
}

/// The closed sum type every strategy emits into. Subscribers (the Event
/// Bus's consumers) match exhaustively instead of inspecting an untyped
/// payload.
#[derive(Debug, Clone)]
pub enum ParsedEvent {
    BcTrade(BcTrade),
    AmmTrade(AmmTrade),
    TokenDiscovered(TokenDiscovered),
    Graduation(Graduation),
    BondingCurveProgressUpdate(BondingCurveProgressUpdate),
    PoolCreated(PoolCreated),
    LiquidityAdd(LiquidityAdd),
    LiquidityRemove(LiquidityRemove),
}
