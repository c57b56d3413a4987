pub mod amm_liquidity_log;
pub mod amm_trade_ix;
pub mod bc_create_log;
pub mod bc_graduation_log;
pub mod bc_trade_log;
pub mod pool_created;

use super::context::ParseContext;
use super::events::ParsedEvent;

/// A single parsing strategy (spec.md §4.3, and the §9 redesign flag
/// replacing a dynamic base-class monitor hierarchy with a data-driven
/// strategy-object abstraction).
///
/// `can_parse` is a cheap membership/discriminator check; `parse` does the
/// actual decode and is only called when `can_parse` returned `true`.
pub trait ParseStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn can_parse(&self, ctx: &ParseContext) -> bool;
    fn parse(&self, ctx: &ParseContext) -> Option<ParsedEvent>;
}

/// Canonical dispatch order (spec.md §4.3: "event-log strategies > IDL-
/// instruction strategies > inner-instruction inference > heuristic
/// fallback"). `AmmTradeStrategy` internally implements the inner-ix / token-
/// balance / log-heuristic cascade described for a single AMM instruction,
/// so it occupies one slot here even though it tries three extraction paths.
pub fn default_strategies() -> Vec<Box<dyn ParseStrategy>> {
    vec![
        Box::new(bc_trade_log::BcTradeLogStrategy),
        Box::new(bc_create_log::BcCreateLogStrategy),
        Box::new(bc_graduation_log::BcGraduationLogStrategy),
        Box::new(amm_liquidity_log::AmmLiquidityLogStrategy),
        Box::new(pool_created::PoolCreatedStrategy),
        Box::new(amm_trade_ix::AmmTradeStrategy),
    ]
}
