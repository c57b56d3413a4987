//! The `Trade` entity (spec.md §3 "Trade"). Append-only.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::token::Program;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum TradeType {
    Buy,
    Sell,
}

/// Identity is `(signature, program, mint)` — see spec.md §3 invariant that a
/// mint may not appear twice in the same signature under the same program.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Trade {
    pub signature: String,
    pub program: Program,
    pub mint_address: String,
    pub slot: i64,
    pub block_time: DateTime<Utc>,
    pub trade_type: TradeType,
    pub user_address: String,
    pub sol_amount: i64,
    pub token_amount: i64,
    pub price_sol: Decimal,
    pub price_usd: Decimal,
    pub market_cap_usd: Decimal,
    pub volume_usd: Decimal,
    pub pool_address: Option<String>,
    pub virtual_sol_reserves: Option<i64>,
    pub virtual_token_reserves: Option<i64>,
    pub real_sol_reserves: Option<i64>,
    pub real_token_reserves: Option<i64>,
}

impl Trade {
    /// The uniqueness key enforced by the persistence layer's `ON CONFLICT`.
    pub fn conflict_key(&self) -> (String, Program) {
        (self.signature.clone(), self.program)
    }
}
