//! The `Token` entity (spec.md §3 "Token").
//!
//! A row is created the first time a trade or account update crosses the
//! configured save threshold, and mutated on every subsequent trade or
//! reconciled graduation. Rows are never deleted (an `archived` flag stands
//! in for deletion).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Which program currently owns trading for a mint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum Program {
    BondingCurve,
    AmmPool,
}

impl Program {
    pub fn as_str(&self) -> &'static str {
        match self {
            Program::BondingCurve => "bonding_curve",
            Program::AmmPool => "amm_pool",
        }
    }
}

/// A pump.fun (or graduated pump.swap) token, keyed by mint address.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Token {
    /// Base58 ed25519 mint address. Primary key.
    pub mint_address: String,
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub first_program: Program,
    pub current_program: Program,
    pub graduated: bool,
    pub graduation_timestamp: Option<DateTime<Utc>>,
    pub latest_price_sol: Option<Decimal>,
    pub latest_price_usd: Option<Decimal>,
    pub latest_market_cap_usd: Option<Decimal>,
    pub latest_virtual_sol_reserves: Option<i64>,
    pub latest_virtual_token_reserves: Option<i64>,
    pub latest_real_sol_reserves: Option<i64>,
    pub latest_real_token_reserves: Option<i64>,
    pub latest_bonding_progress: Option<Decimal>,
    pub first_seen_slot: i64,
    pub creator: Option<String>,
    pub bonding_curve_address: Option<String>,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Token {
    /// Construct the first-observation row for a mint discovered via a BC
    /// trade, BC create event, or AMM pool-created event.
    pub fn new_discovered(
        mint_address: String,
        first_program: Program,
        first_seen_slot: i64,
        creator: Option<String>,
        bonding_curve_address: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            mint_address,
            symbol: None,
            name: None,
            first_program,
            current_program: first_program,
            graduated: false,
            graduation_timestamp: None,
            latest_price_sol: None,
            latest_price_usd: None,
            latest_market_cap_usd: None,
            latest_virtual_sol_reserves: None,
            latest_virtual_token_reserves: None,
            latest_real_sol_reserves: None,
            latest_real_token_reserves: None,
            latest_bonding_progress: None,
            first_seen_slot,
            creator,
            bonding_curve_address,
            archived: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply the invariant from spec.md §3: graduation never downgrades.
    /// `graduated == true ⇒ current_program == AmmPool` and a timestamp is set.
    pub fn mark_graduated(&mut self, at: DateTime<Utc>) {
        if self.graduated {
            return;
        }
        self.graduated = true;
        self.current_program = Program::AmmPool;
        self.graduation_timestamp = Some(at);
        self.updated_at = at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_discovered_defaults_ungraduated() {
        let token = Token::new_discovered(
            "Mint111111111111111111111111111111111111".to_string(),
            Program::BondingCurve,
            100,
            None,
            None,
        );
        assert!(!token.graduated);
        assert_eq!(token.current_program, Program::BondingCurve);
        assert!(token.graduation_timestamp.is_none());
    }

    #[test]
    fn mark_graduated_is_idempotent_on_timestamp() {
        let mut token = Token::new_discovered(
            "Mint222222222222222222222222222222222222".to_string(),
            Program::BondingCurve,
            100,
            None,
            None,
        );
        let first = Utc::now();
        token.mark_graduated(first);
        assert_eq!(token.current_program, Program::AmmPool);

        let second = first + chrono::Duration::seconds(5);
        token.mark_graduated(second);
        assert_eq!(token.graduation_timestamp, Some(first));
    }
}
