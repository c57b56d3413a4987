//! `PersistenceSink` — the trait the batched writer flushes through. One
//! implementation talks to Postgres (`postgres.rs`); an in-memory
//! implementation backs the integration-style test suites elsewhere in this
//! crate without a live database (SPEC_FULL.md §4.13).

use async_trait::async_trait;

use crate::graduation::TokenGraduatedEvent;
use crate::models::{PoolState, Token, Trade};

#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn upsert_tokens(&self, tokens: Vec<Token>) -> anyhow::Result<()>;
    async fn insert_trades(&self, trades: Vec<Trade>) -> anyhow::Result<()>;
    async fn insert_pool_states(&self, states: Vec<PoolState>) -> anyhow::Result<()>;
    async fn record_graduations(&self, events: Vec<TokenGraduatedEvent>) -> anyhow::Result<()>;
}

/// An in-memory sink for tests: applies the same idempotency rules spec.md
/// §4.8 requires of the real store (conflict keys deduped, graduated never
/// downgraded) without touching a database.
#[derive(Default)]
pub struct InMemorySink {
    pub tokens: tokio::sync::Mutex<std::collections::HashMap<String, Token>>,
    pub trades: tokio::sync::Mutex<std::collections::HashMap<(String, String), Trade>>,
    pub pool_states: tokio::sync::Mutex<std::collections::HashMap<(String, i64), PoolState>>,
    pub graduations: tokio::sync::Mutex<std::collections::HashSet<String>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceSink for InMemorySink {
    async fn upsert_tokens(&self, tokens: Vec<Token>) -> anyhow::Result<()> {
        let mut guard = self.tokens.lock().await;
        for token in tokens {
            match guard.get_mut(&token.mint_address) {
                Some(existing) => {
                    // Mirrors the Postgres `ON CONFLICT DO UPDATE` column list:
                    // symbol/name/first_program/first_seen_slot/creator/
                    // bonding_curve_address/created_at are set once on insert
                    // and never touched again; graduated never downgrades.
                    let graduated = existing.graduated || token.graduated;
                    let graduation_timestamp = existing
                        .graduation_timestamp
                        .or(token.graduation_timestamp);
                    let symbol = existing.symbol.clone().or(token.symbol.clone());
                    let name = existing.name.clone().or(token.name.clone());
                    let first_program = existing.first_program;
                    let first_seen_slot = existing.first_seen_slot;
                    let creator = existing.creator.clone().or(token.creator.clone());
                    let bonding_curve_address = existing
                        .bonding_curve_address
                        .clone()
                        .or(token.bonding_curve_address.clone());
                    let created_at = existing.created_at;

                    *existing = token;
                    existing.graduated = graduated;
                    existing.graduation_timestamp = graduation_timestamp;
                    existing.symbol = symbol;
                    existing.name = name;
                    existing.first_program = first_program;
                    existing.first_seen_slot = first_seen_slot;
                    existing.creator = creator;
                    existing.bonding_curve_address = bonding_curve_address;
                    existing.created_at = created_at;
                    if graduated {
                        existing.current_program = crate::models::Program::AmmPool;
                    }
                }
                None => {
                    guard.insert(token.mint_address.clone(), token);
                }
            }
        }
        Ok(())
    }

    async fn insert_trades(&self, trades: Vec<Trade>) -> anyhow::Result<()> {
        let mut guard = self.trades.lock().await;
        for trade in trades {
            let key = (trade.signature.clone(), trade.program.as_str().to_string());
            guard.entry(key).or_insert(trade);
        }
        Ok(())
    }

    async fn insert_pool_states(&self, states: Vec<PoolState>) -> anyhow::Result<()> {
        let mut guard = self.pool_states.lock().await;
        for state in states {
            let key = (state.pool_address.clone(), state.slot);
            guard.entry(key).or_insert(state);
        }
        Ok(())
    }

    async fn record_graduations(&self, events: Vec<TokenGraduatedEvent>) -> anyhow::Result<()> {
        let mut graduations = self.graduations.lock().await;
        let mut tokens = self.tokens.lock().await;
        for event in events {
            graduations.insert(event.mint.clone());
            if let Some(token) = tokens.get_mut(&event.mint) {
                token.mark_graduated(event.timestamp);
            }
        }
        Ok(())
    }
}
