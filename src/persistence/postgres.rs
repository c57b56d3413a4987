//! Postgres-backed `PersistenceSink` (spec.md §4.8, §6 "Downstream
//! persistence schema"). Each batch runs inside a single transaction; the
//! `ON CONFLICT` clauses encode the idempotency rules spec.md §4.8 and the
//! invariants in §8 (at most one trade per (signature, program), pool states
//! deduped by (pool_address, slot), graduated never downgrades).

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use crate::graduation::TokenGraduatedEvent;
use crate::models::{PoolState, Token, Trade};

use super::sink::PersistenceSink;

pub struct PostgresSink {
    pool: PgPool,
}

impl PostgresSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn begin(&self) -> anyhow::Result<Transaction<'_, Postgres>> {
        Ok(self.pool.begin().await?)
    }
}

#[async_trait]
impl PersistenceSink for PostgresSink {
    async fn upsert_tokens(&self, tokens: Vec<Token>) -> anyhow::Result<()> {
        if tokens.is_empty() {
            return Ok(());
        }
        let mut tx = self.begin().await?;
        for token in tokens {
            sqlx::query(
                r#"
                INSERT INTO tokens (
                    mint_address, symbol, name, first_program, current_program,
                    graduated, graduation_timestamp, latest_price_sol, latest_price_usd,
                    latest_market_cap_usd, latest_virtual_sol_reserves,
                    latest_virtual_token_reserves, latest_real_sol_reserves,
                    latest_real_token_reserves, latest_bonding_progress, first_seen_slot,
                    creator, bonding_curve_address, archived, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
                ON CONFLICT (mint_address) DO UPDATE SET
                    latest_price_sol = EXCLUDED.latest_price_sol,
                    latest_price_usd = EXCLUDED.latest_price_usd,
                    latest_market_cap_usd = EXCLUDED.latest_market_cap_usd,
                    latest_virtual_sol_reserves = EXCLUDED.latest_virtual_sol_reserves,
                    latest_virtual_token_reserves = EXCLUDED.latest_virtual_token_reserves,
                    latest_real_sol_reserves = EXCLUDED.latest_real_sol_reserves,
                    latest_real_token_reserves = EXCLUDED.latest_real_token_reserves,
                    latest_bonding_progress = EXCLUDED.latest_bonding_progress,
                    current_program = CASE
                        WHEN tokens.graduated THEN tokens.current_program
                        ELSE EXCLUDED.current_program
                    END,
                    graduated = tokens.graduated OR EXCLUDED.graduated,
                    graduation_timestamp = COALESCE(tokens.graduation_timestamp, EXCLUDED.graduation_timestamp),
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(&token.mint_address)
            .bind(&token.symbol)
            .bind(&token.name)
            .bind(token.first_program)
            .bind(token.current_program)
            .bind(token.graduated)
            .bind(token.graduation_timestamp)
            .bind(token.latest_price_sol)
            .bind(token.latest_price_usd)
            .bind(token.latest_market_cap_usd)
            .bind(token.latest_virtual_sol_reserves)
            .bind(token.latest_virtual_token_reserves)
            .bind(token.latest_real_sol_reserves)
            .bind(token.latest_real_token_reserves)
            .bind(token.latest_bonding_progress)
            .bind(token.first_seen_slot)
            .bind(&token.creator)
            .bind(&token.bonding_curve_address)
            .bind(token.archived)
            .bind(token.created_at)
            .bind(token.updated_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert_trades(&self, trades: Vec<Trade>) -> anyhow::Result<()> {
        if trades.is_empty() {
            return Ok(());
        }
        let mut tx = self.begin().await?;
        for trade in trades {
            sqlx::query(
                r#"
                INSERT INTO trades (
                    signature, program, mint_address, slot, block_time, trade_type,
                    user_address, sol_amount, token_amount, price_sol, price_usd,
                    market_cap_usd, volume_usd, pool_address, virtual_sol_reserves,
                    virtual_token_reserves, real_sol_reserves, real_token_reserves
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
                ON CONFLICT (signature, program) DO NOTHING
                "#,
            )
            .bind(&trade.signature)
            .bind(trade.program)
            .bind(&trade.mint_address)
            .bind(trade.slot)
            .bind(trade.block_time)
            .bind(trade.trade_type)
            .bind(&trade.user_address)
            .bind(trade.sol_amount)
            .bind(trade.token_amount)
            .bind(trade.price_sol)
            .bind(trade.price_usd)
            .bind(trade.market_cap_usd)
            .bind(trade.volume_usd)
            .bind(&trade.pool_address)
            .bind(trade.virtual_sol_reserves)
            .bind(trade.virtual_token_reserves)
            .bind(trade.real_sol_reserves)
            .bind(trade.real_token_reserves)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert_pool_states(&self, states: Vec<PoolState>) -> anyhow::Result<()> {
        if states.is_empty() {
            return Ok(());
        }
        let mut tx = self.begin().await?;
        for state in states {
            sqlx::query(
                r#"
                INSERT INTO pool_states (
                    pool_address, slot, mint_address, virtual_sol_reserves,
                    virtual_token_reserves, real_sol_reserves, real_token_reserves, pool_open
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (pool_address, slot) DO NOTHING
                "#,
            )
            .bind(&state.pool_address)
            .bind(state.slot)
            .bind(&state.mint_address)
            .bind(state.virtual_sol_reserves)
            .bind(state.virtual_token_reserves)
            .bind(state.real_sol_reserves)
            .bind(state.real_token_reserves)
            .bind(state.pool_open)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn record_graduations(&self, events: Vec<TokenGraduatedEvent>) -> anyhow::Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let mut tx = self.begin().await?;
        for event in events {
            sqlx::query(
                r#"
                INSERT INTO bonding_curve_mappings (bonding_curve_address, mint_address)
                VALUES ($1, $2)
                ON CONFLICT (bonding_curve_address) DO NOTHING
                "#,
            )
            .bind(&event.bonding_curve_address)
            .bind(&event.mint)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                UPDATE tokens SET
                    graduated = true,
                    current_program = 'amm_pool',
                    graduation_timestamp = COALESCE(graduation_timestamp, $2),
                    updated_at = now()
                WHERE mint_address = $1 AND NOT graduated
                "#,
            )
            .bind(&event.mint)
            .bind(event.timestamp)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
