//! Pool created (spec.md §4.3 "Pool created").
//!
//! The AMM `create_pool` discriminator shows up on an inner instruction
//! (the pool is created via CPI from the migration program during
//! graduation, not as a user-submitted top-level instruction), so this
//! strategy scans `ctx.inner_instructions` rather than `ctx.instructions`.

use borsh::BorshDeserialize;

use crate::parser::constants::{AMM_CREATE_POOL_DISCRIMINATOR, PUMP_AMM_PROGRAM_ID};
use crate::parser::context::{InnerInstruction, ParseContext};
use crate::parser::events::{ParsedEvent, PoolCreated, Reserves};

use super::ParseStrategy;

#[derive(BorshDeserialize)]
struct CreatePoolPayload {
    #[allow(dead_code)]
    index: u16,
    base_amount_in: u64,
    quote_amount_in: u64,
}

fn matching_ix(ctx: &ParseContext) -> Option<&InnerInstruction> {
    ctx.inner_instructions.iter().find(|ix| {
        ix.program_id == PUMP_AMM_PROGRAM_ID
            && ix.data.len() >= 8
            && ix.data[0..8] == AMM_CREATE_POOL_DISCRIMINATOR
    })
}

/// Account order for `create_pool`: pool at index 0, base mint at index 2,
/// per the IDL account layout (same fixed-order convention the liquidity and
/// trade strategies rely on).
fn resolve_pool_and_mint(ix: &InnerInstruction) -> Option<(String, String)> {
    Some((ix.accounts.first()?.clone(), ix.accounts.get(2)?.clone()))
}

pub struct PoolCreatedStrategy;

impl ParseStrategy for PoolCreatedStrategy {
    fn name(&self) -> &'static str {
        "pool_created"
    }

    fn can_parse(&self, ctx: &ParseContext) -> bool {
        matching_ix(ctx).is_some()
    }

    fn parse(&self, ctx: &ParseContext) -> Option<ParsedEvent> {
        let ix = matching_ix(ctx)?;
        let (pool, mint) = resolve_pool_and_mint(ix)?;
        let payload = CreatePoolPayload::try_from_slice(&ix.data[8..]).ok()?;

        Some(ParsedEvent::PoolCreated(PoolCreated {
            pool,
            mint,
            slot: ctx.slot,
            initial_reserves: Reserves {
                virtual_sol_reserves: payload.quote_amount_in,
                virtual_token_reserves: payload.base_amount_in,
                real_sol_reserves: payload.quote_amount_in,
                real_token_reserves: payload.base_amount_in,
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ix_with_payload() -> InnerInstruction {
        let payload = CreatePoolPayload {
            index: 0,
            base_amount_in: 793_100_000_000_000,
            quote_amount_in: 85_000_000_000,
        };
        let mut data = AMM_CREATE_POOL_DISCRIMINATOR.to_vec();
        data.extend(borsh::to_vec(&payload).unwrap());

        InnerInstruction {
            program_id: PUMP_AMM_PROGRAM_ID.to_string(),
            accounts: vec!["Pool9".to_string(), "Authority9".to_string(), "Mint9".to_string()],
            data,
        }
    }

    fn ctx_with(inner: InnerInstruction) -> ParseContext {
        ParseContext {
            signature: "sig-pool-created".to_string(),
            slot: 77,
            block_time: Utc::now(),
            account_keys: vec![],
            log_messages: vec![],
            instructions: vec![],
            inner_instructions: vec![inner],
            pre_token_balances: vec![],
            post_token_balances: vec![],
        }
    }

    #[test]
    fn emits_pool_created_from_inner_instruction() {
        let ctx = ctx_with(ix_with_payload());
        let strategy = PoolCreatedStrategy;
        assert!(strategy.can_parse(&ctx));

        match strategy.parse(&ctx).expect("should parse") {
            ParsedEvent::PoolCreated(created) => {
                assert_eq!(created.pool, "Pool9");
                assert_eq!(created.mint, "Mint9");
                assert_eq!(created.initial_reserves.virtual_sol_reserves, 85_000_000_000);
            }
            _ => panic!("expected PoolCreated"),
        }
    }

    #[test]
    fn unrelated_program_is_ignored() {
        let mut ix = ix_with_payload();
        ix.program_id = "SomeOtherProgram".to_string();
        let ctx = ctx_with(ix);
        let strategy = PoolCreatedStrategy;
        assert!(!strategy.can_parse(&ctx));
    }
}
