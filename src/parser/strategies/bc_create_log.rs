//! BC create via event log (spec.md §4.3 "BC create via event log").
//!
//! CreateEvent discriminator → emit a token-discovered side-event carrying
//! the mint, bonding curve, creator, off-chain metadata pointers, and the
//! bonding curve's initial reserve snapshot.

use base64::{engine::general_purpose::STANDARD, Engine};
use borsh::BorshDeserialize;
use solana_sdk::pubkey::Pubkey;

use crate::parser::constants::{BC_CREATE_EVENT_DISCRIMINATOR, DEFAULT_TOKEN_DECIMALS};
use crate::parser::context::ParseContext;
use crate::parser::events::{ParsedEvent, Reserves, TokenDiscovered};

use super::ParseStrategy;

#[derive(BorshDeserialize)]
struct CreateEventPayload {
    name: String,
    symbol: String,
    uri: String,
    mint: Pubkey,
    bonding_curve: Pubkey,
    user: Pubkey,
    #[allow(dead_code)]
    creator: Pubkey,
    #[allow(dead_code)]
    timestamp: i64,
    virtual_token_reserves: u64,
    virtual_sol_reserves: u64,
    real_token_reserves: u64,
    #[allow(dead_code)]
    token_total_supply: u64,
}

pub struct BcCreateLogStrategy;

fn decode(line: &str) -> Option<CreateEventPayload> {
    let data = STANDARD.decode(line).ok()?;
    if data.len() < 8 || data[0..8] != BC_CREATE_EVENT_DISCRIMINATOR {
        return None;
    }
    CreateEventPayload::try_from_slice(&data[8..]).ok()
}

impl ParseStrategy for BcCreateLogStrategy {
    fn name(&self) -> &'static str {
        "bc_create_log"
    }

    fn can_parse(&self, ctx: &ParseContext) -> bool {
        ctx.program_data_logs().any(|line| decode(line).is_some())
    }

    fn parse(&self, ctx: &ParseContext) -> Option<ParsedEvent> {
        let payload = ctx.program_data_logs().find_map(decode)?;

        Some(ParsedEvent::TokenDiscovered(TokenDiscovered {
            mint: payload.mint.to_string(),
            bonding_curve: Some(payload.bonding_curve.to_string()),
            user: payload.user.to_string(),
            name: payload.name,
            symbol: payload.symbol,
            uri: payload.uri,
            decimals: DEFAULT_TOKEN_DECIMALS,
            initial_reserves: Reserves {
                virtual_sol_reserves: payload.virtual_sol_reserves,
                virtual_token_reserves: payload.virtual_token_reserves,
                real_sol_reserves: 0,
                real_token_reserves: payload.real_token_reserves,
            },
            slot: ctx.slot,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn encoded_create_log() -> String {
        let payload = CreateEventPayload {
            name: "Pepe".to_string(),
            symbol: "PEPE".to_string(),
            uri: "ipfs://example".to_string(),
            mint: Pubkey::new_unique(),
            bonding_curve: Pubkey::new_unique(),
            user: Pubkey::new_unique(),
            creator: Pubkey::new_unique(),
            timestamp: Utc::now().timestamp(),
            virtual_token_reserves: 1_073_000_000_000_000,
            virtual_sol_reserves: 30_000_000_000,
            real_token_reserves: 793_100_000_000_000,
            token_total_supply: 1_000_000_000_000_000,
        };
        let mut bytes = BC_CREATE_EVENT_DISCRIMINATOR.to_vec();
        bytes.extend(borsh::to_vec(&payload).unwrap());
        STANDARD.encode(bytes)
    }

    fn ctx_with_log(line: String) -> ParseContext {
        ParseContext {
            signature: "sig-create".to_string(),
            slot: 10,
            block_time: Utc::now(),
            account_keys: vec![],
            log_messages: vec![format!("Program data: {line}")],
            instructions: vec![],
            inner_instructions: vec![],
            pre_token_balances: vec![],
            post_token_balances: vec![],
        }
    }

    #[test]
    fn decodes_create_event_into_token_discovered() {
        let ctx = ctx_with_log(encoded_create_log());
        let strategy = BcCreateLogStrategy;
        assert!(strategy.can_parse(&ctx));

        match strategy.parse(&ctx).expect("should parse") {
            ParsedEvent::TokenDiscovered(discovered) => {
                assert_eq!(discovered.name, "Pepe");
                assert_eq!(discovered.symbol, "PEPE");
                assert_eq!(discovered.initial_reserves.virtual_sol_reserves, 30_000_000_000);
            }
            _ => panic!("expected TokenDiscovered"),
        }
    }
}
