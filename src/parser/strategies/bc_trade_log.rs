//! BC trade via event log (spec.md §4.3 "BC trade via event log").
//!
//! Locates a `Program data: <base64>` log line, decodes it, and if the
//! first 8 bytes match the TradeEvent discriminator, decodes the fixed
//! struct directly into a `BcTrade`.

use base64::{engine::general_purpose::STANDARD, Engine};
use borsh::BorshDeserialize;
use chrono::{TimeZone, Utc};
use solana_sdk::pubkey::Pubkey;

use crate::parser::constants::BC_TRADE_EVENT_DISCRIMINATOR;
use crate::parser::context::ParseContext;
use crate::parser::events::{BcTrade, ParsedEvent, Reserves};

use super::ParseStrategy;

#[derive(BorshDeserialize)]
struct TradeEventPayload {
    mint: Pubkey,
    sol_amount: u64,
    token_amount: u64,
    is_buy: bool,
    user: Pubkey,
    timestamp: i64,
    virtual_sol_reserves: u64,
    virtual_token_reserves: u64,
    real_sol_reserves: u64,
    real_token_reserves: u64,
    fee_recipient: Pubkey,
}

pub struct BcTradeLogStrategy;

fn decode(line: &str) -> Option<TradeEventPayload> {
    let data = STANDARD.decode(line).ok()?;
    if data.len() < 8 || data[0..8] != BC_TRADE_EVENT_DISCRIMINATOR {
        return None;
    }
    TradeEventPayload::try_from_slice(&data[8..]).ok()
}

impl ParseStrategy for BcTradeLogStrategy {
    fn name(&self) -> &'static str {
        "bc_trade_log"
    }

    fn can_parse(&self, ctx: &ParseContext) -> bool {
        ctx.program_data_logs().any(|line| decode(line).is_some())
    }

    fn parse(&self, ctx: &ParseContext) -> Option<ParsedEvent> {
        let payload = ctx.program_data_logs().find_map(decode)?;

        Some(ParsedEvent::BcTrade(BcTrade {
            signature: ctx.signature.clone(),
            slot: ctx.slot,
            block_time: Utc
                .timestamp_opt(payload.timestamp, 0)
                .single()
                .unwrap_or(ctx.block_time),
            mint: payload.mint.to_string(),
            bonding_curve: None,
            user: payload.user.to_string(),
            is_buy: payload.is_buy,
            sol_amount: payload.sol_amount,
            token_amount: payload.token_amount,
            reserves: Reserves {
                virtual_sol_reserves: payload.virtual_sol_reserves,
                virtual_token_reserves: payload.virtual_token_reserves,
                real_sol_reserves: payload.real_sol_reserves,
                real_token_reserves: payload.real_token_reserves,
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn encoded_trade_log(is_buy: bool) -> String {
        let payload = TradeEventPayload {
            mint: Pubkey::new_unique(),
            sol_amount: 1_000_000_000,
            token_amount: 30_000_000_000,
            is_buy,
            user: Pubkey::new_unique(),
            timestamp: Utc::now().timestamp(),
            virtual_sol_reserves: 31_000_000_000,
            virtual_token_reserves: 780_000_000_000_000,
            real_sol_reserves: 1_000_000_000,
            real_token_reserves: 780_000_000_000_000,
            fee_recipient: Pubkey::new_unique(),
        };
        let mut bytes = BC_TRADE_EVENT_DISCRIMINATOR.to_vec();
        bytes.extend(borsh::to_vec(&payload).unwrap());
        STANDARD.encode(bytes)
    }

    fn ctx_with_log(line: String) -> ParseContext {
        ParseContext {
            signature: "sig1".to_string(),
            slot: 42,
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
    fn scenario_s1_decodes_buy() {
        let ctx = ctx_with_log(encoded_trade_log(true));
        let strategy = BcTradeLogStrategy;
        assert!(strategy.can_parse(&ctx));

        let event = strategy.parse(&ctx).expect("should parse");
        match event {
            ParsedEvent::BcTrade(trade) => {
                assert!(trade.is_buy);
                assert_eq!(trade.sol_amount, 1_000_000_000);
                assert_eq!(trade.reserves.virtual_sol_reserves, 31_000_000_000);
            }
            _ => panic!("expected BcTrade"),
        }
    }

    #[test]
    fn wrong_discriminator_is_rejected() {
        let bytes = STANDARD.encode([0u8; 16]);
        let ctx = ctx_with_log(bytes);
        let strategy = BcTradeLogStrategy;
        assert!(!strategy.can_parse(&ctx));
        assert!(strategy.parse(&ctx).is_none());
    }

    #[test]
    fn malformed_base64_is_dropped_not_panicked() {
        let ctx = ctx_with_log("not-valid-base64!!!".to_string());
        let strategy = BcTradeLogStrategy;
        assert!(!strategy.can_parse(&ctx));
    }
}
