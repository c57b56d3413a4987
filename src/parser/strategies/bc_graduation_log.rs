//! BC graduation via event log (spec.md §4.3 "BC graduation via event log").
//!
//! CompleteEvent discriminator → emit `Graduation{mint, bonding_curve,
//! timestamp}` with `reason = CompleteEvent`.

use base64::{engine::general_purpose::STANDARD, Engine};
use borsh::BorshDeserialize;
use chrono::{TimeZone, Utc};
use solana_sdk::pubkey::Pubkey;

use crate::parser::constants::BC_COMPLETE_EVENT_DISCRIMINATOR;
use crate::parser::context::ParseContext;
use crate::parser::events::{Graduation, GraduationReason, ParsedEvent};

use super::ParseStrategy;

#[derive(BorshDeserialize)]
struct CompleteEventPayload {
    user: Pubkey,
    mint: Pubkey,
    bonding_curve: Pubkey,
    timestamp: i64,
}

pub struct BcGraduationLogStrategy;

fn decode(line: &str) -> Option<CompleteEventPayload> {
    let data = STANDARD.decode(line).ok()?;
    if data.len() < 8 || data[0..8] != BC_COMPLETE_EVENT_DISCRIMINATOR {
        return None;
    }
    CompleteEventPayload::try_from_slice(&data[8..]).ok()
}

impl ParseStrategy for BcGraduationLogStrategy {
    fn name(&self) -> &'static str {
        "bc_graduation_log"
    }

    fn can_parse(&self, ctx: &ParseContext) -> bool {
        ctx.program_data_logs().any(|line| decode(line).is_some())
    }

    fn parse(&self, ctx: &ParseContext) -> Option<ParsedEvent> {
        let payload = ctx.program_data_logs().find_map(decode)?;
        let _ = payload.user;

        Some(ParsedEvent::Graduation(Graduation {
            mint: Some(payload.mint.to_string()),
            bonding_curve: payload.bonding_curve.to_string(),
            timestamp: Utc
                .timestamp_opt(payload.timestamp, 0)
                .single()
                .unwrap_or(ctx.block_time),
            reason: GraduationReason::CompleteEvent,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded_complete_log() -> String {
        let payload = CompleteEventPayload {
            user: Pubkey::new_unique(),
            mint: Pubkey::new_unique(),
            bonding_curve: Pubkey::new_unique(),
            timestamp: Utc::now().timestamp(),
        };
        let mut bytes = BC_COMPLETE_EVENT_DISCRIMINATOR.to_vec();
        bytes.extend(borsh::to_vec(&payload).unwrap());
        STANDARD.encode(bytes)
    }

    fn ctx_with_log(line: String) -> ParseContext {
        ParseContext {
            signature: "sig-complete".to_string(),
            slot: 99,
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
    fn scenario_s2_complete_event_emits_graduation() {
        let ctx = ctx_with_log(encoded_complete_log());
        let strategy = BcGraduationLogStrategy;
        assert!(strategy.can_parse(&ctx));

        match strategy.parse(&ctx).expect("should parse") {
            ParsedEvent::Graduation(grad) => {
                assert!(grad.mint.is_some());
                assert_eq!(grad.reason, GraduationReason::CompleteEvent);
            }
            _ => panic!("expected Graduation"),
        }
    }
}
