//! AMM trade via instruction discriminator (spec.md §4.3 "AMM trade via
//! instruction discriminator").
//!
//! The buy/sell discriminator itself only tells us direction; the
//! `max_in`/`min_out` fields that follow it are slippage bounds, not the
//! realized trade size, and must never be used as such. Realized amounts are
//! recovered in priority order: inner-instruction transfer tree, then
//! pre/post token balance deltas, then a bounded log heuristic. The first
//! source that yields a usable pair wins; if none do, the trade is dropped.

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::parser::constants::{
    AMM_BUY_DISCRIMINATOR, AMM_HEURISTIC_MAX_SOL, AMM_HEURISTIC_MIN_SOL, AMM_SELL_DISCRIMINATOR,
    PUMP_AMM_PROGRAM_ID, SPL_TOKEN_PROGRAM_ID, SPL_TOKEN_TRANSFER_CHECKED_TAG, WRAPPED_SOL_MINT,
};
use crate::parser::context::{CompiledInstruction, ParseContext};
use crate::parser::events::{AmmAmountSource, AmmTrade, ParsedEvent};

use super::ParseStrategy;

const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

fn matching_ix(ctx: &ParseContext) -> Option<(&CompiledInstruction, bool)> {
    ctx.instructions.iter().find_map(|ix| {
        if ix.program_id != PUMP_AMM_PROGRAM_ID || ix.data.len() < 8 {
            return None;
        }
        let discriminator = &ix.data[0..8];
        if discriminator == AMM_BUY_DISCRIMINATOR {
            Some((ix, true))
        } else if discriminator == AMM_SELL_DISCRIMINATOR {
            Some((ix, false))
        } else {
            None
        }
    })
}

/// Fixed IDL account order for `buy`/`sell`: pool at index 0, user at index
/// 1, base mint at index 3 — the same convention the liquidity and
/// pool-created strategies use.
fn resolve_identity(ix: &CompiledInstruction) -> Option<(String, String, String)> {
    Some((
        ix.accounts.first()?.clone(),
        ix.accounts.get(1)?.clone(),
        ix.accounts.get(3)?.clone(),
    ))
}

/// (a) Inner-instruction transfer tree: an SPL `TransferChecked` instruction
/// carries its mint explicitly in the account list (`[source, mint,
/// destination, authority]`), letting us pick the wrapped-SOL leg and the
/// base-mint leg directly instead of guessing from token-account ownership.
fn extract_via_inner_transfers(ctx: &ParseContext, base_mint: &str) -> Option<(u64, u64)> {
    let mut sol_amount = None;
    let mut token_amount = None;

    for inner in &ctx.inner_instructions {
        if inner.program_id != SPL_TOKEN_PROGRAM_ID || inner.data.is_empty() {
            continue;
        }
        if inner.data[0] != SPL_TOKEN_TRANSFER_CHECKED_TAG || inner.data.len() < 9 {
            continue;
        }
        let mint = inner.accounts.get(1)?;
        let amount = u64::from_le_bytes(inner.data[1..9].try_into().ok()?);

        if mint == WRAPPED_SOL_MINT {
            sol_amount.get_or_insert(amount);
        } else if mint == base_mint {
            token_amount.get_or_insert(amount);
        }
    }

    Some((sol_amount?, token_amount?))
}

/// (b) Pre/post token-balance deltas scoped to the user's associated token
/// accounts — works even when the stream omits inner instructions, as long
/// as it still reports balance snapshots.
fn extract_via_balance_deltas(ctx: &ParseContext, user: &str, base_mint: &str) -> Option<(u64, u64)> {
    let delta_for = |mint: &str| -> Option<u64> {
        let pre = ctx
            .pre_token_balances
            .iter()
            .find(|b| b.owner.as_deref() == Some(user) && b.mint == mint)
            .map(|b| b.ui_amount_raw)
            .unwrap_or(0);
        let post = ctx
            .post_token_balances
            .iter()
            .find(|b| b.owner.as_deref() == Some(user) && b.mint == mint)
            .map(|b| b.ui_amount_raw)?;
        Some(post.abs_diff(pre))
    };

    Some((delta_for(WRAPPED_SOL_MINT)?, delta_for(base_mint)?))
}

/// (c) Heuristic log scan: the AMM sometimes logs a plain `Program log:`
/// line with two little-endian u64s (sol lamports, token raw amount)
/// instead of a typed event. Anything decoding outside the plausible SOL
/// range is almost certainly misaligned bytes, not a tiny/huge real trade,
/// so it's discarded.
fn extract_via_log_heuristic(ctx: &ParseContext) -> Option<(u64, u64)> {
    for line in ctx.program_data_logs() {
        let Ok(bytes) = STANDARD.decode(line) else {
            continue;
        };
        if bytes.len() < 16 {
            continue;
        }
        let sol_amount = u64::from_le_bytes(bytes[0..8].try_into().ok()?);
        let token_amount = u64::from_le_bytes(bytes[8..16].try_into().ok()?);
        let sol = sol_amount as f64 / LAMPORTS_PER_SOL;
        if sol < AMM_HEURISTIC_MIN_SOL || sol > AMM_HEURISTIC_MAX_SOL {
            continue;
        }
        return Some((sol_amount, token_amount));
    }
    None
}

pub struct AmmTradeStrategy;

impl ParseStrategy for AmmTradeStrategy {
    fn name(&self) -> &'static str {
        "amm_trade_ix"
    }

    fn can_parse(&self, ctx: &ParseContext) -> bool {
        matching_ix(ctx).is_some()
    }

    fn parse(&self, ctx: &ParseContext) -> Option<ParsedEvent> {
        let (ix, is_buy) = matching_ix(ctx)?;
        let (pool, user, base_mint) = resolve_identity(ix)?;

        let (sol_amount, token_amount, amount_source) =
            if let Some((sol, token)) = extract_via_inner_transfers(ctx, &base_mint) {
                (sol, token, AmmAmountSource::InnerInstructionTransfers)
            } else if let Some((sol, token)) = extract_via_balance_deltas(ctx, &user, &base_mint) {
                (sol, token, AmmAmountSource::TokenBalanceDeltas)
            } else if let Some((sol, token)) = extract_via_log_heuristic(ctx) {
                (sol, token, AmmAmountSource::LogHeuristic)
            } else {
                return None;
            };

        Some(ParsedEvent::AmmTrade(AmmTrade {
            signature: ctx.signature.clone(),
            slot: ctx.slot,
            block_time: ctx.block_time,
            mint: base_mint,
            pool,
            user,
            is_buy,
            sol_amount,
            token_amount,
            reserves: None,
            amount_source,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::context::{InnerInstruction, TokenBalance};
    use chrono::Utc;

    fn buy_ix(max_quote_amount_in: u64) -> CompiledInstruction {
        let mut data = AMM_BUY_DISCRIMINATOR.to_vec();
        data.extend(max_quote_amount_in.to_le_bytes());
        CompiledInstruction {
            program_id: PUMP_AMM_PROGRAM_ID.to_string(),
            accounts: vec![
                "Pool1".to_string(),
                "User1".to_string(),
                "Authority1".to_string(),
                "Mint1".to_string(),
            ],
            data,
        }
    }

    fn transfer_checked(mint: &str, amount: u64) -> InnerInstruction {
        let mut data = vec![12u8];
        data.extend(amount.to_le_bytes());
        data.push(6);
        InnerInstruction {
            program_id: SPL_TOKEN_PROGRAM_ID.to_string(),
            accounts: vec!["Source".to_string(), mint.to_string(), "Dest".to_string(), "Authority1".to_string()],
            data,
        }
    }

    fn base_ctx() -> ParseContext {
        ParseContext {
            signature: "sig-s3".to_string(),
            slot: 123,
            block_time: Utc::now(),
            account_keys: vec![],
            log_messages: vec![],
            instructions: vec![buy_ix(5_000_000_000_000_000_000)],
            inner_instructions: vec![],
            pre_token_balances: vec![],
            post_token_balances: vec![],
        }
    }

    #[test]
    fn scenario_s3_inner_transfers_override_nonsense_max_in() {
        let mut ctx = base_ctx();
        ctx.inner_instructions = vec![
            transfer_checked(WRAPPED_SOL_MINT, 1_500_000_000),
            transfer_checked("Mint1", 4_200_000_000),
        ];

        let strategy = AmmTradeStrategy;
        assert!(strategy.can_parse(&ctx));
        match strategy.parse(&ctx).expect("should parse") {
            ParsedEvent::AmmTrade(trade) => {
                assert_eq!(trade.sol_amount, 1_500_000_000);
                assert_eq!(trade.token_amount, 4_200_000_000);
                assert_eq!(trade.amount_source, AmmAmountSource::InnerInstructionTransfers);
                assert!(trade.is_buy);
            }
            _ => panic!("expected AmmTrade"),
        }
    }

    #[test]
    fn falls_back_to_balance_deltas_without_inner_instructions() {
        let mut ctx = base_ctx();
        ctx.pre_token_balances = vec![
            TokenBalance { account_index: 0, mint: WRAPPED_SOL_MINT.to_string(), owner: Some("User1".to_string()), ui_amount_raw: 10_000_000_000 },
            TokenBalance { account_index: 1, mint: "Mint1".to_string(), owner: Some("User1".to_string()), ui_amount_raw: 0 },
        ];
        ctx.post_token_balances = vec![
            TokenBalance { account_index: 0, mint: WRAPPED_SOL_MINT.to_string(), owner: Some("User1".to_string()), ui_amount_raw: 8_500_000_000 },
            TokenBalance { account_index: 1, mint: "Mint1".to_string(), owner: Some("User1".to_string()), ui_amount_raw: 4_200_000_000 },
        ];

        let strategy = AmmTradeStrategy;
        match strategy.parse(&ctx).expect("should parse") {
            ParsedEvent::AmmTrade(trade) => {
                assert_eq!(trade.sol_amount, 1_500_000_000);
                assert_eq!(trade.amount_source, AmmAmountSource::TokenBalanceDeltas);
            }
            _ => panic!("expected AmmTrade"),
        }
    }

    #[test]
    fn log_heuristic_rejects_out_of_bounds_amount() {
        let mut ctx = base_ctx();
        let mut bytes = 2_000_000_000_000u64.to_le_bytes().to_vec();
        bytes.extend(1u64.to_le_bytes());
        ctx.log_messages = vec![format!("Program data: {}", STANDARD.encode(bytes))];

        let strategy = AmmTradeStrategy;
        assert!(strategy.parse(&ctx).is_none());
    }

    #[test]
    fn log_heuristic_accepts_in_bounds_amount() {
        let mut ctx = base_ctx();
        let mut bytes = 2_000_000_000u64.to_le_bytes().to_vec();
        bytes.extend(50_000_000u64.to_le_bytes());
        ctx.log_messages = vec![format!("Program data: {}", STANDARD.encode(bytes))];

        let strategy = AmmTradeStrategy;
        match strategy.parse(&ctx).expect("should parse") {
            ParsedEvent::AmmTrade(trade) => {
                assert_eq!(trade.amount_source, AmmAmountSource::LogHeuristic);
                assert_eq!(trade.sol_amount, 2_000_000_000);
            }
            _ => panic!("expected AmmTrade"),
        }
    }

    #[test]
    fn non_amm_instruction_is_ignored() {
        let mut ctx = base_ctx();
        ctx.instructions[0].program_id = "SomeOtherProgram".to_string();
        let strategy = AmmTradeStrategy;
        assert!(!strategy.can_parse(&ctx));
    }
}
