//! Converts Yellowstone geyser proto messages into the normalized
//! `ParseContext`/`AccountUpdateContext` shapes the Event Parser consumes
//! (spec.md §4.3 "a normalized `ParseContext`").
//!
//! Conversion is defensive: any message missing a field this pipeline
//! relies on is dropped rather than panicking, matching the "malformed wire
//! data → drop" policy in spec.md §7.

use chrono::{DateTime, Utc};
use yellowstone_grpc_proto::geyser::{SubscribeUpdateAccount, SubscribeUpdateTransaction};

use crate::parser::context::{AccountUpdateContext, CompiledInstruction, InnerInstruction, ParseContext, TokenBalance};

fn account_keys_base58(keys: &[Vec<u8>]) -> Vec<String> {
    keys.iter().map(|k| bs58::encode(k).into_string()).collect()
}

fn convert_token_balance(tb: &yellowstone_grpc_proto::solana::storage::confirmed_block::TokenBalance) -> Option<TokenBalance> {
    let ui = tb.ui_token_amount.as_ref()?;
    let raw = ui.amount.parse::<u64>().ok()?;
    Some(TokenBalance {
        account_index: tb.account_index as u8,
        mint: tb.mint.clone(),
        owner: (!tb.owner.is_empty()).then(|| tb.owner.clone()),
        ui_amount_raw: raw,
    })
}

/// `received_at` is the local receipt time used as a stand-in for
/// transaction block_time, which the transaction-update message itself
/// doesn't carry (only `SubscribeUpdateBlockMeta` does). Acceptable per
/// spec.md §1's "eventual consistency within a few seconds" tolerance.
pub fn parse_context_from_transaction(
    update: &SubscribeUpdateTransaction,
    received_at: DateTime<Utc>,
) -> Option<ParseContext> {
    let info = update.transaction.as_ref()?;
    let tx = info.transaction.as_ref()?;
    let message = tx.message.as_ref()?;
    let meta = info.meta.as_ref()?;

    let account_keys = account_keys_base58(&message.account_keys);
    let signature = bs58::encode(&info.signature).into_string();

    let instructions = message
        .instructions
        .iter()
        .filter_map(|ix| {
            let program_id = account_keys.get(ix.program_id_index as usize)?.clone();
            let accounts = ix
                .accounts
                .iter()
                .filter_map(|&idx| account_keys.get(idx as usize).cloned())
                .collect();
            Some(CompiledInstruction {
                program_id,
                accounts,
                data: ix.data.clone(),
            })
        })
        .collect();

    let inner_instructions = meta
        .inner_instructions
        .iter()
        .flat_map(|group| {
            let account_keys = &account_keys;
            group.instructions.iter().filter_map(move |ix| {
                let program_id = account_keys.get(ix.program_id_index as usize)?.clone();
                let accounts = ix
                    .accounts
                    .iter()
                    .filter_map(|&idx| account_keys.get(idx as usize).cloned())
                    .collect();
                Some(InnerInstruction {
                    program_id,
                    accounts,
                    data: ix.data.clone(),
                })
            })
        })
        .collect();

    let pre_token_balances = meta.pre_token_balances.iter().filter_map(convert_token_balance).collect();
    let post_token_balances = meta.post_token_balances.iter().filter_map(convert_token_balance).collect();

    Some(ParseContext {
        signature,
        slot: update.slot,
        block_time: received_at,
        account_keys,
        log_messages: meta.log_messages.clone(),
        instructions,
        inner_instructions,
        pre_token_balances,
        post_token_balances,
    })
}

pub fn account_update_context(update: &SubscribeUpdateAccount) -> Option<AccountUpdateContext> {
    let account = update.account.as_ref()?;
    Some(AccountUpdateContext {
        pubkey: bs58::encode(&account.pubkey).into_string(),
        owner: bs58::encode(&account.owner).into_string(),
        slot: update.slot,
        data: account.data.clone(),
    })
}
