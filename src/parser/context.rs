//! `ParseContext` — the normalized view of a raw stream message that every
//! strategy is probed against (spec.md §4.3).

use chrono::{DateTime, Utc};

/// A single inner instruction: program id plus instruction data, flattened
/// out of the (possibly nested) CPI tree the stream delivers.
#[derive(Debug, Clone)]
pub struct InnerInstruction {
    pub program_id: String,
    pub accounts: Vec<String>,
    pub data: Vec<u8>,
}

/// A compiled top-level instruction.
#[derive(Debug, Clone)]
pub struct CompiledInstruction {
    pub program_id: String,
    pub accounts: Vec<String>,
    pub data: Vec<u8>,
}

/// A pre/post token balance entry, scoped to one account index.
#[derive(Debug, Clone)]
pub struct TokenBalance {
    pub account_index: u8,
    pub mint: String,
    pub owner: Option<String>,
    pub ui_amount_raw: u64,
}

/// Everything the Event Parser needs, already flattened out of whatever
/// transport envelope the Stream Pool delivered. Built once per message by
/// the Subscription Router / connection reader, then probed against every
/// strategy in priority order.
#[derive(Debug, Clone)]
pub struct ParseContext {
    pub signature: String,
    pub slot: u64,
    pub block_time: DateTime<Utc>,
    pub account_keys: Vec<String>,
    pub log_messages: Vec<String>,
    pub instructions: Vec<CompiledInstruction>,
    pub inner_instructions: Vec<InnerInstruction>,
    pub pre_token_balances: Vec<TokenBalance>,
    pub post_token_balances: Vec<TokenBalance>,
}

impl ParseContext {
    /// Extract every base64 payload following a `Program data: ` log line,
    /// in emission order.
    pub fn program_data_logs(&self) -> impl Iterator<Item = &str> {
        self.log_messages
            .iter()
            .filter_map(|line| line.strip_prefix("Program data: "))
    }
}

/// A standalone account-update notification — not associated with any one
/// transaction, delivered whenever the stream reports a write to a watched
/// account (spec.md §4.3 "BC account update").
#[derive(Debug, Clone)]
pub struct AccountUpdateContext {
    pub pubkey: String,
    pub owner: String,
    pub slot: u64,
    pub data: Vec<u8>,
}
