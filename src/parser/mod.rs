//! Event Parser (spec.md §4.3): dispatches each normalized message through
//! an ordered list of strategies until one recognizes it.

pub mod constants;
pub mod context;
pub mod events;
pub mod strategies;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use context::ParseContext;
use events::ParsedEvent;
use strategies::{default_strategies, ParseStrategy};

/// Per-strategy attempt/success counters, surfaced in the operator stats box
/// (spec.md §4.3: "publishes `parser:success` with the winning strategy for
/// observability").
#[derive(Debug, Default)]
struct StrategyCounters {
    attempts: AtomicU64,
    successes: AtomicU64,
}

pub struct EventParser {
    strategies: Vec<Box<dyn ParseStrategy>>,
    counters: RwLock<HashMap<&'static str, Arc<StrategyCounters>>>,
}

impl EventParser {
    pub fn new() -> Self {
        Self::with_strategies(default_strategies())
    }

    pub fn with_strategies(strategies: Vec<Box<dyn ParseStrategy>>) -> Self {
        Self {
            strategies,
            counters: RwLock::new(HashMap::new()),
        }
    }

    async fn counters_for(&self, name: &'static str) -> Arc<StrategyCounters> {
        if let Some(counters) = self.counters.read().await.get(name) {
            return counters.clone();
        }
        let mut guard = self.counters.write().await;
        guard
            .entry(name)
            .or_insert_with(|| Arc::new(StrategyCounters::default()))
            .clone()
    }

    /// Probe every strategy in priority order (spec.md §4.3: "event-log
    /// strategies > IDL-instruction strategies > inner-instruction
    /// inference > heuristic fallback"). The first success wins; no
    /// consensus is attempted across strategies that could also match.
    pub async fn parse(&self, ctx: &ParseContext) -> Option<ParsedEvent> {
        for strategy in &self.strategies {
            if !strategy.can_parse(ctx) {
                continue;
            }
            let counters = self.counters_for(strategy.name()).await;
            counters.attempts.fetch_add(1, Ordering::Relaxed);

            match strategy.parse(ctx) {
                Some(event) => {
                    counters.successes.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        monitor = "parser",
                        strategy = strategy.name(),
                        signature = ctx.signature,
                        "parser:success"
                    );
                    return Some(event);
                }
                None => {
                    debug!(
                        monitor = "parser",
                        strategy = strategy.name(),
                        signature = ctx.signature,
                        "strategy declined after can_parse matched"
                    );
                }
            }
        }
        None
    }

    /// Snapshot of attempt/success counts per strategy name, for the
    /// periodic stats box.
    pub async fn strategy_stats(&self) -> Vec<(&'static str, u64, u64)> {
        let guard = self.counters.read().await;
        guard
            .iter()
            .map(|(name, counters)| {
                (
                    *name,
                    counters.attempts.load(Ordering::Relaxed),
                    counters.successes.load(Ordering::Relaxed),
                )
            })
            .collect()
    }
}

impl Default for EventParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Logged when every strategy declines a message — not an error, just a
/// message type outside the closed set this parser understands (spec.md
/// §4.3 error policy).
pub fn log_no_strategy_matched(ctx: &ParseContext) {
    warn!(
        monitor = "parser",
        signature = ctx.signature,
        "no strategy recognized this message"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use context::ParseContext;
    use chrono::Utc;

    fn empty_ctx() -> ParseContext {
        ParseContext {
            signature: "sig".to_string(),
            slot: 1,
            block_time: Utc::now(),
            account_keys: vec![],
            log_messages: vec![],
            instructions: vec![],
            inner_instructions: vec![],
            pre_token_balances: vec![],
            post_token_balances: vec![],
        }
    }

    #[tokio::test]
    async fn unrecognized_message_returns_none_without_panic() {
        let parser = EventParser::new();
        assert!(parser.parse(&empty_ctx()).await.is_none());
    }

    #[tokio::test]
    async fn strategy_stats_starts_empty() {
        let parser = EventParser::new();
        assert!(parser.strategy_stats().await.is_empty());
    }
}
