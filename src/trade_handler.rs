//! Trade Handler (spec.md §4.6): normalizes parsed trade events, enriches
//! them with the Pricing Core, drops trades below the save threshold for
//! not-yet-seen tokens, upserts the Token row, and routes everything to the
//! Persistence Layer.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::models::{PoolState, Program, Token, Trade, TradeType};
use crate::parser::events::{AmmTrade, BcTrade, TokenDiscovered};
use crate::persistence::PersistenceLayer;
use crate::pool_store::PoolStateStore;
use crate::pricing::{price_amm, price_bonding_curve, ReserveSnapshot};

#[derive(Debug, Clone, Copy)]
pub struct SaveThresholds {
    pub bc_usd: Decimal,
    pub amm_usd: Decimal,
}

impl Default for SaveThresholds {
    fn default() -> Self {
        Self {
            bc_usd: Decimal::from(8_888),
            amm_usd: Decimal::from(1_000),
        }
    }
}

/// Tracks which mints have already been persisted, so the Trade Handler
/// doesn't need a database round-trip to answer "is this the first
/// observation?" on the hot path (spec.md §4.6 step 2: "and the token is not
/// already present").
pub struct TradeHandler {
    persistence: Arc<PersistenceLayer>,
    pool_store: PoolStateStore,
    known_mints: Mutex<HashSet<String>>,
    thresholds: SaveThresholds,
    sol_usd: Mutex<Decimal>,
}

impl TradeHandler {
    pub fn new(
        persistence: Arc<PersistenceLayer>,
        pool_store: PoolStateStore,
        thresholds: SaveThresholds,
    ) -> Self {
        Self {
            persistence,
            pool_store,
            known_mints: Mutex::new(HashSet::new()),
            thresholds,
            sol_usd: Mutex::new(Decimal::ZERO),
        }
    }

    pub async fn update_sol_usd(&self, price: Decimal) {
        *self.sol_usd.lock().await = price;
    }

    async fn current_sol_usd(&self) -> Decimal {
        *self.sol_usd.lock().await
    }

    pub async fn seed_known_mint(&self, mint: &str) {
        self.known_mints.lock().await.insert(mint.to_string());
    }

    pub async fn handle_bc_trade(&self, event: &BcTrade) {
        let sol_usd = self.current_sol_usd().await;
        let snapshot = ReserveSnapshot::new(
            event.reserves.virtual_sol_reserves,
            event.reserves.virtual_token_reserves,
        );
        let pricing = price_bonding_curve(snapshot, sol_usd, None);

        let already_known = self.known_mints.lock().await.contains(&event.mint);
        if !already_known && pricing.market_cap_usd < self.thresholds.bc_usd {
            debug!(
                monitor = "trade_handler",
                mint = event.mint,
                market_cap_usd = %pricing.market_cap_usd,
                "dropped BC trade below save threshold"
            );
            return;
        }

        if !already_known {
            let token = Token::new_discovered(
                event.mint.clone(),
                Program::BondingCurve,
                event.slot as i64,
                None,
                event.bonding_curve.clone(),
            );
            self.known_mints.lock().await.insert(event.mint.clone());
            self.persistence.enqueue_token(token);
            info!(monitor = "trade_handler", mint = event.mint, "token discovered");
        } else {
            self.persistence.enqueue_token(refresh_token(
                &event.mint,
                Program::BondingCurve,
                event.slot as i64,
                event.bonding_curve.clone(),
                &pricing,
                event.reserves,
            ));
        }

        let trade = Trade {
            signature: event.signature.clone(),
            program: Program::BondingCurve,
            mint_address: event.mint.clone(),
            slot: event.slot as i64,
            block_time: event.block_time,
            trade_type: if event.is_buy { TradeType::Buy } else { TradeType::Sell },
            user_address: event.user.clone(),
            sol_amount: event.sol_amount as i64,
            token_amount: event.token_amount as i64,
            price_sol: pricing.price_sol,
            price_usd: pricing.price_usd,
            market_cap_usd: pricing.market_cap_usd,
            volume_usd: trade_volume_usd(event.sol_amount, sol_usd),
            pool_address: event.bonding_curve.clone(),
            virtual_sol_reserves: Some(event.reserves.virtual_sol_reserves as i64),
            virtual_token_reserves: Some(event.reserves.virtual_token_reserves as i64),
            real_sol_reserves: Some(event.reserves.real_sol_reserves as i64),
            real_token_reserves: Some(event.reserves.real_token_reserves as i64),
        };
        self.persistence.enqueue_trade(trade);
    }

    /// A BC create-instruction side event (spec.md §4.3 "emit a
    /// token-discovered side-event"). Unlike a trade, this always persists
    /// the mint's metadata up front — name/symbol/uri are only ever known
    /// from this event, never re-derived from a trade, and the token-store
    /// upsert never overwrites them on conflict once set.
    pub async fn handle_token_discovered(&self, event: &TokenDiscovered) {
        let mut known = self.known_mints.lock().await;
        if known.contains(&event.mint) {
            return;
        }
        known.insert(event.mint.clone());
        drop(known);

        let now = Utc::now();
        self.persistence.enqueue_token(Token {
            mint_address: event.mint.clone(),
            symbol: Some(event.symbol.clone()),
            name: Some(event.name.clone()),
            first_program: Program::BondingCurve,
            current_program: Program::BondingCurve,
            graduated: false,
            graduation_timestamp: None,
            latest_price_sol: None,
            latest_price_usd: None,
            latest_market_cap_usd: None,
            latest_virtual_sol_reserves: Some(event.initial_reserves.virtual_sol_reserves as i64),
            latest_virtual_token_reserves: Some(event.initial_reserves.virtual_token_reserves as i64),
            latest_real_sol_reserves: Some(event.initial_reserves.real_sol_reserves as i64),
            latest_real_token_reserves: Some(event.initial_reserves.real_token_reserves as i64),
            latest_bonding_progress: Some(Decimal::ZERO),
            first_seen_slot: event.slot as i64,
            creator: Some(event.user.clone()),
            bonding_curve_address: event.bonding_curve.clone(),
            archived: false,
            created_at: now,
            updated_at: now,
        });
        info!(monitor = "trade_handler", mint = event.mint, "token discovered via create event");
    }

    pub async fn handle_amm_trade(&self, event: &AmmTrade) {
        let sol_usd = self.current_sol_usd().await;

        // spec.md §4.7: recover reserves from the Pool State Store when the
        // event itself doesn't carry them.
        let reserves = match event.reserves {
            Some(r) => Some(r),
            None => self
                .pool_store
                .get(&event.pool)
                .await
                .map(|state| crate::parser::events::Reserves {
                    virtual_sol_reserves: state.virtual_sol_reserves as u64,
                    virtual_token_reserves: state.virtual_token_reserves as u64,
                    real_sol_reserves: state.real_sol_reserves as u64,
                    real_token_reserves: state.real_token_reserves as u64,
                }),
        };

        let Some(reserves) = reserves else {
            debug!(
                monitor = "trade_handler",
                mint = event.mint,
                pool = event.pool,
                "dropped AMM trade: no reserves available from event or pool store"
            );
            return;
        };

        let snapshot = ReserveSnapshot::new(reserves.virtual_sol_reserves, reserves.virtual_token_reserves);
        // Pool-held token balance stands in for circulating supply in AMM
        // mode (spec.md §4.4); the real token reserves are the best
        // approximation available from a trade event alone.
        let pricing = price_amm(snapshot, sol_usd, reserves.real_token_reserves);

        let already_known = self.known_mints.lock().await.contains(&event.mint);
        if !already_known && pricing.market_cap_usd < self.thresholds.amm_usd {
            debug!(
                monitor = "trade_handler",
                mint = event.mint,
                market_cap_usd = %pricing.market_cap_usd,
                "dropped AMM trade below save threshold"
            );
            return;
        }

        if !already_known {
            let token = Token::new_discovered(
                event.mint.clone(),
                Program::AmmPool,
                event.slot as i64,
                None,
                None,
            );
            self.known_mints.lock().await.insert(event.mint.clone());
            self.persistence.enqueue_token(token);
        } else {
            self.persistence.enqueue_token(refresh_token(
                &event.mint,
                Program::AmmPool,
                event.slot as i64,
                Some(event.pool.clone()),
                &pricing,
                reserves,
            ));
        }

        self.pool_store
            .upsert(PoolState {
                pool_address: event.pool.clone(),
                slot: event.slot as i64,
                mint_address: event.mint.clone(),
                virtual_sol_reserves: reserves.virtual_sol_reserves as i64,
                virtual_token_reserves: reserves.virtual_token_reserves as i64,
                real_sol_reserves: reserves.real_sol_reserves as i64,
                real_token_reserves: reserves.real_token_reserves as i64,
                pool_open: true,
            })
            .await;

        let trade = Trade {
            signature: event.signature.clone(),
            program: Program::AmmPool,
            mint_address: event.mint.clone(),
            slot: event.slot as i64,
            block_time: event.block_time,
            trade_type: if event.is_buy { TradeType::Buy } else { TradeType::Sell },
            user_address: event.user.clone(),
            sol_amount: event.sol_amount as i64,
            token_amount: event.token_amount as i64,
            price_sol: pricing.price_sol,
            price_usd: pricing.price_usd,
            market_cap_usd: pricing.market_cap_usd,
            volume_usd: trade_volume_usd(event.sol_amount, sol_usd),
            pool_address: Some(event.pool.clone()),
            virtual_sol_reserves: Some(reserves.virtual_sol_reserves as i64),
            virtual_token_reserves: Some(reserves.virtual_token_reserves as i64),
            real_sol_reserves: Some(reserves.real_sol_reserves as i64),
            real_token_reserves: Some(reserves.real_token_reserves as i64),
        };
        self.persistence.enqueue_trade(trade);
    }
}

fn trade_volume_usd(sol_amount: u64, sol_usd: Decimal) -> Decimal {
    let sol = Decimal::from(sol_amount) / Decimal::from(1_000_000_000u64);
    (sol * sol_usd).round_dp(4)
}

fn refresh_token(
    mint: &str,
    program: Program,
    slot: i64,
    bonding_curve_address: Option<String>,
    pricing: &crate::pricing::PricingResult,
    reserves: crate::parser::events::Reserves,
) -> Token {
    let now = Utc::now();
    Token {
        mint_address: mint.to_string(),
        symbol: None,
        name: None,
        first_program: program,
        current_program: program,
        graduated: false,
        graduation_timestamp: None,
        latest_price_sol: Some(pricing.price_sol),
        latest_price_usd: Some(pricing.price_usd),
        latest_market_cap_usd: Some(pricing.market_cap_usd),
        latest_virtual_sol_reserves: Some(reserves.virtual_sol_reserves as i64),
        latest_virtual_token_reserves: Some(reserves.virtual_token_reserves as i64),
        latest_real_sol_reserves: Some(reserves.real_sol_reserves as i64),
        latest_real_token_reserves: Some(reserves.real_token_reserves as i64),
        latest_bonding_progress: Some(pricing.progress),
        first_seen_slot: slot,
        creator: None,
        bonding_curve_address,
        archived: false,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::events::Reserves;
    use crate::persistence::sink::InMemorySink;
    use crate::persistence::PersistenceConfig;

    fn bc_trade(mint: &str, virtual_sol: u64, virtual_token: u64) -> BcTrade {
        BcTrade {
            signature: format!("sig-{mint}"),
            slot: 100,
            block_time: Utc::now(),
            mint: mint.to_string(),
            bonding_curve: Some("BC1".to_string()),
            user: "user".to_string(),
            is_buy: true,
            sol_amount: 1_000_000_000,
            token_amount: 30_000_000_000,
            reserves: Reserves {
                virtual_sol_reserves: virtual_sol,
                virtual_token_reserves: virtual_token,
                real_sol_reserves: 0,
                real_token_reserves: 0,
            },
        }
    }

    async fn handler() -> (Arc<TradeHandler>, Arc<InMemorySink>) {
        let sink = Arc::new(InMemorySink::new());
        let persistence = PersistenceLayer::spawn(sink.clone(), PersistenceConfig {
            batch_size: 1,
            ..Default::default()
        });
        let handler = Arc::new(TradeHandler::new(
            persistence,
            PoolStateStore::new(),
            SaveThresholds::default(),
        ));
        handler.update_sol_usd(Decimal::from(180)).await;
        (handler, sink)
    }

    #[tokio::test]
    async fn below_threshold_trade_is_dropped_for_unseen_mint() {
        let (handler, sink) = handler().await;
        // Tiny reserves -> tiny market cap, well under $8,888.
        handler.handle_bc_trade(&bc_trade("Mint1", 1_000, 1_000_000)).await;
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert!(sink.tokens.lock().await.is_empty());
        assert!(sink.trades.lock().await.is_empty());
    }

    #[tokio::test]
    async fn above_threshold_trade_persists_token_and_trade() {
        let (handler, sink) = handler().await;
        // virtual_sol=40e9, virtual_token=700e12 at sol_usd=180 -> market cap
        // ~$10.3k against the default total supply, clearing the $8,888 BC
        // save threshold (S1's own reserves price at ~$7.2k, below it).
        handler
            .handle_bc_trade(&bc_trade("Mint2", 40_000_000_000, 700_000_000_000_000))
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert_eq!(sink.tokens.lock().await.len(), 1);
        assert_eq!(sink.trades.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn once_known_even_small_trades_persist() {
        let (handler, sink) = handler().await;
        handler.seed_known_mint("Mint3").await;
        handler.handle_bc_trade(&bc_trade("Mint3", 1_000, 1_000_000)).await;
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert_eq!(sink.trades.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn token_discovered_persists_metadata_regardless_of_threshold() {
        use crate::parser::events::{Reserves, TokenDiscovered};

        let (handler, sink) = handler().await;
        handler
            .handle_token_discovered(&TokenDiscovered {
                mint: "Mint4".to_string(),
                bonding_curve: Some("BC4".to_string()),
                user: "creator".to_string(),
                name: "Some Coin".to_string(),
                symbol: "SOME".to_string(),
                uri: "ipfs://x".to_string(),
                decimals: 6,
                initial_reserves: Reserves::default(),
                slot: 42,
            })
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        let tokens = sink.tokens.lock().await;
        let token = tokens.get("Mint4").expect("token should be persisted");
        assert_eq!(token.symbol.as_deref(), Some("SOME"));
        assert_eq!(token.name.as_deref(), Some("Some Coin"));
    }

    #[tokio::test]
    async fn token_discovered_is_a_noop_for_an_already_known_mint() {
        use crate::parser::events::{Reserves, TokenDiscovered};

        let (handler, sink) = handler().await;
        handler.seed_known_mint("Mint5").await;
        handler
            .handle_token_discovered(&TokenDiscovered {
                mint: "Mint5".to_string(),
                bonding_curve: Some("BC5".to_string()),
                user: "creator".to_string(),
                name: "Ignored".to_string(),
                symbol: "IGN".to_string(),
                uri: "ipfs://x".to_string(),
                decimals: 6,
                initial_reserves: Reserves::default(),
                slot: 42,
            })
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert!(sink.tokens.lock().await.is_empty());
    }
}
