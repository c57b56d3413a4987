//! Wires the Stream Pool's raw messages through the Event Parser and Event
//! Bus into the downstream consumers (Trade Handler, Graduation Tracker,
//! Pool State Store). Two independent tasks: a message router consuming
//! `StreamMessage`s off the Stream Pool's mpsc channel, and an event
//! consumer draining the Event Bus's broadcast channel.
//!
//! Account updates never go through a `ParseStrategy` — the Event Parser's
//! `can_parse`/`parse` contract is transaction-shaped (spec.md §4.3). BC
//! account updates are decoded and routed to the Graduation Tracker here
//! instead.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::graduation::GraduationTracker;
use crate::models::BondingCurveAccount;
use crate::parser::constants::PUMP_BC_PROGRAM_ID;
use crate::parser::context::AccountUpdateContext;
use crate::parser::events::{GraduationReason, ParsedEvent};
use crate::parser::{log_no_strategy_matched, EventParser};
use crate::persistence::PersistenceLayer;
use crate::pool_store::PoolStateStore;
use crate::stream::StreamMessage;
use crate::trade_handler::TradeHandler;

/// Drains raw `StreamMessage`s: transactions go through the Event Parser and
/// are republished on the Event Bus; account updates are handled directly.
/// Applies back-pressure by pausing consumption while the Persistence Layer
/// is above its high watermark (spec.md §4.8: upstream stops accepting new
/// inputs rather than growing the queues unbounded).
pub fn spawn_message_router(
    mut rx: mpsc::Receiver<StreamMessage>,
    parser: Arc<EventParser>,
    bus: crate::event_bus::EventBus,
    graduation: Arc<GraduationTracker>,
    persistence: Arc<PersistenceLayer>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if persistence.is_backpressured() {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(std::time::Duration::from_millis(50)) => continue,
                }
            }

            let message = tokio::select! {
                _ = shutdown.cancelled() => return,
                message = rx.recv() => message,
            };

            let Some(message) = message else { return };

            match message {
                StreamMessage::Transaction(ctx) => match parser.parse(&ctx).await {
                    Some(event) => bus.publish(event),
                    None => log_no_strategy_matched(&ctx),
                },
                StreamMessage::Account(ctx) => {
                    handle_account_update(&ctx, &graduation, &persistence).await;
                }
            }
        }
    })
}

/// Decode a bonding-curve account write and feed it to the Graduation
/// Tracker (spec.md §4.3 "BC account update"). Anything not owned by the
/// pump.fun program, or that fails to decode, is silently dropped.
async fn handle_account_update(
    ctx: &AccountUpdateContext,
    graduation: &GraduationTracker,
    persistence: &PersistenceLayer,
) {
    if ctx.owner != PUMP_BC_PROGRAM_ID {
        return;
    }
    let Some(account) = BondingCurveAccount::decode(&ctx.data) else {
        return;
    };

    if let Some(event) = graduation
        .observe_account_update(&ctx.pubkey, account.complete, account.virtual_sol_reserves, Utc::now())
        .await
    {
        persistence.enqueue_graduation(event);
    }
}

/// Drains the Event Bus and fans each typed event out to its consumer(s).
/// One subscriber per call — spawn once per consumer group, same as the
/// Trade Handler / Graduation Tracker / Pool State Store each running as an
/// independent task off the same parser output (spec.md §2).
pub fn spawn_event_consumer(
    mut rx: broadcast::Receiver<ParsedEvent>,
    trade_handler: Arc<TradeHandler>,
    graduation: Arc<GraduationTracker>,
    pool_store: PoolStateStore,
    persistence: Arc<PersistenceLayer>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => return,
                received = rx.recv() => received,
            };

            let event = match received {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(monitor = "dispatch", skipped, "event consumer lagged, dropped events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return,
            };

            match event {
                ParsedEvent::BcTrade(trade) => {
                    if let Some(bonding_curve) = &trade.bonding_curve {
                        graduation
                            .observe_bc_trade(bonding_curve, &trade.mint, trade.reserves.virtual_sol_reserves)
                            .await;
                    }
                    trade_handler.handle_bc_trade(&trade).await;
                }
                ParsedEvent::AmmTrade(trade) => {
                    trade_handler.handle_amm_trade(&trade).await;
                    if let Some(event) = graduation.observe_amm_trade(&trade.mint, trade.block_time).await {
                        persistence.enqueue_graduation(event);
                    }
                }
                ParsedEvent::TokenDiscovered(discovered) => {
                    if let Some(bonding_curve) = &discovered.bonding_curve {
                        graduation.record_mapping(bonding_curve, &discovered.mint).await;
                    }
                    trade_handler.handle_token_discovered(&discovered).await;
                }
                ParsedEvent::Graduation(graduation_event) => {
                    let mint = match graduation_event.mint {
                        Some(mint) => Some(mint),
                        None => graduation.mint_for_curve(&graduation_event.bonding_curve).await,
                    };
                    if matches!(graduation_event.reason, GraduationReason::CompleteEvent) {
                        if let Some(event) = graduation
                            .observe_complete_event(&graduation_event.bonding_curve, mint.as_deref(), graduation_event.timestamp)
                            .await
                        {
                            persistence.enqueue_graduation(event);
                        }
                    }
                }
                ParsedEvent::BondingCurveProgressUpdate(update) => {
                    debug!(
                        monitor = "dispatch",
                        mint = update.mint,
                        bonding_curve = update.bonding_curve,
                        progress = update.progress,
                        "bonding curve approaching graduation"
                    );
                }
                ParsedEvent::PoolCreated(pool_created) => {
                    let state = crate::models::PoolState {
                        pool_address: pool_created.pool.clone(),
                        slot: pool_created.slot as i64,
                        mint_address: pool_created.mint.clone(),
                        virtual_sol_reserves: pool_created.initial_reserves.virtual_sol_reserves as i64,
                        virtual_token_reserves: pool_created.initial_reserves.virtual_token_reserves as i64,
                        real_sol_reserves: pool_created.initial_reserves.real_sol_reserves as i64,
                        real_token_reserves: pool_created.initial_reserves.real_token_reserves as i64,
                        pool_open: true,
                    };
                    pool_store.upsert(state.clone()).await;
                    persistence.enqueue_pool_state(state);
                }
                ParsedEvent::LiquidityAdd(add) => {
                    debug!(monitor = "dispatch", pool = add.pool, mint = add.mint, "liquidity added");
                }
                ParsedEvent::LiquidityRemove(remove) => {
                    debug!(monitor = "dispatch", pool = remove.pool, mint = remove.mint, "liquidity removed");
                }
            }
        }
    })
}
