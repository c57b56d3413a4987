use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenv::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod checkpoint;
mod config;
mod dispatch;
mod error;
mod event_bus;
mod external;
mod graduation;
mod models;
mod parser;
mod persistence;
mod pool_store;
mod pricing;
mod stream;
mod trade_handler;

use checkpoint::{spawn_checkpoint_loop, PostgresCheckpointStore};
use config::Config;
use dispatch::{spawn_event_consumer, spawn_message_router};
use event_bus::EventBus;
use external::{HttpMetadataEnricher, HttpSolPriceSource};
use graduation::GraduationTracker;
use parser::EventParser;
use persistence::postgres::PostgresSink;
use persistence::{drain_with_grace, PersistenceConfig, PersistenceLayer};
use pool_store::PoolStateStore;
use stream::router::{ConnectionLoadSample, PriorityBand, SubscriptionRouter};
use stream::StreamPool;
use trade_handler::{SaveThresholds, TradeHandler};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    dotenv().ok();

    let config = Arc::new(Config::load().context("failed to load configuration")?);
    info!(monitor = "startup", "configuration loaded");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;
    info!(monitor = "startup", "database pool established");

    let sink = Arc::new(PostgresSink::new(pool.clone()));
    let persistence = PersistenceLayer::spawn(
        sink,
        PersistenceConfig {
            batch_size: config.batch_size,
            batch_timeout_ms: config.batch_timeout_ms,
            queue_high_watermark: config.queue_high_watermark,
            queue_low_watermark: config.queue_low_watermark,
        },
    );

    let graduation = Arc::new(GraduationTracker::new());
    let pool_store = PoolStateStore::new();
    let stream_pool = Arc::new(StreamPool::new(&config));

    let checkpoint_store: Arc<dyn checkpoint::CheckpointStore> =
        Arc::new(PostgresCheckpointStore::new(pool.clone()));
    checkpoint::restore(checkpoint_store.as_ref(), &graduation, &stream_pool)
        .await
        .context("failed to restore checkpoint state")?;

    let thresholds = SaveThresholds {
        bc_usd: rust_decimal::Decimal::try_from(config.bc_save_threshold_usd)
            .context("invalid BC_SAVE_THRESHOLD_USD")?,
        amm_usd: rust_decimal::Decimal::try_from(config.amm_save_threshold_usd)
            .context("invalid AMM_SAVE_THRESHOLD_USD")?,
    };
    let trade_handler = Arc::new(TradeHandler::new(persistence.clone(), pool_store.clone(), thresholds));

    let sol_price_source: Arc<dyn external::SolPriceSource> = Arc::new(HttpSolPriceSource::new(
        config.sol_price_url.clone(),
        Duration::from_millis(config.metadata_fetch_timeout_ms),
    ));
    let sol_price_cache = Arc::new(external::price::SolPriceCache::default());
    let metadata_enricher: Arc<dyn external::MetadataEnricher> = Arc::new(HttpMetadataEnricher::new(
        config.metadata_rpc_url.clone(),
        Duration::from_millis(config.metadata_fetch_timeout_ms),
    ));
    let _ = metadata_enricher; // reserved for on-demand backfill; discovery events already carry name/symbol.

    let event_parser = Arc::new(EventParser::new());
    let event_bus = EventBus::new();

    let shutdown = CancellationToken::new();
    let (message_tx, message_rx) = mpsc::channel(4096);

    let mut tasks = stream_pool.spawn(config.clone(), message_tx, shutdown.clone());

    tasks.push(spawn_message_router(
        message_rx,
        event_parser.clone(),
        event_bus.clone(),
        graduation.clone(),
        persistence.clone(),
        shutdown.clone(),
    ));

    tasks.push(spawn_event_consumer(
        event_bus.subscribe(),
        trade_handler.clone(),
        graduation.clone(),
        pool_store.clone(),
        persistence.clone(),
        shutdown.clone(),
    ));

    tasks.push(external::price::spawn_refresh_loop(
        sol_price_source,
        sol_price_cache,
        trade_handler.clone(),
        Duration::from_millis(config.sol_price_refresh_ms),
        shutdown.clone(),
    ));

    tasks.push(spawn_checkpoint_loop(
        checkpoint_store,
        stream_pool.clone(),
        Duration::from_millis(config.checkpoint_interval_ms),
        shutdown.clone(),
    ));

    tasks.push(spawn_stats_loop(
        event_parser.clone(),
        persistence.clone(),
        stream_pool.clone(),
        Arc::new(SubscriptionRouter::new()),
        Duration::from_secs(config.stats_interval_secs),
        shutdown.clone(),
    ));

    let watchdog = spawn_pool_watchdog(
        stream_pool.clone(),
        config.pool_min_connections,
        Duration::from_secs(config.max_down_interval_secs),
        shutdown.clone(),
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!(monitor = "shutdown", "ctrl-c received, shutting down gracefully");
        }
        result = watchdog => {
            if let Ok(Some(exit_code)) = result {
                shutdown.cancel();
                for task in tasks {
                    let _ = task.await;
                }
                warn!(monitor = "shutdown", exit_code, "exiting due to stream pool collapse");
                std::process::exit(exit_code);
            }
        }
    }

    shutdown.cancel();
    for task in tasks {
        let _ = task.await;
    }

    drain_with_grace(&persistence, Duration::from_millis(config.shutdown_grace_ms)).await;
    info!(monitor = "shutdown", "drained persistence queues, exiting cleanly");
    Ok(())
}

/// Periodically logs a consolidated operator view: per-strategy parse
/// counts, queue depths, and per-connection health (spec.md §7). Also
/// drives the Subscription Router's assignment/rebalance off the same
/// sample so the router has a real caller rather than sitting unused.
fn spawn_stats_loop(
    parser: Arc<EventParser>,
    persistence: Arc<PersistenceLayer>,
    stream_pool: Arc<StreamPool>,
    router: Arc<SubscriptionRouter>,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }

            let stats = parser.strategy_stats().await;
            let depths = persistence.queue_depths();
            let health = stream_pool.connection_health().await;

            info!(
                monitor = "stats",
                strategies = ?stats,
                tokens_queued = depths.tokens,
                trades_queued = depths.trades,
                pool_states_queued = depths.pool_states,
                graduations_queued = depths.graduations,
                backpressured = persistence.is_backpressured(),
                connections = health.len(),
                "periodic stats"
            );

            let samples: Vec<ConnectionLoadSample> = health
                .iter()
                .enumerate()
                .map(|(id, h)| ConnectionLoadSample {
                    connection_id: id,
                    tps_normalized: (h.trailing_tps / 50.0).min(1.0),
                    parse_rate: h.parse_rate,
                })
                .collect();

            if !samples.is_empty() {
                for band in [PriorityBand::High, PriorityBand::Medium, PriorityBand::Low] {
                    if router.current_assignment(band).await.is_none() {
                        router.assign(band, &samples).await;
                    } else {
                        router.rebalance(band, &samples).await;
                    }
                }
            }
        }
    })
}

/// Watches for total stream-pool collapse (exit code 2: "unrecoverable
/// stream-pool collapse"). Returns `Some(2)` once fewer than
/// `min_connections` have been healthy continuously for `max_down`.
fn spawn_pool_watchdog(
    stream_pool: Arc<StreamPool>,
    min_connections: usize,
    max_down: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<Option<i32>> {
    tokio::spawn(async move {
        let mut unhealthy_since: Option<tokio::time::Instant> = None;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = tokio::time::sleep(Duration::from_secs(5)) => {}
            }

            let health = stream_pool.connection_health().await;
            let healthy = stream_pool.healthy_connection_count(&health);

            if healthy < min_connections {
                let since = *unhealthy_since.get_or_insert_with(tokio::time::Instant::now);
                if since.elapsed() >= max_down {
                    error!(
                        monitor = "watchdog",
                        healthy,
                        min_connections,
                        "stream pool unrecoverable: below minimum healthy connections past max_down_interval"
                    );
                    return Some(2);
                }
            } else {
                unhealthy_since = None;
            }
        }
    })
}
