//! Persistence Layer (spec.md §4.8): batched writer over four logical
//! queues (tokens, trades, pool_states, graduations). Flush triggers are a
//! batch-size threshold or a timeout, whichever comes first; back-pressure
//! is exposed via `queue_depths()` so the Event Parser can stop accepting new
//! inputs once a queue passes `queue_high_watermark` (spec.md §4.8).

pub mod postgres;
pub mod sink;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::graduation::TokenGraduatedEvent;
use crate::models::{PoolState, Token, Trade};

pub use sink::PersistenceSink;

#[derive(Debug, Clone, Copy)]
pub struct PersistenceConfig {
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
    pub queue_high_watermark: usize,
    pub queue_low_watermark: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_timeout_ms: 2_000,
            queue_high_watermark: 5_000,
            queue_low_watermark: 1_000,
        }
    }
}

/// One of the four logical write queues. Each is an unbounded channel whose
/// occupancy is tracked separately so back-pressure can be reported before
/// tokio's channel itself would ever block a sender.
struct Queue<T> {
    sender: mpsc::UnboundedSender<T>,
    depth: Arc<std::sync::atomic::AtomicUsize>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            depth: self.depth.clone(),
        }
    }
}

impl<T> Queue<T> {
    fn push(&self, item: T) {
        if self.sender.send(item).is_ok() {
            self.depth.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

/// Snapshot of queue occupancy for the operator stats box (spec.md §7).
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueDepths {
    pub tokens: usize,
    pub trades: usize,
    pub pool_states: usize,
    pub graduations: usize,
}

impl QueueDepths {
    pub fn max(&self) -> usize {
        self.tokens
            .max(self.trades)
            .max(self.pool_states)
            .max(self.graduations)
    }
}

pub struct PersistenceLayer {
    tokens: Queue<Token>,
    trades: Queue<Trade>,
    pool_states: Queue<PoolState>,
    graduations: Queue<TokenGraduatedEvent>,
    config: PersistenceConfig,
    backpressure: Arc<AtomicBool>,
}

impl PersistenceLayer {
    /// Spawns the four flush loops against `sink` and returns a handle that
    /// producers use to enqueue writes.
    pub fn spawn(sink: Arc<dyn PersistenceSink>, config: PersistenceConfig) -> Arc<Self> {
        let backpressure = Arc::new(AtomicBool::new(false));

        let (tokens, trades, pool_states, graduations) = (
            spawn_queue(sink.clone(), config, |sink, batch| {
                Box::pin(async move { sink.upsert_tokens(batch).await })
            }),
            spawn_queue(sink.clone(), config, |sink, batch| {
                Box::pin(async move { sink.insert_trades(batch).await })
            }),
            spawn_queue(sink.clone(), config, |sink, batch| {
                Box::pin(async move { sink.insert_pool_states(batch).await })
            }),
            spawn_queue(sink.clone(), config, |sink, batch| {
                Box::pin(async move { sink.record_graduations(batch).await })
            }),
        );

        Arc::new(Self {
            tokens,
            trades,
            pool_states,
            graduations,
            config,
            backpressure,
        })
    }

    pub fn enqueue_token(&self, token: Token) {
        self.tokens.push(token);
        self.recompute_backpressure();
    }

    pub fn enqueue_trade(&self, trade: Trade) {
        self.trades.push(trade);
        self.recompute_backpressure();
    }

    pub fn enqueue_pool_state(&self, state: PoolState) {
        self.pool_states.push(state);
        self.recompute_backpressure();
    }

    pub fn enqueue_graduation(&self, event: TokenGraduatedEvent) {
        self.graduations.push(event);
        self.recompute_backpressure();
    }

    pub fn queue_depths(&self) -> QueueDepths {
        QueueDepths {
            tokens: self.tokens.depth(),
            trades: self.trades.depth(),
            pool_states: self.pool_states.depth(),
            graduations: self.graduations.depth(),
        }
    }

    /// True once any queue has crossed `queue_high_watermark`; stays true
    /// until every queue has drained below `queue_low_watermark` (spec.md
    /// §4.8 hysteresis band, preventing flap at the boundary).
    pub fn is_backpressured(&self) -> bool {
        self.backpressure.load(Ordering::SeqCst)
    }

    fn recompute_backpressure(&self) {
        let depths = self.queue_depths();
        if depths.max() >= self.config.queue_high_watermark {
            if !self.backpressure.swap(true, Ordering::SeqCst) {
                warn!(monitor = "persistence", "queue high watermark crossed, applying back-pressure");
            }
        } else if depths.max() <= self.config.queue_low_watermark
            && self.backpressure.swap(false, Ordering::SeqCst)
        {
            info!(monitor = "persistence", "queue below low watermark, back-pressure released");
        }
    }
}

type FlushFn<T> = Box<
    dyn Fn(Arc<dyn PersistenceSink>, Vec<T>) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>>
        + Send
        + Sync,
>;

fn spawn_queue<T, F>(
    sink: Arc<dyn PersistenceSink>,
    config: PersistenceConfig,
    flush: F,
) -> Queue<T>
where
    T: Send + 'static,
    F: Fn(Arc<dyn PersistenceSink>, Vec<T>) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>>
        + Send
        + Sync
        + 'static,
{
    let (sender, mut receiver) = mpsc::unbounded_channel::<T>();
    let depth = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let depth_task = depth.clone();
    let flush: FlushFn<T> = Box::new(flush);

    tokio::spawn(async move {
        let mut batch = Vec::with_capacity(config.batch_size);
        let timeout = Duration::from_millis(config.batch_timeout_ms);

        loop {
            let deadline = tokio::time::sleep(timeout);
            tokio::pin!(deadline);

            tokio::select! {
                item = receiver.recv() => {
                    match item {
                        Some(item) => {
                            batch.push(item);
                            if batch.len() >= config.batch_size {
                                flush_batch(&flush, &sink, &mut batch, &depth_task).await;
                            }
                        }
                        None => {
                            if !batch.is_empty() {
                                flush_batch(&flush, &sink, &mut batch, &depth_task).await;
                            }
                            break;
                        }
                    }
                }
                _ = &mut deadline => {
                    if !batch.is_empty() {
                        flush_batch(&flush, &sink, &mut batch, &depth_task).await;
                    }
                }
            }
        }
    });

    Queue { sender, depth }
}

async fn flush_batch<T>(
    flush: &FlushFn<T>,
    sink: &Arc<dyn PersistenceSink>,
    batch: &mut Vec<T>,
    depth: &Arc<std::sync::atomic::AtomicUsize>,
) {
    let taken = std::mem::take(batch);
    let count = taken.len();
    if let Err(err) = flush(sink.clone(), taken).await {
        warn!(monitor = "persistence", error_kind = "flush_failed", "{err}");
    } else {
        debug!(monitor = "persistence", count, "flushed batch");
    }
    depth.fetch_sub(count, Ordering::SeqCst);
}

/// Drains all four queues within `grace` (spec.md §5 "shutdown_grace_ms").
/// Best-effort: any items still queued after the deadline are dropped,
/// relying on idempotent upserts to pick them back up after restart via the
/// resumed stream.
pub async fn drain_with_grace(layer: &Arc<PersistenceLayer>, grace: Duration) {
    let start = tokio::time::Instant::now();
    while layer.queue_depths().max() > 0 && start.elapsed() < grace {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Program;
    use chrono::Utc;

    #[tokio::test]
    async fn batch_flushes_on_size_threshold() {
        let sink = Arc::new(sink::InMemorySink::new());
        let layer = PersistenceLayer::spawn(
            sink.clone(),
            PersistenceConfig {
                batch_size: 2,
                batch_timeout_ms: 60_000,
                ..Default::default()
            },
        );

        for i in 0..2 {
            layer.enqueue_token(Token::new_discovered(
                format!("Mint{i}"),
                Program::BondingCurve,
                1,
                None,
                None,
            ));
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sink.tokens.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn batch_flushes_on_timeout() {
        let sink = Arc::new(sink::InMemorySink::new());
        let layer = PersistenceLayer::spawn(
            sink.clone(),
            PersistenceConfig {
                batch_size: 1_000,
                batch_timeout_ms: 50,
                ..Default::default()
            },
        );

        layer.enqueue_token(Token::new_discovered(
            "Mint1".to_string(),
            Program::BondingCurve,
            1,
            None,
            None,
        ));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(sink.tokens.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn backpressure_engages_and_releases_with_hysteresis() {
        let sink = Arc::new(sink::InMemorySink::new());
        let layer = PersistenceLayer::spawn(
            sink.clone(),
            PersistenceConfig {
                batch_size: 10_000,
                batch_timeout_ms: 60_000,
                queue_high_watermark: 3,
                queue_low_watermark: 1,
            },
        );

        for i in 0..3 {
            layer.enqueue_trade(Trade {
                signature: format!("sig{i}"),
                program: Program::BondingCurve,
                mint_address: "Mint1".to_string(),
                slot: 1,
                block_time: Utc::now(),
                trade_type: crate::models::TradeType::Buy,
                user_address: "user".to_string(),
                sol_amount: 1,
                token_amount: 1,
                price_sol: Default::default(),
                price_usd: Default::default(),
                market_cap_usd: Default::default(),
                volume_usd: Default::default(),
                pool_address: None,
                virtual_sol_reserves: None,
                virtual_token_reserves: None,
                real_sol_reserves: None,
                real_token_reserves: None,
            });
        }

        assert!(layer.is_backpressured());
    }
}
