//! Checkpoint / recovery: periodically snapshots each connection's resume
//! slot plus the BC↔mint mapping and graduated-mint set, and rehydrates
//! both at startup so a restart doesn't replay history it has already
//! reconciled.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::graduation::GraduationTracker;
use crate::models::checkpoint::SubscriptionCheckpoint;
use crate::stream::StreamPool;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save_checkpoints(&self, checkpoints: &[SubscriptionCheckpoint]) -> anyhow::Result<()>;
    async fn load_checkpoints(&self) -> anyhow::Result<Vec<SubscriptionCheckpoint>>;
    async fn load_bc_mappings(&self) -> anyhow::Result<Vec<(String, String)>>;
    async fn load_graduated_mints(&self) -> anyhow::Result<HashSet<String>>;
}

pub struct PostgresCheckpointStore {
    pool: PgPool,
}

impl PostgresCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointStore for PostgresCheckpointStore {
    async fn save_checkpoints(&self, checkpoints: &[SubscriptionCheckpoint]) -> anyhow::Result<()> {
        if checkpoints.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for checkpoint in checkpoints {
            sqlx::query(
                r#"
                INSERT INTO subscription_checkpoints (connection_id, last_processed_slot, retry_count, updated_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (connection_id) DO UPDATE SET
                    last_processed_slot = EXCLUDED.last_processed_slot,
                    retry_count = EXCLUDED.retry_count,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(&checkpoint.connection_id)
            .bind(checkpoint.last_processed_slot)
            .bind(checkpoint.retry_count as i32)
            .bind(checkpoint.updated_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn load_checkpoints(&self) -> anyhow::Result<Vec<SubscriptionCheckpoint>> {
        let rows: Vec<(String, i64, i32, chrono::DateTime<chrono::Utc>)> = sqlx::query_as(
            "SELECT connection_id, last_processed_slot, retry_count, updated_at FROM subscription_checkpoints",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(connection_id, last_processed_slot, retry_count, updated_at)| SubscriptionCheckpoint {
                connection_id,
                last_processed_slot,
                retry_count: retry_count as u32,
                updated_at,
            })
            .collect())
    }

    async fn load_bc_mappings(&self) -> anyhow::Result<Vec<(String, String)>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT bonding_curve_address, mint_address FROM bonding_curve_mappings")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    async fn load_graduated_mints(&self) -> anyhow::Result<HashSet<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT mint_address FROM tokens WHERE graduated")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(mint,)| mint).collect())
    }
}

/// Restores the BC↔mint mapping and confirmed graduations into `tracker`,
/// then seeds `stream_pool`'s per-connection resume slots from the last
/// saved checkpoints. Call once at startup, before spawning readers.
pub async fn restore(
    store: &dyn CheckpointStore,
    tracker: &GraduationTracker,
    stream_pool: &StreamPool,
) -> anyhow::Result<()> {
    let mappings = store.load_bc_mappings().await?;
    let graduated = store.load_graduated_mints().await?;
    let mapping_count = mappings.len();
    let graduated_count = graduated.len();
    tracker.rehydrate(mappings, graduated).await;

    let checkpoints = store.load_checkpoints().await?;
    let checkpoint_count = checkpoints.len();
    stream_pool.seed_from_checkpoints(&checkpoints);

    info!(
        monitor = "checkpoint",
        mappings = mapping_count,
        graduated = graduated_count,
        checkpoints = checkpoint_count,
        "restored checkpoint state"
    );
    Ok(())
}

/// Periodically snapshots `stream_pool`'s resume slots and persists them.
/// Saves once more on cancellation so the final slots before shutdown are
/// not lost to the next restart.
pub fn spawn_checkpoint_loop(
    store: Arc<dyn CheckpointStore>,
    stream_pool: Arc<StreamPool>,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let checkpoints = stream_pool.connection_checkpoints();
                    if let Err(err) = store.save_checkpoints(&checkpoints).await {
                        warn!(monitor = "checkpoint", error_kind = "save_failed", "{err}");
                    }
                    return;
                }
                _ = tokio::time::sleep(interval) => {
                    let checkpoints = stream_pool.connection_checkpoints();
                    match store.save_checkpoints(&checkpoints).await {
                        Ok(()) => debug!(monitor = "checkpoint", count = checkpoints.len(), "saved checkpoints"),
                        Err(err) => warn!(monitor = "checkpoint", error_kind = "save_failed", "{err}"),
                    }
                }
            }
        }
    })
}
