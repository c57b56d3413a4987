//! Stream Pool (spec.md §4.1): maintains a small set of long-lived gRPC
//! subscriptions to a Yellowstone/Shyft-compatible Geyser stream, each with
//! its own lifecycle state, circuit breaker, and resume-from-slot
//! bookkeeping, behind a single pool-wide rate limiter.
//!
//! Grounded on the connect/subscribe/stream pattern in
//! `examples/other_examples/c2646bc0_*grpc_stream.rs` and the
//! owner-filtered account subscription in
//! `examples/other_examples/781080b5_*monitor_account.rs`.

pub mod circuit_breaker;
pub mod connection;
pub mod convert;
pub mod rate_limiter;
pub mod router;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::transport::ClientTlsConfig;
use tracing::{debug, error, info, warn};
use yellowstone_grpc_client::GeyserGrpcClient;
use yellowstone_grpc_proto::geyser::{
    subscribe_update::UpdateOneof, CommitmentLevel, SubscribeRequest, SubscribeRequestFilterAccounts,
    SubscribeRequestFilterTransactions, SubscribeRequestPing,
};

use crate::config::Config;
use crate::models::checkpoint::SubscriptionCheckpoint;
use crate::parser::constants::{PUMP_AMM_PROGRAM_ID, PUMP_BC_PROGRAM_ID};
use crate::parser::context::{AccountUpdateContext, ParseContext};

use connection::{Connection, ConnectionHealth};
use rate_limiter::RateLimiter;
pub use router::{ConnectionLoadSample, PriorityBand, SubscriptionRouter};

/// Inbound messages handed to the Subscription Router / Event Parser stage.
pub enum StreamMessage {
    Transaction(ParseContext),
    Account(AccountUpdateContext),
}

pub struct StreamPool {
    connections: Vec<Arc<Connection>>,
    rate_limiter: Arc<RateLimiter>,
}

impl StreamPool {
    pub fn new(config: &Config) -> Self {
        let connections = (0..config.pool_max_connections)
            .map(|id| {
                Arc::new(Connection::new(
                    id,
                    config.cb_failure_threshold,
                    Duration::from_millis(config.cb_recovery_timeout_ms),
                    config.max_retry_with_last_slot,
                ))
            })
            .collect();

        Self {
            connections,
            rate_limiter: Arc::new(RateLimiter::new(
                Duration::from_millis(config.rate_limit_window_ms),
                config.max_subscriptions_per_window,
            )),
        }
    }

    /// Spawns one reader task per connection; returns immediately. Each
    /// task owns its reconnect loop and forwards decoded messages on
    /// `message_tx` until `shutdown` is cancelled.
    pub fn spawn(
        &self,
        config: Arc<Config>,
        message_tx: mpsc::Sender<StreamMessage>,
        shutdown: CancellationToken,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        let mut tasks: Vec<tokio::task::JoinHandle<()>> = self
            .connections
            .iter()
            .cloned()
            .map(|conn| {
                let config = config.clone();
                let limiter = self.rate_limiter.clone();
                let message_tx = message_tx.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { run_connection(conn, limiter, config, message_tx, shutdown).await })
            })
            .collect();

        tasks.extend(self.connections.iter().cloned().map(|conn| {
            let interval = Duration::from_millis(config.pool_health_check_interval_ms);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { run_health_check(conn, interval, shutdown).await })
        }));

        tasks
    }

    pub async fn connection_health(&self) -> Vec<ConnectionHealth> {
        let mut health = Vec::with_capacity(self.connections.len());
        for conn in &self.connections {
            health.push(conn.health().await);
        }
        health
    }

    pub fn healthy_connection_count(&self, states: &[ConnectionHealth]) -> usize {
        states
            .iter()
            .filter(|h| matches!(h.state, connection::ConnectionState::Open | connection::ConnectionState::Degraded))
            .count()
    }

    /// Snapshot of per-connection resume state for the checkpoint writer
    /// (spec.md §4.9).
    pub fn connection_checkpoints(&self) -> Vec<SubscriptionCheckpoint> {
        self.connections
            .iter()
            .map(|conn| SubscriptionCheckpoint {
                connection_id: conn.id.to_string(),
                last_processed_slot: conn.last_processed_slot_value() as i64,
                retry_count: conn.retry_count_value(),
                updated_at: Utc::now(),
            })
            .collect()
    }

    /// Seeds each connection's resume point from a restored checkpoint
    /// (spec.md §4.9: "the most recent checkpoint drives the initial
    /// `from_slot` per connection").
    pub fn seed_from_checkpoints(&self, checkpoints: &[SubscriptionCheckpoint]) {
        for checkpoint in checkpoints {
            if let Some(conn) = self
                .connections
                .iter()
                .find(|c| c.id.to_string() == checkpoint.connection_id)
            {
                if checkpoint.last_processed_slot > 0 {
                    conn.seed_resume_slot(checkpoint.last_processed_slot as u64);
                }
            }
        }
    }
}

fn subscribe_request(resume_from_slot: Option<u64>, commitment: CommitmentLevel) -> SubscribeRequest {
    let mut accounts = HashMap::new();
    accounts.insert(
        "bonding_curves".to_string(),
        SubscribeRequestFilterAccounts {
            owner: vec![PUMP_BC_PROGRAM_ID.to_string()],
            ..Default::default()
        },
    );

    let mut transactions = HashMap::new();
    transactions.insert(
        "pump_programs".to_string(),
        SubscribeRequestFilterTransactions {
            account_include: vec![PUMP_BC_PROGRAM_ID.to_string(), PUMP_AMM_PROGRAM_ID.to_string()],
            failed: Some(false),
            ..Default::default()
        },
    );

    SubscribeRequest {
        accounts,
        transactions,
        commitment: Some(commitment.into()),
        from_slot: resume_from_slot,
        ..Default::default()
    }
}

fn parse_commitment(level: &str) -> CommitmentLevel {
    match level {
        "finalized" => CommitmentLevel::Finalized,
        "processed" => CommitmentLevel::Processed,
        _ => CommitmentLevel::Confirmed,
    }
}

async fn run_connection(
    conn: Arc<Connection>,
    limiter: Arc<RateLimiter>,
    config: Arc<Config>,
    message_tx: mpsc::Sender<StreamMessage>,
    shutdown: CancellationToken,
) {
    loop {
        if shutdown.is_cancelled() {
            conn.mark_dead().await;
            return;
        }

        if !conn.begin_reconnect().await {
            tokio::time::sleep(conn.backoff_duration()).await;
            continue;
        }

        limiter.acquire().await;

        match connect_and_stream(&conn, &config, &message_tx, &shutdown).await {
            Ok(()) => {
                info!(monitor = "stream_pool", connection_id = conn.id, "connection stream ended");
            }
            Err(err) => {
                conn.record_error().await;
                if conn.consecutive_errors() >= config.pool_max_retries {
                    error!(
                        monitor = "stream_pool",
                        connection_id = conn.id,
                        error_kind = "stream",
                        error = %err,
                        consecutive_errors = conn.consecutive_errors(),
                        "connection exceeded POOL_MAX_RETRIES consecutive failures"
                    );
                } else {
                    warn!(monitor = "stream_pool", connection_id = conn.id, error_kind = "stream", error = %err, "connection error");
                }
                tokio::time::sleep(conn.backoff_duration()).await;
            }
        }

        if conn.resume_from_slot().is_some() {
            conn.record_resume_attempt();
        }
    }
}

/// Recomputes trailing TPS / parse rate and evaluates the Degraded/Open
/// transition once per `pool_health_check_interval_ms` (spec.md §4.1,
/// §6 `POOL_HEALTH_CHECK_INTERVAL_MS`).
async fn run_health_check(conn: Arc<Connection>, interval: Duration, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
        conn.tick_health_check(interval).await;
    }
}

async fn connect_and_stream(
    conn: &Arc<Connection>,
    config: &Config,
    message_tx: &mpsc::Sender<StreamMessage>,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    let tls = ClientTlsConfig::new().with_native_roots();
    let mut builder = GeyserGrpcClient::build_from_shared(config.stream_endpoint.clone())?.tls_config(tls)?;
    if let Some(token) = &config.stream_token {
        builder = builder.x_token(Some(token.clone()))?;
    }
    let mut client = builder.connect().await?;

    let (mut subscribe_tx, mut stream) = client.subscribe().await?;
    let request = subscribe_request(conn.resume_from_slot(), parse_commitment(&config.commitment_level));
    subscribe_tx.send(request).await?;
    conn.mark_open().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                return Ok(());
            }
            next = stream.next() => {
                let Some(update) = next else { return Ok(()) };
                let update = update?;

                match update.update_oneof {
                    Some(UpdateOneof::Ping(_)) => {
                        subscribe_tx
                            .send(SubscribeRequest {
                                ping: Some(SubscribeRequestPing { id: 1 }),
                                ..Default::default()
                            })
                            .await?;
                    }
                    Some(UpdateOneof::Transaction(tx_update)) => {
                        conn.record_slot(tx_update.slot);
                        conn.record_message().await;
                        if let Some(ctx) = convert::parse_context_from_transaction(&tx_update, Utc::now()) {
                            conn.record_parsed();
                            if message_tx.send(StreamMessage::Transaction(ctx)).await.is_err() {
                                return Ok(());
                            }
                        } else {
                            conn.record_dropped();
                            debug!(monitor = "stream_pool", connection_id = conn.id, "dropped malformed transaction update");
                        }
                    }
                    Some(UpdateOneof::Account(acct_update)) => {
                        conn.record_slot(acct_update.slot);
                        conn.record_message().await;
                        if let Some(ctx) = convert::account_update_context(&acct_update) {
                            conn.record_parsed();
                            if message_tx.send(StreamMessage::Account(ctx)).await.is_err() {
                                return Ok(());
                            }
                        } else {
                            conn.record_dropped();
                        }
                    }
                    Some(UpdateOneof::Slot(slot_update)) => {
                        conn.record_slot(slot_update.slot);
                    }
                    _ => {}
                }
            }
        }
    }
}
