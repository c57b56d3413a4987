use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;

/// Validated, typed configuration loaded once at boot (spec.md §9: "Free-form
/// configuration" is explicitly called out for replacement). Every knob
/// enumerated in spec.md §6 has a field here; required connection info fails
/// fast rather than silently defaulting.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    // Upstream stream
    pub stream_endpoint: String,
    pub stream_token: Option<String>,
    pub commitment_level: String,

    // Persistence
    pub database_url: String,

    // Stream Pool
    pub pool_min_connections: usize,
    pub pool_max_connections: usize,
    pub pool_health_check_interval_ms: u64,
    pub pool_max_retries: u32,
    pub max_retry_with_last_slot: u32,
    pub max_down_interval_secs: u64,

    // Circuit breaker
    pub cb_failure_threshold: u32,
    pub cb_recovery_timeout_ms: u64,

    // Rate limiter
    pub rate_limit_window_ms: u64,
    pub max_subscriptions_per_window: u32,

    // Persistence batching
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
    pub queue_high_watermark: usize,
    pub queue_low_watermark: usize,

    // Checkpointing
    pub checkpoint_interval_ms: u64,
    pub shutdown_grace_ms: u64,

    // Pricing / save thresholds
    pub bc_save_threshold_usd: f64,
    pub amm_save_threshold_usd: f64,

    // External collaborators
    pub sol_price_url: String,
    pub sol_price_refresh_ms: u64,
    pub metadata_rpc_url: String,
    pub metadata_fetch_timeout_ms: u64,

    // Observability
    pub stats_interval_secs: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        Ok(Self {
            stream_endpoint: env::var("STREAM_ENDPOINT")
                .context("STREAM_ENDPOINT not set in environment")?,
            stream_token: env::var("STREAM_TOKEN").ok(),
            commitment_level: env::var("COMMITMENT_LEVEL")
                .unwrap_or_else(|_| "confirmed".to_string()),

            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL not set in environment")?,

            pool_min_connections: env_parsed("POOL_MIN_CONNECTIONS", 2)?,
            pool_max_connections: env_parsed("POOL_MAX_CONNECTIONS", 3)?,
            pool_health_check_interval_ms: env_parsed("POOL_HEALTH_CHECK_INTERVAL_MS", 30_000)?,
            pool_max_retries: env_parsed("POOL_MAX_RETRIES", 3)?,
            max_retry_with_last_slot: env_parsed("MAX_RETRY_WITH_LAST_SLOT", 30)?,
            max_down_interval_secs: env_parsed("MAX_DOWN_INTERVAL_SECS", 120)?,

            cb_failure_threshold: env_parsed("CB_FAILURE_THRESHOLD", 3)?,
            cb_recovery_timeout_ms: env_parsed("CB_RECOVERY_TIMEOUT_MS", 5_000)?,

            rate_limit_window_ms: env_parsed("RATE_LIMIT_WINDOW_MS", 60_000)?,
            max_subscriptions_per_window: env_parsed("MAX_SUBSCRIPTIONS_PER_WINDOW", 30)?,

            batch_size: env_parsed("BATCH_SIZE", 100)?,
            batch_timeout_ms: env_parsed("BATCH_TIMEOUT_MS", 2_000)?,
            queue_high_watermark: env_parsed("QUEUE_HIGH_WATERMARK", 5_000)?,
            queue_low_watermark: env_parsed("QUEUE_LOW_WATERMARK", 1_000)?,

            checkpoint_interval_ms: env_parsed("CHECKPOINT_INTERVAL_MS", 10_000)?,
            shutdown_grace_ms: env_parsed("SHUTDOWN_GRACE_MS", 5_000)?,

            bc_save_threshold_usd: env_parsed("BC_SAVE_THRESHOLD_USD", 8_888.0)?,
            amm_save_threshold_usd: env_parsed("AMM_SAVE_THRESHOLD_USD", 1_000.0)?,

            sol_price_url: env::var("SOL_PRICE_URL")
                .unwrap_or_else(|_| "https://public-api.birdeye.so/defi/price?address=So11111111111111111111111111111111111111112".to_string()),
            sol_price_refresh_ms: env_parsed("SOL_PRICE_REFRESH_MS", 5_000)?,
            metadata_rpc_url: env::var("METADATA_RPC_URL")
                .unwrap_or_else(|_| "https://api.mainnet-beta.solana.com".to_string()),
            metadata_fetch_timeout_ms: env_parsed("METADATA_FETCH_TIMEOUT_MS", 3_000)?,

            stats_interval_secs: env_parsed("STATS_INTERVAL_SECS", 30)?,
        })
    }
}

/// Parse an optional env var, falling back to `default`; a *present but
/// unparsable* value is a config error (exit code 1), not a silent fallback.
fn env_parsed<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("failed to parse {key}={raw:?}: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parsed_falls_back_to_default_when_unset() {
        std::env::remove_var("PUMP_INGEST_TEST_KNOB");
        let value: u32 = env_parsed("PUMP_INGEST_TEST_KNOB", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn env_parsed_rejects_unparsable_present_value() {
        std::env::set_var("PUMP_INGEST_TEST_KNOB_2", "not-a-number");
        let result: Result<u32> = env_parsed("PUMP_INGEST_TEST_KNOB_2", 42);
        assert!(result.is_err());
        std::env::remove_var("PUMP_INGEST_TEST_KNOB_2");
    }
}
