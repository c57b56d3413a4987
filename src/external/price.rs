//! SOL/USD price oracle (spec.md §6: `get_sol_usd() -> Decimal`, refresh
//! cadence 5s). The core treats this as a read-only collaborator and caches
//! the last known value with a 60s staleness flag — it never blocks trade
//! processing on a live fetch.
//!
//! Grounded on the teacher's `BirdeyeClient::get_sol_price_usd` (a `reqwest`
//! client with an API key header and a tolerant non-2xx/parse-failure
//! fallback) and `api::helius`'s timeout-wrapped request pattern.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::trade_handler::TradeHandler;

#[async_trait]
pub trait SolPriceSource: Send + Sync {
    async fn get_sol_usd(&self) -> anyhow::Result<Decimal>;
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    data: Option<PriceData>,
    success: bool,
}

#[derive(Debug, Deserialize)]
struct PriceData {
    value: f64,
}

/// Fetches SOL/USD from a Birdeye-compatible `/defi/price` endpoint. Any
/// non-2xx response, `success: false`, or unparsable body is a soft failure
/// — callers fall back to the last cached value rather than propagating.
pub struct HttpSolPriceSource {
    client: reqwest::Client,
    url: String,
}

impl HttpSolPriceSource {
    pub fn new(url: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("failed to build SOL price HTTP client"),
            url,
        }
    }
}

#[async_trait]
impl SolPriceSource for HttpSolPriceSource {
    async fn get_sol_usd(&self) -> anyhow::Result<Decimal> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("SOL price endpoint returned {}", response.status());
        }
        let body: PriceResponse = response.json().await?;
        if !body.success {
            anyhow::bail!("SOL price endpoint reported success=false");
        }
        let value = body
            .data
            .ok_or_else(|| anyhow::anyhow!("SOL price endpoint returned no data"))?
            .value;
        Decimal::from_f64(value).ok_or_else(|| anyhow::anyhow!("non-finite SOL price: {value}"))
    }
}

/// Last known SOL/USD price plus the timestamp it was observed at, so
/// callers can tell whether the cached value has gone stale (spec.md §6:
/// "caches the last known value with a 60 s staleness flag").
struct CachedPrice {
    value: Decimal,
    observed_at: tokio::time::Instant,
}

pub struct SolPriceCache {
    inner: RwLock<Option<CachedPrice>>,
    staleness_threshold: Duration,
}

impl SolPriceCache {
    pub fn new(staleness_threshold: Duration) -> Self {
        Self {
            inner: RwLock::new(None),
            staleness_threshold,
        }
    }

    async fn set(&self, value: Decimal) {
        *self.inner.write().await = Some(CachedPrice {
            value,
            observed_at: tokio::time::Instant::now(),
        });
    }

    pub async fn get(&self) -> Option<Decimal> {
        self.inner.read().await.as_ref().map(|c| c.value)
    }

    pub async fn is_stale(&self) -> bool {
        match self.inner.read().await.as_ref() {
            Some(cached) => cached.observed_at.elapsed() > self.staleness_threshold,
            None => true,
        }
    }
}

impl Default for SolPriceCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

/// Polls `source` every `refresh` and feeds the result to the Trade
/// Handler's pricing inputs. Fetch failures are logged and the previous
/// cached value is kept — the oracle is read-only and best-effort from the
/// core's point of view (spec.md §6).
pub fn spawn_refresh_loop(
    source: Arc<dyn SolPriceSource>,
    cache: Arc<SolPriceCache>,
    trade_handler: Arc<TradeHandler>,
    refresh: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match source.get_sol_usd().await {
                Ok(price) => {
                    cache.set(price).await;
                    trade_handler.update_sol_usd(price).await;
                    debug!(monitor = "sol_price", price_usd = %price, "refreshed SOL/USD price");
                }
                Err(err) => {
                    warn!(monitor = "sol_price", error_kind = "fetch_failed", "{err}");
                    if cache.is_stale().await {
                        warn!(monitor = "sol_price", "SOL/USD price is stale (> 60s since last good fetch)");
                    }
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(refresh) => {}
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cache_is_stale_before_first_observation() {
        let cache = SolPriceCache::new(Duration::from_secs(60));
        assert!(cache.is_stale().await);
        assert!(cache.get().await.is_none());
    }

    #[tokio::test]
    async fn cache_reports_fresh_immediately_after_set() {
        let cache = SolPriceCache::new(Duration::from_millis(50));
        cache.set(Decimal::from(180)).await;
        assert!(!cache.is_stale().await);
        assert_eq!(cache.get().await, Some(Decimal::from(180)));
    }

    #[tokio::test]
    async fn cache_goes_stale_after_threshold_elapses() {
        let cache = SolPriceCache::new(Duration::from_millis(20));
        cache.set(Decimal::from(180)).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.is_stale().await);
    }
}
