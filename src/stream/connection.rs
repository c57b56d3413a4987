//! Per-connection lifecycle state and resume-from-slot bookkeeping
//! (spec.md §4.1).

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use super::circuit_breaker::CircuitBreaker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Degraded,
    Failing,
    Reconnecting,
    Dead,
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectionHealth {
    pub state: ConnectionState,
    pub trailing_tps: f64,
    pub parse_rate: f64,
    pub last_message_age: Duration,
}

const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// One long-lived subscription connection. `last_processed_slot` and
/// `retries_with_last_slot` drive the resume semantics in scenario S4;
/// `circuit_breaker` and `consecutive_errors` drive the Degraded/Failing
/// transitions. `window_parsed`/`window_dropped` accumulate since the last
/// health-check tick and feed `trailing_tps`/`parse_rate` into
/// `ConnectionHealth` (spec.md §4.1: "advertise capacity via a load metric
/// (trailing TPS and parse rate)").
pub struct Connection {
    pub id: usize,
    state: Mutex<ConnectionState>,
    last_processed_slot: AtomicU64,
    retries_with_last_slot: AtomicU32,
    consecutive_errors: AtomicU32,
    last_message_at: Mutex<Instant>,
    failure_threshold: u32,
    max_retry_with_last_slot: u32,
    circuit_breaker: Mutex<CircuitBreaker>,
    window_parsed: AtomicU64,
    window_dropped: AtomicU64,
    trailing_tps: Mutex<f64>,
    parse_rate: Mutex<f64>,
}

impl Connection {
    pub fn new(id: usize, failure_threshold: u32, recovery_timeout: Duration, max_retry_with_last_slot: u32) -> Self {
        Self {
            id,
            state: Mutex::new(ConnectionState::Connecting),
            last_processed_slot: AtomicU64::new(0),
            retries_with_last_slot: AtomicU32::new(0),
            consecutive_errors: AtomicU32::new(0),
            last_message_at: Mutex::new(Instant::now()),
            failure_threshold,
            max_retry_with_last_slot,
            circuit_breaker: Mutex::new(CircuitBreaker::new(failure_threshold, recovery_timeout)),
            window_parsed: AtomicU64::new(0),
            window_dropped: AtomicU64::new(0),
            trailing_tps: Mutex::new(0.0),
            parse_rate: Mutex::new(1.0),
        }
    }

    pub async fn mark_open(&self) {
        *self.state.lock().await = ConnectionState::Open;
        self.consecutive_errors.store(0, Ordering::Relaxed);
        self.retries_with_last_slot.store(0, Ordering::Relaxed);
        self.circuit_breaker.lock().await.record_success();
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.lock().await
    }

    pub fn record_slot(&self, slot: u64) {
        self.last_processed_slot.fetch_max(slot, Ordering::Relaxed);
    }

    /// The `from_slot` to request on the next (re)subscribe, per scenario
    /// S4: resume from the last processed slot for up to
    /// `max_retry_with_last_slot` consecutive attempts, then fall back to
    /// "latest" (`None`) to avoid unbounded lag.
    pub fn resume_from_slot(&self) -> Option<u64> {
        let last = self.last_processed_slot.load(Ordering::Relaxed);
        if last == 0 {
            return None;
        }
        if self.retries_with_last_slot.load(Ordering::Relaxed) < self.max_retry_with_last_slot {
            Some(last + 1)
        } else {
            None
        }
    }

    /// Call once per reconnect attempt that used `resume_from_slot`.
    pub fn record_resume_attempt(&self) {
        self.retries_with_last_slot.fetch_add(1, Ordering::Relaxed);
    }

    /// Raw last-processed slot, for the checkpoint writer (spec.md §4.9).
    pub fn last_processed_slot_value(&self) -> u64 {
        self.last_processed_slot.load(Ordering::Relaxed)
    }

    pub fn retry_count_value(&self) -> u32 {
        self.retries_with_last_slot.load(Ordering::Relaxed)
    }

    /// Seed the resume point from a restored checkpoint at startup
    /// (spec.md §4.9: "the most recent checkpoint drives the initial
    /// `from_slot` per connection").
    pub fn seed_resume_slot(&self, slot: u64) {
        self.last_processed_slot.fetch_max(slot, Ordering::Relaxed);
    }

    pub async fn record_message(&self) {
        *self.last_message_at.lock().await = Instant::now();
        self.consecutive_errors.store(0, Ordering::Relaxed);
    }

    /// A raw wire message that decoded into a usable `ParseContext`/
    /// `AccountUpdateContext`.
    pub fn record_parsed(&self) {
        self.window_parsed.fetch_add(1, Ordering::Relaxed);
    }

    /// A raw wire message that failed to decode and was dropped (spec.md
    /// §4.1 "parse rate" — measured at the wire-decode level, distinct from
    /// the Event Parser's per-strategy success counters).
    pub fn record_dropped(&self) {
        self.window_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Computes trailing TPS and parse rate from the current window,
    /// resets the counters, runs the Degraded/Open transition, and stores
    /// the result for `health()` to report. Called once per
    /// `pool_health_check_interval_ms` tick.
    pub async fn tick_health_check(&self, window: Duration) {
        let parsed = self.window_parsed.swap(0, Ordering::Relaxed);
        let dropped = self.window_dropped.swap(0, Ordering::Relaxed);
        let total = parsed + dropped;

        let tps = parsed as f64 / window.as_secs_f64().max(1.0);
        let rate = if total == 0 { 1.0 } else { parsed as f64 / total as f64 };

        *self.trailing_tps.lock().await = tps;
        *self.parse_rate.lock().await = rate;

        let latency = self.last_message_at.lock().await.elapsed();
        self.evaluate_health(rate, latency).await;
    }

    pub async fn record_error(&self) -> bool {
        let errors = self.consecutive_errors.fetch_add(1, Ordering::Relaxed) + 1;
        self.circuit_breaker.lock().await.record_failure();
        if errors >= self.failure_threshold {
            *self.state.lock().await = ConnectionState::Failing;
            true
        } else {
            false
        }
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::Relaxed)
    }

    /// Evaluate parse-rate/latency degradation (spec.md §4.1: "Degraded on
    /// parse rate < 50% or latency > 5 s").
    pub async fn evaluate_health(&self, parse_rate: f64, latency: Duration) {
        let mut state = self.state.lock().await;
        if *state == ConnectionState::Open && (parse_rate < 0.5 || latency > Duration::from_secs(5)) {
            *state = ConnectionState::Degraded;
        } else if *state == ConnectionState::Degraded && parse_rate >= 0.5 && latency <= Duration::from_secs(5) {
            *state = ConnectionState::Open;
        }
    }

    pub async fn begin_reconnect(&self) -> bool {
        let mut breaker = self.circuit_breaker.lock().await;
        if !breaker.allow_request() {
            return false;
        }
        drop(breaker);
        *self.state.lock().await = ConnectionState::Reconnecting;
        true
    }

    pub async fn mark_dead(&self) {
        *self.state.lock().await = ConnectionState::Dead;
    }

    /// Exponential back-off starting at 2s, capped at 60s, keyed off the
    /// current consecutive-error count.
    pub fn backoff_duration(&self) -> Duration {
        let attempt = self.consecutive_errors.load(Ordering::Relaxed).min(10);
        let scaled = INITIAL_BACKOFF.saturating_mul(1u32 << attempt.min(5));
        scaled.min(MAX_BACKOFF)
    }

    pub async fn health(&self) -> ConnectionHealth {
        ConnectionHealth {
            state: self.state().await,
            trailing_tps: *self.trailing_tps.lock().await,
            parse_rate: *self.parse_rate.lock().await,
            last_message_age: self.last_message_at.lock().await.elapsed(),
        }
    }
}
