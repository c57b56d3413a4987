//! Graduation Tracker (spec.md §4.5): couples bonding-curve account
//! snapshots with later AMM activity to confirm a mint's migration from the
//! bonding curve to the AMM pool.
//!
//! Owns the `bonding_curve_address ↔ mint` map and all per-curve state
//! exclusively (spec.md §5's shared-state table: "BC↔mint map — writers:
//! Graduation Tracker only"). Other components only ever see the immutable
//! `TokenGraduated` events this module emits; they never read or mutate the
//! map directly.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::info;

use crate::parser::events::GraduationReason;
use crate::pricing::bonding_curve_progress;

const NEAR_GRADUATION_PROGRESS: f64 = 90.0;

/// Per-bonding-curve lifecycle state (spec.md §4.5 state table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CurveState {
    Active,
    NearGrad,
    Complete,
}

#[derive(Debug, Default)]
struct CurveEntry {
    mint: Option<String>,
    state: CurveState,
    last_account_complete: bool,
}

impl Default for CurveState {
    fn default() -> Self {
        CurveState::Active
    }
}

/// Emitted once per mint when the tracker confirms graduation (spec.md §4.5:
/// "Idempotent: at most one TokenGraduated per mint is persisted").
#[derive(Debug, Clone)]
pub struct TokenGraduatedEvent {
    pub mint: String,
    pub bonding_curve_address: String,
    pub timestamp: DateTime<Utc>,
    pub reason: GraduationReason,
}

pub struct GraduationTracker {
    inner: Mutex<TrackerState>,
}

#[derive(Default)]
struct TrackerState {
    curves: HashMap<String, CurveEntry>,
    mint_to_curve: HashMap<String, String>,
    graduated_mints: HashSet<String>,
}

impl GraduationTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TrackerState::default()),
        }
    }

    /// Record the bonding_curve↔mint association, learned from a BC trade or
    /// a create instruction (spec.md §4.5 "Populated at two points").
    pub async fn record_mapping(&self, bonding_curve: &str, mint: &str) {
        let mut state = self.inner.lock().await;
        state
            .curves
            .entry(bonding_curve.to_string())
            .or_default()
            .mint
            .get_or_insert_with(|| mint.to_string());
        state
            .mint_to_curve
            .entry(mint.to_string())
            .or_insert_with(|| bonding_curve.to_string());
    }

    pub async fn mint_for_curve(&self, bonding_curve: &str) -> Option<String> {
        self.inner
            .lock()
            .await
            .curves
            .get(bonding_curve)
            .and_then(|entry| entry.mint.clone())
    }

    /// A BC trade carries a fresh reserve snapshot: advance Active → NearGrad
    /// once progress crosses 90%, without emitting graduation yet.
    pub async fn observe_bc_trade(
        &self,
        bonding_curve: &str,
        mint: &str,
        virtual_sol_reserves: u64,
    ) {
        self.record_mapping(bonding_curve, mint).await;
        let progress = bonding_curve_progress(virtual_sol_reserves);
        let mut state = self.inner.lock().await;
        let entry = state.curves.entry(bonding_curve.to_string()).or_default();
        if entry.state == CurveState::Active && decimal_ge(progress, NEAR_GRADUATION_PROGRESS) {
            entry.state = CurveState::NearGrad;
            info!(monitor = "graduation", bonding_curve, "entered near-graduation band");
        }
    }

    /// A bonding-curve account update. `complete` is the definitive signal;
    /// spec.md §4.3 "Duplicate suppression: only emit a Graduation when the
    /// previously observed `complete` was false" is enforced here via
    /// `last_account_complete`.
    pub async fn observe_account_update(
        &self,
        bonding_curve: &str,
        complete: bool,
        virtual_sol_reserves: u64,
        at: DateTime<Utc>,
    ) -> Option<TokenGraduatedEvent> {
        let progress = bonding_curve_progress(virtual_sol_reserves);
        let mut state = self.inner.lock().await;
        let entry = state.curves.entry(bonding_curve.to_string()).or_default();

        let was_complete = entry.last_account_complete;
        entry.last_account_complete = complete;

        if entry.state == CurveState::Active && decimal_ge(progress, NEAR_GRADUATION_PROGRESS) {
            entry.state = CurveState::NearGrad;
        }

        let should_graduate = (complete && !was_complete) || decimal_ge(progress, 100.0);
        if !should_graduate || entry.state == CurveState::Complete {
            return None;
        }

        let mint = entry.mint.clone()?;
        entry.state = CurveState::Complete;
        drop(entry);

        self.finalize_graduation(
            &mut state,
            mint,
            bonding_curve.to_string(),
            at,
            GraduationReason::AccountComplete,
        )
    }

    /// A `CompleteEvent` log strategy success — treated the same as an
    /// account update with `complete=true`.
    pub async fn observe_complete_event(
        &self,
        bonding_curve: &str,
        mint: Option<&str>,
        at: DateTime<Utc>,
    ) -> Option<TokenGraduatedEvent> {
        let mut state = self.inner.lock().await;
        if let Some(mint) = mint {
            state
                .curves
                .entry(bonding_curve.to_string())
                .or_default()
                .mint
                .get_or_insert_with(|| mint.to_string());
            state
                .mint_to_curve
                .entry(mint.to_string())
                .or_insert_with(|| bonding_curve.to_string());
        }

        let entry = state.curves.entry(bonding_curve.to_string()).or_default();
        if entry.state == CurveState::Complete {
            return None;
        }
        entry.state = CurveState::Complete;
        let resolved_mint = entry.mint.clone()?;
        drop(entry);

        self.finalize_graduation(
            &mut state,
            resolved_mint,
            bonding_curve.to_string(),
            at,
            GraduationReason::CompleteEvent,
        )
    }

    /// An AMM trade referencing a mint that was previously a BC token. If the
    /// mint has not already graduated, this is a late-discovered graduation
    /// (spec.md §4.5 "reason = amm_observed", and S6).
    pub async fn observe_amm_trade(
        &self,
        mint: &str,
        at: DateTime<Utc>,
    ) -> Option<TokenGraduatedEvent> {
        let mut state = self.inner.lock().await;
        if state.graduated_mints.contains(mint) {
            return None;
        }
        let bonding_curve = state.mint_to_curve.get(mint).cloned();

        if let Some(bonding_curve) = bonding_curve.clone() {
            if let Some(entry) = state.curves.get_mut(&bonding_curve) {
                if entry.state == CurveState::Complete {
                    return None;
                }
                entry.state = CurveState::Complete;
            }
        }

        self.finalize_graduation(
            &mut state,
            mint.to_string(),
            bonding_curve.unwrap_or_default(),
            at,
            GraduationReason::AmmObserved,
        )
    }

    fn finalize_graduation(
        &self,
        state: &mut TrackerState,
        mint: String,
        bonding_curve_address: String,
        at: DateTime<Utc>,
        reason: GraduationReason,
    ) -> Option<TokenGraduatedEvent> {
        if !state.graduated_mints.insert(mint.clone()) {
            return None;
        }
        info!(monitor = "graduation", mint, reason = ?reason, "token graduated");
        Some(TokenGraduatedEvent {
            mint,
            bonding_curve_address,
            timestamp: at,
            reason,
        })
    }

    pub async fn is_graduated(&self, mint: &str) -> bool {
        self.inner.lock().await.graduated_mints.contains(mint)
    }

    /// Snapshot of every known `bonding_curve -> mint` mapping, for the
    /// checkpoint writer to persist (spec.md §4.9).
    pub async fn mappings_snapshot(&self) -> Vec<(String, String)> {
        self.inner
            .lock()
            .await
            .mint_to_curve
            .iter()
            .map(|(mint, curve)| (curve.clone(), mint.clone()))
            .collect()
    }

    pub async fn graduated_snapshot(&self) -> HashSet<String> {
        self.inner.lock().await.graduated_mints.clone()
    }

    /// Restore persisted BC↔mint mappings and previously confirmed
    /// graduations at startup (spec.md §4.9: "rehydrates the BC↔mint
    /// mapping from persistent storage"). Curves already known to have
    /// graduated are seeded straight into `Complete` so a replayed account
    /// update or AMM trade after restart doesn't re-emit.
    pub async fn rehydrate(&self, mappings: Vec<(String, String)>, graduated: HashSet<String>) {
        let mut state = self.inner.lock().await;
        for (bonding_curve, mint) in mappings {
            let is_graduated = graduated.contains(&mint);
            let entry = state.curves.entry(bonding_curve.clone()).or_default();
            entry.mint.get_or_insert_with(|| mint.clone());
            if is_graduated {
                entry.state = CurveState::Complete;
                entry.last_account_complete = true;
            }
            state.mint_to_curve.entry(mint).or_insert(bonding_curve);
        }
        state.graduated_mints.extend(graduated);
    }
}

impl Default for GraduationTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn decimal_ge(value: Decimal, threshold: f64) -> bool {
    value.to_f64().map(|v| v >= threshold).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scenario_s2_account_complete_graduates_exactly_once() {
        let tracker = GraduationTracker::new();
        tracker.record_mapping("BC1", "Mint1").await;

        let t0 = Utc::now();
        let first = tracker
            .observe_account_update("BC1", false, 84_000_000_000, t0)
            .await;
        assert!(first.is_none());

        let t1 = t0 + chrono::Duration::seconds(1);
        let second = tracker
            .observe_account_update("BC1", true, 85_000_000_000, t1)
            .await;
        let event = second.expect("expected graduation on complete transition");
        assert_eq!(event.mint, "Mint1");
        assert_eq!(event.reason, GraduationReason::AccountComplete);

        // Idempotence: replaying the same complete=true update emits nothing more.
        let replay = tracker
            .observe_account_update("BC1", true, 85_000_000_000, t1)
            .await;
        assert!(replay.is_none());
    }

    #[tokio::test]
    async fn scenario_s6_amm_first_graduation() {
        let tracker = GraduationTracker::new();
        tracker.record_mapping("BC2", "Mint2").await;

        let at = Utc::now();
        let event = tracker
            .observe_amm_trade("Mint2", at)
            .await
            .expect("AMM-observed graduation");
        assert_eq!(event.reason, GraduationReason::AmmObserved);
        assert_eq!(event.timestamp, at);

        // A subsequent AMM trade on the same mint does not re-emit.
        assert!(tracker.observe_amm_trade("Mint2", at).await.is_none());
    }

    #[tokio::test]
    async fn unmapped_amm_trade_still_graduates_without_curve_context() {
        let tracker = GraduationTracker::new();
        let event = tracker
            .observe_amm_trade("UnknownMint", Utc::now())
            .await
            .expect("graduation even without a known bonding curve");
        assert_eq!(event.bonding_curve_address, "");
    }

    #[tokio::test]
    async fn progress_crossing_ninety_enters_near_grad_without_emitting() {
        let tracker = GraduationTracker::new();
        tracker.observe_bc_trade("BC3", "Mint3", 82_000_000_000).await;
        assert!(!tracker.is_graduated("Mint3").await);
    }

    #[tokio::test]
    async fn rehydrated_graduation_does_not_re_emit() {
        let tracker = GraduationTracker::new();
        let mut graduated = HashSet::new();
        graduated.insert("Mint4".to_string());
        tracker
            .rehydrate(vec![("BC4".to_string(), "Mint4".to_string())], graduated)
            .await;

        assert!(tracker.is_graduated("Mint4").await);
        assert!(tracker.observe_amm_trade("Mint4", Utc::now()).await.is_none());
        assert!(
            tracker
                .observe_account_update("BC4", true, 85_000_000_000, Utc::now())
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn rehydrated_mapping_without_graduation_still_tracks_curve() {
        let tracker = GraduationTracker::new();
        tracker
            .rehydrate(vec![("BC5".to_string(), "Mint5".to_string())], HashSet::new())
            .await;

        assert_eq!(tracker.mint_for_curve("BC5").await, Some("Mint5".to_string()));
        assert!(!tracker.is_graduated("Mint5").await);
    }

    proptest::proptest! {
        /// However many times the same completing account update is replayed
        /// (arbitrary repeat count, arbitrary reserve value at/above the
        /// graduation band), at most one `TokenGraduated` is ever emitted.
        #[test]
        fn repeated_complete_observations_emit_at_most_one_graduation(
            virtual_sol_reserves in 85_000_000_000u64..200_000_000_000u64,
            repeats in 1usize..20usize,
        ) {
            tokio_test::block_on(async {
                let tracker = GraduationTracker::new();
                tracker.record_mapping("BCProp", "MintProp").await;

                let at = Utc::now();
                let mut emitted = 0;
                for _ in 0..repeats {
                    if tracker
                        .observe_account_update("BCProp", true, virtual_sol_reserves, at)
                        .await
                        .is_some()
                    {
                        emitted += 1;
                    }
                }
                proptest::prop_assert_eq!(emitted, 1);
                Ok(())
            })?;
        }
    }
}
