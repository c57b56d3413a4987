//! Subscription Router (spec.md §4.2): maps logical subscription groups to
//! pool connections by priority band and trailing load.

use std::collections::HashMap;

use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PriorityBand {
    High,
    Medium,
    Low,
}

impl PriorityBand {
    /// Bonding-curve subscriptions carry the graduation-relevant slot
    /// ordering and must stay colocated on one connection (spec.md §4.2).
    pub fn requires_colocation(self) -> bool {
        matches!(self, PriorityBand::High)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectionLoadSample {
    pub connection_id: usize,
    pub tps_normalized: f64,
    pub parse_rate: f64,
}

impl ConnectionLoadSample {
    /// `load = 0.6·tps_normalized + 0.4·(1 − parse_rate)` (spec.md §4.2).
    pub fn load(&self) -> f64 {
        0.6 * self.tps_normalized + 0.4 * (1.0 - self.parse_rate)
    }
}

/// Tracks which connection each priority band is currently assigned to and
/// rebalances when load skews too far.
pub struct SubscriptionRouter {
    assignments: RwLock<HashMap<PriorityBand, usize>>,
}

impl SubscriptionRouter {
    pub fn new() -> Self {
        Self {
            assignments: RwLock::new(HashMap::new()),
        }
    }

    /// Picks the connection with the lowest load for `band`, honoring
    /// colocation: once High is assigned, it never moves except via
    /// explicit `rebalance`.
    pub async fn assign(&self, band: PriorityBand, samples: &[ConnectionLoadSample]) -> Option<usize> {
        if band.requires_colocation() {
            if let Some(&existing) = self.assignments.read().await.get(&band) {
                return Some(existing);
            }
        }

        let chosen = samples
            .iter()
            .min_by(|a, b| a.load().partial_cmp(&b.load()).unwrap_or(std::cmp::Ordering::Equal))
            .map(|s| s.connection_id)?;

        self.assignments.write().await.insert(band, chosen);
        Some(chosen)
    }

    pub async fn current_assignment(&self, band: PriorityBand) -> Option<usize> {
        self.assignments.read().await.get(&band).copied()
    }

    /// Rebalances a non-colocated band to the least-loaded connection if
    /// the max-to-min load ratio across the pool exceeds 1.5 (spec.md §4.2:
    /// "Rebalances if the max-to-min load ratio exceeds 1.5 on two
    /// consecutive samples"). Caller is responsible for requiring two
    /// consecutive over-threshold samples before invoking this.
    pub async fn rebalance(&self, band: PriorityBand, samples: &[ConnectionLoadSample]) -> Option<usize> {
        if band.requires_colocation() || samples.is_empty() {
            return None;
        }

        let max = samples.iter().map(ConnectionLoadSample::load).fold(f64::MIN, f64::max);
        let min = samples.iter().map(ConnectionLoadSample::load).fold(f64::MAX, f64::min);
        if min <= 0.0 || max / min <= 1.5 {
            return None;
        }

        let chosen = samples
            .iter()
            .min_by(|a, b| a.load().partial_cmp(&b.load()).unwrap_or(std::cmp::Ordering::Equal))?
            .connection_id;
        self.assignments.write().await.insert(band, chosen);
        Some(chosen)
    }
}

impl Default for SubscriptionRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<ConnectionLoadSample> {
        vec![
            ConnectionLoadSample { connection_id: 0, tps_normalized: 0.9, parse_rate: 0.95 },
            ConnectionLoadSample { connection_id: 1, tps_normalized: 0.1, parse_rate: 0.99 },
        ]
    }

    #[tokio::test]
    async fn assigns_band_to_least_loaded_connection() {
        let router = SubscriptionRouter::new();
        let chosen = router.assign(PriorityBand::Medium, &samples()).await;
        assert_eq!(chosen, Some(1));
    }

    #[tokio::test]
    async fn high_priority_band_stays_colocated_once_assigned() {
        let router = SubscriptionRouter::new();
        let first = router.assign(PriorityBand::High, &samples()).await;
        assert_eq!(first, Some(1));

        let skewed = vec![
            ConnectionLoadSample { connection_id: 0, tps_normalized: 0.0, parse_rate: 1.0 },
            ConnectionLoadSample { connection_id: 1, tps_normalized: 1.0, parse_rate: 0.0 },
        ];
        let second = router.assign(PriorityBand::High, &skewed).await;
        assert_eq!(second, Some(1));
    }

    #[tokio::test]
    async fn rebalances_when_load_ratio_exceeds_threshold() {
        let router = SubscriptionRouter::new();
        router.assign(PriorityBand::Medium, &samples()).await;

        let skewed = vec![
            ConnectionLoadSample { connection_id: 0, tps_normalized: 0.05, parse_rate: 0.99 },
            ConnectionLoadSample { connection_id: 1, tps_normalized: 0.95, parse_rate: 0.2 },
        ];
        let rebalanced = router.rebalance(PriorityBand::Medium, &skewed).await;
        assert_eq!(rebalanced, Some(0));
    }

    #[tokio::test]
    async fn no_rebalance_within_ratio_tolerance() {
        let router = SubscriptionRouter::new();
        let balanced = vec![
            ConnectionLoadSample { connection_id: 0, tps_normalized: 0.5, parse_rate: 0.9 },
            ConnectionLoadSample { connection_id: 1, tps_normalized: 0.45, parse_rate: 0.92 },
        ];
        router.assign(PriorityBand::Medium, &balanced).await;
        assert_eq!(router.rebalance(PriorityBand::Medium, &balanced).await, None);
    }
}
