//! The `Pool State` entity (spec.md §3 "Pool State").
//!
//! Identity is `(pool_address, slot)`. Only the latest row per
//! `pool_address` is cached in memory by the Pool State Store; every
//! state-changing observation is still appended to persistence.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PoolState {
    pub pool_address: String,
    pub slot: i64,
    pub mint_address: String,
    pub virtual_sol_reserves: i64,
    pub virtual_token_reserves: i64,
    pub real_sol_reserves: i64,
    pub real_token_reserves: i64,
    pub pool_open: bool,
}

impl PoolState {
    /// spec.md §4.7: never overwrite the cache with a lower slot.
    pub fn supersedes(&self, current: &PoolState) -> bool {
        self.slot > current.slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(slot: i64) -> PoolState {
        PoolState {
            pool_address: "Pool11111111111111111111111111111111111111".to_string(),
            slot,
            mint_address: "Mint11111111111111111111111111111111111111".to_string(),
            virtual_sol_reserves: 0,
            virtual_token_reserves: 0,
            real_sol_reserves: 0,
            real_token_reserves: 0,
            pool_open: true,
        }
    }

    #[test]
    fn higher_slot_supersedes_lower() {
        assert!(state(10).supersedes(&state(9)));
        assert!(!state(9).supersedes(&state(10)));
        assert!(!state(9).supersedes(&state(9)));
    }
}
