//! The `Subscription Resume Checkpoint` entity (spec.md §3 and §4.9).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SubscriptionCheckpoint {
    pub connection_id: String,
    pub last_processed_slot: i64,
    pub retry_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionCheckpoint {
    pub fn fresh(connection_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            last_processed_slot: 0,
            retry_count: 0,
            updated_at: Utc::now(),
        }
    }
}
