//! In-process pub/sub wiring (spec.md §4.9 "Event Bus", and the §9 redesign
//! flag replacing an "event bus with untyped payloads and wildcard listeners"
//! with a closed sum type and exhaustive matching).
//!
//! Built on `tokio::sync::broadcast` so the Trade Handler, Graduation
//! Tracker, and Pool State Store each get their own receiver and run as
//! independent consumers off the same parser output (spec.md §2 data flow:
//! "Event Parser → typed event → Event Bus → parallel consumers").

use tokio::sync::broadcast;
use tracing::warn;

use crate::parser::events::ParsedEvent;

/// Default channel capacity. Lagging consumers drop the oldest events rather
/// than stall the parser — back-pressure on persistence is handled
/// separately by the Persistence Layer's queues (spec.md §4.8), not by this
/// bus.
const DEFAULT_CAPACITY: usize = 4096;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ParsedEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// A metrics-tap-only subscriber, matching the §9 guidance that a
    /// wildcard "see everything" listener is reduced to observability, not a
    /// functional consumer.
    pub fn subscribe(&self) -> broadcast::Receiver<ParsedEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: ParsedEvent) {
        // `send` only errors when there are zero receivers; that's expected
        // before consumers have subscribed and is not a fault.
        if self.sender.receiver_count() > 0 {
            if let Err(err) = self.sender.send(event) {
                warn!(error_kind = "event_bus_send", "no active receivers: {err}");
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::events::{BcTrade, Reserves};
    use chrono::Utc;

    fn sample_event() -> ParsedEvent {
        ParsedEvent::BcTrade(BcTrade {
            signature: "sig".to_string(),
            slot: 1,
            block_time: Utc::now(),
            mint: "mint".to_string(),
            bonding_curve: None,
            user: "user".to_string(),
            is_buy: true,
            sol_amount: 1,
            token_amount: 1,
            reserves: Reserves::default(),
        })
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_the_event() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(sample_event());

        assert!(a.recv().await.is_ok());
        assert!(b.recv().await.is_ok());
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(sample_event());
    }
}
