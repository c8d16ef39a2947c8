//! Subscription bookkeeping.
//!
//! Tracks two things per event name: the local handler closures to invoke
//! when the event arrives, and whether the broker currently needs to know
//! about our interest (the `listening` set). The set is replayed in full
//! after every successful reconnect + authenticate, because the broker is
//! assumed to forget subscriptions when the connection drops.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use crate::protocol::Identity;

/// Local callback invoked with the sender's identity and the event body.
pub type EventHandler = Arc<dyn Fn(Identity, Value) + Send + Sync>;

/// Box a user event closure into the table's erased shape.
pub(crate) fn wrap_handler<F>(handler: F) -> EventHandler
where
    F: Fn(Identity, Value) + Send + Sync + 'static,
{
    Arc::new(handler)
}

/// Event names subscribed server-side plus local handler lists.
#[derive(Default)]
pub(crate) struct SubscriptionState {
    listening: HashSet<String>,
    handlers: HashMap<String, Vec<EventHandler>>,
}

impl SubscriptionState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a handler locally. Returns `true` when the event was not
    /// yet in the broker-side set, i.e. a broker subscribe rpc is due.
    pub(crate) fn add_local(&mut self, event: &str, handler: EventHandler) -> bool {
        self.handlers
            .entry(event.to_string())
            .or_default()
            .push(handler);
        self.listening.insert(event.to_string())
    }

    /// Drop every local handler for an event.
    pub(crate) fn remove_local(&mut self, event: &str) {
        self.handlers.remove(event);
    }

    /// Take the event out of the broker-side set after a successful
    /// unsubscribe rpc. Returns whether it was present.
    pub(crate) fn confirm_unsubscribed(&mut self, event: &str) -> bool {
        self.listening.remove(event)
    }

    /// Events to re-announce to the broker after a reconnect.
    pub(crate) fn replay_set(&self) -> Vec<String> {
        self.listening.iter().cloned().collect()
    }

    /// Handlers currently registered for an event.
    pub(crate) fn handlers_for(&self, event: &str) -> Vec<EventHandler> {
        self.handlers.get(event).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> EventHandler {
        wrap_handler(|_, _| {})
    }

    #[test]
    fn test_first_add_requests_broker_rpc() {
        let mut subs = SubscriptionState::new();
        assert!(subs.add_local("alerts", noop()));
    }

    #[test]
    fn test_second_add_is_local_only() {
        let mut subs = SubscriptionState::new();
        assert!(subs.add_local("alerts", noop()));
        assert!(!subs.add_local("alerts", noop()));
        // Both handlers are kept.
        assert_eq!(subs.handlers_for("alerts").len(), 2);
    }

    #[test]
    fn test_replay_set_survives_handler_removal() {
        let mut subs = SubscriptionState::new();
        subs.add_local("alerts", noop());
        subs.remove_local("alerts");

        // Until the broker confirms an unsubscribe, reconnects keep
        // re-announcing the event.
        assert_eq!(subs.replay_set(), ["alerts"]);
        assert!(subs.handlers_for("alerts").is_empty());
    }

    #[test]
    fn test_confirm_unsubscribed_clears_replay() {
        let mut subs = SubscriptionState::new();
        subs.add_local("alerts", noop());

        assert!(subs.confirm_unsubscribed("alerts"));
        assert!(!subs.confirm_unsubscribed("alerts"));
        assert!(subs.replay_set().is_empty());
    }
}
