//! Protocol headers and message routing.
//!
//! A [`Header`] carries the sender identity, per-message bookkeeping fields
//! and exactly one routing tag, modeled as the [`Route`] enum. Inbound
//! frames whose header does not parse into one of the known routes are
//! protocol garbage and get dropped by the dispatcher.

use serde::{Deserialize, Serialize};

use super::identity::Identity;

/// Default per-message `retry` hint carried for the broker.
pub const DEFAULT_RETRY: u32 = 5;

/// Default per-message timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;

/// Routing tag of a message: exactly one variant per frame.
///
/// Field names are the wire names, so this enum doubles as the on-wire
/// schema for the routing part of the header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Route {
    /// Call an action on one instance of the named application.
    #[serde(rename_all = "camelCase")]
    Rpc {
        rpc_target: String,
        action: String,
        action_id: u64,
    },
    /// Call an action on the instance with this uid.
    #[serde(rename_all = "camelCase")]
    RpcByUid {
        rpc_target_uid: String,
        action: String,
        action_id: u64,
    },
    /// Response to an earlier call, addressed back to the caller's uid.
    #[serde(rename_all = "camelCase")]
    RpcResult {
        rpc_result_for: String,
        action_id: u64,
    },
    /// Targeted event for a single named/identified peer.
    ///
    /// Listed before [`Route::Event`]: untagged deserialization tries
    /// variants in order, and a whisper header also carries `event`.
    #[serde(rename_all = "camelCase")]
    Whisper { whisper_to: String, event: String },
    /// Broadcast event for all subscribers.
    Event { event: String },
}

impl Route {
    /// Action id, for the variants that correlate calls and responses.
    pub fn action_id(&self) -> Option<u64> {
        match self {
            Route::Rpc { action_id, .. }
            | Route::RpcByUid { action_id, .. }
            | Route::RpcResult { action_id, .. } => Some(*action_id),
            _ => None,
        }
    }

    /// Action name of an rpc call.
    pub fn action(&self) -> Option<&str> {
        match self {
            Route::Rpc { action, .. } | Route::RpcByUid { action, .. } => Some(action),
            _ => None,
        }
    }

    /// Event name of an event or whisper.
    pub fn event(&self) -> Option<&str> {
        match self {
            Route::Event { event } | Route::Whisper { event, .. } => Some(event),
            _ => None,
        }
    }
}

/// Full message header: sender identity, bookkeeping, and one route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// Sender application name.
    pub name: String,
    /// Sender instance uid.
    pub uid: String,
    /// Monotonic per-client message counter, assigned once per message.
    #[serde(rename = "messageId")]
    pub message_id: u64,
    /// Acknowledgement request flag, carried for the broker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack: Option<bool>,
    /// Broker-side redelivery hint; never drives a client-side resend.
    #[serde(default)]
    pub retry: u32,
    /// Per-message deadline in milliseconds, covering both the send and
    /// the response wait.
    #[serde(default)]
    pub timeout: u64,
    /// Routing tag.
    #[serde(flatten)]
    pub route: Route,
}

impl Header {
    /// Identity of the peer that sent this header.
    pub fn sender(&self) -> Identity {
        Identity::new(self.name.clone(), self.uid.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(route: Route) -> Header {
        Header {
            name: "app".into(),
            uid: "app_1".into(),
            message_id: 7,
            ack: None,
            retry: DEFAULT_RETRY,
            timeout: DEFAULT_TIMEOUT_MS,
            route,
        }
    }

    #[test]
    fn test_rpc_roundtrip() {
        let h = header(Route::Rpc {
            rpc_target: "peer".into(),
            action: "sum".into(),
            action_id: 3,
        });
        let json = serde_json::to_string(&h).unwrap();
        assert!(json.contains("\"rpcTarget\":\"peer\""));
        assert!(json.contains("\"actionId\":3"));
        assert!(json.contains("\"messageId\":7"));
        let back: Header = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn test_rpc_by_uid_roundtrip() {
        let h = header(Route::RpcByUid {
            rpc_target_uid: "peer_9".into(),
            action: "sum".into(),
            action_id: 4,
        });
        let json = serde_json::to_string(&h).unwrap();
        assert!(json.contains("\"rpcTargetUid\":\"peer_9\""));
        let back: Header = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn test_result_roundtrip() {
        let h = header(Route::RpcResult {
            rpc_result_for: "caller_2".into(),
            action_id: 11,
        });
        let back: Header = serde_json::from_str(&serde_json::to_string(&h).unwrap()).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn test_whisper_wins_over_event() {
        // A whisper header also carries `event`; it must not collapse into
        // the plain Event variant.
        let h = header(Route::Whisper {
            whisper_to: "peer".into(),
            event: "pong".into(),
        });
        let back: Header = serde_json::from_str(&serde_json::to_string(&h).unwrap()).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn test_event_roundtrip() {
        let h = header(Route::Event {
            event: "alerts".into(),
        });
        let back: Header = serde_json::from_str(&serde_json::to_string(&h).unwrap()).unwrap();
        assert_eq!(back, h);
        assert_eq!(back.route.event(), Some("alerts"));
    }

    #[test]
    fn test_ack_omitted_when_unset() {
        let h = header(Route::Event {
            event: "alerts".into(),
        });
        assert!(!serde_json::to_string(&h).unwrap().contains("ack"));
    }

    #[test]
    fn test_missing_message_id_rejected() {
        let garbage = r#"{"name":"a","uid":"a_1","retry":5,"timeout":100,"event":"x"}"#;
        assert!(serde_json::from_str::<Header>(garbage).is_err());
    }

    #[test]
    fn test_missing_route_rejected() {
        let garbage = r#"{"name":"a","uid":"a_1","messageId":1,"retry":5,"timeout":100}"#;
        assert!(serde_json::from_str::<Header>(garbage).is_err());
    }
}
