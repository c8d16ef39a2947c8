//! Message type and well-known broker vocabulary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::header::Header;

/// Name under which the broker answers rpc calls.
pub const BROKER_NAME: &str = "herald-server";

/// Broker action establishing this client's identity on a connection.
pub const ACTION_AUTHORIZE: &str = "authorize";

/// Broker action registering interest in an event.
pub const ACTION_SUBSCRIBE: &str = "subscribe";

/// Broker action dropping interest in an event.
pub const ACTION_UNSUBSCRIBE: &str = "unsubscribe";

/// Reserved inbound keepalive probe, answered without consulting workers.
pub const ACTION_PING: &str = "_ping";

/// Event name of the keepalive reply.
pub const EVENT_PONG: &str = "pong";

/// A complete protocol message: header plus arbitrary JSON body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub header: Header,
    pub body: Value,
}

impl Message {
    pub fn new(header: Header, body: Value) -> Self {
        Self { header, body }
    }
}

/// Body of an rpc call: `{ "args": … }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallBody {
    pub args: Value,
}

/// Body of an rpc response: `{ "error": …, "result": … }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultBody {
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
}

impl ResultBody {
    /// Collapse a response body into the caller-facing result.
    pub fn into_result(self) -> crate::error::Result<Value> {
        match self.error {
            Some(Value::Null) | None => Ok(self.result.unwrap_or(Value::Null)),
            Some(Value::String(s)) => Err(crate::error::HeraldError::Remote(s)),
            Some(other) => Err(crate::error::HeraldError::Remote(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HeraldError;
    use serde_json::json;

    #[test]
    fn test_result_body_success() {
        let body = ResultBody {
            error: None,
            result: Some(json!({"sum": 3})),
        };
        assert_eq!(body.into_result().unwrap(), json!({"sum": 3}));
    }

    #[test]
    fn test_result_body_null_error_is_success() {
        let body: ResultBody = serde_json::from_value(json!({"error": null})).unwrap();
        assert_eq!(body.into_result().unwrap(), Value::Null);
    }

    #[test]
    fn test_result_body_string_error() {
        let body: ResultBody = serde_json::from_value(json!({"error": "BOOM"})).unwrap();
        match body.into_result() {
            Err(HeraldError::Remote(msg)) => assert_eq!(msg, "BOOM"),
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[test]
    fn test_result_body_structured_error() {
        let body: ResultBody =
            serde_json::from_value(json!({"error": {"code": 7}, "result": null})).unwrap();
        match body.into_result() {
            Err(HeraldError::Remote(msg)) => assert!(msg.contains("\"code\":7")),
            other => panic!("expected remote error, got {other:?}"),
        }
    }
}
