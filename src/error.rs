//! Error types for herald-client.

use thiserror::Error;

/// Main error type for all herald operations.
#[derive(Debug, Error)]
pub enum HeraldError {
    /// Malformed rpc/write call: missing target, action name, or args.
    #[error("invalid arguments: {0}")]
    InvalidArguments(&'static str),

    /// The frame never reached the transport before its deadline.
    #[error("send timed out before the frame reached the transport")]
    SendTimeout,

    /// No response arrived for an outstanding call before its deadline.
    #[error("rpc response timed out")]
    RpcTimeout,

    /// Inbound call for an action with no registered worker.
    #[error("no rpc worker registered for action `{0}`")]
    ActionNotFound(String),

    /// A worker is already registered under this action name.
    #[error("rpc worker `{0}` is already registered")]
    DuplicateAction(String),

    /// The codec refused to produce wire bytes; the send was aborted.
    #[error("codec refused to encode the message")]
    EncodeFailure,

    /// Transport-level I/O error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// The client was closed, or the engine task is gone.
    #[error("connection closed")]
    ConnectionClosed,

    /// The remote side answered an rpc with an error.
    #[error("remote error: {0}")]
    Remote(String),
}

impl HeraldError {
    /// Protocol vocabulary used in the `error` field of rpc response frames.
    pub fn wire_code(&self) -> &'static str {
        match self {
            HeraldError::InvalidArguments(_) => "INVALID_ARGUMENTS",
            HeraldError::SendTimeout => "SEND_TIMEOUT",
            HeraldError::RpcTimeout => "RPC_TIMEOUT",
            HeraldError::ActionNotFound(_) => "ACTION_NOT_FOUND",
            HeraldError::DuplicateAction(_) => "DUPLICATE_ACTION",
            HeraldError::EncodeFailure => "ENCODE_FAILURE",
            HeraldError::Connection(_) => "CONNECTION_ERROR",
            HeraldError::ConnectionClosed => "CONNECTION_CLOSED",
            HeraldError::Remote(_) => "REMOTE_ERROR",
        }
    }
}

/// Result type alias using HeraldError.
pub type Result<T> = std::result::Result<T, HeraldError>;
