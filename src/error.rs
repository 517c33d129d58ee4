//! Error taxonomy. Host-method errors become part of the `Result` carried
//! inside a reply; infrastructure errors are logged and never propagate to a
//! caller — the gateway does not crash on a single malformed message.

use crate::ids::RequestId;
use thiserror::Error;

/// Internal error domain for the gateway. Variants map onto the taxonomy in
/// the design document: `Protocol`, `Authorization` and `Invocation` are
/// surfaced to the client inside the reply; `Serialization`, `Transport` and
/// `Lifecycle` are logged and dropped at the point of occurrence.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Undecodable ingress message, missing validated-user header, or
    /// unknown RPC method.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The validated user header named a principal the gateway does not
    /// recognize.
    #[error("authorization error: unknown principal `{0}`")]
    Authorization(String),

    /// The host method threw; `cause` is the unwrapped, single-level
    /// invocation-wrapper-stripped message.
    #[error("invocation error: {cause}")]
    Invocation { cause: String },

    /// A reply or observation failed to encode. The affected message is
    /// dropped; the originating subscription, if any, is not cancelled.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The broker rejected a send. Same drop-and-continue policy as
    /// serialization errors.
    #[error("transport error: {0}")]
    Transport(String),

    /// An operation was attempted after the gateway (or one of its pools)
    /// was closed.
    #[error("lifecycle error: {0}")]
    Lifecycle(String),

    /// A method name collides with one already registered. Fatal at
    /// construction time — overloading is not supported.
    #[error("duplicate method registration: `{0}`")]
    DuplicateMethod(String),

    /// `Registry::insert` was called with an id that is already present.
    #[error("observation id `{0}` already registered")]
    DuplicateObservation(u64),
}

impl GatewayError {
    /// Stable wire error code, used both for logging and for the subset of
    /// variants that cross into an [`RpcError`].
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Protocol(_) => "protocol_error",
            GatewayError::Authorization(_) => "authorization_error",
            GatewayError::Invocation { .. } => "invocation_error",
            GatewayError::Serialization(_) => "serialization_error",
            GatewayError::Transport(_) => "transport_error",
            GatewayError::Lifecycle(_) => "lifecycle_error",
            GatewayError::DuplicateMethod(_) => "duplicate_method",
            GatewayError::DuplicateObservation(_) => "duplicate_observation",
        }
    }

    /// Converts the client-facing subset of this taxonomy into a wire
    /// [`RpcError`]. Returns `None` for infrastructure-only variants that
    /// must never reach a client (per the propagation policy).
    pub fn into_wire_error(self) -> Option<RpcError> {
        match self {
            GatewayError::Protocol(message) => Some(RpcError {
                code: self.code().to_string(),
                message,
            }),
            GatewayError::Authorization(principal) => Some(RpcError {
                code: "authorization_error".to_string(),
                message: format!("unknown principal `{principal}`"),
            }),
            GatewayError::Invocation { cause } => Some(RpcError {
                code: "invocation_error".to_string(),
                message: cause,
            }),
            GatewayError::Serialization(_)
            | GatewayError::Transport(_)
            | GatewayError::Lifecycle(_)
            | GatewayError::DuplicateMethod(_)
            | GatewayError::DuplicateObservation(_) => None,
        }
    }
}

/// Wire-representable error, carried inside an `RpcReply`'s `Err` arm.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RpcError {
    pub code: String,
    pub message: String,
}

impl RpcError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// The reply sent for a method name the dispatcher cannot resolve.
    pub fn unknown_method(method: &str) -> Self {
        Self::new(
            "unknown_method",
            format!("unknown method `{method}` — possible version skew"),
        )
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Context attached to infrastructure errors purely for logging; never part
/// of the public error type itself.
pub(crate) fn log_dropped(request_id: Option<RequestId>, err: &GatewayError) {
    match request_id {
        Some(id) => tracing::error!(request_id = %id, code = err.code(), "{err}"),
        None => tracing::error!(code = err.code(), "{err}"),
    }
}
