//! Domain-level wire message shapes. Codec implementations translate these
//! to and from bytes; the dispatcher, forwarder and reaper only ever see
//! these types, never raw bytes.

use crate::error::RpcError;
use crate::ids::{ClientAddress, ObservationId, RequestId};
use crate::value::{Notification, RpcValue};

/// A decoded ingress message: either a call to dispatch, or a bulk
/// unsubscribe notice from the client.
pub enum ClientToServer {
    Request(RpcRequest),
    ObservablesClosed(Vec<ObservationId>),
}

/// A decoded RPC call.
pub struct RpcRequest {
    pub request_id: RequestId,
    pub method: String,
    pub args: Vec<RpcValue>,
    pub client_address: ClientAddress,
    pub validated_user: Option<String>,
}

/// The result half of an `RpcReply`, before encoding.
pub type RpcReplyResult = Result<RpcValue, RpcError>;

/// An outbound observation, before encoding.
pub struct ObservationMessage {
    pub observation_id: ObservationId,
    pub notification: Notification<RpcValue>,
}
