//! Codec boundary and the per-reply context that makes stream-aware encoding
//! possible. The codec itself is pluggable and external in spirit — this
//! crate ships a `serde_json` reference implementation in [`json`], enough
//! to drive its own test suite end to end.

use crate::error::{GatewayError, RpcError};
use crate::forwarder::ObservationForwarder;
use crate::ids::{ClientAddress, ObservationId, ObservationIdMinter, RequestId};
use crate::pool::SessionPool;
use crate::protocol::ClientToServer;
use crate::registry::Registry;
use crate::value::{Notification, RpcValue};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// The context a codec consults whenever it encounters a stream value while
/// encoding a reply or an observation, at any nesting depth. Carries exactly
/// what the Codec Context design needs: who the message is for, and the
/// handles required to register and start delivering a newly-discovered
/// stream before the encode call returns.
#[derive(Clone)]
pub struct ReplyCodecContext {
    pub request_id: RequestId,
    pub client_address: ClientAddress,
    registry: Arc<Registry>,
    pool: Arc<SessionPool>,
    forwarder: Arc<ObservationForwarder>,
    minter: Arc<ObservationIdMinter>,
}

impl ReplyCodecContext {
    pub fn new(
        request_id: RequestId,
        client_address: ClientAddress,
        registry: Arc<Registry>,
        pool: Arc<SessionPool>,
        forwarder: Arc<ObservationForwarder>,
        minter: Arc<ObservationIdMinter>,
    ) -> Self {
        Self {
            request_id,
            client_address,
            registry,
            pool,
            forwarder,
            minter,
        }
    }

    /// Mints an id, subscribes the stream, and registers it — the codec's
    /// entire obligation for a `Stream` value it encounters, per the
    /// encode-time contract. Returns the id to write onto the wire in place
    /// of the value.
    pub fn capture_stream(&self, stream: crate::value::Observable) -> Result<ObservationId, GatewayError> {
        let id = self.minter.mint();
        self.forwarder
            .subscribe(id, self.request_id, self.client_address.clone(), stream)?;
        Ok(id)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Pluggable wire codec. Implementations must support the context slot above
/// so a custom stream handler can reach it during encoding; this crate
/// always supplies a fresh [`ReplyCodecContext`] per outgoing message, per
/// the "install the context for every outgoing reply and observation"
/// contract.
#[async_trait]
pub trait Codec: Send + Sync {
    async fn encode_reply(
        &self,
        context: &ReplyCodecContext,
        request_id: RequestId,
        result: Result<RpcValue, RpcError>,
    ) -> Result<Bytes, GatewayError>;

    async fn encode_observation(
        &self,
        context: &ReplyCodecContext,
        observation_id: ObservationId,
        notification: Notification<RpcValue>,
    ) -> Result<Bytes, GatewayError>;

    /// Decode of a stream value is never supported on this side — streams
    /// only flow out, so no `ReplyCodecContext` is needed for decoding.
    fn decode_client_message(&self, bytes: &[u8]) -> Result<ClientToServer, GatewayError>;
}

/// A `serde_json`-based reference codec, good enough to exercise this
/// crate's integration tests end to end. Production deployments are
/// expected to supply their own wire format.
pub mod json {
    use super::*;
    use serde_json::{json, Value};

    pub struct JsonCodec;

    impl JsonCodec {
        pub fn new() -> Self {
            Self
        }
    }

    impl Default for JsonCodec {
        fn default() -> Self {
            Self::new()
        }
    }

    /// Recursively lowers an `RpcValue` tree to JSON, capturing any stream
    /// leaf (at any nesting depth) through the context as it is encountered.
    /// This is the heart of the "stream discovered implicitly during reply
    /// serialization" contract: a stream nested inside an array or map is
    /// captured exactly the same way a top-level one is.
    fn encode_value(context: &ReplyCodecContext, value: RpcValue) -> Result<Value, GatewayError> {
        match value {
            RpcValue::Null => Ok(Value::Null),
            RpcValue::Bool(b) => Ok(Value::Bool(b)),
            RpcValue::Int(i) => Ok(json!(i)),
            RpcValue::Float(f) => Ok(json!(f)),
            RpcValue::Str(s) => Ok(Value::String(s)),
            RpcValue::Bytes(bytes) => Ok(Value::String(encode_bytes(&bytes))),
            RpcValue::Array(items) => {
                let mut encoded = Vec::with_capacity(items.len());
                for item in items {
                    encoded.push(encode_value(context, item)?);
                }
                Ok(Value::Array(encoded))
            }
            RpcValue::Map(entries) => {
                let mut map = serde_json::Map::with_capacity(entries.len());
                for (key, value) in entries {
                    map.insert(key, encode_value(context, value)?);
                }
                Ok(Value::Object(map))
            }
            RpcValue::Stream(stream) => {
                let id = context.capture_stream(stream)?;
                Ok(json!({ "$observationId": id.get() }))
            }
        }
    }

    fn encode_notification(
        context: &ReplyCodecContext,
        notification: Notification<RpcValue>,
    ) -> Result<Value, GatewayError> {
        Ok(match notification {
            Notification::OnNext(value) => json!({ "onNext": encode_value(context, value)? }),
            Notification::OnError(message) => json!({ "onError": message }),
            Notification::OnCompleted => json!({ "onCompleted": true }),
        })
    }

    fn encode_bytes(bytes: &bytes::Bytes) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    #[async_trait]
    impl Codec for JsonCodec {
        async fn encode_reply(
            &self,
            context: &ReplyCodecContext,
            request_id: RequestId,
            result: Result<RpcValue, RpcError>,
        ) -> Result<Bytes, GatewayError> {
            let body = match result {
                Ok(value) => json!({ "ok": encode_value(context, value)? }),
                Err(error) => json!({ "err": { "code": error.code, "message": error.message } }),
            };
            let envelope = json!({
                "type": "reply",
                "requestId": request_id.get(),
                "result": body,
            });
            serde_json::to_vec(&envelope)
                .map(Bytes::from)
                .map_err(|e| GatewayError::Serialization(e.to_string()))
        }

        async fn encode_observation(
            &self,
            context: &ReplyCodecContext,
            observation_id: ObservationId,
            notification: Notification<RpcValue>,
        ) -> Result<Bytes, GatewayError> {
            let envelope = json!({
                "type": "observation",
                "observationId": observation_id.get(),
                "notification": encode_notification(context, notification)?,
            });
            serde_json::to_vec(&envelope)
                .map(Bytes::from)
                .map_err(|e| GatewayError::Serialization(e.to_string()))
        }

        fn decode_client_message(&self, bytes: &[u8]) -> Result<ClientToServer, GatewayError> {
            let value: Value = serde_json::from_slice(bytes)
                .map_err(|e| GatewayError::Protocol(format!("undecodable message: {e}")))?;
            let message_type = value
                .get("type")
                .and_then(Value::as_str)
                .ok_or_else(|| GatewayError::Protocol("missing `type` field".to_string()))?;
            match message_type {
                "request" => {
                    let request_id = value
                        .get("requestId")
                        .and_then(Value::as_u64)
                        .ok_or_else(|| GatewayError::Protocol("missing `requestId`".to_string()))?;
                    let method = value
                        .get("method")
                        .and_then(Value::as_str)
                        .ok_or_else(|| GatewayError::Protocol("missing `method`".to_string()))?
                        .to_string();
                    let args = value
                        .get("args")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default()
                        .into_iter()
                        .map(RpcValue::from)
                        .collect();
                    let client_address = value
                        .get("clientAddress")
                        .and_then(Value::as_str)
                        .ok_or_else(|| {
                            GatewayError::Protocol("missing `clientAddress`".to_string())
                        })?
                        .to_string();
                    Ok(ClientToServer::Request(crate::protocol::RpcRequest {
                        request_id: RequestId::new(request_id),
                        method,
                        args,
                        client_address: ClientAddress::new(client_address),
                        validated_user: None,
                    }))
                }
                "observablesClosed" => {
                    let ids = value
                        .get("observationIds")
                        .and_then(Value::as_array)
                        .ok_or_else(|| {
                            GatewayError::Protocol("missing `observationIds`".to_string())
                        })?
                        .iter()
                        .filter_map(Value::as_u64)
                        .map(mask_observation_id)
                        .collect();
                    Ok(ClientToServer::ObservablesClosed(ids))
                }
                other => Err(GatewayError::Protocol(format!(
                    "unknown message type `{other}`"
                ))),
            }
        }
    }

    fn mask_observation_id(raw: u64) -> ObservationId {
        // Wire ids are already 63-bit by construction on the server side;
        // this defends only against a malformed peer setting the high bit.
        ObservationId::from_wire(raw)
    }
}
