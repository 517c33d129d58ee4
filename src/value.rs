//! The payload type host methods return. Mirrors a JSON-like value tree but
//! adds a `Stream` leaf so an observation stream can appear at the top level
//! of a reply or nested arbitrarily deep inside an array/map — exactly the
//! shape the codec's stream handler needs to walk recursively.

use futures_util::stream::BoxStream;
use std::fmt;

/// A value flowing through the RPC boundary: either ordinary data or a
/// long-lived observation stream standing in for a value that has not
/// arrived yet.
pub enum RpcValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(bytes::Bytes),
    Array(Vec<RpcValue>),
    Map(Vec<(String, RpcValue)>),
    Stream(Observable),
}

impl fmt::Debug for RpcValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcValue::Null => write!(f, "Null"),
            RpcValue::Bool(b) => write!(f, "Bool({b})"),
            RpcValue::Int(i) => write!(f, "Int({i})"),
            RpcValue::Float(v) => write!(f, "Float({v})"),
            RpcValue::Str(s) => write!(f, "Str({s:?})"),
            RpcValue::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            RpcValue::Array(items) => f.debug_list().entries(items).finish(),
            RpcValue::Map(entries) => f.debug_map().entries(entries.iter().map(|(k, v)| (k, v))).finish(),
            RpcValue::Stream(_) => write!(f, "Stream(..)"),
        }
    }
}

impl From<serde_json::Value> for RpcValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => RpcValue::Null,
            serde_json::Value::Bool(b) => RpcValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    RpcValue::Int(i)
                } else {
                    RpcValue::Float(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(s) => RpcValue::Str(s),
            serde_json::Value::Array(items) => {
                RpcValue::Array(items.into_iter().map(RpcValue::from).collect())
            }
            serde_json::Value::Object(map) => RpcValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, RpcValue::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Uniform materialization of a stream's emissions, regardless of whether the
/// source stream is a success value, an error, or completion.
pub enum Notification<T> {
    OnNext(T),
    OnError(String),
    OnCompleted,
}

impl<T: fmt::Debug> fmt::Debug for Notification<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::OnNext(value) => write!(f, "OnNext({value:?})"),
            Notification::OnError(message) => write!(f, "OnError({message})"),
            Notification::OnCompleted => write!(f, "OnCompleted"),
        }
    }
}

/// A boxed, object-safe observation stream. Host methods construct one from
/// any `Stream<Item = Notification<RpcValue>>` they have to hand.
pub struct Observable(BoxStream<'static, Notification<RpcValue>>);

impl Observable {
    pub fn new<S>(stream: S) -> Self
    where
        S: futures_util::Stream<Item = Notification<RpcValue>> + Send + 'static,
    {
        Self(Box::pin(stream))
    }

    pub(crate) fn into_inner(self) -> BoxStream<'static, Notification<RpcValue>> {
        self.0
    }
}

impl fmt::Debug for Observable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Observable(..)")
    }
}
