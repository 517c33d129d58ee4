//! A bidirectional RPC gateway that dispatches client-invoked methods onto a
//! host object and multiplexes the reactive observation streams those
//! methods return back to their originating client over a message-broker
//! transport.
//!
//! The request/reply path is the easy half. The hard engineering — and the
//! reason every other module in this crate exists — is the lifecycle and
//! flow-control of server-side observation subscriptions: their existence
//! is discovered implicitly while a reply is being serialized, their
//! delivery targets are per-client broker queues, and they must be reaped
//! once those queues disappear.

pub mod broker;
pub mod builder;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod forwarder;
pub mod host;
pub mod ids;
pub mod ingress;
pub mod observability;
pub mod pool;
pub mod principal;
pub mod protocol;
pub mod reaper;
pub mod registry;
pub mod server;
pub mod value;
mod waitgroup;

pub use builder::GatewayBuilder;
pub use config::{GatewayConfig, GatewayConfigBuilder};
pub use dispatch::current_caller;
pub use error::{GatewayError, RpcError};
pub use host::{FnMethod, Invocation, Method, MethodTable, RpcHost};
pub use ids::{ClientAddress, ObservationId, RequestId};
pub use principal::{AuthResolver, UserPrincipal};
pub use protocol::{ClientToServer, ObservationMessage, RpcReplyResult, RpcRequest};
pub use server::Gateway;
pub use value::{Notification, Observable, RpcValue};
