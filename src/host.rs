//! The host RPC object boundary: an arbitrary named collection of methods
//! the Dispatcher invokes by name. The host itself — what the methods
//! actually do — is external and supplied by the embedding application;
//! this module only owns the name-to-method table and its construction-time
//! collision check.

use crate::error::GatewayError;
use crate::principal::UserPrincipal;
use crate::value::RpcValue;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// One invocation: the resolved caller plus the decoded argument vector.
/// Handed to a [`Method`] by the Dispatcher after ambient context has been
/// installed.
pub struct Invocation {
    pub caller: UserPrincipal,
    pub args: Vec<RpcValue>,
}

/// A single host-exposed RPC method. Implementations may return a stream
/// anywhere in their result's value tree; the codec captures it during reply
/// encoding without the method needing to know about the Registry or
/// Forwarder at all.
#[async_trait]
pub trait Method: Send + Sync {
    async fn invoke(&self, call: Invocation) -> Result<RpcValue, GatewayError>;
}

/// Adapts a plain async closure into a [`Method`], matching the shape most
/// host objects are built from (one closure per exposed operation) rather
/// than requiring a dedicated type per method.
pub struct FnMethod<F>(F);

impl<F, Fut> FnMethod<F>
where
    F: Fn(Invocation) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<RpcValue, GatewayError>> + Send,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> Method for FnMethod<F>
where
    F: Fn(Invocation) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<RpcValue, GatewayError>> + Send,
{
    async fn invoke(&self, call: Invocation) -> Result<RpcValue, GatewayError> {
        (self.0)(call).await
    }
}

/// The name→method table built once at `Gateway` construction. Name
/// collisions are rejected at registration time rather than silently
/// overwriting an earlier entry — overloading by name is not supported.
#[derive(Default)]
pub struct MethodTable {
    methods: HashMap<String, Arc<dyn Method>>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        method: impl Method + 'static,
    ) -> Result<(), GatewayError> {
        let name = name.into();
        if self.methods.contains_key(&name) {
            return Err(GatewayError::DuplicateMethod(name));
        }
        self.methods.insert(name, Arc::new(method));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Method>> {
        self.methods.get(name).cloned()
    }
}

/// An arbitrary host object exposing RPC methods. The builder calls this
/// once at construction time to populate the [`MethodTable`]; nothing else
/// in the crate calls it again afterward.
pub trait RpcHost: Send + Sync {
    fn build_methods(&self, table: &mut MethodTable) -> Result<(), GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut table = MethodTable::new();
        table
            .register("echo", FnMethod::new(|call: Invocation| async move {
                Ok(call.args.into_iter().next().unwrap_or(RpcValue::Null))
            }))
            .unwrap();
        let err = table
            .register("echo", FnMethod::new(|_: Invocation| async move { Ok(RpcValue::Null) }))
            .unwrap_err();
        assert!(matches!(err, GatewayError::DuplicateMethod(name) if name == "echo"));
    }

    #[test]
    fn unknown_method_lookup_is_none() {
        let table = MethodTable::new();
        assert!(table.get("missing").is_none());
    }
}
