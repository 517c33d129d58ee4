//! Caller identity resolved from the broker's validated-user header.
//! Authentication itself is delegated — this module only models the result.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

/// A resolved, permissioned caller. Cheap to clone: both fields are
/// reference-counted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserPrincipal {
    name: Arc<str>,
    permissions: Arc<HashSet<String>>,
}

impl UserPrincipal {
    pub fn new(name: impl Into<Arc<str>>, permissions: HashSet<String>) -> Self {
        Self {
            name: name.into(),
            permissions: Arc::new(permissions),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    /// The special principal recognized when the validated header name
    /// equals the server's own legal identity and no RPC user record exists.
    pub fn node(legal_name: impl Into<Arc<str>>) -> Self {
        Self {
            name: legal_name.into(),
            permissions: Arc::new(HashSet::new()),
        }
    }
}

/// Resolves a validated header name to a permissioned [`UserPrincipal`].
/// Implemented externally (the user-authentication service is out of scope
/// for this crate) and supplied to the gateway at build time.
#[async_trait]
pub trait AuthResolver: Send + Sync {
    /// Resolves `validated_name` to a principal. Returns `None` when the
    /// name is not recognized — the dispatcher turns that into an
    /// `IllegalArgument`/`Authorization` reply error, substituting the NODE
    /// principal first if `validated_name` equals the server's own legal
    /// name and no record exists.
    async fn resolve(&self, validated_name: &str) -> Option<UserPrincipal>;
}

/// An [`AuthResolver`] that only ever recognizes the NODE principal — useful
/// for tests and for single-tenant deployments with no separate user
/// directory.
pub struct NodeOnlyResolver {
    legal_name: Arc<str>,
}

impl NodeOnlyResolver {
    pub fn new(legal_name: impl Into<Arc<str>>) -> Self {
        Self {
            legal_name: legal_name.into(),
        }
    }
}

#[async_trait]
impl AuthResolver for NodeOnlyResolver {
    async fn resolve(&self, validated_name: &str) -> Option<UserPrincipal> {
        if validated_name == &*self.legal_name {
            Some(UserPrincipal::node(Arc::clone(&self.legal_name)))
        } else {
            None
        }
    }
}
