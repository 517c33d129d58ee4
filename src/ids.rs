//! Identifiers threaded through the gateway: request ids chosen by clients,
//! observation ids minted by the server, and the broker routing token naming
//! a client's egress queue.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Opaque 64-bit identifier chosen by the client; unique per client for the
/// duration of a single call. The server never validates uniqueness — that is
/// the client's responsibility, per the wire contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-minted identifier correlating a wire stream with its server-side
/// subscription. Restricted to the low 63 bits by construction so it is
/// representable as the wire's "non-negative 63-bit id".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObservationId(u64);

const OBSERVATION_ID_MASK: u64 = (1u64 << 63) - 1;

impl ObservationId {
    fn from_counter(raw: u64) -> Self {
        Self(raw & OBSERVATION_ID_MASK)
    }

    /// Masks an id read off the wire down to the 63-bit range the server
    /// ever mints, rather than rejecting one a malformed peer sent with the
    /// high bit set.
    pub fn from_wire(raw: u64) -> Self {
        Self(raw & OBSERVATION_ID_MASK)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mints globally-unique [`ObservationId`]s for the lifetime of one gateway
/// process. Negligible collision probability is achieved by never wrapping in
/// practice (a u64 counter at any realistic emission rate outlives the
/// process many times over).
#[derive(Debug, Default)]
pub struct ObservationIdMinter {
    counter: AtomicU64,
}

impl ObservationIdMinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints the next id. Called exactly once per stream value encountered
    /// during reply/observation encoding.
    pub fn mint(&self) -> ObservationId {
        let raw = self.counter.fetch_add(1, Ordering::Relaxed);
        ObservationId::from_counter(raw)
    }
}

/// Opaque routing token naming the broker queue a client owns. Cheap to
/// clone: wraps an `Arc<str>` so it can be threaded through the Registry,
/// Forwarder and Session Pool per emission without re-allocating.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientAddress(Arc<str>);

impl ClientAddress {
    pub fn new(value: impl Into<Arc<str>>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientAddress {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ClientAddress {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observation_ids_are_monotonic_and_63_bit() {
        let minter = ObservationIdMinter::new();
        let a = minter.mint();
        let b = minter.mint();
        assert!(b.get() > a.get());
        assert!(a.get() <= OBSERVATION_ID_MASK);
    }
}
