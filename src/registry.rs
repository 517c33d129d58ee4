//! Subscription Registry: the single authority mapping a live
//! [`ObservationId`] to the client address it streams to and the handle that
//! cancels its subscription. Grounded on the DashMap-backed storage pattern
//! of the teacher's session manager, with one structural difference this
//! module's invariant requires: removal is never exposed as a bare map
//! operation, only through methods that drive the cancel-handle first.

use crate::error::GatewayError;
use crate::ids::{ClientAddress, ObservationId};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cancels the reader task backing one subscription. Calling `cancel` more
/// than once is harmless; only the first call has any effect.
#[derive(Clone)]
pub struct CancelHandle {
    abort: tokio::task::AbortHandle,
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new(abort: tokio::task::AbortHandle, cancelled: Arc<AtomicBool>) -> Self {
        Self { abort, cancelled }
    }

    /// Aborts the reader task and marks the subscription cancelled so any
    /// emission already in flight through the forwarder's channel is
    /// recognized as stale and dropped rather than sent.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            self.abort.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// One live subscription: where its emissions go, and how to stop it.
struct SubscriptionRecord {
    client_address: ClientAddress,
    cancel: CancelHandle,
}

/// Maps `ObservationId -> SubscriptionRecord`. The map itself is private;
/// every removal path funnels through [`Registry::invalidate`],
/// [`Registry::invalidate_all`] or [`Registry::close`], each of which calls
/// the record's `CancelHandle` exactly once before the entry leaves the map.
#[derive(Default)]
pub struct Registry {
    entries: DashMap<ObservationId, SubscriptionRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscription. Fails if `id` is already present —
    /// `ObservationId`s are minted fresh per stream, so a collision means a
    /// caller reused one, which is a programming error in this crate.
    pub fn insert(
        &self,
        id: ObservationId,
        client_address: ClientAddress,
        cancel: CancelHandle,
    ) -> Result<(), GatewayError> {
        match self.entries.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(GatewayError::DuplicateObservation(id.get()))
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(SubscriptionRecord {
                    client_address,
                    cancel,
                });
                Ok(())
            }
        }
    }

    pub fn contains(&self, id: ObservationId) -> bool {
        self.entries.contains_key(&id)
    }

    /// The client address a still-live id streams to, or `None` if it has
    /// already been invalidated. Used by the Forwarder to decide where a
    /// queued emission should go without taking a full snapshot.
    pub fn address_of(&self, id: ObservationId) -> Option<ClientAddress> {
        self.entries.get(&id).map(|record| record.client_address.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Idempotent: invalidating an id that is not present is a silent no-op.
    /// For every id actually present, the cancel-handle fires before the
    /// entry is dropped.
    pub fn invalidate(&self, ids: &[ObservationId]) {
        for id in ids {
            if let Some((_, record)) = self.entries.remove(id) {
                record.cancel.cancel();
            }
        }
    }

    /// Drives every live cancel-handle and empties the map. Used by the
    /// Reaper for "undeployed"/"abandoned" queues and by shutdown.
    pub fn invalidate_all(&self) {
        self.entries.retain(|_, record| {
            record.cancel.cancel();
            false
        });
    }

    /// A weakly-consistent snapshot grouping every live id by the client
    /// address it streams to, for the Reaper's reconciliation pass.
    pub fn snapshot(&self) -> std::collections::HashMap<ClientAddress, Vec<ObservationId>> {
        let mut grouped: std::collections::HashMap<ClientAddress, Vec<ObservationId>> =
            std::collections::HashMap::new();
        for entry in self.entries.iter() {
            grouped
                .entry(entry.value().client_address.clone())
                .or_default()
                .push(*entry.key());
        }
        grouped
    }

    /// Advisory: DashMap has no deferred-removal queue to drain, so this is
    /// a no-op reserved for parity with the reconciliation cycle's shape.
    pub fn cleanup(&self) {}

    /// Invalidates everything. Distinct from `invalidate_all` only in name —
    /// kept separate so call sites read as "the registry is closing" rather
    /// than "the reaper is reaping."
    pub fn close(&self) {
        self.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn handle() -> (CancelHandle, tokio::task::JoinHandle<()>) {
        let task = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        });
        let abort = task.abort_handle();
        (CancelHandle::new(abort, Arc::new(AtomicBool::new(false))), task)
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_id() {
        let registry = Registry::new();
        let id = crate::ids::ObservationIdMinter::new().mint();
        let (cancel, _task) = handle();
        registry
            .insert(id, ClientAddress::new("q1"), cancel.clone())
            .unwrap();
        let (cancel2, _task2) = handle();
        let err = registry
            .insert(id, ClientAddress::new("q1"), cancel2)
            .unwrap_err();
        assert!(matches!(err, GatewayError::DuplicateObservation(_)));
    }

    #[tokio::test]
    async fn invalidate_drives_cancel_handle_exactly_once() {
        let registry = Registry::new();
        let id = crate::ids::ObservationIdMinter::new().mint();
        let (cancel, _task) = handle();
        registry
            .insert(id, ClientAddress::new("q1"), cancel.clone())
            .unwrap();
        registry.invalidate(&[id]);
        assert!(cancel.is_cancelled());
        assert!(!registry.contains(id));
        // second invalidate of the same (now absent) id is a no-op, not a
        // second cancel.
        registry.invalidate(&[id]);
    }

    #[tokio::test]
    async fn invalidate_unknown_id_is_noop() {
        let registry = Registry::new();
        let id = crate::ids::ObservationIdMinter::new().mint();
        registry.invalidate(&[id]);
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn snapshot_groups_by_client_address() {
        let registry = Registry::new();
        let ids = crate::ids::ObservationIdMinter::new();
        let a = ids.mint();
        let b = ids.mint();
        let (cancel_a, _ta) = handle();
        let (cancel_b, _tb) = handle();
        registry.insert(a, ClientAddress::new("q1"), cancel_a).unwrap();
        registry.insert(b, ClientAddress::new("q1"), cancel_b).unwrap();
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.get(&ClientAddress::new("q1")).unwrap().len(), 2);
    }
}
