//! Reaper: a periodic task reconciling the Subscription Registry against
//! which client queues the broker actually still has. Two distinct causes
//! are distinguished purely so both get logged with an accurate reason —
//! both end in the same `invalidate` call.

use crate::broker::Broker;
use crate::ids::ClientAddress;
use crate::observability::Metrics;
use crate::pool::SessionPool;
use crate::registry::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const RPC_CLIENT_QUEUE_PREFIX: &str = "RPC_CLIENT_QUEUE_PREFIX.";

/// Owns the reaper's scheduled-interval task.
pub struct Reaper {
    join: JoinHandle<()>,
}

impl Reaper {
    pub fn start(
        broker: Arc<dyn Broker>,
        registry: Arc<Registry>,
        pool: Arc<SessionPool>,
        metrics: Arc<Metrics>,
        interval: Duration,
    ) -> Self {
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so the very first
            // real reap happens one interval after startup, not at t=0.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                reap_once(&broker, &registry, &pool, &metrics).await;
            }
        });
        Self { join }
    }

    /// Cancels the periodic task and runs one final reaping pass so every
    /// subscription still registered at shutdown has its cancel-handle
    /// invoked, as the close() contract requires.
    pub async fn close(
        self,
        broker: Arc<dyn Broker>,
        registry: Arc<Registry>,
        pool: Arc<SessionPool>,
        metrics: Arc<Metrics>,
    ) {
        self.join.abort();
        registry.invalidate_all();
        reap_once(&broker, &registry, &pool, &metrics).await;
    }
}

/// Reaps one cycle. Per spec.md §4.A, the Reaper's broker interaction uses
/// an *anonymous* Session Pool claim — any free pair, no stickiness — rather
/// than talking to the broker outside the pool's accounting entirely.
async fn reap_once(
    broker: &Arc<dyn Broker>,
    registry: &Arc<Registry>,
    pool: &Arc<SessionPool>,
    metrics: &Arc<Metrics>,
) {
    let snapshot = registry.snapshot();
    if snapshot.is_empty() {
        return;
    }
    let _slot = match pool.claim_anonymous().await {
        Ok(slot) => slot,
        Err(err) => {
            crate::error::log_dropped(None, &err);
            return;
        }
    };
    let deployed = match broker.client_queues(RPC_CLIENT_QUEUE_PREFIX).await {
        Ok(statuses) => statuses,
        Err(err) => {
            crate::error::log_dropped(None, &err);
            return;
        }
    };

    let mut deployed_by_address = std::collections::HashMap::new();
    for status in &deployed {
        deployed_by_address.insert(status.address.clone(), status.consumer_count);
    }

    let mut undeployed = 0usize;
    let mut abandoned = 0usize;
    let mut reaped_ids = 0u64;
    for (address, ids) in snapshot {
        match deployed_by_address.get(&address) {
            None => {
                undeployed += 1;
                reaped_ids += ids.len() as u64;
                registry.invalidate(&ids);
            }
            Some(0) => {
                abandoned += 1;
                reaped_ids += ids.len() as u64;
                registry.invalidate(&ids);
            }
            Some(_) => {}
        }
    }

    if undeployed > 0 || abandoned > 0 {
        metrics.subscriptions_reaped.add(reaped_ids);
        tracing::info!(undeployed, abandoned, "reap cycle collected orphaned subscriptions");
    }
    registry.cleanup();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::InMemoryBroker;
    use crate::ids::ObservationIdMinter;
    use crate::registry::CancelHandle;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn reap_invalidates_undeployed_and_abandoned_queues() {
        let broker = InMemoryBroker::new();
        let registry = Arc::new(Registry::new());
        let minter = ObservationIdMinter::new();
        let pool = Arc::new(SessionPool::new(Arc::clone(&broker) as Arc<dyn Broker>, 4));
        let metrics = Arc::new(Metrics::new());

        let _live_rx = broker.attach_client("RPC_CLIENT_QUEUE_PREFIX.live");
        let _abandoned_rx = broker.attach_client("RPC_CLIENT_QUEUE_PREFIX.abandoned");
        broker.detach_consumer("RPC_CLIENT_QUEUE_PREFIX.abandoned");
        // "undeployed" is registered in the subscription registry but never
        // attached at the broker at all.

        let spawn_cancel = || {
            let task = tokio::spawn(async { std::future::pending::<()>().await });
            CancelHandle::new(task.abort_handle(), Arc::new(AtomicBool::new(false)))
        };

        let live_id = minter.mint();
        let abandoned_id = minter.mint();
        let undeployed_id = minter.mint();
        registry
            .insert(live_id, ClientAddress::new("RPC_CLIENT_QUEUE_PREFIX.live"), spawn_cancel())
            .unwrap();
        registry
            .insert(
                abandoned_id,
                ClientAddress::new("RPC_CLIENT_QUEUE_PREFIX.abandoned"),
                spawn_cancel(),
            )
            .unwrap();
        registry
            .insert(
                undeployed_id,
                ClientAddress::new("RPC_CLIENT_QUEUE_PREFIX.undeployed"),
                spawn_cancel(),
            )
            .unwrap();

        let broker_dyn: Arc<dyn Broker> = broker;
        reap_once(&broker_dyn, &registry, &pool, &metrics).await;

        assert!(registry.contains(live_id));
        assert!(!registry.contains(abandoned_id));
        assert!(!registry.contains(undeployed_id));
        assert_eq!(metrics.subscriptions_reaped.get(), 2);
    }
}
