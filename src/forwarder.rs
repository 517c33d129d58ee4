//! Observation Forwarder: the single, dedicated, strictly-ordered executor
//! that services every outbound observation send. A per-stream reader task
//! pulls one source stream in its own natural order and pushes each item
//! onto a shared channel; exactly one sender task drains that channel, so
//! two different streams may interleave but neither is ever reordered
//! against itself.

use crate::codec::{Codec, ReplyCodecContext};
use crate::error::{self, GatewayError};
use crate::ids::{ObservationId, ObservationIdMinter, RequestId};
use crate::observability::Metrics;
use crate::pool::SessionPool;
use crate::registry::{CancelHandle, Registry};
use crate::value::{Notification, Observable, RpcValue};
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

struct ForwardItem {
    observation_id: ObservationId,
    request_id: RequestId,
    notification: Notification<RpcValue>,
    cancelled: Arc<AtomicBool>,
}

/// Owns the single ordered sender task and exposes `subscribe` for the codec
/// to call whenever it encounters a stream value.
pub struct ObservationForwarder {
    sender: mpsc::UnboundedSender<ForwardItem>,
    pool: Arc<SessionPool>,
    registry: Arc<Registry>,
    codec: Arc<dyn Codec>,
    minter: Arc<ObservationIdMinter>,
    metrics: Arc<Metrics>,
}

impl ObservationForwarder {
    /// Spawns the dedicated sender task and returns a handle to it. The
    /// sender task runs for the lifetime of the returned `Arc`'s strong
    /// references; dropping the channel sender (which happens when every
    /// `Arc<ObservationForwarder>` is dropped) lets it exit.
    pub fn new(
        pool: Arc<SessionPool>,
        registry: Arc<Registry>,
        codec: Arc<dyn Codec>,
        minter: Arc<ObservationIdMinter>,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<ForwardItem>();
        let forwarder = Arc::new(Self {
            sender,
            pool,
            registry,
            codec,
            minter,
            metrics,
        });
        let worker = Arc::clone(&forwarder);
        tokio::spawn(async move {
            while let Some(item) = receiver.recv().await {
                worker.deliver(item).await;
            }
        });
        forwarder
    }

    async fn deliver(self: &Arc<Self>, item: ForwardItem) {
        if item.cancelled.load(Ordering::SeqCst) {
            return;
        }
        let ForwardItem {
            observation_id,
            request_id,
            notification,
            ..
        } = item;
        let client_address = match self.registry_address(observation_id) {
            Some(address) => address,
            // Already invalidated between enqueue and delivery; nothing to do.
            None => return,
        };
        let context = ReplyCodecContext::new(
            request_id,
            client_address.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.pool),
            self.self_handle(),
            Arc::clone(&self.minter),
        );
        let encoded = match self
            .codec
            .encode_observation(&context, observation_id, notification)
            .await
        {
            Ok(bytes) => bytes,
            Err(err) => {
                error::log_dropped(None, &err);
                return;
            }
        };
        let slot = match self.pool.claim_sticky(request_id).await {
            Ok(slot) => slot,
            Err(err) => {
                error::log_dropped(None, &err);
                return;
            }
        };
        match slot.send(&client_address, encoded).await {
            Ok(()) => self.metrics.observations_sent.increment(),
            Err(err) => error::log_dropped(None, &err),
        }
        // Terminal delivery does not remove the registry entry: the client
        // owns that decision via ObservablesClosed, or the reaper collects it.
    }

    fn registry_address(&self, id: ObservationId) -> Option<crate::ids::ClientAddress> {
        self.registry.address_of(id)
    }

    fn self_handle(self: &Arc<Self>) -> Arc<ObservationForwarder> {
        Arc::clone(self)
    }

    /// Subscribes to `stream`, registering `observation_id` against
    /// `client_address` and spawning the dedicated reader task that drains
    /// it in order onto the shared sender channel.
    pub fn subscribe(
        self: &Arc<Self>,
        observation_id: ObservationId,
        request_id: RequestId,
        client_address: crate::ids::ClientAddress,
        stream: Observable,
    ) -> Result<(), GatewayError> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let sender = self.sender.clone();
        let cancelled_for_task = Arc::clone(&cancelled);
        let join = tokio::spawn(async move {
            let mut stream = stream.into_inner();
            while let Some(notification) = stream.next().await {
                let terminal = matches!(
                    notification,
                    Notification::OnCompleted | Notification::OnError(_)
                );
                let item = ForwardItem {
                    observation_id,
                    request_id,
                    notification,
                    cancelled: Arc::clone(&cancelled_for_task),
                };
                if sender.send(item).is_err() {
                    break;
                }
                if terminal {
                    break;
                }
            }
        });
        let cancel = CancelHandle::new(join.abort_handle(), cancelled);
        self.registry.insert(observation_id, client_address, cancel)
    }
}
