//! The broker transport boundary. Connection establishment, queue creation
//! and ACK mechanics live entirely on the other side of this trait — out of
//! scope per the design document. This module defines only the interface the
//! gateway needs, plus (in [`memory`]) an in-process test double.

use crate::error::GatewayError;
use crate::ids::ClientAddress;
use async_trait::async_trait;
use bytes::Bytes;

/// A claimed broker session capable of sending to any client address.
/// Operations on one session are serialized against each other by contract —
/// a session is never used concurrently (the Session Pool enforces this).
#[async_trait]
pub trait BrokerSession: Send + Sync {
    async fn send(&self, address: &ClientAddress, payload: Bytes) -> Result<(), GatewayError>;

    async fn close(&self);
}

/// One ingress message plus the means to acknowledge it once dispatch has
/// been scheduled (not awaited — see the Dispatcher's ack policy).
pub struct IngressEnvelope {
    pub validated_user: Option<String>,
    pub body: Bytes,
    ack: Option<Box<dyn FnOnce() + Send>>,
}

impl IngressEnvelope {
    pub fn new(
        validated_user: Option<String>,
        body: Bytes,
        ack: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            validated_user,
            body,
            ack: Some(Box::new(ack)),
        }
    }

    /// Acknowledges the message. Idempotent: a second call is a silent
    /// no-op, which matters because close() may race an in-flight ack.
    pub fn ack(&mut self) {
        if let Some(ack) = self.ack.take() {
            ack();
        }
    }
}

/// A consumer bound to a single broker queue. `consumerPoolSize` of these
/// are created against `RPC_SERVER_QUEUE` at startup.
#[async_trait]
pub trait BrokerConsumer: Send {
    async fn recv(&mut self) -> Option<IngressEnvelope>;

    async fn close(&mut self);
}

/// Liveness of one client egress queue, as observed by the Reaper.
#[derive(Clone, Debug)]
pub struct QueueStatus {
    pub address: ClientAddress,
    pub consumer_count: usize,
}

impl QueueStatus {
    /// A queue with zero consumers exists but nobody is reading it — the
    /// Reaper calls this case "abandoned".
    pub fn is_dead(&self) -> bool {
        self.consumer_count == 0
    }
}

/// The broker transport itself. Out of scope for this crate beyond this
/// trait boundary — production deployments supply their own implementation.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn create_session(&self) -> Result<std::sync::Arc<dyn BrokerSession>, GatewayError>;

    async fn consume(&self, queue: &str) -> Result<Box<dyn BrokerConsumer>, GatewayError>;

    /// Lists every client queue whose address starts with `prefix`, along
    /// with its live consumer count. A queue absent from this list has been
    /// deleted outright (the Reaper calls that case "undeployed").
    async fn client_queues(&self, prefix: &str) -> Result<Vec<QueueStatus>, GatewayError>;
}

/// An in-process [`Broker`] used by this crate's own test suite. Not wired
/// into the public API as a production backend — grounded on the same
/// "mock transport" shape used to exercise contract tests without a live
/// broker.
pub mod memory {
    use super::*;
    use dashmap::DashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    struct ClientQueue {
        sender: mpsc::UnboundedSender<Bytes>,
        consumer_count: Arc<AtomicUsize>,
    }

    /// An in-memory broker: one shared server queue fanned out across
    /// however many consumers are created, and a registry of per-client
    /// queues that tests can attach to, detach from, or delete outright to
    /// simulate the three Reaper scenarios (live, abandoned, undeployed).
    pub struct InMemoryBroker {
        server_queue: Arc<Mutex<mpsc::UnboundedReceiver<IngressEnvelope>>>,
        server_sender: mpsc::UnboundedSender<IngressEnvelope>,
        client_queues: Arc<DashMap<String, ClientQueue>>,
    }

    impl InMemoryBroker {
        pub fn new() -> Arc<Self> {
            let (tx, rx) = mpsc::unbounded_channel();
            Arc::new(Self {
                server_queue: Arc::new(Mutex::new(rx)),
                server_sender: tx,
                client_queues: Arc::new(DashMap::new()),
            })
        }

        /// Pushes a request directly onto the shared server queue, as if a
        /// client had sent it. The returned flag tells a test whether the
        /// gateway has acked the message.
        pub fn push_request(
            &self,
            validated_user: Option<String>,
            body: Bytes,
        ) -> Arc<AtomicAckFlag> {
            let flag = Arc::new(AtomicAckFlag::default());
            let flag_clone = Arc::clone(&flag);
            let envelope = IngressEnvelope::new(validated_user, body, move || {
                flag_clone.0.store(true, Ordering::SeqCst);
            });
            let _ = self.server_sender.send(envelope);
            flag
        }

        /// Registers a client queue with one live consumer and returns a
        /// receiver tests can drain to observe what the gateway sent.
        pub fn attach_client(&self, address: &str) -> mpsc::UnboundedReceiver<Bytes> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.client_queues.insert(
                address.to_string(),
                ClientQueue {
                    sender: tx,
                    consumer_count: Arc::new(AtomicUsize::new(1)),
                },
            );
            rx
        }

        /// Simulates a consumer crash: the queue still exists at the broker
        /// but nobody is reading it ("abandoned").
        pub fn detach_consumer(&self, address: &str) {
            if let Some(entry) = self.client_queues.get(address) {
                entry.consumer_count.store(0, Ordering::SeqCst);
            }
        }

        /// Simulates clean client shutdown: the queue is deleted outright
        /// ("undeployed").
        pub fn delete_queue(&self, address: &str) {
            self.client_queues.remove(address);
        }
    }

    #[derive(Default)]
    pub struct AtomicAckFlag(std::sync::atomic::AtomicBool);

    impl AtomicAckFlag {
        pub fn is_acked(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    struct InMemorySession {
        client_queues: Arc<DashMap<String, ClientQueue>>,
    }

    #[async_trait]
    impl BrokerSession for InMemorySession {
        async fn send(&self, address: &ClientAddress, payload: Bytes) -> Result<(), GatewayError> {
            match self.client_queues.get(address.as_str()) {
                Some(queue) => queue
                    .sender
                    .send(payload)
                    .map_err(|_| GatewayError::Transport(format!("queue `{address}` closed"))),
                None => Err(GatewayError::Transport(format!(
                    "queue `{address}` does not exist"
                ))),
            }
        }

        async fn close(&self) {}
    }

    struct InMemoryConsumer {
        queue: Arc<Mutex<mpsc::UnboundedReceiver<IngressEnvelope>>>,
    }

    #[async_trait]
    impl BrokerConsumer for InMemoryConsumer {
        async fn recv(&mut self) -> Option<IngressEnvelope> {
            // Multiple consumer-pool members share one receiver behind a
            // blocking mutex; only one will win the next message, matching
            // the real broker's exactly-once-delivery-to-one-consumer
            // semantics for a shared queue.
            loop {
                let attempt = {
                    let mut guard = self.queue.lock().expect("in-memory queue mutex poisoned");
                    guard.try_recv()
                };
                match attempt {
                    Ok(envelope) => return Some(envelope),
                    Err(mpsc::error::TryRecvError::Empty) => {
                        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                    }
                    Err(mpsc::error::TryRecvError::Disconnected) => return None,
                }
            }
        }

        async fn close(&mut self) {}
    }

    #[async_trait]
    impl Broker for InMemoryBroker {
        async fn create_session(&self) -> Result<Arc<dyn BrokerSession>, GatewayError> {
            Ok(Arc::new(InMemorySession {
                client_queues: Arc::clone(&self.client_queues),
            }))
        }

        async fn consume(&self, _queue: &str) -> Result<Box<dyn BrokerConsumer>, GatewayError> {
            Ok(Box::new(InMemoryConsumer {
                queue: Arc::clone(&self.server_queue),
            }))
        }

        async fn client_queues(&self, prefix: &str) -> Result<Vec<QueueStatus>, GatewayError> {
            Ok(self
                .client_queues
                .iter()
                .filter(|entry| entry.key().starts_with(prefix))
                .map(|entry| QueueStatus {
                    address: ClientAddress::new(entry.key().clone()),
                    consumer_count: entry.value().consumer_count.load(Ordering::SeqCst),
                })
                .collect())
        }
    }
}
