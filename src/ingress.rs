//! Ingress Consumers: `consumerPoolSize` broker consumers bound to the
//! single well-known server queue, each feeding the shared Dispatcher.
//! Ordering between distinct requests is not preserved — only per-stream
//! observation order, which the Forwarder guarantees independently.

use crate::broker::{Broker, BrokerConsumer};
use crate::dispatch::Dispatcher;
use crate::error::GatewayError;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

const RPC_SERVER_QUEUE: &str = "RPC_SERVER_QUEUE";

/// One running consumer task plus the handle needed to stop it at shutdown.
struct ConsumerTask {
    join: JoinHandle<()>,
    consumer: Arc<Mutex<Box<dyn BrokerConsumer>>>,
}

/// Owns the pool of ingress consumer tasks for the gateway's lifetime.
pub struct IngressPool {
    tasks: Vec<ConsumerTask>,
}

impl IngressPool {
    /// Creates `consumer_pool_size` consumers against the well-known server
    /// queue and starts one task per consumer, each delegating every message
    /// it receives to `dispatcher`.
    pub async fn start(
        broker: Arc<dyn Broker>,
        dispatcher: Arc<Dispatcher>,
        consumer_pool_size: usize,
    ) -> Result<Self, GatewayError> {
        let mut tasks = Vec::with_capacity(consumer_pool_size.max(1));
        for _ in 0..consumer_pool_size.max(1) {
            let consumer = broker.consume(RPC_SERVER_QUEUE).await?;
            let consumer = Arc::new(Mutex::new(consumer));
            let loop_consumer = Arc::clone(&consumer);
            let loop_dispatcher = Arc::clone(&dispatcher);
            let join = tokio::spawn(async move {
                loop {
                    let next = { loop_consumer.lock().await.recv().await };
                    match next {
                        Some(envelope) => loop_dispatcher.handle(envelope),
                        None => break,
                    }
                }
            });
            tasks.push(ConsumerTask { join, consumer });
        }
        Ok(Self { tasks })
    }

    /// Stops every consumer task and closes its underlying broker consumer.
    /// Messages arriving after this point but before the broker side
    /// acknowledges closure are silently dropped, matching the lifecycle
    /// contract.
    pub async fn close(self) {
        for task in self.tasks {
            task.join.abort();
            task.consumer.lock().await.close().await;
        }
    }
}
