//! Lifecycle: `Gateway::start`/`Gateway::close`, owning every long-lived
//! task the gateway runs. Mirrors the teacher's built-object-then-explicit-
//! shutdown-coordinator shape (`HostBuilder` → `Host` → graceful shutdown).

use crate::broker::Broker;
use crate::config::GatewayConfig;
use crate::dispatch::Dispatcher;
use crate::error::GatewayError;
use crate::forwarder::ObservationForwarder;
use crate::ingress::IngressPool;
use crate::observability::Metrics;
use crate::pool::SessionPool;
use crate::reaper::Reaper;
use crate::registry::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// How long `close()` waits for in-flight dispatcher work to finish before
/// moving on to tearing down the Session Pool regardless, per the lifecycle
/// contract's 500ms shutdown window.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

struct Running {
    ingress: IngressPool,
    reaper: Reaper,
}

/// The assembled gateway. Inert until [`Gateway::start`] is called; closing
/// an already-closed (or never-started) gateway is a no-op, matching the
/// idempotent-close contract.
pub struct Gateway {
    config: GatewayConfig,
    broker: Arc<dyn Broker>,
    registry: Arc<Registry>,
    pool: Arc<SessionPool>,
    #[allow(dead_code)]
    forwarder: Arc<ObservationForwarder>,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<Metrics>,
    running: Mutex<Option<Running>>,
}

impl Gateway {
    pub(crate) fn new(
        config: GatewayConfig,
        broker: Arc<dyn Broker>,
        registry: Arc<Registry>,
        pool: Arc<SessionPool>,
        forwarder: Arc<ObservationForwarder>,
        dispatcher: Arc<Dispatcher>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            broker,
            registry,
            pool,
            forwarder,
            dispatcher,
            metrics,
            running: Mutex::new(None),
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Starts the Reaper and the ingress consumer pool. Calling `start` a
    /// second time before `close` is a lifecycle error — the gateway does
    /// not support being started twice concurrently.
    pub async fn start(&self) -> Result<(), GatewayError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(GatewayError::Lifecycle(
                "gateway is already running".to_string(),
            ));
        }

        let reaper = Reaper::start(
            Arc::clone(&self.broker),
            Arc::clone(&self.registry),
            Arc::clone(&self.pool),
            Arc::clone(&self.metrics),
            Duration::from_millis(self.config.reap_interval_ms),
        );

        let ingress = IngressPool::start(
            Arc::clone(&self.broker),
            Arc::clone(&self.dispatcher),
            self.config.consumer_pool_size,
        )
        .await?;

        *running = Some(Running { ingress, reaper });
        tracing::info!(
            consumer_pool_size = self.config.consumer_pool_size,
            reap_interval_ms = self.config.reap_interval_ms,
            "gateway started"
        );
        Ok(())
    }

    /// Shuts down in the order the lifecycle contract specifies:
    /// 1. cancel the reaper and run one final reap pass so every
    ///    subscription's cancel-handle is invoked;
    /// 2. wait briefly for in-flight dispatch work to finish;
    /// 3. close every ingress consumer and its session;
    /// 4. drain the Session Pool.
    ///
    /// Idempotent: a second call, or a call on a gateway that was never
    /// started, is a silent no-op.
    pub async fn close(&self) {
        let running = self.running.lock().await.take();
        let Some(running) = running else {
            return;
        };

        running
            .reaper
            .close(
                Arc::clone(&self.broker),
                Arc::clone(&self.registry),
                Arc::clone(&self.pool),
                Arc::clone(&self.metrics),
            )
            .await;

        self.dispatcher.wait_for_idle(SHUTDOWN_DRAIN_TIMEOUT).await;

        running.ingress.close().await;
        self.pool.close().await;

        tracing::info!("gateway closed");
    }
}
