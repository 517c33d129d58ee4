//! `GatewayBuilder`: assembles every component into a running [`Gateway`].
//! Mirrors the teacher's `HostBuilder` closure-based configuration shape —
//! register what differs from the defaults, then `build()` once.

use crate::broker::Broker;
use crate::codec::Codec;
use crate::config::GatewayConfig;
use crate::dispatch::Dispatcher;
use crate::error::GatewayError;
use crate::forwarder::ObservationForwarder;
use crate::host::{MethodTable, RpcHost};
use crate::ids::ObservationIdMinter;
use crate::observability::Metrics;
use crate::pool::SessionPool;
use crate::principal::AuthResolver;
use crate::registry::Registry;
use crate::server::Gateway;
use std::sync::Arc;

pub struct GatewayBuilder {
    config: GatewayConfig,
    broker: Option<Arc<dyn Broker>>,
    codec: Option<Arc<dyn Codec>>,
    auth: Option<Arc<dyn AuthResolver>>,
    host: Option<Arc<dyn RpcHost>>,
}

impl GatewayBuilder {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            broker: None,
            codec: None,
            auth: None,
            host: None,
        }
    }

    pub fn configure_broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn configure_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn configure_auth(mut self, auth: Arc<dyn AuthResolver>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn configure_host(mut self, host: Arc<dyn RpcHost>) -> Self {
        self.host = Some(host);
        self
    }

    /// Assembles every component. Does not start anything yet — the
    /// returned [`Gateway`] is inert until [`Gateway::start`] is called,
    /// mirroring the teacher's built-object-then-explicit-start shape.
    pub fn build(self) -> Result<Gateway, GatewayError> {
        let broker = self
            .broker
            .ok_or_else(|| GatewayError::Protocol("no broker configured".to_string()))?;
        let codec = self
            .codec
            .ok_or_else(|| GatewayError::Protocol("no codec configured".to_string()))?;
        let auth = self
            .auth
            .ok_or_else(|| GatewayError::Protocol("no auth resolver configured".to_string()))?;
        let host = self
            .host
            .ok_or_else(|| GatewayError::Protocol("no RPC host configured".to_string()))?;

        let mut methods = MethodTable::new();
        host.build_methods(&mut methods)?;

        let registry = Arc::new(Registry::new());
        let pool = Arc::new(SessionPool::new(
            Arc::clone(&broker),
            self.config.producer_pool_bound,
        ));
        let minter = Arc::new(ObservationIdMinter::new());
        let metrics = Arc::new(Metrics::new());
        let forwarder = ObservationForwarder::new(
            Arc::clone(&pool),
            Arc::clone(&registry),
            Arc::clone(&codec),
            Arc::clone(&minter),
            Arc::clone(&metrics),
        );
        let dispatcher = Dispatcher::new(
            methods,
            Arc::clone(&pool),
            Arc::clone(&registry),
            Arc::clone(&codec),
            Arc::clone(&forwarder),
            Arc::clone(&minter),
            auth,
            Arc::clone(&self.config.legal_name),
            self.config.rpc_thread_pool_size,
            Arc::clone(&metrics),
        );

        Ok(Gateway::new(
            self.config,
            broker,
            registry,
            pool,
            forwarder,
            dispatcher,
            metrics,
        ))
    }
}
