//! Gateway configuration: the four tunables the design document names, each
//! validated positive. Scaled to the teacher's layered-configuration spirit
//! without importing its full multi-source engine — four knobs do not
//! warrant one.

use crate::error::GatewayError;
use std::sync::Arc;

/// Validated gateway configuration. Construct via [`GatewayConfigBuilder`] or
/// [`GatewayConfig::from_env`]; there is no public way to hold an
/// unvalidated instance.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub rpc_thread_pool_size: usize,
    pub consumer_pool_size: usize,
    pub producer_pool_bound: usize,
    pub reap_interval_ms: u64,
    pub legal_name: Arc<str>,
}

impl GatewayConfig {
    pub fn builder(legal_name: impl Into<Arc<str>>) -> GatewayConfigBuilder {
        GatewayConfigBuilder {
            rpc_thread_pool_size: 4,
            consumer_pool_size: 1,
            producer_pool_bound: 4,
            reap_interval_ms: 1000,
            legal_name: legal_name.into(),
        }
    }

    /// Reads the same four knobs from the process environment
    /// (`GATEWAY_RPC_THREAD_POOL_SIZE`, `GATEWAY_CONSUMER_POOL_SIZE`,
    /// `GATEWAY_PRODUCER_POOL_BOUND`, `GATEWAY_REAP_INTERVAL_MS`), falling
    /// back to the documented defaults for any variable that is unset.
    /// `GATEWAY_LEGAL_NAME` is required.
    pub fn from_env() -> Result<Self, GatewayError> {
        let legal_name = std::env::var("GATEWAY_LEGAL_NAME").map_err(|_| {
            GatewayError::Protocol("GATEWAY_LEGAL_NAME must be set".to_string())
        })?;
        let mut builder = Self::builder(legal_name);
        if let Ok(value) = std::env::var("GATEWAY_RPC_THREAD_POOL_SIZE") {
            builder = builder.rpc_thread_pool_size(parse_positive(&value)?);
        }
        if let Ok(value) = std::env::var("GATEWAY_CONSUMER_POOL_SIZE") {
            builder = builder.consumer_pool_size(parse_positive(&value)?);
        }
        if let Ok(value) = std::env::var("GATEWAY_PRODUCER_POOL_BOUND") {
            builder = builder.producer_pool_bound(parse_positive(&value)?);
        }
        if let Ok(value) = std::env::var("GATEWAY_REAP_INTERVAL_MS") {
            builder = builder.reap_interval_ms(parse_positive_u64(&value)?);
        }
        builder.build()
    }
}

fn parse_positive(value: &str) -> Result<usize, GatewayError> {
    value
        .parse::<usize>()
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| GatewayError::Protocol(format!("expected a positive integer, got `{value}`")))
}

fn parse_positive_u64(value: &str) -> Result<u64, GatewayError> {
    value
        .parse::<u64>()
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| GatewayError::Protocol(format!("expected a positive integer, got `{value}`")))
}

/// Programmatic builder mirroring the teacher's `HostBuilder` shape: set
/// only what differs from the documented defaults, then `build()`.
pub struct GatewayConfigBuilder {
    rpc_thread_pool_size: usize,
    consumer_pool_size: usize,
    producer_pool_bound: usize,
    reap_interval_ms: u64,
    legal_name: Arc<str>,
}

impl GatewayConfigBuilder {
    pub fn rpc_thread_pool_size(mut self, value: usize) -> Self {
        self.rpc_thread_pool_size = value;
        self
    }

    pub fn consumer_pool_size(mut self, value: usize) -> Self {
        self.consumer_pool_size = value;
        self
    }

    pub fn producer_pool_bound(mut self, value: usize) -> Self {
        self.producer_pool_bound = value;
        self
    }

    pub fn reap_interval_ms(mut self, value: u64) -> Self {
        self.reap_interval_ms = value;
        self
    }

    pub fn build(self) -> Result<GatewayConfig, GatewayError> {
        for (name, value) in [
            ("rpcThreadPoolSize", self.rpc_thread_pool_size as u64),
            ("consumerPoolSize", self.consumer_pool_size as u64),
            ("producerPoolBound", self.producer_pool_bound as u64),
            ("reapIntervalMs", self.reap_interval_ms),
        ] {
            if value == 0 {
                return Err(GatewayError::Protocol(format!("{name} must be positive")));
            }
        }
        Ok(GatewayConfig {
            rpc_thread_pool_size: self.rpc_thread_pool_size,
            consumer_pool_size: self.consumer_pool_size,
            producer_pool_bound: self.producer_pool_bound,
            reap_interval_ms: self.reap_interval_ms,
            legal_name: self.legal_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = GatewayConfig::builder("node-1").build().unwrap();
        assert_eq!(config.rpc_thread_pool_size, 4);
        assert_eq!(config.consumer_pool_size, 1);
        assert_eq!(config.producer_pool_bound, 4);
        assert_eq!(config.reap_interval_ms, 1000);
    }

    #[test]
    fn zero_is_rejected() {
        let err = GatewayConfig::builder("node-1")
            .rpc_thread_pool_size(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, GatewayError::Protocol(_)));
    }
}
