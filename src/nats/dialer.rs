use crate::bus::{Dialer, NatsConnection, StreamConnection};
use crate::config::{NatsConnectionConfig, StreamConnectionConfig};
use crate::nats::{JetStreamBus, NatsBus};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Dials real NATS servers with async-nats
#[derive(Clone, Debug, Default)]
pub struct NatsDialer;

#[async_trait]
impl Dialer for NatsDialer {
    async fn connect_nats(&self, config: &NatsConnectionConfig) -> Result<Arc<dyn NatsConnection>> {
        Ok(Arc::new(NatsBus::connect(config).await?))
    }

    async fn connect_stream(
        &self,
        config: &StreamConnectionConfig,
    ) -> Result<Arc<dyn StreamConnection>> {
        Ok(Arc::new(JetStreamBus::connect(config).await?))
    }
}
