use crate::bus::{InboundMessage, MessageHandler, NatsConnection, PumpSubscription, Subscription};
use crate::config::NatsConnectionConfig;
use anyhow::{Context, Result};
use async_nats::connection::State;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Build client options shared by both planes
pub(crate) fn connect_options(name: &str, timeout: Duration) -> async_nats::ConnectOptions {
    async_nats::ConnectOptions::new()
        .name(name)
        .connection_timeout(timeout)
}

/// Core NATS connection
pub struct NatsBus {
    name: String,
    client: async_nats::Client,
}

impl NatsBus {
    /// Connect to the configured servers
    pub async fn connect(config: &NatsConnectionConfig) -> Result<Self> {
        info!(connection = %config.name, servers = ?config.servers, "Connecting to NATS");

        let client = connect_options(&config.name, config.connect_timeout())
            .max_reconnects(config.max_reconnects)
            .connect(config.servers.join(","))
            .await
            .with_context(|| format!("Failed to connect NATS connection '{}'", config.name))?;

        info!(connection = %config.name, "Connected to NATS");
        Ok(Self {
            name: config.name.clone(),
            client,
        })
    }

    /// Get underlying NATS client
    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }
}

#[async_trait]
impl NatsConnection for NatsBus {
    fn is_healthy(&self) -> bool {
        self.client.connection_state() == State::Connected
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .with_context(|| format!("Failed to publish to subject '{}'", subject))?;
        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
        handler: MessageHandler,
    ) -> Result<Box<dyn Subscription>> {
        let mut subscriber = match queue_group {
            Some(group) => self
                .client
                .queue_subscribe(subject.to_string(), group.to_string())
                .await
                .with_context(|| format!("Failed to queue subscribe to '{}'", subject))?,
            None => self
                .client
                .subscribe(subject.to_string())
                .await
                .with_context(|| format!("Failed to subscribe to '{}'", subject))?,
        };

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let connection = self.name.clone();
        let task = tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = &mut stop_rx => break,
                    next = subscriber.next() => match next {
                        Some(m) => m,
                        None => {
                            debug!(connection = %connection, "NATS subscription closed by server");
                            return Ok(());
                        }
                    },
                };
                handler(InboundMessage::new(message.subject.to_string(), message.payload)).await;
            }

            subscriber
                .unsubscribe()
                .await
                .context("Failed to unsubscribe from NATS")
        });

        Ok(Box::new(PumpSubscription::new(stop_tx, task)))
    }

    async fn close(&self) -> Result<()> {
        info!(connection = %self.name, "Closing NATS connection");
        self.client
            .flush()
            .await
            .with_context(|| format!("Failed to flush NATS connection '{}'", self.name))?;
        Ok(())
    }
}
