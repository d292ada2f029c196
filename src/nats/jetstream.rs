use crate::bus::{
    Acker, InboundMessage, MessageHandler, PumpSubscription, StartPosition, StreamConnection,
    StreamSubscribeOptions, Subscription,
};
use crate::config::StreamConnectionConfig;
use crate::nats::client::connect_options;
use anyhow::{anyhow, Context, Result};
use async_nats::connection::State;
use async_nats::jetstream::{self, consumer, stream};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// JetStream connection bound to one stream
pub struct JetStreamBus {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    config: StreamConnectionConfig,
}

impl JetStreamBus {
    /// Connect to NATS and initialize JetStream
    pub async fn connect(config: &StreamConnectionConfig) -> Result<Self> {
        info!(connection = %config.name, servers = ?config.servers, "Connecting to JetStream");

        let client = connect_options(&config.name, config.connect_timeout())
            .connect(config.servers.join(","))
            .await
            .with_context(|| format!("Failed to connect stream connection '{}'", config.name))?;

        let jetstream = jetstream::new(client.clone());

        let bus = Self {
            client,
            jetstream,
            config: config.clone(),
        };

        bus.ensure_stream().await?;

        Ok(bus)
    }

    /// Ensure JetStream stream exists with proper configuration
    async fn ensure_stream(&self) -> Result<()> {
        info!(stream = %self.config.stream_name, "Ensuring JetStream stream exists");

        if self.jetstream.get_stream(&self.config.stream_name).await.is_ok() {
            info!(stream = %self.config.stream_name, "Stream already exists");
            return Ok(());
        }

        let stream_config = stream::Config {
            name: self.config.stream_name.clone(),
            subjects: self.config.stream_subjects.clone(),
            max_age: self.config.max_age(),
            max_bytes: self.config.max_bytes,
            storage: stream::StorageType::File,
            retention: stream::RetentionPolicy::Limits,
            ..Default::default()
        };

        self.jetstream
            .create_stream(stream_config)
            .await
            .context("Failed to create JetStream stream")?;

        info!(stream = %self.config.stream_name, "Created JetStream stream");
        Ok(())
    }

    /// Get JetStream context
    pub fn jetstream(&self) -> &jetstream::Context {
        &self.jetstream
    }
}

/// Translate a starting position into a consumer deliver policy
pub fn deliver_policy(start: StartPosition) -> Result<consumer::DeliverPolicy> {
    Ok(match start {
        StartPosition::All => consumer::DeliverPolicy::All,
        StartPosition::LastReceived => consumer::DeliverPolicy::Last,
        StartPosition::Sequence(start_sequence) => {
            consumer::DeliverPolicy::ByStartSequence { start_sequence }
        }
        StartPosition::Time(t) => consumer::DeliverPolicy::ByStartTime {
            start_time: time::OffsetDateTime::from_unix_timestamp(t.timestamp())
                .context("Failed to convert start time")?,
        },
    })
}

struct JetStreamAcker(jetstream::Message);

#[async_trait]
impl Acker for JetStreamAcker {
    async fn ack(&self) -> Result<()> {
        self.0
            .ack()
            .await
            .map_err(|e| anyhow!("Failed to acknowledge message: {}", e))
    }
}

#[async_trait]
impl StreamConnection for JetStreamBus {
    fn is_healthy(&self) -> bool {
        self.client.connection_state() == State::Connected
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()> {
        self.jetstream
            .publish(channel.to_string(), payload)
            .await
            .with_context(|| format!("Failed to publish to channel '{}'", channel))?
            .await
            .context("Failed to await publish ack")?;
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
        options: StreamSubscribeOptions,
        handler: MessageHandler,
    ) -> Result<Box<dyn Subscription>> {
        let stream = self
            .jetstream
            .get_stream(&self.config.stream_name)
            .await
            .with_context(|| format!("Failed to get stream '{}'", self.config.stream_name))?;

        let consumer_config = consumer::pull::Config {
            durable_name: options.durable_name.clone(),
            filter_subject: channel.to_string(),
            deliver_policy: deliver_policy(options.start)?,
            ack_policy: if options.manual_ack {
                consumer::AckPolicy::Explicit
            } else {
                consumer::AckPolicy::None
            },
            ack_wait: options.ack_wait.unwrap_or_else(|| self.config.ack_wait()),
            ..Default::default()
        };

        let consumer = match &options.durable_name {
            Some(durable) => stream
                .get_or_create_consumer(durable, consumer_config)
                .await
                .with_context(|| format!("Failed to get or create consumer '{}'", durable))?,
            None => stream
                .create_consumer(consumer_config)
                .await
                .context("Failed to create consumer")?,
        };
        let consumer_name = consumer.cached_info().name.clone();
        let mut messages = consumer
            .messages()
            .await
            .context("Failed to open consumer message stream")?;

        debug!(channel = %channel, consumer = %consumer_name, "JetStream consumer created");

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let manual_ack = options.manual_ack;
        let ephemeral = options.durable_name.is_none();
        let task = tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = &mut stop_rx => break,
                    next = messages.next() => match next {
                        Some(Ok(m)) => m,
                        Some(Err(e)) => {
                            warn!(consumer = %consumer_name, error = %e, "Error receiving message");
                            continue;
                        }
                        None => break,
                    },
                };

                let sequence = match message.info() {
                    Ok(info) => Some(info.stream_sequence),
                    Err(e) => {
                        error!(error = %e, "Failed to get message info");
                        None
                    }
                };
                let subject = message.subject.to_string();
                let payload = message.payload.clone();
                let inbound = if manual_ack {
                    InboundMessage::with_acker(
                        subject,
                        payload,
                        sequence,
                        Box::new(JetStreamAcker(message)),
                    )
                } else {
                    InboundMessage::new(subject, payload)
                };
                handler(inbound).await;
            }

            if ephemeral {
                stream
                    .delete_consumer(&consumer_name)
                    .await
                    .with_context(|| format!("Failed to delete consumer '{}'", consumer_name))?;
            }
            Ok::<(), anyhow::Error>(())
        });

        Ok(Box::new(PumpSubscription::new(stop_tx, task)))
    }

    async fn close(&self) -> Result<()> {
        info!(connection = %self.config.name, "Closing stream connection");
        self.client
            .flush()
            .await
            .with_context(|| format!("Failed to flush stream connection '{}'", self.config.name))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    #[test]
    fn test_deliver_policy_translation() {
        assert!(matches!(
            deliver_policy(StartPosition::All).unwrap(),
            consumer::DeliverPolicy::All
        ));
        assert!(matches!(
            deliver_policy(StartPosition::LastReceived).unwrap(),
            consumer::DeliverPolicy::Last
        ));
        assert!(matches!(
            deliver_policy(StartPosition::Sequence(7)).unwrap(),
            consumer::DeliverPolicy::ByStartSequence { start_sequence: 7 }
        ));

        let t = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        match deliver_policy(StartPosition::Time(t)).unwrap() {
            consumer::DeliverPolicy::ByStartTime { start_time } => {
                assert_eq!(start_time.unix_timestamp(), 1_700_000_000);
            }
            other => panic!("unexpected policy {:?}", other),
        }
    }
}
