use crate::error::ConnectorError;
use futures::FutureExt;
use replicator::config::{ConnectionKind, ConnectorConfig};
use replicator::{
    InboundMessage, MessageHandler, NatsConnection, Stats, StreamConnection,
    StreamSubscribeOptions, Subscription,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

/// What a connector needs from the bridge that owns it.
///
/// Connectors never hold connections; they resolve them by name on every use
/// through this capability. Implemented by the supervisor.
pub trait ConnectorHost: Send + Sync {
    fn nats(&self, name: &str) -> Option<Arc<dyn NatsConnection>>;

    fn stream(&self, name: &str) -> Option<Arc<dyn StreamConnection>>;

    /// Whether `name` is a `kind` connection that is usable right now
    fn check(&self, kind: ConnectionKind, name: &str) -> bool;

    /// Surface a connector-level failure. Must not block the caller.
    fn connector_error(&self, connector_id: &str, error: ConnectorError);
}

fn plane_label(kind: ConnectionKind) -> &'static str {
    match kind {
        ConnectionKind::Nats => "NATS",
        ConnectionKind::Stream => "Stream",
    }
}

/// One forwarding path from a source channel to a destination channel.
///
/// The four bus pairs share this type; [`ConnectorConfig::connector_type`]
/// decides which plane each side binds to and how subscribe options are
/// built.
///
/// # Lifecycle
/// `stopped → start() → running → shutdown() → stopped`. The subscription
/// handle is present exactly while running and is only touched under the
/// connector's own lock. Calling `start` on a running connector is a no-op.
pub struct Connector {
    id: String,
    description: String,
    config: ConnectorConfig,
    host: Arc<dyn ConnectorHost>,
    stats: Arc<Stats>,
    subscription: Mutex<Option<Box<dyn Subscription>>>,
}

impl Connector {
    pub fn new(config: ConnectorConfig, host: Arc<dyn ConnectorHost>) -> Self {
        let description = format!(
            "{}:{} to {}:{}",
            plane_label(config.connector_type.incoming()),
            config.incoming_channel,
            plane_label(config.connector_type.outgoing()),
            config.outgoing_channel
        );
        let stats = Arc::new(Stats::new(description.clone(), config.id.clone()));
        Self {
            id: config.id.clone(),
            description,
            config,
            host,
            stats,
            subscription: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-readable route, e.g. `Stream:orders.in to NATS:orders.out`
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub async fn is_running(&self) -> bool {
        self.subscription.lock().await.is_some()
    }

    /// The first required setting that is empty, if any
    pub fn missing_setting(&self) -> Option<&'static str> {
        let c = &self.config;
        [
            ("incoming_connection", &c.incoming_connection),
            ("outgoing_connection", &c.outgoing_connection),
            ("incoming_channel", &c.incoming_channel),
            ("outgoing_channel", &c.outgoing_channel),
        ]
        .into_iter()
        .find(|(_, value)| value.is_empty())
        .map(|(setting, _)| setting)
    }

    fn unavailable(&self, kind: ConnectionKind, connection: &str) -> ConnectorError {
        ConnectorError::ConnectionUnavailable {
            connector: self.description.clone(),
            kind,
            connection: connection.to_string(),
        }
    }

    /// Subscribe to the source channel and begin forwarding.
    ///
    /// Fails without creating a subscription when a setting is missing or
    /// either named connection is unavailable. Subscribe errors are returned
    /// untouched.
    pub async fn start(&self) -> Result<(), ConnectorError> {
        let mut subscription = self.subscription.lock().await;

        if subscription.is_some() {
            debug!(connector = %self.id, "Connector already running, start ignored");
            return Ok(());
        }

        if let Some(setting) = self.missing_setting() {
            return Err(ConnectorError::Misconfigured {
                connector: self.description.clone(),
                setting,
            });
        }
        self.check_connections()?;

        trace!(connector = %self.id, "Starting connection {}", self.description);

        let forwarder = Arc::new(Forwarder {
            id: self.id.clone(),
            description: self.description.clone(),
            kind: self.config.connector_type.outgoing(),
            connection: self.config.outgoing_connection.clone(),
            channel: self.config.outgoing_channel.clone(),
            host: Arc::clone(&self.host),
            stats: Arc::clone(&self.stats),
        });
        let handler: MessageHandler = Arc::new(move |msg: InboundMessage| {
            let forwarder = Arc::clone(&forwarder);
            async move { forwarder.forward(msg).await }.boxed()
        });

        let incoming = &self.config.incoming_connection;
        let channel = &self.config.incoming_channel;
        let sub = match self.config.connector_type.incoming() {
            ConnectionKind::Nats => {
                let nc = self
                    .host
                    .nats(incoming)
                    .ok_or_else(|| self.unavailable(ConnectionKind::Nats, incoming))?;
                nc.subscribe(channel, self.config.incoming_queue_name.as_deref(), handler)
                    .await?
            }
            ConnectionKind::Stream => {
                let sc = self
                    .host
                    .stream(incoming)
                    .ok_or_else(|| self.unavailable(ConnectionKind::Stream, incoming))?;
                let options = StreamSubscribeOptions {
                    start: self.config.start_position(),
                    durable_name: self.config.incoming_durable_name.clone(),
                    manual_ack: true,
                    ack_wait: None,
                };
                sc.subscribe(channel, options, handler).await?
            }
        };

        *subscription = Some(sub);
        self.stats.add_connect();

        trace!(connector = %self.id, channel = %channel, "Opened and reading");
        info!(connector = %self.id, "Started connection {}", self.description);
        Ok(())
    }

    /// Stop forwarding. Unsubscribe errors are logged, never returned.
    pub async fn shutdown(&self) -> Result<(), ConnectorError> {
        let sub = {
            let mut subscription = self.subscription.lock().await;
            let sub = subscription.take();
            if sub.is_some() {
                self.stats.add_disconnect();
                info!(connector = %self.id, "Shutting down connection {}", self.description);
            }
            sub
        };

        if let Some(sub) = sub {
            if let Err(e) = sub.unsubscribe().await {
                warn!(
                    connector = %self.id,
                    error = %e,
                    "Error unsubscribing for {}", self.description
                );
            }
        }
        Ok(())
    }

    /// Verify both named connections are usable. Takes no connector lock.
    pub fn check_connections(&self) -> Result<(), ConnectorError> {
        let incoming_kind = self.config.connector_type.incoming();
        if !self.host.check(incoming_kind, &self.config.incoming_connection) {
            return Err(self.unavailable(incoming_kind, &self.config.incoming_connection));
        }

        let outgoing_kind = self.config.connector_type.outgoing();
        if !self.host.check(outgoing_kind, &self.config.outgoing_connection) {
            return Err(self.unavailable(outgoing_kind, &self.config.outgoing_connection));
        }
        Ok(())
    }
}

/// State shared by every invocation of a connector's delivery callback.
///
/// Immutable apart from `stats`, which synchronizes itself, so concurrent
/// invocations need no further coordination.
struct Forwarder {
    id: String,
    description: String,
    kind: ConnectionKind,
    connection: String,
    channel: String,
    host: Arc<dyn ConnectorHost>,
    stats: Arc<Stats>,
}

impl Forwarder {
    /// Publish one message to the destination, then acknowledge the source.
    ///
    /// The source message is acknowledged only after the destination accepted
    /// it. On any failure before that it is left unacknowledged so the source
    /// redelivers it.
    async fn forward(&self, msg: InboundMessage) {
        let start = Instant::now();
        let len = msg.payload.len() as u64;

        trace!(
            connector = %self.id,
            sequence = ?msg.sequence,
            "{} received message", self.description
        );

        let published = match self.kind {
            ConnectionKind::Nats => match self.host.nats(&self.connection) {
                Some(nc) => nc.publish(&self.channel, msg.payload.clone()).await,
                None => return self.destination_missing(),
            },
            ConnectionKind::Stream => match self.host.stream(&self.connection) {
                Some(sc) => sc.publish(&self.channel, msg.payload.clone()).await,
                None => return self.destination_missing(),
            },
        };

        if let Err(e) = published {
            self.stats.add_message_in(len);
            warn!(
                connector = %self.id,
                error = %e,
                "Connector publish failure, {}", self.description
            );
            return;
        }

        trace!(connector = %self.id, "{} wrote message", self.description);

        if let Err(e) = msg.ack().await {
            // Forwarded already; the source will redeliver and we may duplicate
            warn!(connector = %self.id, error = %e, "Failed to acknowledge message");
        } else {
            trace!(connector = %self.id, "{} acked message", self.description);
        }

        self.stats.add_request(len, len, start.elapsed());
    }

    fn destination_missing(&self) {
        self.host.connector_error(
            &self.id,
            ConnectorError::ConnectionUnavailable {
                connector: self.description.clone(),
                kind: self.kind,
                connection: self.connection.clone(),
            },
        );
    }
}
