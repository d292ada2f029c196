//! Bus capabilities consumed by the bridge.
//!
//! The bridge moves bytes between two planes:
//!
//! ```text
//! ┌──────────────────────┐                    ┌──────────────────────┐
//! │  NatsConnection      │                    │  StreamConnection    │
//! │  (core NATS,         │ ◀── connectors ──▶ │  (JetStream,         │
//! │   at-most-once)      │                    │   durable, replay)   │
//! └──────────────────────┘                    └──────────────────────┘
//! ```
//!
//! Both planes are modelled as opaque capabilities so the connector and
//! supervisor logic never touches a client library directly. The async-nats
//! implementations live in [`crate::nats`], the in-process ones in [`memory`].

pub mod memory;

use crate::config::{NatsConnectionConfig, StreamConnectionConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Time the streaming plane waits for an acknowledgment before redelivering,
/// when neither the subscription nor the connection says otherwise.
pub const DEFAULT_ACK_WAIT: Duration = Duration::from_secs(30);

/// Acknowledges one delivery back to the bus that produced it.
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self) -> Result<()>;
}

/// A message handed to a delivery callback.
///
/// `ack` consumes the message, so a single delivery can be acknowledged at
/// most once. Dropping the message without acknowledging leaves it pending on
/// the source bus, which redelivers it once its ack wait expires.
pub struct InboundMessage {
    pub channel: String,
    pub payload: Bytes,
    /// Stream sequence, if the source plane assigns one.
    pub sequence: Option<u64>,
    acker: Option<Box<dyn Acker>>,
}

impl InboundMessage {
    /// Message from a plane without acknowledgments (core NATS).
    pub fn new(channel: impl Into<String>, payload: Bytes) -> Self {
        Self {
            channel: channel.into(),
            payload,
            sequence: None,
            acker: None,
        }
    }

    /// Message that must be acknowledged through `acker`.
    pub fn with_acker(
        channel: impl Into<String>,
        payload: Bytes,
        sequence: Option<u64>,
        acker: Box<dyn Acker>,
    ) -> Self {
        Self {
            channel: channel.into(),
            payload,
            sequence,
            acker: Some(acker),
        }
    }

    /// Whether the source plane expects an acknowledgment for this delivery.
    pub fn requires_ack(&self) -> bool {
        self.acker.is_some()
    }

    pub async fn ack(self) -> Result<()> {
        match self.acker {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundMessage")
            .field("channel", &self.channel)
            .field("len", &self.payload.len())
            .field("sequence", &self.sequence)
            .field("requires_ack", &self.requires_ack())
            .finish()
    }
}

/// Delivery callback registered with a source bus.
///
/// A bus may invoke the handler from its own dispatch tasks, possibly
/// concurrently; implementations must not assume serialized invocation.
pub type MessageHandler = Arc<dyn Fn(InboundMessage) -> BoxFuture<'static, ()> + Send + Sync>;

/// Live subscription on either plane.
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Stops delivery. In-flight handler invocations are allowed to finish.
    async fn unsubscribe(self: Box<Self>) -> Result<()>;
}

/// A subscription driven by a background task that feeds a handler.
///
/// Stopping waits for the handler invocation in progress, if any, to return.
/// Dropping the handle without unsubscribing also stops the task.
pub(crate) struct PumpSubscription {
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<()>>,
}

impl PumpSubscription {
    pub(crate) fn new(stop: oneshot::Sender<()>, task: JoinHandle<Result<()>>) -> Self {
        Self { stop, task }
    }
}

#[async_trait]
impl Subscription for PumpSubscription {
    async fn unsubscribe(self: Box<Self>) -> Result<()> {
        let PumpSubscription { stop, task } = *self;
        // The task may already have exited on its own
        let _ = stop.send(());
        task.await.context("Subscription task failed")?
    }
}

/// Where a new streaming subscription begins.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartPosition {
    /// Deliver everything the stream still holds.
    All,
    /// Deliver only the most recently stored message, then new ones.
    LastReceived,
    /// Deliver starting at this stream sequence.
    Sequence(u64),
    /// Deliver messages stored at or after this time.
    Time(DateTime<Utc>),
}

impl Default for StartPosition {
    fn default() -> Self {
        StartPosition::All
    }
}

/// Options for a subscription on the streaming plane.
#[derive(Clone, Debug)]
pub struct StreamSubscribeOptions {
    pub start: StartPosition,
    pub durable_name: Option<String>,
    /// When false the bus does not wait for acknowledgments.
    pub manual_ack: bool,
    /// Falls back to the connection's configured ack wait.
    pub ack_wait: Option<Duration>,
}

impl Default for StreamSubscribeOptions {
    fn default() -> Self {
        Self {
            start: StartPosition::All,
            durable_name: None,
            manual_ack: false,
            ack_wait: None,
        }
    }
}

/// The lightweight, at-most-once plane.
#[async_trait]
pub trait NatsConnection: Send + Sync {
    fn is_healthy(&self) -> bool;

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()>;

    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
        handler: MessageHandler,
    ) -> Result<Box<dyn Subscription>>;

    async fn close(&self) -> Result<()>;
}

/// The durable, ordered, replayable plane.
#[async_trait]
pub trait StreamConnection: Send + Sync {
    fn is_healthy(&self) -> bool;

    /// Resolves once the stream has stored the message.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()>;

    async fn subscribe(
        &self,
        channel: &str,
        options: StreamSubscribeOptions,
        handler: MessageHandler,
    ) -> Result<Box<dyn Subscription>>;

    async fn close(&self) -> Result<()>;
}

/// Establishes named connections from configuration.
///
/// The supervisor dials through this trait at start-up and again whenever a
/// named connection is found unhealthy.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn connect_nats(&self, config: &NatsConnectionConfig) -> Result<Arc<dyn NatsConnection>>;

    async fn connect_stream(
        &self,
        config: &StreamConnectionConfig,
    ) -> Result<Arc<dyn StreamConnection>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAcker(Arc<AtomicUsize>);

    #[async_trait]
    impl Acker for CountingAcker {
        async fn ack(&self) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_ack_invokes_acker_once() {
        let acks = Arc::new(AtomicUsize::new(0));
        let msg = InboundMessage::with_acker(
            "orders",
            Bytes::from_static(b"a"),
            Some(1),
            Box::new(CountingAcker(Arc::clone(&acks))),
        );
        assert!(msg.requires_ack());

        msg.ack().await.unwrap();
        assert_eq!(acks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ack_without_acker_is_noop() {
        let msg = InboundMessage::new("orders", Bytes::from_static(b"a"));
        assert!(!msg.requires_ack());
        assert!(msg.ack().await.is_ok());
    }

    #[test]
    fn test_default_subscribe_options() {
        let options = StreamSubscribeOptions::default();
        assert_eq!(options.start, StartPosition::All);
        assert!(!options.manual_ack);
        assert!(options.ack_wait.is_none());
    }
}
