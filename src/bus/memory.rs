//! In-process implementations of both planes.
//!
//! Used by the test-suites and for wiring a bridge without a NATS server.
//! `MemoryStream` keeps a per-channel log with sequences and timestamps,
//! honours every [`StartPosition`], redelivers unacknowledged messages after
//! the ack wait and remembers durable subscription progress. Both buses can
//! simulate an outage with `set_healthy(false)`.

use crate::bus::{
    Acker, Dialer, InboundMessage, MessageHandler, NatsConnection, PumpSubscription,
    StartPosition, StreamConnection, StreamSubscribeOptions, Subscription, DEFAULT_ACK_WAIT,
};
use crate::config::{NatsConnectionConfig, StreamConnectionConfig};
use anyhow::{bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, trace};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// NATS subject matching with `*` (one token) and `>` (one or more trailing tokens)
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

// ---------------------------------------------------------------------------
// Lightweight plane
// ---------------------------------------------------------------------------

struct NatsSubscriber {
    subject: String,
    queue_group: Option<String>,
    tx: mpsc::UnboundedSender<InboundMessage>,
}

#[derive(Default)]
struct NatsState {
    subscribers: Mutex<BTreeMap<u64, NatsSubscriber>>,
    published: Mutex<Vec<(String, Bytes)>>,
    next_id: AtomicU64,
    queue_cursor: AtomicUsize,
}

/// In-process core NATS: fan-out by subject, queue groups, no persistence
pub struct MemoryNats {
    name: String,
    healthy: AtomicBool,
    fail_publishes: AtomicBool,
    state: Arc<NatsState>,
}

impl MemoryNats {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            healthy: AtomicBool::new(true),
            fail_publishes: AtomicBool::new(false),
            state: Arc::new(NatsState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Simulate the server going away (false) or coming back (true)
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Reject every publish while set
    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// Payloads published on `subject`, in publish order
    pub fn messages(&self, subject: &str) -> Vec<Bytes> {
        lock(&self.state.published)
            .iter()
            .filter(|(s, _)| s == subject)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.state.subscribers).len()
    }
}

#[async_trait]
impl NatsConnection for MemoryNats {
    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        if !self.is_healthy() {
            bail!("NATS connection '{}' is unavailable", self.name);
        }
        if self.fail_publishes.load(Ordering::SeqCst) {
            bail!("NATS connection '{}' rejected publish to '{}'", self.name, subject);
        }

        lock(&self.state.published).push((subject.to_string(), payload.clone()));

        let subscribers = lock(&self.state.subscribers);
        let mut groups: HashMap<&str, Vec<&NatsSubscriber>> = HashMap::new();
        for sub in subscribers.values() {
            if !subject_matches(&sub.subject, subject) {
                continue;
            }
            match &sub.queue_group {
                Some(group) => groups.entry(group.as_str()).or_default().push(sub),
                None => {
                    let _ = sub.tx.send(InboundMessage::new(subject, payload.clone()));
                }
            }
        }
        for members in groups.values() {
            let pick = self.state.queue_cursor.fetch_add(1, Ordering::Relaxed) % members.len();
            let _ = members[pick]
                .tx
                .send(InboundMessage::new(subject, payload.clone()));
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
        handler: MessageHandler,
    ) -> Result<Box<dyn Subscription>> {
        if !self.is_healthy() {
            bail!("NATS connection '{}' is unavailable", self.name);
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.state.subscribers).insert(
            id,
            NatsSubscriber {
                subject: subject.to_string(),
                queue_group: queue_group.map(str::to_string),
                tx,
            },
        );

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let state = Arc::clone(&self.state);
        let task = tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = &mut stop_rx => break,
                    next = rx.recv() => match next {
                        Some(m) => m,
                        None => break,
                    },
                };
                handler(message).await;
            }
            lock(&state.subscribers).remove(&id);
            Ok::<(), anyhow::Error>(())
        });

        Ok(Box::new(PumpSubscription::new(stop_tx, task)))
    }

    async fn close(&self) -> Result<()> {
        self.set_healthy(false);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Streaming plane
// ---------------------------------------------------------------------------

/// Publish and acknowledgment events, in the order the stream saw them
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JournalEntry {
    Published { channel: String, sequence: u64 },
    Acked { channel: String, sequence: u64 },
}

#[derive(Clone)]
struct StoredMessage {
    sequence: u64,
    timestamp: DateTime<Utc>,
    payload: Bytes,
}

#[derive(Default)]
struct Log {
    channels: HashMap<String, Vec<StoredMessage>>,
    /// Durable name -> first sequence to deliver on resume
    durables: HashMap<String, u64>,
}

impl Log {
    fn first_sequence(&self, channel: &str, start: StartPosition) -> u64 {
        let messages = self.channels.get(channel).map(Vec::as_slice).unwrap_or(&[]);
        let last = messages.last().map(|m| m.sequence).unwrap_or(0);
        match start {
            StartPosition::All => 1,
            StartPosition::LastReceived => last.max(1),
            StartPosition::Sequence(seq) => seq.max(1),
            StartPosition::Time(t) => messages
                .iter()
                .find(|m| m.timestamp >= t)
                .map(|m| m.sequence)
                .unwrap_or(last + 1),
        }
    }

    fn get(&self, channel: &str, sequence: u64) -> Option<StoredMessage> {
        let messages = self.channels.get(channel)?;
        // Sequences start at 1 and are contiguous per channel
        messages.get(sequence.checked_sub(1)? as usize).cloned()
    }
}

struct StreamState {
    name: String,
    healthy: AtomicBool,
    fail_publishes: AtomicBool,
    log: Mutex<Log>,
    journal: Mutex<Vec<JournalEntry>>,
    /// Bumped on every publish and health change to wake subscriptions
    changes: watch::Sender<u64>,
}

impl StreamState {
    fn bump(&self) {
        self.changes.send_modify(|n| *n = n.wrapping_add(1));
    }
}

/// Delivered but unacknowledged sequences and their redelivery deadlines
type Pending = Arc<Mutex<BTreeMap<u64, Instant>>>;

struct MemoryAcker {
    state: Arc<StreamState>,
    pending: Pending,
    channel: String,
    sequence: u64,
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(&self) -> Result<()> {
        if !self.state.healthy.load(Ordering::SeqCst) {
            bail!("stream connection '{}' is unavailable", self.state.name);
        }
        if lock(&self.pending).remove(&self.sequence).is_some() {
            lock(&self.state.journal).push(JournalEntry::Acked {
                channel: self.channel.clone(),
                sequence: self.sequence,
            });
        }
        Ok(())
    }
}

/// In-process durable stream: per-channel log, replay and redelivery
pub struct MemoryStream {
    state: Arc<StreamState>,
    ack_wait: Duration,
}

impl MemoryStream {
    pub fn new(name: impl Into<String>) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            state: Arc::new(StreamState {
                name: name.into(),
                healthy: AtomicBool::new(true),
                fail_publishes: AtomicBool::new(false),
                log: Mutex::new(Log::default()),
                journal: Mutex::new(Vec::new()),
                changes,
            }),
            ack_wait: DEFAULT_ACK_WAIT,
        }
    }

    /// Ack wait used when a subscription does not set its own
    pub fn with_ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Simulate the server going away (false) or coming back (true)
    pub fn set_healthy(&self, healthy: bool) {
        self.state.healthy.store(healthy, Ordering::SeqCst);
        self.state.bump();
    }

    /// Reject every publish while set
    pub fn fail_publishes(&self, fail: bool) {
        self.state.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// Payloads stored on `channel`, in sequence order
    pub fn messages(&self, channel: &str) -> Vec<Bytes> {
        lock(&self.state.log)
            .channels
            .get(channel)
            .map(|msgs| msgs.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        lock(&self.state.journal).clone()
    }
}

#[async_trait]
impl StreamConnection for MemoryStream {
    fn is_healthy(&self) -> bool {
        self.state.healthy.load(Ordering::SeqCst)
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()> {
        if !self.is_healthy() {
            bail!("stream connection '{}' is unavailable", self.state.name);
        }
        if self.state.fail_publishes.load(Ordering::SeqCst) {
            bail!(
                "stream connection '{}' rejected publish to '{}'",
                self.state.name,
                channel
            );
        }

        let sequence = {
            let mut log = lock(&self.state.log);
            let messages = log.channels.entry(channel.to_string()).or_default();
            let sequence = messages.len() as u64 + 1;
            messages.push(StoredMessage {
                sequence,
                timestamp: Utc::now(),
                payload,
            });
            // Journal under the log lock so entries follow sequence order
            lock(&self.state.journal).push(JournalEntry::Published {
                channel: channel.to_string(),
                sequence,
            });
            sequence
        };
        trace!(channel = %channel, sequence = sequence, "Stored message");
        self.state.bump();
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
        options: StreamSubscribeOptions,
        handler: MessageHandler,
    ) -> Result<Box<dyn Subscription>> {
        if !self.is_healthy() {
            bail!("stream connection '{}' is unavailable", self.state.name);
        }

        let mut next = {
            let log = lock(&self.state.log);
            match options
                .durable_name
                .as_ref()
                .and_then(|d| log.durables.get(d))
            {
                Some(resume) => *resume,
                None => log.first_sequence(channel, options.start),
            }
        };
        debug!(channel = %channel, start = next, "Memory stream subscription created");

        let ack_wait = options.ack_wait.unwrap_or(self.ack_wait);
        let pending: Pending = Arc::new(Mutex::new(BTreeMap::new()));
        let state = Arc::clone(&self.state);
        let channel = channel.to_string();
        let mut changes = self.state.changes.subscribe();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            loop {
                match stop_rx.try_recv() {
                    Err(oneshot::error::TryRecvError::Empty) => {}
                    _ => break,
                }

                let now = Instant::now();
                let healthy = state.healthy.load(Ordering::SeqCst);
                let due = if healthy {
                    lock(&pending)
                        .iter()
                        .find(|(_, deadline)| **deadline <= now)
                        .map(|(seq, _)| *seq)
                } else {
                    None
                };

                let target = match due {
                    Some(seq) => lock(&state.log).get(&channel, seq),
                    None if healthy => {
                        let stored = lock(&state.log).get(&channel, next);
                        if stored.is_some() {
                            next += 1;
                        }
                        stored
                    }
                    None => None,
                };

                let Some(stored) = target else {
                    let earliest = lock(&pending).values().min().copied();
                    tokio::select! {
                        _ = &mut stop_rx => break,
                        _ = changes.changed() => {}
                        _ = sleep_until(earliest), if healthy => {}
                    }
                    continue;
                };

                let inbound = if options.manual_ack {
                    lock(&pending).insert(stored.sequence, Instant::now() + ack_wait);
                    InboundMessage::with_acker(
                        channel.clone(),
                        stored.payload,
                        Some(stored.sequence),
                        Box::new(MemoryAcker {
                            state: Arc::clone(&state),
                            pending: Arc::clone(&pending),
                            channel: channel.clone(),
                            sequence: stored.sequence,
                        }),
                    )
                } else {
                    let mut inbound = InboundMessage::new(channel.clone(), stored.payload);
                    inbound.sequence = Some(stored.sequence);
                    inbound
                };
                trace!(
                    channel = %channel,
                    sequence = stored.sequence,
                    redelivery = due.is_some(),
                    "Delivering"
                );
                handler(inbound).await;
            }

            if let Some(durable) = options.durable_name {
                let resume = lock(&pending).keys().next().copied().unwrap_or(next).min(next);
                lock(&state.log).durables.insert(durable, resume);
            }
            Ok::<(), anyhow::Error>(())
        });

        Ok(Box::new(PumpSubscription::new(stop_tx, task)))
    }

    async fn close(&self) -> Result<()> {
        self.set_healthy(false);
        Ok(())
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending::<()>().await,
    }
}

// ---------------------------------------------------------------------------
// Dialer
// ---------------------------------------------------------------------------

/// Hands out registered memory connections by configured name
#[derive(Default)]
pub struct MemoryDialer {
    nats: Mutex<HashMap<String, Arc<MemoryNats>>>,
    streams: Mutex<HashMap<String, Arc<MemoryStream>>>,
    refuse: AtomicBool,
    dials: AtomicUsize,
}

impl MemoryDialer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_nats(&self, connection: Arc<MemoryNats>) {
        lock(&self.nats).insert(connection.name().to_string(), connection);
    }

    pub fn add_stream(&self, connection: Arc<MemoryStream>) {
        lock(&self.streams).insert(connection.name().to_string(), connection);
    }

    /// Fail every dial while set
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Dial attempts so far, successful or not
    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for MemoryDialer {
    async fn connect_nats(&self, config: &NatsConnectionConfig) -> Result<Arc<dyn NatsConnection>> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            bail!("dial refused for NATS connection '{}'", config.name);
        }
        let Some(connection) = lock(&self.nats).get(&config.name).cloned() else {
            bail!("no memory NATS server registered as '{}'", config.name);
        };
        if !connection.is_healthy() {
            bail!("memory NATS server '{}' is down", config.name);
        }
        Ok(connection)
    }

    async fn connect_stream(
        &self,
        config: &StreamConnectionConfig,
    ) -> Result<Arc<dyn StreamConnection>> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            bail!("dial refused for stream connection '{}'", config.name);
        }
        let Some(connection) = lock(&self.streams).get(&config.name).cloned() else {
            bail!("no memory stream server registered as '{}'", config.name);
        };
        if !connection.is_healthy() {
            bail!("memory stream server '{}' is down", config.name);
        }
        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use tokio::time::timeout;

    /// Handler that forwards every delivery into a channel for inspection
    fn collecting_handler() -> (MessageHandler, mpsc::UnboundedReceiver<InboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler: MessageHandler = Arc::new(move |msg| {
            let _ = tx.send(msg);
            async {}.boxed()
        });
        (handler, rx)
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<InboundMessage>) -> InboundMessage {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for delivery")
            .expect("handler channel closed")
    }

    fn manual(start: StartPosition) -> StreamSubscribeOptions {
        StreamSubscribeOptions {
            start,
            manual_ack: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_subject_matching() {
        assert!(subject_matches("orders.in", "orders.in"));
        assert!(subject_matches("orders.*", "orders.in"));
        assert!(subject_matches("orders.>", "orders.in.eu"));
        assert!(!subject_matches("orders.*", "orders.in.eu"));
        assert!(!subject_matches("orders.>", "orders"));
        assert!(!subject_matches("orders.in", "orders.out"));
    }

    #[tokio::test]
    async fn test_nats_fan_out_and_queue_groups() {
        let bus = MemoryNats::new("nats");
        let (h1, mut rx1) = collecting_handler();
        let (h2, mut rx2) = collecting_handler();
        let (h3, mut rx3) = collecting_handler();

        let _plain = bus.subscribe("events", None, h1).await.unwrap();
        let _q1 = bus.subscribe("events", Some("workers"), h2).await.unwrap();
        let _q2 = bus.subscribe("events", Some("workers"), h3).await.unwrap();

        bus.publish("events", Bytes::from_static(b"one")).await.unwrap();
        bus.publish("events", Bytes::from_static(b"two")).await.unwrap();

        assert_eq!(recv(&mut rx1).await.payload, Bytes::from_static(b"one"));
        assert_eq!(recv(&mut rx1).await.payload, Bytes::from_static(b"two"));

        // Each message goes to exactly one queue member
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut queue_total = 0;
        while rx2.try_recv().is_ok() {
            queue_total += 1;
        }
        while rx3.try_recv().is_ok() {
            queue_total += 1;
        }
        assert_eq!(queue_total, 2);
    }

    #[tokio::test]
    async fn test_nats_unsubscribe_removes_subscriber() {
        let bus = MemoryNats::new("nats");
        let (handler, _rx) = collecting_handler();
        let sub = bus.subscribe("events", None, handler).await.unwrap();
        assert_eq!(bus.subscriber_count(), 1);

        sub.unsubscribe().await.unwrap();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_nats_unhealthy_rejects_publish() {
        let bus = MemoryNats::new("nats");
        bus.set_healthy(false);
        assert!(bus.publish("events", Bytes::new()).await.is_err());
        assert!(bus.messages("events").is_empty());
    }

    #[tokio::test]
    async fn test_stream_replays_all_in_order() {
        let stream = MemoryStream::new("stream");
        for p in ["a", "b", "c"] {
            stream.publish("orders", Bytes::from(p)).await.unwrap();
        }

        let (handler, mut rx) = collecting_handler();
        let _sub = stream
            .subscribe("orders", manual(StartPosition::All), handler)
            .await
            .unwrap();

        for (i, expected) in ["a", "b", "c"].iter().enumerate() {
            let msg = recv(&mut rx).await;
            assert_eq!(msg.sequence, Some(i as u64 + 1));
            assert_eq!(msg.payload, Bytes::from(*expected));
            msg.ack().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_stream_start_positions() {
        let stream = MemoryStream::new("stream");
        for p in ["a", "b", "c"] {
            stream.publish("orders", Bytes::from(p)).await.unwrap();
        }

        let (handler, mut rx) = collecting_handler();
        let _last = stream
            .subscribe("orders", manual(StartPosition::LastReceived), handler)
            .await
            .unwrap();
        assert_eq!(recv(&mut rx).await.payload, Bytes::from("c"));

        let (handler, mut rx) = collecting_handler();
        let _seq = stream
            .subscribe("orders", manual(StartPosition::Sequence(2)), handler)
            .await
            .unwrap();
        assert_eq!(recv(&mut rx).await.payload, Bytes::from("b"));

        // A start time in the future only sees new messages
        let (handler, mut rx) = collecting_handler();
        let future = Utc::now() + chrono::Duration::milliseconds(1);
        tokio::time::sleep(Duration::from_millis(5)).await;
        let _time = stream
            .subscribe("orders", manual(StartPosition::Time(future)), handler)
            .await
            .unwrap();
        stream.publish("orders", Bytes::from("d")).await.unwrap();
        assert_eq!(recv(&mut rx).await.payload, Bytes::from("d"));
    }

    #[tokio::test]
    async fn test_stream_redelivers_unacked() {
        let stream = MemoryStream::new("stream").with_ack_wait(Duration::from_millis(100));
        stream.publish("orders", Bytes::from("a")).await.unwrap();

        let (handler, mut rx) = collecting_handler();
        let _sub = stream
            .subscribe("orders", manual(StartPosition::All), handler)
            .await
            .unwrap();

        let first = recv(&mut rx).await;
        drop(first); // not acknowledged

        let second = recv(&mut rx).await;
        assert_eq!(second.sequence, Some(1));
        second.ack().await.unwrap();

        // Acknowledged: no third delivery
        assert!(timeout(Duration::from_millis(300), rx.recv()).await.is_err());
        assert_eq!(
            stream.journal(),
            vec![
                JournalEntry::Published {
                    channel: "orders".into(),
                    sequence: 1
                },
                JournalEntry::Acked {
                    channel: "orders".into(),
                    sequence: 1
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_durable_resumes() {
        let stream = MemoryStream::new("stream");
        for p in ["a", "b"] {
            stream.publish("orders", Bytes::from(p)).await.unwrap();
        }
        let options = StreamSubscribeOptions {
            durable_name: Some("bridge".into()),
            ..manual(StartPosition::All)
        };

        let (handler, mut rx) = collecting_handler();
        let sub = stream
            .subscribe("orders", options.clone(), handler)
            .await
            .unwrap();
        recv(&mut rx).await.ack().await.unwrap();
        recv(&mut rx).await.ack().await.unwrap();
        sub.unsubscribe().await.unwrap();

        stream.publish("orders", Bytes::from("c")).await.unwrap();

        let (handler, mut rx) = collecting_handler();
        let _sub = stream.subscribe("orders", options, handler).await.unwrap();
        let msg = recv(&mut rx).await;
        assert_eq!(msg.payload, Bytes::from("c"));
        assert_eq!(msg.sequence, Some(3));
    }

    #[tokio::test]
    async fn test_dialer_lookup_and_refusal() {
        let dialer = MemoryDialer::new();
        dialer.add_nats(Arc::new(MemoryNats::new("nats")));

        let config = NatsConnectionConfig {
            name: "nats".into(),
            servers: vec!["memory://".into()],
            connect_timeout_ms: 10,
            max_reconnects: None,
        };
        assert!(dialer.connect_nats(&config).await.is_ok());

        dialer.refuse(true);
        assert!(dialer.connect_nats(&config).await.is_err());
        assert_eq!(dialer.dial_count(), 2);

        let missing = NatsConnectionConfig {
            name: "other".into(),
            ..config
        };
        dialer.refuse(false);
        assert!(dialer.connect_nats(&missing).await.is_err());
    }
}
