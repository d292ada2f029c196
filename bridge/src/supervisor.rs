//! Bridge supervisor - owns connections and drives connector lifecycle.
//!
//! Dials every named connection, starts every connector in configuration
//! order and runs a health loop that redials dead connections and restarts
//! the connectors that depend on them.

use crate::connector::{Connector, ConnectorHost};
use crate::error::ConnectorError;
use crate::registry::{Connection, ConnectionRegistry, ConnectionStatus};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use replicator::bus::Dialer;
use replicator::config::{
    BridgeConfig, ConnectionKind, NatsConnectionConfig, StreamConnectionConfig,
};
use replicator::{BridgeStats, NatsConnection, StreamConnection};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

/// Capability handed to connectors: registry lookups plus error reporting.
struct BridgeHost {
    registry: ConnectionRegistry,
    faults: mpsc::UnboundedSender<String>,
}

impl ConnectorHost for BridgeHost {
    fn nats(&self, name: &str) -> Option<Arc<dyn NatsConnection>> {
        self.registry.nats(name)
    }

    fn stream(&self, name: &str) -> Option<Arc<dyn StreamConnection>> {
        self.registry.stream(name)
    }

    fn check(&self, kind: ConnectionKind, name: &str) -> bool {
        self.registry.check(kind, name)
    }

    fn connector_error(&self, connector_id: &str, error: ConnectorError) {
        warn!(connector = %connector_id, error = %error, "Connector error");
        // Only fails once the bridge is gone
        let _ = self.faults.send(connector_id.to_string());
    }
}

struct HealthLoop {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Created,
    Running,
    Stopped,
}

/// Bridge-wide state, only touched under the `cycle` lock.
struct Lifecycle {
    phase: Phase,
    /// Connectors whose configuration can never work; the loop leaves them alone
    parked: HashSet<String>,
}

/// The replicator: named connections plus the connectors routed over them.
///
/// # Lifecycle
/// - [`Bridge::start`] dials connections, starts connectors, spawns the loop
/// - the health loop runs every `reconnect_interval_ms`
/// - [`Bridge::stop`] stops the loop, then every connector, then every
///   connection
///
/// A stopped bridge stays stopped: later health cycles do nothing and `start`
/// fails.
pub struct Bridge {
    config: BridgeConfig,
    dialer: Arc<dyn Dialer>,
    /// Shared with every connector; owns the connection registry
    host: Arc<BridgeHost>,
    connectors: Vec<Arc<Connector>>,
    /// Connector ids reported through `connector_error` since the last cycle
    faults: Mutex<mpsc::UnboundedReceiver<String>>,
    /// Serializes start, stop and health cycles
    cycle: Mutex<Lifecycle>,
    health: Mutex<Option<HealthLoop>>,
    start_time: DateTime<Utc>,
}

impl Bridge {
    /// Build connectors for every configured route. Nothing is dialed yet.
    pub fn new(config: BridgeConfig, dialer: Arc<dyn Dialer>) -> Self {
        let (faults_tx, faults_rx) = mpsc::unbounded_channel();
        let host = Arc::new(BridgeHost {
            registry: ConnectionRegistry::new(),
            faults: faults_tx,
        });

        let connectors = config
            .connect
            .iter()
            .map(|c| {
                let host: Arc<dyn ConnectorHost> = host.clone();
                Arc::new(Connector::new(c.clone(), host))
            })
            .collect();

        Self {
            config,
            dialer,
            host,
            connectors,
            faults: Mutex::new(faults_rx),
            cycle: Mutex::new(Lifecycle {
                phase: Phase::Created,
                parked: HashSet::new(),
            }),
            health: Mutex::new(None),
            start_time: Utc::now(),
        }
    }

    /// Starts the bridge.
    ///
    /// Connections that cannot be dialed and connectors that fail to start
    /// are logged and left to the health loop; the other routes keep running.
    /// Starting a running bridge changes nothing. A stopped bridge cannot be
    /// started again.
    ///
    /// # Returns
    /// Number of connectors running
    pub async fn start(self: &Arc<Self>) -> Result<usize> {
        let mut lifecycle = self.cycle.lock().await;
        match lifecycle.phase {
            Phase::Stopped => bail!("Bridge has been stopped"),
            Phase::Running => {
                debug!("Bridge already running, start ignored");
                return Ok(self.running_count().await);
            }
            Phase::Created => {}
        }

        info!(
            nats = self.config.nats.len(),
            stream = self.config.stream.len(),
            connectors = self.connectors.len(),
            "Starting bridge"
        );

        for config in &self.config.nats {
            if let Err(e) = self.dial_nats(config).await {
                warn!(connection = %config.name, error = %e, "Initial connect failed");
            }
        }
        for config in &self.config.stream {
            if let Err(e) = self.dial_stream(config).await {
                warn!(connection = %config.name, error = %e, "Initial connect failed");
            }
        }

        let mut started = 0;
        for connector in &self.connectors {
            match connector.start().await {
                Ok(()) => started += 1,
                Err(e) => {
                    warn!(
                        connector = %connector.id(),
                        route = %connector.description(),
                        error = %e,
                        "Route is down"
                    );
                    if !e.is_recoverable() {
                        lifecycle.parked.insert(connector.id().to_string());
                    }
                }
            }
        }
        lifecycle.phase = Phase::Running;

        let mut health = self.health.lock().await;
        if health.is_none() {
            let (stop, mut stop_rx) = oneshot::channel::<()>();
            let bridge = Arc::clone(self);
            let period = self.config.reconnect_interval();
            let task = tokio::spawn(async move {
                let mut interval = time::interval(period);
                interval.tick().await; // initial pass done in start

                loop {
                    tokio::select! {
                        _ = &mut stop_rx => break,
                        _ = interval.tick() => bridge.run_health_cycle().await,
                    }
                }
            });
            *health = Some(HealthLoop { stop, task });
        }

        info!(
            running = started,
            configured = self.connectors.len(),
            "Bridge started"
        );
        Ok(started)
    }

    /// Run one health cycle now instead of waiting for the interval.
    pub async fn check_now(&self) {
        self.run_health_cycle().await;
    }

    async fn run_health_cycle(&self) {
        let lifecycle = self.cycle.lock().await;
        if lifecycle.phase != Phase::Running {
            return;
        }

        let mut faulted = HashSet::new();
        {
            let mut faults = self.faults.lock().await;
            while let Ok(id) = faults.try_recv() {
                faulted.insert(id);
            }
        }

        let mut replaced = HashSet::new();
        for config in &self.config.nats {
            if self.host.registry.check(ConnectionKind::Nats, &config.name) {
                self.host.registry.record_health(&config.name, true);
                continue;
            }
            if self.host.registry.record_health(&config.name, false) {
                warn!(connection = %config.name, "NATS connection lost");
            }
            match self.dial_nats(config).await {
                Ok(()) => {
                    replaced.insert(config.name.clone());
                }
                Err(e) => warn!(connection = %config.name, error = %e, "Reconnect failed"),
            }
        }
        for config in &self.config.stream {
            if self.host.registry.check(ConnectionKind::Stream, &config.name) {
                self.host.registry.record_health(&config.name, true);
                continue;
            }
            if self.host.registry.record_health(&config.name, false) {
                warn!(connection = %config.name, "Stream connection lost");
            }
            match self.dial_stream(config).await {
                Ok(()) => {
                    replaced.insert(config.name.clone());
                }
                Err(e) => warn!(connection = %config.name, error = %e, "Reconnect failed"),
            }
        }

        for connector in &self.connectors {
            if lifecycle.parked.contains(connector.id()) {
                continue;
            }
            let running = connector.is_running().await;

            if let Err(e) = connector.check_connections() {
                if running {
                    warn!(connector = %connector.id(), error = %e, "Stopping connector");
                    let _ = connector.shutdown().await;
                } else {
                    debug!(connector = %connector.id(), error = %e, "Connector still waiting");
                }
                continue;
            }

            let config = connector.config();
            let stale = replaced.contains(&config.incoming_connection)
                || replaced.contains(&config.outgoing_connection)
                || faulted.contains(connector.id());
            if running && !stale {
                continue;
            }
            if running {
                info!(connector = %connector.id(), "Restarting connector");
                let _ = connector.shutdown().await;
            }
            if let Err(e) = connector.start().await {
                warn!(connector = %connector.id(), error = %e, "Connector restart failed");
            }
        }
    }

    async fn dial_nats(&self, config: &NatsConnectionConfig) -> Result<()> {
        let connection = self
            .dialer
            .connect_nats(config)
            .await
            .with_context(|| format!("Failed to connect NATS connection '{}'", config.name))?;
        self.host.registry.insert(&config.name, Connection::Nats(connection));
        info!(connection = %config.name, "NATS connection established");
        Ok(())
    }

    async fn dial_stream(&self, config: &StreamConnectionConfig) -> Result<()> {
        let connection = self
            .dialer
            .connect_stream(config)
            .await
            .with_context(|| format!("Failed to connect stream connection '{}'", config.name))?;
        self.host.registry
            .insert(&config.name, Connection::Stream(connection));
        info!(connection = %config.name, "Stream connection established");
        Ok(())
    }

    /// Stops the bridge: health loop, then connectors, then connections.
    pub async fn stop(&self) {
        // Awaited before taking `cycle`, which an in-flight cycle holds
        let health = self.health.lock().await.take();
        if let Some(health) = health {
            let _ = health.stop.send(());
            if let Err(e) = health.task.await {
                warn!(error = %e, "Health loop ended abnormally");
            }
        }

        let mut lifecycle = self.cycle.lock().await;
        if lifecycle.phase == Phase::Stopped {
            return;
        }
        lifecycle.phase = Phase::Stopped;
        info!("Stopping bridge");

        // A concurrent start may have spawned the loop after we looked
        if let Some(health) = self.health.lock().await.take() {
            let _ = health.stop.send(());
        }

        for connector in &self.connectors {
            let _ = connector.shutdown().await;
        }

        for (name, connection) in self.host.registry.drain() {
            if let Err(e) = connection.close().await {
                warn!(connection = %name, error = %e, "Error closing connection");
            }
        }

        info!("Bridge stopped");
    }

    async fn running_count(&self) -> usize {
        let mut running = 0;
        for connector in &self.connectors {
            if connector.is_running().await {
                running += 1;
            }
        }
        running
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.host.registry
    }

    pub fn connectors(&self) -> &[Arc<Connector>] {
        &self.connectors
    }

    pub fn connector(&self, id: &str) -> Option<&Arc<Connector>> {
        self.connectors.iter().find(|c| c.id() == id)
    }

    /// Whether every configured connection is registered and healthy
    pub fn is_healthy(&self) -> bool {
        self.config
            .nats
            .iter()
            .all(|c| self.host.registry.check(ConnectionKind::Nats, &c.name))
            && self
                .config
                .stream
                .iter()
                .all(|c| self.host.registry.check(ConnectionKind::Stream, &c.name))
    }

    pub fn connection_status(&self) -> Vec<ConnectionStatus> {
        self.host.registry.status()
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats::new(
            self.start_time,
            self.connectors.iter().map(|c| c.stats().snapshot()).collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replicator::bus::memory::{MemoryDialer, MemoryNats, MemoryStream};

    const CONFIG: &str = r#"
        reconnect_interval_ms = 3600000

        [[nats]]
        name = "edge"
        servers = ["nats://127.0.0.1:4222"]

        [[stream]]
        name = "store"
        servers = ["nats://127.0.0.1:4222"]
        stream_name = "ORDERS"
        stream_subjects = ["orders.>"]

        [[connect]]
        id = "orders"
        type = "StreamToNats"
        incoming_connection = "store"
        incoming_channel = "orders.in"
        outgoing_connection = "edge"
        outgoing_channel = "orders.live"
    "#;

    fn bridge() -> (Arc<Bridge>, Arc<MemoryDialer>) {
        let dialer = Arc::new(MemoryDialer::new());
        dialer.add_nats(Arc::new(MemoryNats::new("edge")));
        dialer.add_stream(Arc::new(MemoryStream::new("store")));
        let config = BridgeConfig::from_toml(CONFIG).unwrap();
        (Arc::new(Bridge::new(config, dialer.clone())), dialer)
    }

    /// An error report is enough for the next cycle to restart the connector,
    /// even with every connection healthy and nothing redialed.
    #[tokio::test]
    async fn test_reported_error_alone_restarts_connector() {
        let (bridge, dialer) = bridge();
        bridge.start().await.unwrap();
        let connector = bridge.connector("orders").unwrap().clone();
        let dials = dialer.dial_count();

        bridge.host.connector_error(
            "orders",
            ConnectorError::ConnectionUnavailable {
                connector: connector.description().to_string(),
                kind: ConnectionKind::Nats,
                connection: "edge".into(),
            },
        );
        bridge.check_now().await;

        assert_eq!(dialer.dial_count(), dials);
        assert!(connector.is_running().await);
        let snap = connector.stats().snapshot();
        assert_eq!((snap.connects, snap.disconnects), (2, 1));

        // The report was consumed by that cycle
        bridge.check_now().await;
        assert_eq!(connector.stats().snapshot().connects, 2);

        bridge.stop().await;
    }

    /// Without a report a healthy running connector is left alone.
    #[tokio::test]
    async fn test_quiet_cycle_changes_nothing() {
        let (bridge, dialer) = bridge();
        bridge.start().await.unwrap();
        let dials = dialer.dial_count();

        bridge.check_now().await;

        assert_eq!(dialer.dial_count(), dials);
        let snap = bridge.connector("orders").unwrap().stats().snapshot();
        assert_eq!((snap.connects, snap.disconnects), (1, 0));

        bridge.stop().await;
    }
}
