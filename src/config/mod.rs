use crate::bus::StartPosition;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

/// Complete bridge configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// How often the supervisor checks connections and restarts connectors (ms)
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub nats: Vec<NatsConnectionConfig>,
    #[serde(default)]
    pub stream: Vec<StreamConnectionConfig>,
    #[serde(default)]
    pub connect: Vec<ConnectorConfig>,
}

fn default_reconnect_interval_ms() -> u64 {
    5000
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            reconnect_interval_ms: default_reconnect_interval_ms(),
            monitoring: MonitoringConfig::default(),
            nats: Vec::new(),
            stream: Vec::new(),
            connect: Vec::new(),
        }
    }
}

/// HTTP monitoring endpoint. A port of 0 disables it.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_http_host")]
    pub http_host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    9222
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            http_host: default_http_host(),
            http_port: default_http_port(),
        }
    }
}

/// A named connection on the lightweight plane (core NATS)
#[derive(Debug, Clone, Deserialize)]
pub struct NatsConnectionConfig {
    pub name: String,
    pub servers: Vec<String>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Reconnect attempts the client makes on its own before giving up
    #[serde(default)]
    pub max_reconnects: Option<usize>,
}

fn default_connect_timeout_ms() -> u64 {
    2000
}

impl NatsConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// A named connection on the streaming plane (JetStream)
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConnectionConfig {
    pub name: String,
    pub servers: Vec<String>,
    /// Stream that stores every channel used through this connection
    pub stream_name: String,
    pub stream_subjects: Vec<String>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: i64,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: i64,
    /// Time the stream waits for an ack before redelivering (ms)
    #[serde(default = "default_ack_wait_ms")]
    pub ack_wait_ms: u64,
}

fn default_max_age_days() -> i64 {
    7
}

fn default_max_bytes() -> i64 {
    10 * 1024 * 1024 * 1024 // 10GB
}

fn default_ack_wait_ms() -> u64 {
    30_000
}

impl StreamConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn ack_wait(&self) -> Duration {
        Duration::from_millis(self.ack_wait_ms)
    }

    /// Stream retention window. Zero only for configs that skipped validation.
    pub fn max_age(&self) -> Duration {
        let days = u64::try_from(self.max_age_days).unwrap_or(0);
        Duration::from_secs(days.saturating_mul(86_400))
    }
}

/// Which plane a named connection lives on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Nats,
    Stream,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionKind::Nats => write!(f, "nats"),
            ConnectionKind::Stream => write!(f, "stream"),
        }
    }
}

/// The bus pair a connector forwards between
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectorType {
    NatsToNats,
    NatsToStream,
    StreamToNats,
    StreamToStream,
}

impl ConnectorType {
    pub fn incoming(&self) -> ConnectionKind {
        match self {
            ConnectorType::NatsToNats | ConnectorType::NatsToStream => ConnectionKind::Nats,
            ConnectorType::StreamToNats | ConnectorType::StreamToStream => ConnectionKind::Stream,
        }
    }

    pub fn outgoing(&self) -> ConnectionKind {
        match self {
            ConnectorType::NatsToNats | ConnectorType::StreamToNats => ConnectionKind::Nats,
            ConnectorType::NatsToStream | ConnectorType::StreamToStream => ConnectionKind::Stream,
        }
    }
}

/// One configured forwarding path
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorConfig {
    /// Generated (UUIDv4) when left empty
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub connector_type: ConnectorType,
    #[serde(default)]
    pub incoming_connection: String,
    #[serde(default)]
    pub outgoing_connection: String,
    #[serde(default)]
    pub incoming_channel: String,
    #[serde(default)]
    pub outgoing_channel: String,
    /// Queue group for lightweight-plane sources
    #[serde(default)]
    pub incoming_queue_name: Option<String>,
    #[serde(default)]
    pub incoming_durable_name: Option<String>,
    /// -1 starts with the last received message, >0 at that sequence
    #[serde(default)]
    pub incoming_start_at_sequence: i64,
    /// Unix seconds, 0 when unset
    #[serde(default)]
    pub incoming_start_at_time: i64,
}

impl ConnectorConfig {
    pub fn new(
        connector_type: ConnectorType,
        incoming_connection: &str,
        incoming_channel: &str,
        outgoing_connection: &str,
        outgoing_channel: &str,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            connector_type,
            incoming_connection: incoming_connection.to_string(),
            outgoing_connection: outgoing_connection.to_string(),
            incoming_channel: incoming_channel.to_string(),
            outgoing_channel: outgoing_channel.to_string(),
            incoming_queue_name: None,
            incoming_durable_name: None,
            incoming_start_at_sequence: 0,
            incoming_start_at_time: 0,
        }
    }

    /// Resolves the starting position.
    ///
    /// Precedence: explicit time, then `-1` (last received), then a positive
    /// sequence, otherwise everything available.
    pub fn start_position(&self) -> StartPosition {
        if self.incoming_start_at_time != 0 {
            if let Some(t) = DateTime::<Utc>::from_timestamp(self.incoming_start_at_time, 0) {
                return StartPosition::Time(t);
            }
        }
        if self.incoming_start_at_sequence == -1 {
            StartPosition::LastReceived
        } else if self.incoming_start_at_sequence > 0 {
            StartPosition::Sequence(self.incoming_start_at_sequence as u64)
        } else {
            StartPosition::All
        }
    }
}

impl BridgeConfig {
    /// Parse, fill in generated connector ids and validate.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let mut config: BridgeConfig =
            toml::from_str(contents).context("Failed to parse bridge configuration")?;
        config.assign_ids();
        config.validate()?;
        Ok(config)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    fn assign_ids(&mut self) {
        for connector in &mut self.connect {
            if connector.id.is_empty() {
                connector.id = uuid::Uuid::new_v4().to_string();
            }
        }
    }

    /// Rejects configurations no bridge could run.
    ///
    /// Route-level problems (empty channels, unknown or wrong-kind connection
    /// names) are left to the connector's own start so one bad route does not
    /// take the others down.
    pub fn validate(&self) -> Result<()> {
        if self.reconnect_interval_ms == 0 {
            bail!("reconnect_interval_ms must be greater than zero");
        }

        let mut names = HashSet::new();
        let named = self
            .nats
            .iter()
            .map(|c| (c.name.as_str(), c.servers.as_slice()))
            .chain(self.stream.iter().map(|c| (c.name.as_str(), c.servers.as_slice())));
        for (name, servers) in named {
            if name.is_empty() {
                bail!("connection names must not be empty");
            }
            if !names.insert(name) {
                bail!("duplicate connection name '{}'", name);
            }
            if servers.is_empty() {
                bail!("connection '{}' has no servers", name);
            }
        }

        for stream in &self.stream {
            if stream.stream_name.is_empty() || stream.stream_subjects.is_empty() {
                bail!(
                    "stream connection '{}' requires stream_name and stream_subjects",
                    stream.name
                );
            }
            if stream.max_age_days <= 0 {
                bail!(
                    "stream connection '{}' max_age_days must be greater than zero",
                    stream.name
                );
            }
            // -1 asks JetStream for no size limit
            if stream.max_bytes == 0 || stream.max_bytes < -1 {
                bail!(
                    "stream connection '{}' max_bytes must be positive or -1",
                    stream.name
                );
            }
        }

        let mut ids = HashSet::new();
        for connector in &self.connect {
            if !connector.id.is_empty() && !ids.insert(connector.id.as_str()) {
                bail!("duplicate connector id '{}'", connector.id);
            }
            if connector.incoming_start_at_sequence < -1 {
                bail!(
                    "connector '{}' has invalid incoming_start_at_sequence {}",
                    connector.id,
                    connector.incoming_start_at_sequence
                );
            }
            if connector.incoming_start_at_time != 0
                && DateTime::<Utc>::from_timestamp(connector.incoming_start_at_time, 0).is_none()
            {
                bail!(
                    "connector '{}' has invalid incoming_start_at_time {}",
                    connector.id,
                    connector.incoming_start_at_time
                );
            }
        }

        Ok(())
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<BridgeConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file '{}'", path))?;
    BridgeConfig::from_toml(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FULL: &str = r#"
        reconnect_interval_ms = 200

        [monitoring]
        http_port = 9333

        [[nats]]
        name = "nats"
        servers = ["nats://localhost:4222"]

        [[stream]]
        name = "stream"
        servers = ["nats://localhost:4222"]
        stream_name = "ORDERS"
        stream_subjects = ["orders.>"]
        ack_wait_ms = 1000

        [[connect]]
        type = "StreamToStream"
        id = "orders"
        incoming_connection = "stream"
        outgoing_connection = "stream"
        incoming_channel = "orders.in"
        outgoing_channel = "orders.out"
        incoming_durable_name = "replicator"

        [[connect]]
        type = "NatsToStream"
        incoming_connection = "nats"
        outgoing_connection = "stream"
        incoming_channel = "events"
        outgoing_channel = "orders.events"
        incoming_queue_name = "bridge"
    "#;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.reconnect_interval_ms, 5000);
        assert_eq!(config.monitoring.http_port, 9222);
        assert!(config.connect.is_empty());
    }

    #[test]
    fn test_config_deserialization() {
        let config = BridgeConfig::from_toml(FULL).unwrap();
        assert_eq!(config.reconnect_interval(), Duration::from_millis(200));
        assert_eq!(config.monitoring.http_port, 9333);
        assert_eq!(config.monitoring.http_host, "0.0.0.0");
        assert_eq!(config.nats[0].connect_timeout_ms, 2000);
        assert_eq!(config.stream[0].ack_wait(), Duration::from_secs(1));
        assert_eq!(config.stream[0].max_age_days, 7);

        let orders = &config.connect[0];
        assert_eq!(orders.id, "orders");
        assert_eq!(orders.connector_type, ConnectorType::StreamToStream);
        assert_eq!(orders.incoming_durable_name.as_deref(), Some("replicator"));

        // Missing id is generated
        let events = &config.connect[1];
        assert!(uuid::Uuid::parse_str(&events.id).is_ok());
        assert_eq!(events.incoming_queue_name.as_deref(), Some("bridge"));
        assert_eq!(events.connector_type.incoming(), ConnectionKind::Nats);
        assert_eq!(events.connector_type.outgoing(), ConnectionKind::Stream);
    }

    #[test]
    fn test_duplicate_connection_names_rejected() {
        let toml = r#"
            [[nats]]
            name = "main"
            servers = ["nats://localhost:4222"]

            [[stream]]
            name = "main"
            servers = ["nats://localhost:4222"]
            stream_name = "S"
            stream_subjects = ["s.>"]
        "#;
        let err = BridgeConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("duplicate connection name 'main'"));
    }

    #[test]
    fn test_stream_limits_validated() {
        let stream = |limits: &str| {
            format!(
                r#"
                [[stream]]
                name = "js"
                servers = ["nats://localhost:4222"]
                stream_name = "S"
                stream_subjects = ["s.>"]
                {limits}
            "#
            )
        };

        for days in ["0", "-3"] {
            let err = BridgeConfig::from_toml(&stream(&format!("max_age_days = {days}")))
                .unwrap_err();
            assert!(err.to_string().contains("max_age_days must be greater than zero"));
        }
        let err = BridgeConfig::from_toml(&stream("max_bytes = -2")).unwrap_err();
        assert!(err.to_string().contains("max_bytes must be positive or -1"));

        let config = BridgeConfig::from_toml(&stream("max_bytes = -1")).unwrap();
        assert_eq!(config.stream[0].max_age(), Duration::from_secs(7 * 86_400));
    }

    #[test]
    fn test_invalid_start_sequence_rejected() {
        let toml = r#"
            [[connect]]
            type = "StreamToNats"
            incoming_start_at_sequence = -2
        "#;
        assert!(BridgeConfig::from_toml(toml).is_err());
    }

    #[test]
    fn test_unknown_route_connections_left_to_connector() {
        let toml = r#"
            [[connect]]
            type = "NatsToNats"
            incoming_connection = "missing"
            outgoing_connection = "missing"
        "#;
        let config = BridgeConfig::from_toml(toml).unwrap();
        assert_eq!(config.connect.len(), 1);
    }

    #[test]
    fn test_start_position_precedence() {
        let mut c = ConnectorConfig::new(ConnectorType::StreamToStream, "s", "a", "s", "b");
        assert_eq!(c.start_position(), StartPosition::All);

        c.incoming_start_at_sequence = 42;
        assert_eq!(c.start_position(), StartPosition::Sequence(42));

        c.incoming_start_at_sequence = -1;
        assert_eq!(c.start_position(), StartPosition::LastReceived);

        c.incoming_start_at_time = 1_700_000_000;
        let expected = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        assert_eq!(c.start_position(), StartPosition::Time(expected));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();

        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.connect.len(), 2);
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config("/nonexistent/replicator.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read configuration file"));
    }
}
