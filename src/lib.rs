// Bus capabilities shared by every connector variant
pub mod bus;

// Bridge configuration (TOML)
pub mod config;

// async-nats adapters for both planes
pub mod nats;

// Per-connector statistics
pub mod stats;

pub use bus::{
    InboundMessage, MessageHandler, NatsConnection, StartPosition, StreamConnection,
    StreamSubscribeOptions, Subscription,
};
pub use config::{load_config, BridgeConfig, ConnectorConfig, ConnectorType};
pub use stats::{BridgeStats, ConnectorStats, Stats};
