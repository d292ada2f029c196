//! Connector error taxonomy.

use replicator::config::ConnectionKind;
use thiserror::Error;

/// Errors returned by connector lifecycle operations.
///
/// Only `start` surfaces these as hard failures. Per-message failures are
/// logged and left to the source bus to redeliver; shutdown never fails.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// A required route setting is missing. Retrying without a config change
    /// cannot succeed.
    #[error("{connector} connector is improperly configured, {setting} is required")]
    Misconfigured {
        connector: String,
        setting: &'static str,
    },

    /// A named connection the route depends on is missing or unhealthy.
    #[error("{connector} connector requires {kind} connection named {connection} to be available")]
    ConnectionUnavailable {
        connector: String,
        kind: ConnectionKind,
        connection: String,
    },

    /// Error from the bus itself, returned untouched
    #[error(transparent)]
    Bus(#[from] anyhow::Error),
}

impl ConnectorError {
    /// Whether the health loop may fix this by retrying later
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ConnectorError::Misconfigured { .. })
    }
}
