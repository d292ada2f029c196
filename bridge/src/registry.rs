//! Connection registry - named connections shared by all connectors.
//!
//! Owned by the supervisor, which is the only writer. Connectors look
//! connections up by name on every use, so a connection replaced during a
//! reconnect is visible to every route that references it immediately.

use anyhow::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use replicator::config::ConnectionKind;
use replicator::{NatsConnection, StreamConnection};
use serde::Serialize;
use std::sync::Arc;

/// Live handle on either plane
#[derive(Clone)]
pub enum Connection {
    Nats(Arc<dyn NatsConnection>),
    Stream(Arc<dyn StreamConnection>),
}

impl Connection {
    pub fn kind(&self) -> ConnectionKind {
        match self {
            Connection::Nats(_) => ConnectionKind::Nats,
            Connection::Stream(_) => ConnectionKind::Stream,
        }
    }

    pub fn is_healthy(&self) -> bool {
        match self {
            Connection::Nats(c) => c.is_healthy(),
            Connection::Stream(c) => c.is_healthy(),
        }
    }

    pub async fn close(&self) -> Result<()> {
        match self {
            Connection::Nats(c) => c.close().await,
            Connection::Stream(c) => c.close().await,
        }
    }
}

struct Entry {
    connection: Connection,
    /// Health as of the supervisor's last check
    last_healthy: bool,
    last_checked: DateTime<Utc>,
}

/// Status of one named connection, for monitoring
#[derive(Clone, Debug, Serialize)]
pub struct ConnectionStatus {
    pub name: String,
    pub kind: ConnectionKind,
    pub healthy: bool,
    pub last_checked: DateTime<Utc>,
}

/// Named connections, internally synchronized
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: DashMap<String, Entry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a named connection, returning the previous one
    pub fn insert(&self, name: &str, connection: Connection) -> Option<Connection> {
        let healthy = connection.is_healthy();
        self.entries
            .insert(
                name.to_string(),
                Entry {
                    connection,
                    last_healthy: healthy,
                    last_checked: Utc::now(),
                },
            )
            .map(|old| old.connection)
    }

    pub fn remove(&self, name: &str) -> Option<Connection> {
        self.entries.remove(name).map(|(_, entry)| entry.connection)
    }

    pub fn get(&self, name: &str) -> Option<Connection> {
        self.entries.get(name).map(|e| e.connection.clone())
    }

    /// The lightweight-plane connection registered under `name`, if any
    pub fn nats(&self, name: &str) -> Option<Arc<dyn NatsConnection>> {
        match self.get(name)? {
            Connection::Nats(c) => Some(c),
            Connection::Stream(_) => None,
        }
    }

    /// The streaming-plane connection registered under `name`, if any
    pub fn stream(&self, name: &str) -> Option<Arc<dyn StreamConnection>> {
        match self.get(name)? {
            Connection::Stream(c) => Some(c),
            Connection::Nats(_) => None,
        }
    }

    /// Whether `name` is registered as a `kind` connection and is usable right now
    pub fn check(&self, kind: ConnectionKind, name: &str) -> bool {
        self.entries
            .get(name)
            .map(|e| e.connection.kind() == kind && e.connection.is_healthy())
            .unwrap_or(false)
    }

    /// Store the outcome of a health check. Returns true when it changed.
    pub fn record_health(&self, name: &str, healthy: bool) -> bool {
        match self.entries.get_mut(name) {
            Some(mut entry) => {
                let changed = entry.last_healthy != healthy;
                entry.last_healthy = healthy;
                entry.last_checked = Utc::now();
                changed
            }
            None => false,
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn status(&self) -> Vec<ConnectionStatus> {
        let mut status: Vec<ConnectionStatus> = self
            .entries
            .iter()
            .map(|e| ConnectionStatus {
                name: e.key().clone(),
                kind: e.connection.kind(),
                healthy: e.connection.is_healthy(),
                last_checked: e.last_checked,
            })
            .collect();
        status.sort_by(|a, b| a.name.cmp(&b.name));
        status
    }

    /// Remove every connection, leaving the registry empty
    pub fn drain(&self) -> Vec<(String, Connection)> {
        let names = self.names();
        names
            .into_iter()
            .filter_map(|name| self.remove(&name).map(|c| (name, c)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
