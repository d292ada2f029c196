//! NATS replicator bridge - forwards messages between core NATS and JetStream.
//!
//! # Architecture
//!
//! ```text
//!  [[nats]] / [[stream]] config
//!          ↓
//! ┌─────────────────────────────────────────┐
//! │       Bridge (supervisor)                │
//! │  - Dial named connections                │
//! │  - Start connectors in config order      │
//! │  - Health loop: redial, restart          │
//! └─────────────────────────────────────────┘
//!          ↓ registry lookups by name
//! ┌─────────────────────────────────────────┐
//! │       Connector (one per [[connect]])    │
//! │  - Subscribe to source channel           │
//! │  - Publish to destination, then ack      │
//! │  - Count messages, bytes, latency        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Delivery is at-least-once: a source message is acknowledged only after the
//! destination accepted it, so a failure in between can duplicate a message
//! downstream but never lose it.

pub mod api;
pub mod connector;
pub mod error;
pub mod registry;
pub mod supervisor;

pub use api::create_router;
pub use connector::{Connector, ConnectorHost};
pub use error::ConnectorError;
pub use registry::{Connection, ConnectionRegistry, ConnectionStatus};
pub use supervisor::Bridge;
