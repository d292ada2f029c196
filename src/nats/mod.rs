// async-nats implementations of the bus capabilities

mod client;
mod dialer;
mod jetstream;

pub use client::NatsBus;
pub use dialer::NatsDialer;
pub use jetstream::{deliver_policy, JetStreamBus};
