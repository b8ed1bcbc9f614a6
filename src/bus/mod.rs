//! Message-bus contract used by the simulator.
//!
//! The transport is an external collaborator; the simulator only needs
//! `publish(topic, message)` and `subscribe(topic)`. Two bindings exist:
//! - `memory`: in-process fan-out, used for dry runs and tests
//! - `rest_proxy`: Kafka REST Proxy (v2, JSON embedded format)
//!
//! Commands and their status acknowledgments share one topic. Consumers of
//! that topic must discard messages carrying a `status` field; see
//! `control::command::is_status_message`.

pub mod memory;
pub mod rest_proxy;

use serde_json::Value;
use std::time::Duration;

pub use memory::InMemoryBus;
pub use rest_proxy::RestProxyBus;

pub const DEFAULT_TELEMETRY_TOPIC: &str = "wmn.telemetry.v1";
pub const DEFAULT_COMMAND_TOPIC: &str = "wmn.commands.v1";
/// Status acknowledgments go back to the command topic.
pub const DEFAULT_STATUS_TOPIC: &str = DEFAULT_COMMAND_TOPIC;

/// Errors reported by a bus binding.
#[derive(Debug)]
pub enum BusError {
    Connect(String),
    Publish(String),
    Subscribe(String),
    Poll(String),
}

impl std::fmt::Display for BusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BusError::Connect(msg) => write!(f, "Bus connection failed: {}", msg),
            BusError::Publish(msg) => write!(f, "Publish failed: {}", msg),
            BusError::Subscribe(msg) => write!(f, "Subscribe failed: {}", msg),
            BusError::Poll(msg) => write!(f, "Poll failed: {}", msg),
        }
    }
}

impl std::error::Error for BusError {}

/// Publish/subscribe access to the message bus.
///
/// Implementations may buffer published messages; `flush` forces delivery.
pub trait MessageBus: Send + Sync {
    fn publish(&self, topic: &str, message: &Value) -> Result<(), BusError>;

    fn flush(&self) -> Result<(), BusError>;

    fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, BusError>;
}

/// An active subscription to one topic.
pub trait Subscription: Send {
    /// Wait at most `timeout` for messages. An empty result is a normal idle poll.
    fn poll(&mut self, timeout: Duration) -> Result<Vec<Value>, BusError>;

    /// Release the subscription.
    fn close(self: Box<Self>);
}
