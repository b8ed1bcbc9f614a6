//! In-process message bus.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{BusError, MessageBus, Subscription};

/// Maximum number of messages returned by a single poll.
const MAX_POLL_RECORDS: usize = 10;

#[derive(Default)]
struct MemoryState {
    published: HashMap<String, Vec<Value>>,
    subscribers: Vec<(String, Sender<Value>)>,
}

/// Delivers published messages to every live subscriber of the topic and keeps
/// a per-topic record of everything published.
#[derive(Default, Clone)]
pub struct InMemoryBus {
    state: Arc<Mutex<MemoryState>>,
    fail_publishes: Arc<AtomicBool>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages published to `topic` so far, in publish order.
    #[cfg(test)]
    pub fn published(&self, topic: &str) -> Vec<Value> {
        match self.state.lock() {
            Ok(state) => state.published.get(topic).cloned().unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    /// Make every subsequent publish fail until switched off again.
    #[cfg(test)]
    pub fn set_publish_failure(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::Relaxed);
    }
}

impl MessageBus for InMemoryBus {
    fn publish(&self, topic: &str, message: &Value) -> Result<(), BusError> {
        if self.fail_publishes.load(Ordering::Relaxed) {
            return Err(BusError::Publish(format!("injected failure on {}", topic)));
        }
        let mut state = self.state.lock().map_err(|_| BusError::Publish("bus state poisoned".to_string()))?;
        log::trace!("[memory] {} <- {}", topic, message);
        state.published.entry(topic.to_string()).or_default().push(message.clone());
        // Drop subscribers whose receiving side has gone away.
        state
            .subscribers
            .retain(|(subscribed_topic, tx)| subscribed_topic != topic || tx.send(message.clone()).is_ok());
        Ok(())
    }

    fn flush(&self) -> Result<(), BusError> {
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, BusError> {
        let (tx, rx) = mpsc::channel();
        let mut state = self.state.lock().map_err(|_| BusError::Subscribe("bus state poisoned".to_string()))?;
        state.subscribers.push((topic.to_string(), tx));
        Ok(Box::new(MemorySubscription { rx }))
    }
}

struct MemorySubscription {
    rx: Receiver<Value>,
}

impl Subscription for MemorySubscription {
    fn poll(&mut self, timeout: Duration) -> Result<Vec<Value>, BusError> {
        let first = match self.rx.recv_timeout(timeout) {
            Ok(value) => value,
            Err(RecvTimeoutError::Timeout) => return Ok(Vec::new()),
            Err(RecvTimeoutError::Disconnected) => return Err(BusError::Poll("bus dropped".to_string())),
        };
        let mut records = vec![first];
        while records.len() < MAX_POLL_RECORDS {
            match self.rx.try_recv() {
                Ok(value) => records.push(value),
                Err(_) => break,
            }
        }
        Ok(records)
    }

    fn close(self: Box<Self>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subscribers_receive_only_their_topic() {
        let bus = InMemoryBus::new();
        let mut commands = bus.subscribe("commands").unwrap();
        bus.publish("telemetry", &json!({"nodeId": "node-001"})).unwrap();
        bus.publish("commands", &json!({"nodeId": "node-002"})).unwrap();

        let received = commands.poll(Duration::from_millis(50)).unwrap();
        assert_eq!(received, vec![json!({"nodeId": "node-002"})]);
        assert_eq!(bus.published("telemetry").len(), 1);
    }

    #[test]
    fn idle_poll_is_empty_not_an_error() {
        let bus = InMemoryBus::new();
        let mut sub = bus.subscribe("commands").unwrap();
        assert!(sub.poll(Duration::from_millis(5)).unwrap().is_empty());
    }

    #[test]
    fn poll_is_bounded_per_call() {
        let bus = InMemoryBus::new();
        let mut sub = bus.subscribe("t").unwrap();
        for i in 0..25 {
            bus.publish("t", &json!(i)).unwrap();
        }
        assert_eq!(sub.poll(Duration::from_millis(5)).unwrap().len(), MAX_POLL_RECORDS);
        assert_eq!(sub.poll(Duration::from_millis(5)).unwrap().len(), MAX_POLL_RECORDS);
        assert_eq!(sub.poll(Duration::from_millis(5)).unwrap().len(), 5);
    }

    #[test]
    fn injected_failures_are_reported() {
        let bus = InMemoryBus::new();
        bus.set_publish_failure(true);
        assert!(matches!(bus.publish("t", &json!(1)), Err(BusError::Publish(_))));
        bus.set_publish_failure(false);
        assert!(bus.publish("t", &json!(1)).is_ok());
        assert_eq!(bus.published("t"), vec![json!(1)]);
    }
}
