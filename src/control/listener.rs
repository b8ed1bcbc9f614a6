//! Inbound command listener.
//!
//! Runs on its own OS thread so bounded-wait polls never stall the simulation
//! task. It only filters acknowledgments and forwards raw messages; parsing and
//! application happen on the simulation task, which owns all node state.

use embassy_sync::channel::TrySendError;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::bus::Subscription;
use crate::simulation::types::InboundCommandQueueSender;

use super::command::is_status_message;

/// Pause between polls.
const POLL_PAUSE: Duration = Duration::from_millis(100);
/// Back-off after a failed poll.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);
/// Retry interval while the inbound queue is full.
const QUEUE_FULL_RETRY: Duration = Duration::from_millis(10);

/// Start the listener thread. It exits (closing the subscription) once `stop` is set.
pub fn spawn_command_listener(
    subscription: Box<dyn Subscription>,
    poll_timeout: Duration,
    command_tx: InboundCommandQueueSender,
    stop: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new().name("command-listener".to_string()).spawn(move || {
        log::info!("Command listener started");
        let mut subscription = subscription;
        listen(subscription.as_mut(), poll_timeout, command_tx, &stop);
        subscription.close();
        log::info!("Command listener exiting");
    })
}

fn listen(subscription: &mut dyn Subscription, poll_timeout: Duration, command_tx: InboundCommandQueueSender, stop: &AtomicBool) {
    while !stop.load(Ordering::Relaxed) {
        match subscription.poll(poll_timeout) {
            Ok(messages) => {
                for message in messages {
                    if is_status_message(&message) {
                        log::trace!("Ignoring status message {}", message);
                        continue;
                    }
                    if !forward(message, command_tx, stop) {
                        return;
                    }
                }
            }
            Err(err) => {
                log::warn!("Command listener poll error: {}", err);
                thread::sleep(ERROR_BACKOFF);
            }
        }
        thread::sleep(POLL_PAUSE);
    }
}

/// Hand a message to the simulation task, waiting while the queue is full.
/// Returns false if a stop was requested while waiting.
fn forward(message: Value, command_tx: InboundCommandQueueSender, stop: &AtomicBool) -> bool {
    let mut message = message;
    loop {
        match command_tx.try_send(message) {
            Ok(()) => return true,
            Err(TrySendError::Full(returned)) => {
                if stop.load(Ordering::Relaxed) {
                    return false;
                }
                message = returned;
                thread::sleep(QUEUE_FULL_RETRY);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{InMemoryBus, MessageBus};
    use crate::simulation::types::InboundCommandQueue;
    use serde_json::json;
    use std::time::Instant;

    #[test]
    fn forwards_commands_and_skips_acknowledgments() {
        let bus = InMemoryBus::new();
        let subscription = bus.subscribe("wmn.commands.v1").unwrap();
        let queue: &'static InboundCommandQueue = Box::leak(Box::new(InboundCommandQueue::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let handle = spawn_command_listener(subscription, Duration::from_millis(20), queue.sender(), stop.clone()).unwrap();

        bus.publish("wmn.commands.v1", &json!({"nodeId": "node-001", "status": "APPLIED"})).unwrap();
        bus.publish("wmn.commands.v1", &json!({"nodeId": "node-001", "command": "SET_CHANNEL", "payload": 6})).unwrap();
        bus.publish("wmn.telemetry.v1", &json!({"nodeId": "node-009"})).unwrap();

        let receiver = queue.receiver();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut received = Vec::new();
        while received.is_empty() && Instant::now() < deadline {
            while let Ok(value) = receiver.try_receive() {
                received.push(value);
            }
            thread::sleep(Duration::from_millis(10));
        }

        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap();

        assert_eq!(received, vec![json!({"nodeId": "node-001", "command": "SET_CHANNEL", "payload": 6})]);
        assert!(receiver.try_receive().is_err());
    }
}
