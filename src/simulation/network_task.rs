//! Central task driving the simulation timeline.
//!
//! High-level flow each loop turn:
//! 1) If the cycle deadline has passed, run one cycle and compute the next
//!    deadline as `cycle start + interval` (or now, if the cycle overran).
//! 2) Unless stopping has begun, fire every pending command that is due.
//! 3) `select3` waits for: the earlier of the next cycle and the next pending
//!    command, an inbound command, or the stop signal.
//!
//! On stop (signal or cycle limit) all pending commands are cancelled without
//! acknowledgment, the bus is flushed, and `main` is notified.

use embassy_futures::select::{Either3, select3};
use embassy_time::{Instant, Timer};
use std::sync::Arc;
use std::sync::mpsc;

use crate::bus::MessageBus;

use super::network::Simulation;
use super::types::{InboundCommandQueueReceiver, StopSignal};

/// Run the simulation until stopped.
///
/// # Parameters
///
/// * `simulation` - Fully built simulation context; the task becomes its only owner
/// * `bus` - Outbound telemetry and status destination
/// * `command_rx` - Raw inbound commands forwarded by the listener thread
/// * `stop` - Cooperative stop request
/// * `done_tx` - Notified once shutdown work is finished
#[embassy_executor::task]
pub async fn network_task(
    simulation: Simulation,
    bus: Arc<dyn MessageBus>,
    command_rx: InboundCommandQueueReceiver,
    stop: &'static StopSignal,
    done_tx: mpsc::Sender<()>,
) {
    run_simulation(simulation, bus, command_rx, stop, done_tx).await;
}

/// Task body; see [`network_task`].
pub async fn run_simulation(
    simulation: Simulation,
    bus: Arc<dyn MessageBus>,
    command_rx: InboundCommandQueueReceiver,
    stop: &'static StopSignal,
    done_tx: mpsc::Sender<()>,
) {
    let mut simulation = simulation;
    let interval = simulation.cycle_interval();
    log::info!(
        "Starting simulation: nodes={} interval={}ms mode={}",
        simulation.nodes().len(),
        interval.as_millis(),
        simulation.config().simulation.mode
    );

    let mut next_cycle = Instant::now();
    loop {
        let cycle_start = Instant::now();
        if cycle_start >= next_cycle {
            let report = simulation.run_cycle(bus.as_ref());
            if report.publish_failures > 0 {
                log::warn!("Cycle {}: {} of {} samples not delivered", report.cycle, report.publish_failures, report.produced);
            }
            if simulation.cycle_limit_reached() {
                log::info!("Cycle limit reached after {} cycles", simulation.cycles());
                break;
            }
            // Interval-paced: an overrun shortens the next wait but never queues extra cycles.
            next_cycle = (cycle_start + interval).max(Instant::now());
        }

        // A stop raised while the cycle ran must not let due commands fire.
        if stop.signaled() {
            log::info!("Stop requested");
            break;
        }
        simulation.fire_due_commands(Instant::now(), bus.as_ref());

        let deadline = match simulation.next_command_deadline() {
            Some(fire_at) if fire_at < next_cycle => fire_at,
            _ => next_cycle,
        };

        match select3(Timer::at(deadline), command_rx.receive(), stop.wait()).await {
            Either3::First(_) => {}
            Either3::Second(message) => {
                simulation.handle_inbound_command(&message, Instant::now(), bus.as_ref());
            }
            Either3::Third(_) => {
                log::info!("Stop requested");
                break;
            }
        }
    }

    let cancelled = simulation.cancel_pending();
    if cancelled > 0 {
        log::info!("Cancelled {} pending command(s)", cancelled);
    }
    if let Err(err) = bus.flush() {
        log::warn!("Final flush failed: {}", err);
    }
    log::info!("Simulation stopped after {} cycles", simulation.cycles());
    let _ = done_tx.send(());
}
