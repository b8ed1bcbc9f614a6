use anyhow::Context;
use embassy_executor::{Executor, Spawner};
use env_logger::Builder;
use log::{LevelFilter, info};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

mod bus;
mod common;
mod control;
mod simulation;

use bus::{InMemoryBus, MessageBus, RestProxyBus};
use common::config::{SimulatorConfig, Transport};
use control::spawn_command_listener;
use simulation::types::InboundCommandQueueReceiver;
use simulation::{InboundCommandQueue, Simulation, StopSignal, network_task};

fn embassy_init(
    spawner: Spawner,
    simulation: Simulation,
    bus: Arc<dyn MessageBus>,
    command_rx: InboundCommandQueueReceiver,
    stop: &'static StopSignal,
    done_tx: mpsc::Sender<()>,
) {
    if let Err(err) = spawner.spawn(network_task(simulation, bus, command_rx, stop, done_tx)) {
        log::error!("Failed to spawn network task: {:?}", err);
    }
}

fn main() -> anyhow::Result<()> {
    // Logging setup
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("wmn_node_simulator"), LevelFilter::Debug)
        .parse_default_env()
        .init();

    info!("Starting up");

    let config = match std::env::args().nth(1) {
        Some(path) => SimulatorConfig::load(Path::new(&path)).with_context(|| format!("Failed to load configuration from {}", path))?,
        None => {
            info!("No configuration file given, using defaults");
            SimulatorConfig::default()
        }
    };

    // The only fatal runtime dependency: no bus, no simulation.
    let bus: Arc<dyn MessageBus> = match config.bus.transport {
        Transport::RestProxy => Arc::new(
            RestProxyBus::connect(&config.bus.url).with_context(|| format!("Failed to connect to message bus at {}", config.bus.url))?,
        ),
        Transport::Memory => {
            info!("Using in-process message bus");
            Arc::new(InMemoryBus::new())
        }
    };

    let stop_signal: &'static StopSignal = Box::leak(Box::new(StopSignal::new()));
    let stop_flag = Arc::new(AtomicBool::new(false));
    {
        let stop_flag = stop_flag.clone();
        ctrlc::set_handler(move || {
            info!("Interrupt received, stopping");
            stop_flag.store(true, Ordering::Relaxed);
            stop_signal.signal(());
        })
        .context("Failed to install Ctrl-C handler")?;
    }

    let command_queue: &'static InboundCommandQueue = Box::leak(Box::new(InboundCommandQueue::new()));
    let listener = if config.commands.enabled {
        let subscription = bus
            .subscribe(&config.bus.command_topic)
            .with_context(|| format!("Failed to subscribe to {}", config.bus.command_topic))?;
        info!(
            "Command handling enabled on {} (delay={}s, fail rate={})",
            config.bus.command_topic, config.commands.apply_delay_secs, config.commands.apply_fail_rate
        );
        let handle = spawn_command_listener(
            subscription,
            Duration::from_millis(config.bus.poll_timeout_ms),
            command_queue.sender(),
            stop_flag.clone(),
        )
        .context("Failed to spawn command listener thread")?;
        Some(handle)
    } else {
        None
    };

    info!(
        "Publishing telemetry to {} every {}s via {:?}",
        config.bus.telemetry_topic, config.simulation.interval_secs, config.bus.transport
    );
    let simulation = Simulation::new(config);

    let (done_tx, done_rx) = mpsc::channel();
    let command_rx = command_queue.receiver();
    let task_bus = bus.clone();

    // Spawn Embassy executor on a dedicated background thread
    thread::Builder::new()
        .name("embassy-executor".to_string())
        .spawn(move || {
            // Leak the executor to satisfy the 'static lifetime required by run()
            let executor: &'static mut Executor = Box::leak(Box::new(Executor::new()));
            executor.run(|spawner| embassy_init(spawner, simulation, task_bus, command_rx, stop_signal, done_tx));
        })
        .context("Failed to spawn embassy thread")?;

    if done_rx.recv().is_err() {
        log::error!("Simulation task ended without finishing shutdown");
    }

    stop_flag.store(true, Ordering::Relaxed);
    if let Some(handle) = listener {
        if handle.join().is_err() {
            log::error!("Command listener thread panicked");
        }
    }

    info!("Shutdown complete");
    Ok(())
}
