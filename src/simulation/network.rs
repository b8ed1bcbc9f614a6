//! Simulation context: the single owner of every node's state.
//!
//! One cycle:
//! 1) Compute the global occupancy snapshot from last cycle's activity.
//! 2) For every node in index order: apply the mode adjustment, derive the
//!    local busy estimate and interference scan, produce and publish a sample.
//! 3) Decay all activity accumulators.
//!
//! Inbound commands are applied through the same context, either inline or
//! through the pending-command queue, so a sample is never built from a
//! half-applied channel change.

use chrono::Utc;
use embassy_time::{Duration, Instant};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use std::collections::HashMap;

use crate::bus::MessageBus;
use crate::common::config::{SimulationMode, SimulatorConfig};
use crate::control::command::{CommandRejection, CommandStatus, InboundCommand, StatusKind};
use crate::control::scheduler::{CommandQueue, PendingCommand};

use super::node::NodeState;
use super::occupancy::{OccupancySnapshot, decay_all, interference_scan, local_operating_busy};
use super::topology::{Topology, TopologyParameters, build_topology, node_id};

/// Flush the bus after this many telemetry samples within a cycle.
pub const FLUSH_EVERY: usize = 20;

/// Counters for one completed cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// 1-based cycle number.
    pub cycle: u64,
    pub produced: usize,
    pub publish_failures: usize,
    /// Nodes whose sample could not be built or encoded.
    pub node_faults: usize,
}

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// Dropped without acknowledgment.
    Dropped(CommandRejection),
    /// Queued for delayed application.
    Scheduled { timer_key: String, fire_at: Instant },
    Applied,
    Failed,
}

pub struct Simulation {
    config: SimulatorConfig,
    topology: Topology,
    nodes: Vec<NodeState>,
    index_by_id: HashMap<String, usize>,
    neighbor_ids: Vec<Vec<String>>,
    rng: StdRng,
    commands: CommandQueue,
    cycles: u64,
}

impl Simulation {
    /// Build the topology and initial node states from a validated configuration.
    ///
    /// With a configured seed, every random draw of the run (topology,
    /// metrics, command failures) is reproducible.
    pub fn new(config: SimulatorConfig) -> Self {
        let mut rng = match config.simulation.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let sim = &config.simulation;
        let topology = build_topology(
            &TopologyParameters {
                node_count: sim.nodes,
                area_size: sim.area_size,
                neighbor_radius: sim.neighbor_radius,
                channels: sim.channels.clone(),
                interference_pct: sim.interference_pct,
                burst_pct: sim.burst_pct,
            },
            &mut rng,
        );

        let nodes: Vec<NodeState> = topology
            .positions
            .iter()
            .zip(&topology.initial_channels)
            .enumerate()
            .map(|(index, (position, channel))| NodeState::new(node_id(index), *position, *channel, &config.propagation, &mut rng))
            .collect();
        let index_by_id = nodes.iter().enumerate().map(|(index, node)| (node.node_id.clone(), index)).collect();
        let neighbor_ids = topology
            .neighbors
            .iter()
            .map(|list| list.iter().map(|&j| node_id(j)).collect())
            .collect();

        log::info!(
            "Simulation ready: nodes={} channels={:?} mode={} interfered={} bursting={} seed={:?}",
            nodes.len(),
            sim.channels,
            sim.mode,
            topology.interfered.len(),
            topology.bursting.len(),
            sim.seed
        );

        Self {
            config,
            topology,
            nodes,
            index_by_id,
            neighbor_ids,
            rng,
            commands: CommandQueue::new(),
            cycles: 0,
        }
    }

    /// Run one full cycle and publish one sample per node.
    ///
    /// Publish failures are logged and counted; they never abort the cycle.
    pub fn run_cycle(&mut self, bus: &dyn MessageBus) -> CycleReport {
        let sim = &self.config.simulation;
        let topic = &self.config.bus.telemetry_topic;
        let snapshot = OccupancySnapshot::compute(&self.nodes, &sim.channels);
        let mut report = CycleReport {
            cycle: self.cycles + 1,
            ..Default::default()
        };

        for index in 0..self.nodes.len() {
            let mut boost = 0.0;
            let mut burst_factor = 1.0;
            match sim.mode {
                SimulationMode::Interference if self.topology.interfered.contains(&index) => boost = sim.interference_boost,
                SimulationMode::Burst if self.topology.bursting.contains(&index) => burst_factor = sim.burst_factor,
                SimulationMode::Switching if sim.force_apply && self.topology.interfered.contains(&index) => {
                    // Local switch: bypasses the command path and keeps the activity history.
                    let channel = sim.channels[self.rng.gen_range(0..sim.channels.len())];
                    self.nodes[index].channel = channel;
                }
                _ => {}
            }

            let neighbors = &self.topology.neighbors[index];
            let operating_busy = (local_operating_busy(&self.nodes, neighbors, index, &snapshot) + boost).clamp(0.0, 100.0);
            let scan = interference_scan(&self.nodes, neighbors, index, &sim.channels, &snapshot, &self.config.propagation, &mut self.rng);
            let sample = self.nodes[index].produce_sample(
                operating_busy,
                scan,
                burst_factor,
                &self.neighbor_ids[index],
                &sim.radio_id,
                &self.config.propagation,
                &mut self.rng,
                Utc::now(),
            );

            match serde_json::to_value(&sample) {
                Ok(message) => {
                    report.produced += 1;
                    log::debug!(
                        "Produced: {} ch={} busy={} rssi={} clients={}",
                        sample.node_id,
                        sample.channel,
                        sample.channel_busy_percent,
                        sample.rssi,
                        sample.num_clients
                    );
                    if let Err(err) = bus.publish(topic, &message) {
                        log::warn!("Telemetry for {} not delivered: {}", sample.node_id, err);
                        report.publish_failures += 1;
                    }
                }
                Err(err) => {
                    log::error!("Failed to encode telemetry for {}: {}", sample.node_id, err);
                    report.node_faults += 1;
                }
            }

            if (index + 1) % FLUSH_EVERY == 0 {
                flush(bus);
            }
        }

        decay_all(&mut self.nodes);
        flush(bus);
        self.cycles += 1;

        log::debug!(
            "Cycle {} done: produced={} publish_failures={} node_faults={} pending_commands={}",
            report.cycle,
            report.produced,
            report.publish_failures,
            report.node_faults,
            self.commands.len()
        );
        report
    }

    /// Validate one inbound message and apply or schedule it.
    ///
    /// # Parameters
    ///
    /// * `message` - Raw message from the command topic
    /// * `now` - Acceptance time; delayed applications fire at `now + apply delay`
    /// * `bus` - Where status acknowledgments go
    ///
    /// # Returns
    ///
    /// The outcome. Rejected messages are dropped without any status.
    pub fn handle_inbound_command(&mut self, message: &Value, now: Instant, bus: &dyn MessageBus) -> CommandOutcome {
        match self.accept_command(message) {
            Ok((index, command, channel)) => {
                let node_id = self.nodes[index].node_id.clone();
                let delay_secs = self.config.commands.apply_delay_secs;
                if delay_secs > 0.0 {
                    let timer_key = self.commands.schedule(index, &node_id, command.kind, channel, now, secs_to_duration(delay_secs));
                    let fire_at = now + secs_to_duration(delay_secs);
                    log::info!("Scheduling apply for {} -> channel={} after {}s ({})", node_id, channel, delay_secs, timer_key);
                    CommandOutcome::Scheduled { timer_key, fire_at }
                } else {
                    let pending = self.commands.accept(index, &node_id, command.kind, channel, now, Duration::from_ticks(0));
                    match self.fire(pending, bus) {
                        StatusKind::Applied => CommandOutcome::Applied,
                        StatusKind::Failed => CommandOutcome::Failed,
                    }
                }
            }
            Err(rejection) => {
                log::debug!("Dropping inbound message: {}", rejection);
                CommandOutcome::Dropped(rejection)
            }
        }
    }

    fn accept_command(&self, message: &Value) -> Result<(usize, InboundCommand, u32), CommandRejection> {
        let command = InboundCommand::parse(message)?;
        let index = *self
            .index_by_id
            .get(&command.node_id)
            .ok_or_else(|| CommandRejection::UnknownNode(command.node_id.clone()))?;
        let channel = u32::try_from(command.channel)
            .ok()
            .filter(|channel| self.config.simulation.channels.contains(channel))
            .ok_or(CommandRejection::UnsupportedChannel(command.channel))?;
        if self.nodes[index].channel == channel {
            return Err(CommandRejection::AlreadyOnChannel(channel));
        }
        Ok((index, command, channel))
    }

    /// Apply every pending command due at or before `now`. Returns how many fired.
    pub fn fire_due_commands(&mut self, now: Instant, bus: &dyn MessageBus) -> usize {
        let due = self.commands.pop_due(now);
        let fired = due.len();
        for pending in due {
            self.fire(pending, bus);
        }
        fired
    }

    /// Draw against the failure rate, mutate the node on success, acknowledge.
    fn fire(&mut self, pending: PendingCommand, bus: &dyn MessageBus) -> StatusKind {
        let fail_rate = self.config.commands.apply_fail_rate.clamp(0.0, 1.0);
        let status = if self.rng.gen_bool(fail_rate) {
            log::info!("Command apply FAILED for {} -> channel={} (simulated failure)", pending.node_id, pending.channel);
            StatusKind::Failed
        } else {
            self.nodes[pending.node_index].apply_channel(pending.channel);
            log::info!("Applied command to {} -> channel={} ({})", pending.node_id, pending.channel, pending.timer_key);
            StatusKind::Applied
        };

        let ack = CommandStatus::new(&pending.node_id, pending.kind, pending.channel, status, Utc::now());
        match serde_json::to_value(&ack) {
            Ok(message) => {
                if let Err(err) = bus.publish(&self.config.bus.status_topic, &message) {
                    log::warn!("Status for {} not delivered: {}", pending.node_id, err);
                }
                flush(bus);
            }
            Err(err) => log::error!("Failed to encode status for {}: {}", pending.node_id, err),
        }
        status
    }

    /// Earliest fire time among pending commands.
    pub fn next_command_deadline(&self) -> Option<Instant> {
        self.commands.next_deadline()
    }

    /// Drop all pending commands without acknowledging them.
    pub fn cancel_pending(&mut self) -> usize {
        self.commands.cancel_all()
    }

    #[cfg(test)]
    pub fn pending_commands(&self) -> usize {
        self.commands.len()
    }

    /// Target duration of one cycle.
    pub fn cycle_interval(&self) -> Duration {
        secs_to_duration(self.config.simulation.interval_secs)
    }

    /// True once the configured cycle limit (if any) has been reached.
    pub fn cycle_limit_reached(&self) -> bool {
        self.config.simulation.max_cycles.is_some_and(|limit| self.cycles >= limit)
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    #[cfg(test)]
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn nodes(&self) -> &[NodeState] {
        &self.nodes
    }

    #[cfg(test)]
    pub fn node(&self, node_id: &str) -> Option<&NodeState> {
        self.index_by_id.get(node_id).map(|&index| &self.nodes[index])
    }

    #[cfg(test)]
    pub fn interfered(&self) -> &std::collections::BTreeSet<usize> {
        &self.topology.interfered
    }
}

fn flush(bus: &dyn MessageBus) {
    if let Err(err) = bus.flush() {
        log::warn!("Bus flush failed: {}", err);
    }
}

fn secs_to_duration(secs: f64) -> Duration {
    Duration::from_micros((secs.max(0.0) * 1_000_000.0).round() as u64)
}
