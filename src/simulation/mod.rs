//! Node telemetry simulation core.
//!
//! This module models a population of spatially distributed radio nodes and
//! derives their telemetry from a lightweight propagation model. It integrates:
//! - Topology building (positions, initial channels, neighbor relation)
//! - Log-distance signal estimation with bounded jitter
//! - Per-node radio state and telemetry production
//! - Channel occupancy aggregation, interference scans and activity decay
//! - Command application through the single owning simulation context
//!
//! ## Module Organization
//!
//! - `types`: Shared data structures (points, telemetry samples, queues)
//! - `geometry`: Distances and the neighbor relation
//! - `signal_calculations`: Propagation model
//! - `topology`: Startup layout
//! - `node`: Per-node radio state
//! - `occupancy`: Channel activity aggregator
//! - `network`: Simulation context (one cycle, command application)
//! - `network_task`: Embassy task driving cadence, commands and shutdown
//!
//! ## Public API
//!
//! Build a `Simulation` from a validated configuration and spawn
//! `network_task` on the Embassy executor.

pub mod geometry;
pub mod network;
pub mod network_task;
pub mod node;
pub mod occupancy;
pub mod signal_calculations;
pub mod topology;
pub mod types;

pub use network::Simulation;
pub use network_task::network_task;
pub use types::{InboundCommandQueue, StopSignal};
