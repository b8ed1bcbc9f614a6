//! Simulator configuration loading, defaults, and validation.
//!
//! The configuration is a TOML file with four tables (`simulation`,
//! `propagation`, `commands`, `bus`). Every key has a default, so an empty
//! file (or no file at all) yields a runnable baseline simulation.

use anyhow::Context;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::bus::{DEFAULT_COMMAND_TOPIC, DEFAULT_STATUS_TOPIC, DEFAULT_TELEMETRY_TOPIC};

/// Upper bound on the simulated population.
pub const MAX_NODES: usize = 10000;

/// Strongest signal any estimate may report (dBm).
pub const SIGNAL_CEILING: f64 = -30.0;

/// Error type for configuration loading failures.
#[derive(Debug)]
pub enum ConfigLoadError {
    FileReadError(String),
    ParseError(String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigLoadError::FileReadError(msg) => write!(f, "Failed to read file: {}", msg),
            ConfigLoadError::ParseError(msg) => write!(f, "Failed to parse TOML: {}", msg),
            ConfigLoadError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigLoadError {}

/// Simulation mode selecting which per-node adjustments the loop applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SimulationMode {
    #[default]
    Baseline,
    /// Interfered nodes get a fixed boost on their operating-channel busy value.
    Interference,
    /// Bursting nodes multiply their transmitted/received byte counts.
    Burst,
    /// With `force-apply`, interfered nodes get a random channel every cycle.
    Switching,
}

impl std::fmt::Display for SimulationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimulationMode::Baseline => write!(f, "baseline"),
            SimulationMode::Interference => write!(f, "interference"),
            SimulationMode::Burst => write!(f, "burst"),
            SimulationMode::Switching => write!(f, "switching"),
        }
    }
}

/// Population, cadence and mode parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SimulationSection {
    /// Number of simulated nodes.
    pub nodes: usize,
    /// Target seconds per full cycle.
    pub interval_secs: f64,
    /// Channel set nodes may operate on.
    pub channels: Vec<u32>,
    pub mode: SimulationMode,
    /// Fraction of nodes placed in the interfered set.
    pub interference_pct: f64,
    /// Busy-percent boost for interfered nodes in interference mode.
    pub interference_boost: f64,
    /// Fraction of nodes placed in the bursting set.
    pub burst_pct: f64,
    /// Transmit multiplier for bursting nodes in burst mode.
    pub burst_factor: f64,
    /// Seed for the single random source. `None` seeds from entropy.
    pub seed: Option<u64>,
    /// In switching mode, let the loop randomize interfered nodes' channels.
    pub force_apply: bool,
    /// Distance under which two nodes are neighbors.
    pub neighbor_radius: f64,
    /// Side length of the square placement area.
    pub area_size: f64,
    /// Stop after this many cycles. `None` runs until interrupted.
    pub max_cycles: Option<u64>,
    pub radio_id: String,
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            nodes: 10,
            interval_secs: 3.0,
            channels: vec![1, 6, 11],
            mode: SimulationMode::Baseline,
            interference_pct: 0.2,
            interference_boost: 30.0,
            burst_pct: 0.0,
            burst_factor: 3.0,
            seed: None,
            force_apply: false,
            neighbor_radius: 50.0,
            area_size: 200.0,
            max_cycles: None,
            radio_id: "wlan0".to_string(),
        }
    }
}

/// Parameters of the log-distance propagation model.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PathLossParameters {
    /// Received signal at the 1-unit reference distance (dBm).
    pub reference_signal: f64,
    /// Path loss exponent (n). 2.0 for free space, 2.7-3.5 for urban.
    pub path_loss_exponent: f64,
    /// Weakest signal any estimate may report (dBm).
    pub noise_floor: f64,
}

impl Default for PathLossParameters {
    fn default() -> Self {
        Self {
            reference_signal: -40.0,
            path_loss_exponent: 3.0,
            noise_floor: -95.0,
        }
    }
}

/// Remote channel-change handling.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CommandSection {
    /// Start the inbound listener and apply SET_CHANNEL commands.
    pub enabled: bool,
    /// Seconds between accepting a command and applying it. 0 applies inline.
    pub apply_delay_secs: f64,
    /// Probability that an application fails.
    pub apply_fail_rate: f64,
}

impl Default for CommandSection {
    fn default() -> Self {
        Self {
            enabled: false,
            apply_delay_secs: 0.0,
            apply_fail_rate: 0.0,
        }
    }
}

/// Which message-bus binding to connect at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Transport {
    #[default]
    RestProxy,
    Memory,
}

/// Message-bus connection and topic names.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BusSection {
    pub transport: Transport,
    /// Base URL of the REST proxy.
    pub url: String,
    pub telemetry_topic: String,
    pub command_topic: String,
    pub status_topic: String,
    /// Bounded wait of a single inbound poll.
    pub poll_timeout_ms: u64,
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            transport: Transport::RestProxy,
            url: "http://localhost:8082".to_string(),
            telemetry_topic: DEFAULT_TELEMETRY_TOPIC.to_string(),
            command_topic: DEFAULT_COMMAND_TOPIC.to_string(),
            status_topic: DEFAULT_STATUS_TOPIC.to_string(),
            poll_timeout_ms: 1000,
        }
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SimulatorConfig {
    pub simulation: SimulationSection,
    pub propagation: PathLossParameters,
    pub commands: CommandSection,
    pub bus: BusSection,
}

impl SimulatorConfig {
    /// Load, parse and validate a configuration file.
    ///
    /// # Parameters
    ///
    /// * `path` - Path to the TOML configuration file
    ///
    /// # Returns
    ///
    /// Parsed and validated configuration or an error.
    pub fn load(path: &Path) -> Result<Self, ConfigLoadError> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read file: {}", path.display()))
            .map_err(|e| ConfigLoadError::FileReadError(format!("{:#}", e)))?;

        Self::from_toml_str(&data)
    }

    /// Parse and validate configuration text.
    pub fn from_toml_str(data: &str) -> Result<Self, ConfigLoadError> {
        let config: SimulatorConfig = toml::from_str(data).map_err(|e| ConfigLoadError::ParseError(e.to_string()))?;
        config.validate().map_err(ConfigLoadError::ValidationError)?;
        Ok(config)
    }

    /// Reject configurations that would make the simulation meaningless or panic.
    ///
    /// # Returns
    ///
    /// `Ok(())` if validation passes, `Err(String)` with error description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        let sim = &self.simulation;

        if sim.nodes == 0 {
            return Err("Simulation must contain at least one node".to_string());
        }
        if sim.nodes > MAX_NODES {
            return Err(format!("Node count {} exceeds maximum of {}", sim.nodes, MAX_NODES));
        }
        if !(sim.interval_secs > 0.0) {
            return Err(format!("Invalid interval-secs {}, must be positive", sim.interval_secs));
        }
        if sim.channels.is_empty() {
            return Err("Channel set must not be empty".to_string());
        }
        let mut seen = HashSet::new();
        for channel in &sim.channels {
            if !seen.insert(*channel) {
                return Err(format!("Duplicate channel found: {}", channel));
            }
        }
        check_fraction("interference-pct", sim.interference_pct)?;
        check_fraction("burst-pct", sim.burst_pct)?;
        if !(sim.interference_boost >= 0.0) {
            return Err("Invalid interference-boost, must be non-negative".to_string());
        }
        if !(sim.burst_factor >= 0.0) {
            return Err("Invalid burst-factor, must be non-negative".to_string());
        }
        if !(sim.neighbor_radius >= 0.0) {
            return Err("Invalid neighbor-radius, must be non-negative".to_string());
        }
        if !(sim.area_size > 0.0) {
            return Err("Invalid area-size, must be positive".to_string());
        }

        let propagation = &self.propagation;
        if !(propagation.path_loss_exponent > 0.0) {
            return Err("Invalid path-loss-exponent, must be positive".to_string());
        }
        if !(propagation.noise_floor < SIGNAL_CEILING) {
            return Err(format!(
                "Invalid noise-floor {}, must be below {} dBm",
                propagation.noise_floor, SIGNAL_CEILING
            ));
        }

        if !(self.commands.apply_delay_secs >= 0.0) {
            return Err("Invalid apply-delay-secs, must be non-negative".to_string());
        }
        check_fraction("apply-fail-rate", self.commands.apply_fail_rate)?;

        if self.bus.poll_timeout_ms == 0 {
            return Err("Invalid poll-timeout-ms, must be positive".to_string());
        }

        Ok(())
    }
}

fn check_fraction(name: &str, value: f64) -> Result<(), String> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(format!("Invalid {} {}, must be within 0-1", name, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = SimulatorConfig::from_toml_str("").unwrap();
        assert_eq!(config.simulation.nodes, 10);
        assert_eq!(config.simulation.channels, vec![1, 6, 11]);
        assert_eq!(config.simulation.mode, SimulationMode::Baseline);
        assert_eq!(config.bus.telemetry_topic, "wmn.telemetry.v1");
        assert_eq!(config.bus.command_topic, config.bus.status_topic);
        assert_eq!(config.propagation.noise_floor, -95.0);
    }

    #[test]
    fn kebab_case_keys_are_parsed() {
        let config = SimulatorConfig::from_toml_str(
            r#"
            [simulation]
            nodes = 3
            mode = "interference"
            interference-pct = 0.34
            seed = 7
            max-cycles = 5

            [commands]
            enabled = true
            apply-delay-secs = 1.5
            apply-fail-rate = 0.25

            [bus]
            transport = "memory"
            "#,
        )
        .unwrap();
        assert_eq!(config.simulation.nodes, 3);
        assert_eq!(config.simulation.mode, SimulationMode::Interference);
        assert_eq!(config.simulation.seed, Some(7));
        assert_eq!(config.simulation.max_cycles, Some(5));
        assert!(config.commands.enabled);
        assert_eq!(config.commands.apply_delay_secs, 1.5);
        assert_eq!(config.bus.transport, Transport::Memory);
    }

    #[test]
    fn rejects_invalid_values() {
        let cases = [
            "[simulation]\nnodes = 0",
            "[simulation]\nchannels = []",
            "[simulation]\nchannels = [1, 6, 1]",
            "[simulation]\ninterval-secs = 0.0",
            "[simulation]\nburst-pct = 1.5",
            "[commands]\napply-fail-rate = -0.1",
            "[propagation]\nnoise-floor = -20.0",
        ];
        for case in cases {
            match SimulatorConfig::from_toml_str(case) {
                Err(ConfigLoadError::ValidationError(_)) => {}
                other => panic!("expected validation error for {:?}, got {:?}", case, other.map(|_| ())),
            }
        }
    }

    #[test]
    fn shipped_example_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config.example.toml");
        let config = SimulatorConfig::load(&path).unwrap();
        assert!(config.commands.enabled);
        assert_eq!(config.simulation.seed, Some(42));
        assert_eq!(config.simulation.max_cycles, None);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let result = SimulatorConfig::load(Path::new("/nonexistent/simulator.toml"));
        let Err(ConfigLoadError::FileReadError(message)) = result else {
            panic!("expected a read error, got {:?}", result);
        };
        // Both the path context and the underlying io cause are kept.
        assert!(message.contains("/nonexistent/simulator.toml"), "{}", message);
        assert!(message.contains("No such file or directory"), "{}", message);
    }

    #[test]
    fn unknown_mode_is_a_parse_error() {
        let result = SimulatorConfig::from_toml_str("[simulation]\nmode = \"chaos\"");
        assert!(matches!(result, Err(ConfigLoadError::ParseError(_))));
    }
}
