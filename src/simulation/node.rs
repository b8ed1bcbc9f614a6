//! Per-node radio state and telemetry production.

use chrono::{DateTime, Utc};
use rand::Rng;
use rand_distr::{Distribution, LogNormal, Normal};
use std::collections::BTreeMap;

use crate::common::config::PathLossParameters;

use super::signal_calculations::clamp_signal;
use super::types::{InterferenceEntry, Point, TelemetrySample, round2_clamped};

/// Weight of the newest busy estimate in the exponential smoothing.
pub const BUSY_SMOOTHING_ALPHA: f64 = 0.4;
/// Multiplier applied to every activity accumulator after each cycle.
pub const ACTIVITY_DECAY: f64 = 0.6;
/// Accumulators below this are dropped.
pub const NEGLIGIBLE_ACTIVITY: f64 = 1.0;

pub const SNR_MIN: i32 = 0;
pub const SNR_MAX: i32 = 60;
pub const MAX_TX_RETRIES: u32 = 200;

/// Median bytes per direction per cycle.
const TRAFFIC_MEDIAN_BYTES: f64 = 35_000.0;
/// Log-space spread of per-cycle traffic; yields a heavy right tail.
const TRAFFIC_SIGMA: f64 = 1.0;

/// Mutable radio state of one simulated node.
///
/// Only the simulation that owns the node mutates it; telemetry production and
/// channel changes both go through `&mut self`, so they never interleave.
#[derive(Debug, Clone)]
pub struct NodeState {
    pub node_id: String,
    pub position: Point,
    pub channel: u32,
    pub rssi: i32,
    pub snr: i32,
    pub num_clients: u32,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    /// Recent transmitted bytes per channel; decays every cycle.
    pub channel_activity: BTreeMap<u32, f64>,
    /// Smoothed operating-channel busy percentage.
    pub smoothed_busy: f64,
    pub last_seen: Option<DateTime<Utc>>,
}

impl NodeState {
    /// Create a node with randomized starting metrics.
    pub fn new<R: Rng + ?Sized>(node_id: String, position: Point, channel: u32, params: &PathLossParameters, rng: &mut R) -> Self {
        let rssi_low = (params.noise_floor.ceil() as i32).clamp(-85, -40);
        let rssi = clamp_signal(rng.gen_range(rssi_low..=-40) as f64, params);
        let snr = rng.gen_range(5..=40);
        let num_clients = match Normal::<f64>::new(5.0, 3.0) {
            Ok(normal) => normal.sample(rng).round().max(0.0) as u32,
            Err(_) => 5,
        };
        Self {
            node_id,
            position,
            channel,
            rssi,
            snr,
            num_clients,
            tx_bytes: 0,
            rx_bytes: 0,
            channel_activity: BTreeMap::new(),
            smoothed_busy: 0.0,
            last_seen: None,
        }
    }

    /// Recent activity on `channel` (0 when none).
    pub fn activity_on(&self, channel: u32) -> f64 {
        self.channel_activity.get(&channel).copied().unwrap_or(0.0)
    }

    /// True if the node has any recent activity on `channel`.
    pub fn is_active_on(&self, channel: u32) -> bool {
        self.activity_on(channel) > 0.0
    }

    /// Produce one telemetry sample and advance the node's state.
    ///
    /// # Parameters
    ///
    /// * `operating_busy` - Local busy estimate for the operating channel (0..=100)
    /// * `interference_scan` - Scan built by the aggregator for this cycle
    /// * `burst_factor` - Traffic multiplier (1.0 unless bursting)
    /// * `neighbors` - Static neighbor ids
    /// * `radio_id` - Radio interface name reported in the sample
    #[allow(clippy::too_many_arguments)]
    pub fn produce_sample<R: Rng + ?Sized>(
        &mut self,
        operating_busy: f64,
        interference_scan: Vec<InterferenceEntry>,
        burst_factor: f64,
        neighbors: &[String],
        radio_id: &str,
        params: &PathLossParameters,
        rng: &mut R,
        now: DateTime<Utc>,
    ) -> TelemetrySample {
        // Natural fluctuation
        self.rssi = clamp_signal((self.rssi + rng.gen_range(-2..=2)) as f64, params);
        self.snr = (self.snr + rng.gen_range(-2..=2)).clamp(SNR_MIN, SNR_MAX);
        self.num_clients = self.num_clients.saturating_add_signed(rng.gen_range(-1..=1));

        let burst_factor = if burst_factor.is_finite() { burst_factor.max(0.0) } else { 1.0 };
        let tx = (draw_traffic(rng) * burst_factor) as u64;
        let rx = (draw_traffic(rng) * burst_factor) as u64;
        self.tx_bytes = tx;
        self.rx_bytes = rx;

        *self.channel_activity.entry(self.channel).or_insert(0.0) += tx as f64;

        self.smoothed_busy = BUSY_SMOOTHING_ALPHA * operating_busy + (1.0 - BUSY_SMOOTHING_ALPHA) * self.smoothed_busy;
        let busy = round2_clamped(self.smoothed_busy, 0.0, 100.0);

        self.last_seen = Some(now);
        TelemetrySample {
            node_id: self.node_id.clone(),
            timestamp: now.to_rfc3339(),
            radio_id: radio_id.to_string(),
            channel: self.channel,
            rssi: self.rssi,
            snr: self.snr,
            tx_bytes: tx,
            rx_bytes: rx,
            tx_retries: rng.gen_range(0..=MAX_TX_RETRIES),
            num_clients: self.num_clients,
            channel_busy_percent: busy,
            interference_scan,
            neighbors: neighbors.to_vec(),
            sample_source: "real".to_string(),
        }
    }

    /// Switch to `channel` and start from a clean activity history.
    pub fn apply_channel(&mut self, channel: u32) {
        self.channel = channel;
        self.channel_activity.clear();
    }

    /// Fade all activity accumulators and drop negligible residue.
    pub fn decay_activity(&mut self) {
        self.channel_activity.retain(|_, volume| {
            *volume *= ACTIVITY_DECAY;
            *volume >= NEGLIGIBLE_ACTIVITY
        });
    }
}

/// Heavy-tailed per-cycle byte volume.
fn draw_traffic<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    match LogNormal::new(TRAFFIC_MEDIAN_BYTES.ln(), TRAFFIC_SIGMA) {
        Ok(distribution) => distribution.sample(rng),
        Err(_) => TRAFFIC_MEDIAN_BYTES,
    }
}
