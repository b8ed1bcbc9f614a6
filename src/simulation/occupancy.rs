//! Channel activity aggregation.
//!
//! Each cycle the per-node activity accumulators are folded into a global
//! occupancy snapshot. Per-node views (the operating-channel busy estimate
//! and the interference scan) are then derived from that snapshot plus the
//! node's spatial neighborhood, so nearby transmitters raise each other's
//! readings instead of every value being independent noise.

use rand::Rng;
use std::collections::BTreeMap;

use crate::common::config::PathLossParameters;

use super::geometry::distance;
use super::node::NodeState;
use super::signal_calculations::{distant_baseline_signal, estimate_signal};
use super::types::{InterferenceEntry, round2_clamped};

/// Busy percentage assigned to the most loaded channel.
pub const BUSY_CEILING: f64 = 90.0;

const LOCAL_FACTOR_MIN: f64 = -0.5;
const LOCAL_FACTOR_MAX: f64 = 5.0;
const LOCAL_WEIGHT: f64 = 0.4;
const NEIGHBOR_STEP: f64 = 0.15;
const NEIGHBOR_FACTOR_MAX: f64 = 2.0;
const NEIGHBOR_WEIGHT: f64 = 0.6;

/// Busy boost per transmitting neighbor in the interference scan, and its cap.
const SCAN_BOOST_PER_NEIGHBOR: f64 = 6.0;
const SCAN_BOOST_MAX: f64 = 25.0;
/// Half-width of the uniform jitter on scan busy values.
pub const SCAN_BUSY_JITTER: f64 = 4.0;

/// Global per-channel occupancy for one cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OccupancySnapshot {
    /// Summed activity per configured channel.
    pub raw: BTreeMap<u32, f64>,
    /// Normalized busy percentage per configured channel.
    pub busy: BTreeMap<u32, f64>,
}

impl OccupancySnapshot {
    /// Aggregate every node's activity on the configured channels.
    ///
    /// Activity on channels outside `channels` is ignored. The busiest channel
    /// maps to [`BUSY_CEILING`]; the denominator never drops below 1.
    pub fn compute(nodes: &[NodeState], channels: &[u32]) -> Self {
        let mut raw: BTreeMap<u32, f64> = channels.iter().map(|&ch| (ch, 0.0)).collect();
        for node in nodes {
            for (channel, volume) in &node.channel_activity {
                if let Some(load) = raw.get_mut(channel) {
                    *load += volume;
                }
            }
        }

        let max_load = raw.values().copied().fold(1.0_f64, f64::max);
        let busy = raw
            .iter()
            .map(|(&ch, &load)| (ch, round2_clamped(load / max_load * BUSY_CEILING, 0.0, 100.0)))
            .collect();

        Self { raw, busy }
    }

    /// Global busy percentage of `channel` (0 for unknown channels).
    pub fn busy_on(&self, channel: u32) -> f64 {
        self.busy.get(&channel).copied().unwrap_or(0.0)
    }
}

/// Busy estimate for the operating channel of `nodes[index]`.
///
/// Scales the global value up when the node out-transmits the average
/// active node on that channel, and again for every neighbor transmitting
/// on it.
pub fn local_operating_busy(nodes: &[NodeState], neighbors: &[usize], index: usize, snapshot: &OccupancySnapshot) -> f64 {
    let node = &nodes[index];
    let channel = node.channel;
    let global_busy = snapshot.busy_on(channel);

    let (total, active) = nodes
        .iter()
        .map(|n| n.activity_on(channel))
        .filter(|volume| *volume > 0.0)
        .fold((0.0, 0_usize), |(sum, count), volume| (sum + volume, count + 1));

    let local_factor = if active > 0 {
        let average = total / active as f64;
        (node.activity_on(channel) / (average + 1.0) - 1.0).clamp(LOCAL_FACTOR_MIN, LOCAL_FACTOR_MAX)
    } else {
        0.0
    };

    let transmitting_neighbors = neighbors.iter().filter(|&&j| nodes[j].is_active_on(channel)).count();
    let neighbor_factor = (transmitting_neighbors as f64 * NEIGHBOR_STEP).clamp(0.0, NEIGHBOR_FACTOR_MAX);

    let busy = global_busy * (1.0 + LOCAL_WEIGHT * local_factor + NEIGHBOR_WEIGHT * neighbor_factor);
    round2_clamped(busy, 0.0, 100.0)
}

/// One scan entry per configured channel, in configuration order.
pub fn interference_scan<R: Rng + ?Sized>(
    nodes: &[NodeState],
    neighbors: &[usize],
    index: usize,
    channels: &[u32],
    snapshot: &OccupancySnapshot,
    params: &PathLossParameters,
    rng: &mut R,
) -> Vec<InterferenceEntry> {
    let node = &nodes[index];
    channels
        .iter()
        .map(|&channel| {
            let contributors: Vec<&NodeState> = neighbors
                .iter()
                .map(|&j| &nodes[j])
                .filter(|n| n.is_active_on(channel))
                .collect();

            let (rssi, mut busy) = if contributors.is_empty() {
                (distant_baseline_signal(params, rng), snapshot.busy_on(channel))
            } else {
                let average_distance =
                    contributors.iter().map(|n| distance(&node.position, &n.position)).sum::<f64>() / contributors.len() as f64;
                let boost = (contributors.len() as f64 * SCAN_BOOST_PER_NEIGHBOR).min(SCAN_BOOST_MAX);
                (
                    estimate_signal(average_distance, params, rng),
                    (snapshot.busy_on(channel) + boost).clamp(0.0, 100.0),
                )
            };
            busy += rng.gen_range(-SCAN_BUSY_JITTER..=SCAN_BUSY_JITTER);

            InterferenceEntry {
                channel,
                rssi,
                busy: round2_clamped(busy, 0.0, 100.0),
            }
        })
        .collect()
}

/// Apply the per-cycle decay to every node.
pub fn decay_all(nodes: &mut [NodeState]) {
    for node in nodes {
        node.decay_activity();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::types::Point;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn node_at(x: f64, channel: u32, activity: &[(u32, f64)]) -> NodeState {
        let mut rng = StdRng::seed_from_u64(0);
        let mut node = NodeState::new(format!("node-{}", x), Point { x, y: 0.0 }, channel, &PathLossParameters::default(), &mut rng);
        node.channel_activity = activity.iter().copied().collect();
        node
    }

    #[test]
    fn snapshot_normalizes_to_busiest_channel() {
        let nodes = vec![
            node_at(0.0, 1, &[(1, 1000.0), (6, 250.0)]),
            node_at(10.0, 6, &[(6, 250.0), (13, 9999.0)]),
        ];
        let snapshot = OccupancySnapshot::compute(&nodes, &[1, 6, 11]);
        assert_eq!(snapshot.raw.len(), 3);
        assert_eq!(snapshot.raw[&1], 1000.0);
        assert_eq!(snapshot.raw[&6], 500.0);
        assert_eq!(snapshot.busy_on(1), 90.0);
        assert_eq!(snapshot.busy_on(6), 45.0);
        assert_eq!(snapshot.busy_on(11), 0.0);
        // Channel 13 is not configured.
        assert_eq!(snapshot.busy_on(13), 0.0);
    }

    #[test]
    fn snapshot_denominator_floors_at_one() {
        let nodes = vec![node_at(0.0, 1, &[(1, 0.5)])];
        let snapshot = OccupancySnapshot::compute(&nodes, &[1, 6]);
        // Denominator floors at 1.
        assert_eq!(snapshot.busy_on(1), 45.0);
        assert_eq!(snapshot.busy_on(6), 0.0);
    }

    #[test]
    fn transmitting_neighbors_raise_local_busy() {
        let nodes = vec![
            node_at(0.0, 6, &[(6, 100.0)]),
            node_at(5.0, 6, &[(6, 100.0)]),
            node_at(8.0, 6, &[(6, 100.0)]),
        ];
        let snapshot = OccupancySnapshot::compute(&nodes, &[6]);
        let alone = local_operating_busy(&nodes, &[], 0, &snapshot);
        let crowded = local_operating_busy(&nodes, &[1, 2], 0, &snapshot);
        assert!(crowded > alone, "{} <= {}", crowded, alone);
        assert!((0.0..=100.0).contains(&crowded));
    }

    #[test]
    fn heavy_local_transmitter_sees_more_busy() {
        let nodes = vec![node_at(0.0, 6, &[(6, 10_000.0)]), node_at(5.0, 6, &[(6, 100.0)])];
        let snapshot = OccupancySnapshot::compute(&nodes, &[6]);
        let heavy = local_operating_busy(&nodes, &[], 0, &snapshot);
        let light = local_operating_busy(&nodes, &[], 1, &snapshot);
        assert!(heavy > light);
        // The light node is clamped at the lower local factor.
        assert_eq!(light, 72.0);
    }

    #[test]
    fn scan_covers_configured_channels_within_bounds() {
        let params = PathLossParameters::default();
        let channels = [1, 6, 11];
        let nodes = vec![
            node_at(0.0, 1, &[(1, 5000.0)]),
            node_at(3.0, 6, &[(6, 800.0)]),
            node_at(40.0, 11, &[]),
        ];
        let neighbors = [vec![1, 2], vec![0, 2], vec![0, 1]];
        let snapshot = OccupancySnapshot::compute(&nodes, &channels);
        let mut rng = StdRng::seed_from_u64(21);
        for _ in 0..300 {
            for index in 0..nodes.len() {
                let scan = interference_scan(&nodes, &neighbors[index], index, &channels, &snapshot, &params, &mut rng);
                let scanned: Vec<u32> = scan.iter().map(|e| e.channel).collect();
                assert_eq!(scanned, channels);
                for entry in &scan {
                    assert!((0.0..=100.0).contains(&entry.busy));
                    assert!((-95..=-30).contains(&entry.rssi));
                }
            }
        }
    }

    #[test]
    fn scan_boosts_channels_with_nearby_transmitters() {
        let params = PathLossParameters::default();
        let nodes = vec![node_at(0.0, 6, &[]), node_at(1.0, 1, &[(1, 100.0)]), node_at(2.0, 1, &[(1, 100.0)])];
        let snapshot = OccupancySnapshot::compute(&nodes, &[1, 6]);
        let mut rng = StdRng::seed_from_u64(3);
        let scan = interference_scan(&nodes, &[1, 2], 0, &[1, 6], &snapshot, &params, &mut rng);
        // Channel 1: global 90 + 12 boost, capped, minus at most 4 of jitter.
        assert!(scan[0].busy >= 96.0);
        assert!(scan[0].rssi > -55);
        assert!(scan[1].busy <= SCAN_BUSY_JITTER);
    }

    #[test]
    fn decay_drives_global_occupancy_to_zero() {
        let mut nodes = vec![node_at(0.0, 1, &[(1, 50_000.0)]), node_at(1.0, 6, &[(6, 10.0)])];
        let mut previous = OccupancySnapshot::compute(&nodes, &[1, 6]).raw[&1];
        let mut cycles = 0;
        while previous > 0.0 {
            decay_all(&mut nodes);
            cycles += 1;
            let current = OccupancySnapshot::compute(&nodes, &[1, 6]).raw[&1];
            assert!(current < previous);
            previous = current;
            assert!(cycles <= 25);
        }
        assert!(nodes.iter().all(|n| n.channel_activity.is_empty()));
    }
}
