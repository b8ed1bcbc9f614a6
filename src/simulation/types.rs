//! Type definitions for the simulation.
//!
//! Contains the data structures shared across the simulation:
//! - Positions
//! - Telemetry samples and interference-scan entries (wire shape)
//! - Queues and signals connecting the listener, the main thread and the task

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use serde::Serialize;
use serde_json::Value;

/// Depth of the inbound command queue (listener → simulation task).
/// Small on purpose; the listener waits while it is full.
pub const INBOUND_COMMAND_QUEUE_SIZE: usize = 32;
/// Bounded channel carrying raw inbound messages to the simulation task.
pub type InboundCommandQueue = embassy_sync::channel::Channel<CriticalSectionRawMutex, Value, INBOUND_COMMAND_QUEUE_SIZE>;
/// Receiver side of the inbound command queue.
pub type InboundCommandQueueReceiver = embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, Value, INBOUND_COMMAND_QUEUE_SIZE>;
/// Sender side of the inbound command queue.
pub type InboundCommandQueueSender = embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, Value, INBOUND_COMMAND_QUEUE_SIZE>;

/// Cooperative stop request for the simulation task.
pub type StopSignal = Signal<CriticalSectionRawMutex, ()>;

/// Simple 2D point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// One entry of a node's interference scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterferenceEntry {
    pub channel: u32,
    /// Estimated signal strength of activity on the channel (dBm).
    pub rssi: i32,
    /// Estimated busy percentage, 0..=100.
    pub busy: f64,
}

/// One telemetry sample as published on the telemetry topic.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySample {
    pub node_id: String,
    pub timestamp: String,
    pub radio_id: String,
    pub channel: u32,
    pub rssi: i32,
    pub snr: i32,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub tx_retries: u32,
    pub num_clients: u32,
    pub channel_busy_percent: f64,
    pub interference_scan: Vec<InterferenceEntry>,
    pub neighbors: Vec<String>,
    pub sample_source: String,
}

/// Clamp to `[lo, hi]` after rounding to two decimals.
pub fn round2_clamped(value: f64, lo: f64, hi: f64) -> f64 {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded.is_nan() { lo } else { rounded.clamp(lo, hi) }
}
