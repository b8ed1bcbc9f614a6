//! Radio signal estimation.
//!
//! Log-distance path loss:
//!
//! ```text
//! S(d) = S(d₀) - 10 × n × log₁₀(d/d₀) + J
//! where d₀ = 1 unit, J ~ Uniform(-2, +2)
//! ```
//!
//! Results are whole dBm values clamped to `[noise_floor, -30]`.

use rand::Rng;

use crate::common::config::{PathLossParameters, SIGNAL_CEILING};

/// Half-width of the uniform jitter added to each estimate (dB).
pub const SIGNAL_JITTER: f64 = 2.0;

/// Upper bound of the synthetic baseline used when nothing nearby transmits.
const DISTANT_BASELINE_CEILING: f64 = -55.0;

/// Estimate the received signal for a given distance and jitter draw.
///
/// Distances below 1 unit are treated as 1 unit so the log term never
/// diverges. Deterministic: the same inputs always give the same output.
pub fn estimate_signal_with_jitter(distance: f64, params: &PathLossParameters, jitter: f64) -> i32 {
    let distance = if distance.is_nan() { 1.0 } else { distance.max(1.0) };
    let signal = params.reference_signal - 10.0 * params.path_loss_exponent * distance.log10() + jitter;
    clamp_signal(signal.round(), params)
}

/// Estimate the received signal at `distance`, drawing the jitter from `rng`.
pub fn estimate_signal<R: Rng + ?Sized>(distance: f64, params: &PathLossParameters, rng: &mut R) -> i32 {
    let jitter = rng.gen_range(-SIGNAL_JITTER..=SIGNAL_JITTER);
    estimate_signal_with_jitter(distance, params, jitter)
}

/// A weak reading near the noise floor, for channels with no nearby activity.
pub fn distant_baseline_signal<R: Rng + ?Sized>(params: &PathLossParameters, rng: &mut R) -> i32 {
    if params.noise_floor < DISTANT_BASELINE_CEILING {
        clamp_signal(rng.gen_range(params.noise_floor..DISTANT_BASELINE_CEILING).trunc(), params)
    } else {
        clamp_signal(params.noise_floor, params)
    }
}

/// Clamp a signal value into the reportable range.
pub fn clamp_signal(signal: f64, params: &PathLossParameters) -> i32 {
    if signal.is_nan() {
        return params.noise_floor.ceil() as i32;
    }
    signal.clamp(params.noise_floor.ceil(), SIGNAL_CEILING) as i32
}
