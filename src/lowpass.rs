//! First-order low-pass filter over timestamped 3-axis samples

use nalgebra::Vector3;

use crate::math::nanos_to_seconds;

/// Timesteps at or below this many seconds only advance the stored timestamp
const MIN_TIMESTEP_SECONDS: f64 = 1.0e-5;

/// Time-constant based low-pass filter
///
/// Unlike a fixed-alpha filter the smoothing factor follows the actual sample
/// spacing: `α = w·dt / (τ + w·dt)` with `τ = 1 / (2π·fc)`. The first sample
/// initializes the output directly.
#[derive(Debug, Clone)]
pub struct LowpassFilter {
    time_constant_s: f64,
    filtered_data: Vector3<f64>,
    last_timestamp_ns: i64,
    initialized: bool,
}

impl LowpassFilter {
    /// Create a filter with the given cutoff frequency in Hz
    ///
    /// # Example
    /// ```
    /// use nalgebra::Vector3;
    /// use cardboard_tracking::LowpassFilter;
    ///
    /// let mut filter = LowpassFilter::new(1.0);
    /// filter.add_sample(Vector3::new(1.0, 0.0, 0.0), 0);
    /// assert!(filter.is_initialized());
    /// ```
    pub fn new(cutoff_frequency_hz: f64) -> Self {
        Self {
            time_constant_s: 1.0 / (2.0 * core::f64::consts::PI * cutoff_frequency_hz),
            filtered_data: Vector3::zeros(),
            last_timestamp_ns: 0,
            initialized: false,
        }
    }

    /// Add a sample with full weight
    pub fn add_sample(&mut self, sample: Vector3<f64>, timestamp_ns: i64) {
        self.add_weighted_sample(sample, timestamp_ns, 1.0);
    }

    /// Add a sample whose influence is scaled by `weight`
    ///
    /// Samples older than the previous one only move the time reference;
    /// non-finite samples are skipped.
    ///
    /// # Arguments
    /// * `sample` - New measurement
    /// * `timestamp_ns` - Measurement time in nanoseconds
    /// * `weight` - Scale of the elapsed time, where `0` ignores the sample
    pub fn add_weighted_sample(&mut self, sample: Vector3<f64>, timestamp_ns: i64, weight: f64) {
        if !self.initialized {
            self.filtered_data = sample;
            self.last_timestamp_ns = timestamp_ns;
            self.initialized = true;
            return;
        }

        if timestamp_ns < self.last_timestamp_ns {
            self.last_timestamp_ns = timestamp_ns;
            return;
        }

        let delta_s = nanos_to_seconds(timestamp_ns - self.last_timestamp_ns);
        self.last_timestamp_ns = timestamp_ns;
        if delta_s <= MIN_TIMESTEP_SECONDS || !sample.iter().all(|v| v.is_finite()) {
            return;
        }

        let weighted_delta_s = weight.max(0.0) * delta_s;
        let alpha = weighted_delta_s / (self.time_constant_s + weighted_delta_s);
        self.filtered_data = self.filtered_data * (1.0 - alpha) + sample * alpha;
    }

    /// Whether a first sample has seeded the output
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn filtered_data(&self) -> Vector3<f64> {
        self.filtered_data
    }

    /// Time constant in seconds
    pub fn time_constant(&self) -> f64 {
        self.time_constant_s
    }

    /// Forget all samples; the next one seeds the output again
    pub fn reset(&mut self) {
        self.filtered_data = Vector3::zeros();
        self.last_timestamp_ns = 0;
        self.initialized = false;
    }
}
