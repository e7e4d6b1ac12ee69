//! Gyroscope bias estimation for the tracking library

use nalgebra::{UnitQuaternion, Vector3};

use crate::lowpass::LowpassFilter;
use crate::math::{RotationExt, Vector3Ext, nanos_to_seconds};

/// Bias estimation constants
const ACCELEROMETER_LOW_PASS_CUTOFF_HZ: f64 = 1.0;
const GYROSCOPE_LOW_PASS_CUTOFF_HZ: f64 = 1.0;
const GYROSCOPE_BIAS_LOW_PASS_CUTOFF_HZ: f64 = 0.15;
const ACCELEROMETER_ROTATION_LOW_PASS_CUTOFF_HZ: f64 = 0.15;
const ACCELEROMETER_STATIC_THRESHOLD: f64 = 0.5; // m/s^2
const GYROSCOPE_STATIC_THRESHOLD: f64 = 0.03; // rad/s
const STATIC_FRAME_DETECTION_THRESHOLD: u32 = 50; // samples
const GYROSCOPE_FOR_BIAS_THRESHOLD: f64 = 0.35; // rad/s
const ACCELEROMETER_ROTATION_RATE_THRESHOLD: f64 = 0.1; // rad/s

/// Counts consecutive static frames of one sensor
#[derive(Debug, Clone, Copy)]
struct StaticCounter {
    min_static_frames: u32,
    consecutive_static_frames: u32,
}

impl StaticCounter {
    fn new(min_static_frames: u32) -> Self {
        Self {
            min_static_frames,
            consecutive_static_frames: 0,
        }
    }

    fn append_frame(&mut self, is_static: bool) {
        if is_static {
            self.consecutive_static_frames = self.consecutive_static_frames.saturating_add(1);
        } else {
            self.consecutive_static_frames = 0;
        }
    }

    fn is_recently_static(&self) -> bool {
        self.consecutive_static_frames >= self.min_static_frames
    }

    fn reset(&mut self) {
        self.consecutive_static_frames = 0;
    }
}

/// Gyroscope bias estimator
///
/// Watches both inertial sensors for a static period. A sensor counts as
/// static while its raw samples stay close to their own 1 Hz low-pass. Once
/// both have been static for long enough, the low-passed gyroscope reading is
/// fed into a slow bias filter, weighted down as the device turns faster
/// (from either the gyroscope or the drift of the gravity direction).
#[derive(Debug, Clone)]
pub struct GyroscopeBiasEstimator {
    accelerometer_lowpass: LowpassFilter,
    gyroscope_lowpass: LowpassFilter,
    gyroscope_bias_lowpass: LowpassFilter,
    accelerometer_rotation_lowpass: LowpassFilter,
    accelerometer_static: StaticCounter,
    gyroscope_static: StaticCounter,
    last_accelerometer_timestamp_ns: i64,
}

impl GyroscopeBiasEstimator {
    pub fn new() -> Self {
        Self {
            accelerometer_lowpass: LowpassFilter::new(ACCELEROMETER_LOW_PASS_CUTOFF_HZ),
            gyroscope_lowpass: LowpassFilter::new(GYROSCOPE_LOW_PASS_CUTOFF_HZ),
            gyroscope_bias_lowpass: LowpassFilter::new(GYROSCOPE_BIAS_LOW_PASS_CUTOFF_HZ),
            accelerometer_rotation_lowpass: LowpassFilter::new(ACCELEROMETER_ROTATION_LOW_PASS_CUTOFF_HZ),
            accelerometer_static: StaticCounter::new(STATIC_FRAME_DETECTION_THRESHOLD),
            gyroscope_static: StaticCounter::new(STATIC_FRAME_DETECTION_THRESHOLD),
            last_accelerometer_timestamp_ns: 0,
        }
    }

    /// Process a gyroscope sample in rad/s
    ///
    /// # Example
    /// ```
    /// use nalgebra::Vector3;
    /// use cardboard_tracking::GyroscopeBiasEstimator;
    ///
    /// let mut estimator = GyroscopeBiasEstimator::new();
    /// estimator.process_gyroscope(Vector3::new(0.01, 0.0, 0.0), 0);
    /// assert!(!estimator.is_current_estimate_valid());
    /// ```
    pub fn process_gyroscope(&mut self, gyroscope: Vector3<f64>, timestamp_ns: i64) {
        self.gyroscope_lowpass.add_sample(gyroscope, timestamp_ns);

        let delta = gyroscope - self.gyroscope_lowpass.filtered_data();
        self.gyroscope_static
            .append_frame(delta.norm() < GYROSCOPE_STATIC_THRESHOLD);

        if self.gyroscope_static.is_recently_static() && self.accelerometer_static.is_recently_static() {
            self.update_gyroscope_bias(timestamp_ns);
        }
    }

    /// Process an accelerometer sample in m/s²
    pub fn process_accelerometer(&mut self, accelerometer: Vector3<f64>, timestamp_ns: i64) {
        let previous = self
            .accelerometer_lowpass
            .is_initialized()
            .then(|| (self.accelerometer_lowpass.filtered_data(), self.last_accelerometer_timestamp_ns));

        self.accelerometer_lowpass.add_sample(accelerometer, timestamp_ns);
        self.last_accelerometer_timestamp_ns = timestamp_ns;

        let current = self.accelerometer_lowpass.filtered_data();
        let delta = accelerometer - current;
        self.accelerometer_static
            .append_frame(delta.norm() < ACCELEROMETER_STATIC_THRESHOLD);

        // Rate at which the smoothed gravity direction turns.
        if let Some((previous, previous_timestamp_ns)) = previous {
            let delta_s = nanos_to_seconds(timestamp_ns - previous_timestamp_ns);
            if delta_s > 0.0 {
                let turn = UnitQuaternion::rotate_into(&previous, &current);
                self.accelerometer_rotation_lowpass
                    .add_sample(turn.rotation_vector() / delta_s, timestamp_ns);
            }
        }
    }

    /// Whether the current bias estimate can be trusted
    ///
    /// Requires at least one bias update, and the part of the bias that is
    /// observable (orthogonal to gravity) must be plausibly small.
    pub fn is_current_estimate_valid(&self) -> bool {
        if !self.gyroscope_bias_lowpass.is_initialized() {
            return false;
        }

        let bias = self.gyroscope_bias_lowpass.filtered_data();
        let gravity = self.accelerometer_lowpass.filtered_data();
        bias.reject_from(&gravity).norm() < GYROSCOPE_FOR_BIAS_THRESHOLD
    }

    /// Current bias estimate in rad/s, or zero while the estimate is invalid
    pub fn gyroscope_bias(&self) -> Vector3<f64> {
        if self.is_current_estimate_valid() {
            self.gyroscope_bias_lowpass.filtered_data()
        } else {
            Vector3::zeros()
        }
    }

    /// Whether both sensors have been static long enough to update the bias
    pub fn is_static(&self) -> bool {
        self.gyroscope_static.is_recently_static() && self.accelerometer_static.is_recently_static()
    }

    /// Reset the estimator to its initial uncalibrated state
    pub fn reset(&mut self) {
        self.accelerometer_lowpass.reset();
        self.gyroscope_lowpass.reset();
        self.gyroscope_bias_lowpass.reset();
        self.accelerometer_rotation_lowpass.reset();
        self.accelerometer_static.reset();
        self.gyroscope_static.reset();
        self.last_accelerometer_timestamp_ns = 0;
    }

    fn update_gyroscope_bias(&mut self, timestamp_ns: i64) {
        let smoothed_gyroscope = self.gyroscope_lowpass.filtered_data();

        // Slow, steady head turns look static; large readings are never bias.
        let speed = smoothed_gyroscope.norm();
        if speed >= GYROSCOPE_FOR_BIAS_THRESHOLD {
            return;
        }
        let gyroscope_weight = 1.0 - speed / GYROSCOPE_FOR_BIAS_THRESHOLD;

        let accelerometer_rate = if self.accelerometer_rotation_lowpass.is_initialized() {
            self.accelerometer_rotation_lowpass.filtered_data().norm()
        } else {
            0.0
        };
        let accelerometer_weight = (1.0 - accelerometer_rate / ACCELEROMETER_ROTATION_RATE_THRESHOLD).max(0.0);

        let weight = gyroscope_weight * accelerometer_weight;
        if weight <= 0.0 {
            return;
        }
        self.gyroscope_bias_lowpass
            .add_weighted_sample(smoothed_gyroscope, timestamp_ns, weight);
    }
}

impl Default for GyroscopeBiasEstimator {
    fn default() -> Self {
        Self::new()
    }
}
