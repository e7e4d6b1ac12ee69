//! Extended Kalman filter fusing gyroscope and accelerometer samples
//!
//! The filter state is the sensor-from-start rotation with a 3x3 covariance
//! over its rotation-vector error. Gyroscope samples drive the prediction step
//! and accelerometer samples correct tilt by comparing the predicted and
//! measured direction of gravity.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info, trace};
use nalgebra::{Matrix3, UnitQuaternion, Vector3};

use crate::bias::GyroscopeBiasEstimator;
use crate::lowpass::LowpassFilter;
use crate::math::{RotationExt, nanos_to_seconds, rotation_matrix, safe_inverse};
use crate::prediction::{predict_rotation, rotation_from_gyroscope};
use crate::types::{AccelerometerData, EkfSettings, GyroscopeData, RotationState};

/// Filter constants
const INITIAL_STATE_COVARIANCE: f64 = 25.0;
const INITIAL_PROCESS_COVARIANCE: f64 = 1.0;
const MIN_ACCELEROMETER_NOISE_SIGMA: f64 = 0.75;
const MAX_ACCELEROMETER_NOISE_SIGMA: f64 = 7.0;
const MAX_ACCELEROMETER_NORM_CHANGE: f64 = 0.15;
const ACCELEROMETER_NORM_SMOOTHING_FACTOR: f64 = 0.5;
const FINITE_DIFFERENCING_EPSILON: f64 = 1.0e-7;

/// Gyroscope timestep constants
const MAXIMUM_GYROSCOPE_SAMPLE_DELAY_S: f64 = 0.04;
const DEFAULT_GYROSCOPE_TIMESTEP_S: f64 = 0.01;
const TIMESTEP_FILTER_COEFFICIENT: f64 = 0.95;
const TIMESTEP_FILTER_MIN_SAMPLES: u32 = 10;

/// Canonical "up" direction of the start frame
fn canonical_z_direction() -> Vector3<f64> {
    Vector3::z()
}

/// Running estimate of the gyroscope sample period
///
/// Substituted for gaps longer than the maximum sample delay so that a stalled
/// sensor thread does not integrate one huge step.
#[derive(Debug, Clone, Copy, Default)]
struct TimestepFilter {
    filtered_timestep_s: f64,
    num_samples: u32,
    initialized: bool,
    valid: bool,
}

impl TimestepFilter {
    fn add(&mut self, timestep_s: f64) {
        if !self.initialized {
            self.filtered_timestep_s = timestep_s;
            self.num_samples = 1;
            self.initialized = true;
            return;
        }

        self.filtered_timestep_s = TIMESTEP_FILTER_COEFFICIENT * self.filtered_timestep_s
            + (1.0 - TIMESTEP_FILTER_COEFFICIENT) * timestep_s;
        self.num_samples = self.num_samples.saturating_add(1);
        if self.num_samples > TIMESTEP_FILTER_MIN_SAMPLES {
            self.valid = true;
        }
    }

    /// Timestep to integrate for a measured gap between gyroscope samples
    fn timestep_for(&mut self, measured_s: f64) -> f64 {
        if measured_s > MAXIMUM_GYROSCOPE_SAMPLE_DELAY_S {
            let substitute = if self.valid {
                self.filtered_timestep_s
            } else {
                DEFAULT_GYROSCOPE_TIMESTEP_S
            };
            debug!(
                "gyroscope gap of {:.1} ms replaced by {:.1} ms timestep",
                measured_s * 1e3,
                substitute * 1e3
            );
            return substitute;
        }
        self.add(measured_s);
        measured_s
    }
}

/// Everything guarded by the filter lock
///
/// Rotation and covariance are updated together, so they share one lock.
#[derive(Debug, Clone)]
struct FilterState {
    rotation_state: RotationState,
    last_gyroscope_timestamp_ns: Option<i64>,
    last_accelerometer_timestamp_ns: Option<i64>,
    state_covariance: Matrix3<f64>,
    process_covariance: Matrix3<f64>,
    accelerometer_measurement_covariance: Matrix3<f64>,
    accelerometer_measurement: Vector3<f64>,
    previous_accelerometer_norm: f64,
    moving_average_accelerometer_norm_change: f64,
    timestep_filter: TimestepFilter,
    bias_estimator: GyroscopeBiasEstimator,
    gyroscope_bias_estimate: Vector3<f64>,
    bias_estimation_enabled: bool,
    velocity_filter: Option<LowpassFilter>,
}

impl FilterState {
    fn new(settings: EkfSettings) -> Self {
        Self {
            rotation_state: RotationState::default(),
            last_gyroscope_timestamp_ns: None,
            last_accelerometer_timestamp_ns: None,
            state_covariance: Matrix3::identity() * INITIAL_STATE_COVARIANCE,
            process_covariance: Matrix3::identity() * INITIAL_PROCESS_COVARIANCE,
            accelerometer_measurement_covariance: Matrix3::identity()
                * MIN_ACCELEROMETER_NOISE_SIGMA
                * MIN_ACCELEROMETER_NOISE_SIGMA,
            accelerometer_measurement: Vector3::zeros(),
            previous_accelerometer_norm: 0.0,
            moving_average_accelerometer_norm_change: 0.0,
            timestep_filter: TimestepFilter::default(),
            bias_estimator: GyroscopeBiasEstimator::new(),
            gyroscope_bias_estimate: Vector3::zeros(),
            bias_estimation_enabled: settings.bias_estimation_enabled,
            velocity_filter: settings.velocity_filter_cutoff_hz.map(LowpassFilter::new),
        }
    }

    /// Clear everything except configuration
    fn reset(&mut self) {
        let mut velocity_filter = self.velocity_filter.take();
        if let Some(filter) = velocity_filter.as_mut() {
            filter.reset();
        }
        *self = Self::new(EkfSettings {
            bias_estimation_enabled: self.bias_estimation_enabled,
            velocity_filter_cutoff_hz: None,
        });
        self.velocity_filter = velocity_filter;
    }

    /// Propagate the covariance through an incremental rotation
    fn update_state_covariance(&mut self, motion_update: &Matrix3<f64>) {
        self.state_covariance = motion_update * self.state_covariance * motion_update.transpose();
    }

    /// Adapt the accelerometer noise to how much the measured norm is changing
    ///
    /// A norm far from steady means linear acceleration on top of gravity, so
    /// the tilt measurement is trusted less.
    fn update_measurement_covariance(&mut self) {
        let current_norm = self.accelerometer_measurement.norm();
        let norm_change = (current_norm - self.previous_accelerometer_norm).abs();
        self.previous_accelerometer_norm = current_norm;

        self.moving_average_accelerometer_norm_change = ACCELEROMETER_NORM_SMOOTHING_FACTOR * norm_change
            + (1.0 - ACCELEROMETER_NORM_SMOOTHING_FACTOR) * self.moving_average_accelerometer_norm_change;

        let norm_change_ratio = self.moving_average_accelerometer_norm_change / MAX_ACCELEROMETER_NORM_CHANGE;
        let sigma = (MIN_ACCELEROMETER_NOISE_SIGMA
            + norm_change_ratio * (MAX_ACCELEROMETER_NOISE_SIGMA - MIN_ACCELEROMETER_NOISE_SIGMA))
            .clamp(MIN_ACCELEROMETER_NOISE_SIGMA, MAX_ACCELEROMETER_NOISE_SIGMA);

        self.accelerometer_measurement_covariance = Matrix3::identity() * sigma * sigma;
    }

    /// Rotation vector taking the predicted gravity direction onto the measured one
    fn compute_innovation(&self, sensor_from_start: &UnitQuaternion<f64>) -> Vector3<f64> {
        let predicted_up = sensor_from_start * canonical_z_direction();
        UnitQuaternion::rotate_into(&predicted_up, &self.accelerometer_measurement).rotation_vector()
    }

    /// Measurement Jacobian by forward differences around the current rotation
    fn compute_measurement_jacobian(&self, innovation: &Vector3<f64>) -> Matrix3<f64> {
        let rotation = self.rotation_state.sensor_from_start_rotation;
        let mut jacobian = Matrix3::zeros();
        for dof in 0..3 {
            let mut delta = Vector3::zeros();
            delta[dof] = FINITE_DIFFERENCING_EPSILON;

            let perturbed = UnitQuaternion::from_rotation_vector(&delta) * rotation;
            let column = (innovation - self.compute_innovation(&perturbed)) / FINITE_DIFFERENCING_EPSILON;
            jacobian.set_column(dof, &column);
        }
        jacobian
    }

    fn process_gyroscope(&mut self, sample: &GyroscopeData, aligned_with_gravity: bool) {
        let timestep_s = match self.last_gyroscope_timestamp_ns {
            Some(last) => self
                .timestep_filter
                .timestep_for(nanos_to_seconds(sample.sensor_timestamp_ns - last)),
            None => 0.0,
        };

        if self.bias_estimation_enabled {
            self.bias_estimator
                .process_gyroscope(sample.data, sample.sensor_timestamp_ns);
            if self.bias_estimator.is_current_estimate_valid() {
                self.gyroscope_bias_estimate = self.bias_estimator.gyroscope_bias();
            }
        }

        let corrected = sample.data - self.gyroscope_bias_estimate;

        // Orientation only advances once gravity has anchored it.
        if aligned_with_gravity && timestep_s > 0.0 {
            let rotation_from_gyroscope = rotation_from_gyroscope(&corrected, timestep_s);
            self.rotation_state.sensor_from_start_rotation =
                rotation_from_gyroscope * self.rotation_state.sensor_from_start_rotation;
            self.update_state_covariance(&rotation_matrix(&rotation_from_gyroscope));
            self.state_covariance += self.process_covariance * (timestep_s * timestep_s);
        }

        self.rotation_state.timestamp_ns = sample.system_timestamp_ns;
        self.rotation_state.sensor_from_start_rotation_velocity = match self.velocity_filter.as_mut() {
            Some(filter) => {
                filter.add_sample(corrected, sample.sensor_timestamp_ns);
                filter.filtered_data()
            }
            None => corrected,
        };
        self.last_gyroscope_timestamp_ns = Some(sample.sensor_timestamp_ns);
    }

    /// Returns whether the sample aligned the filter with gravity
    fn process_accelerometer(&mut self, sample: &AccelerometerData, aligned_with_gravity: bool) -> bool {
        self.last_accelerometer_timestamp_ns = Some(sample.sensor_timestamp_ns);
        self.accelerometer_measurement = sample.data;

        if self.bias_estimation_enabled {
            self.bias_estimator
                .process_accelerometer(sample.data, sample.sensor_timestamp_ns);
        }

        if !aligned_with_gravity {
            // The first measurement sets tilt directly; there is nothing to correct yet.
            self.rotation_state.sensor_from_start_rotation =
                UnitQuaternion::rotate_into(&canonical_z_direction(), &self.accelerometer_measurement);
            self.previous_accelerometer_norm = self.accelerometer_measurement.norm();
            return true;
        }

        self.update_measurement_covariance();

        let innovation = self.compute_innovation(&self.rotation_state.sensor_from_start_rotation);
        let jacobian = self.compute_measurement_jacobian(&innovation);

        // S = H * P * H' + R
        let innovation_covariance =
            jacobian * self.state_covariance * jacobian.transpose() + self.accelerometer_measurement_covariance;
        let Some(innovation_covariance_inverse) = safe_inverse(&innovation_covariance) else {
            debug!("singular innovation covariance, skipping accelerometer update");
            return false;
        };

        // K = P * H' * S^-1
        let kalman_gain = self.state_covariance * jacobian.transpose() * innovation_covariance_inverse;

        // x_update = K * nu
        let state_update = kalman_gain * innovation;

        // P = (I - K * H) * P
        self.state_covariance = (Matrix3::identity() - kalman_gain * jacobian) * self.state_covariance;

        let rotation_from_state_update = UnitQuaternion::from_rotation_vector(&state_update);
        self.rotation_state.sensor_from_start_rotation =
            rotation_from_state_update * self.rotation_state.sensor_from_start_rotation;
        self.update_state_covariance(&rotation_matrix(&rotation_from_state_update));
        false
    }
}

/// Orientation filter shared between sensor threads and the render thread
///
/// Every method takes `&self`; the rotation and its covariance live behind a
/// single mutex held only for constant-time arithmetic. The reset request and
/// gravity alignment are standalone flags outside the lock.
pub struct SensorFusionEkf {
    state: Mutex<FilterState>,
    reset_requested: AtomicBool,
    aligned_with_gravity: AtomicBool,
}

impl SensorFusionEkf {
    /// Create a filter with default settings
    pub fn new() -> Self {
        Self::with_settings(EkfSettings::default())
    }

    /// Create a filter with specified settings
    pub fn with_settings(settings: EkfSettings) -> Self {
        Self {
            state: Mutex::new(FilterState::new(settings)),
            reset_requested: AtomicBool::new(false),
            aligned_with_gravity: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FilterState> {
        // The state is plain data; a panic elsewhere cannot leave it half-written
        // in a way that is worse than dropping the last sample.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Integrate a gyroscope sample
    ///
    /// Samples at or before the last accepted gyroscope timestamp are dropped,
    /// as is everything while a reset is pending.
    ///
    /// # Example
    /// ```
    /// use nalgebra::Vector3;
    /// use cardboard_tracking::{AccelerometerData, GyroscopeData, SensorFusionEkf};
    ///
    /// let ekf = SensorFusionEkf::new();
    /// ekf.process_accelerometer_sample(&AccelerometerData::new(0, Vector3::new(0.0, 0.0, 9.81)));
    /// ekf.process_gyroscope_sample(&GyroscopeData::new(0, Vector3::zeros()));
    /// ekf.process_gyroscope_sample(&GyroscopeData::new(10_000_000, Vector3::new(0.0, 0.0, 1.0)));
    ///
    /// let state = ekf.latest_rotation_state();
    /// assert!((state.sensor_from_start_rotation.angle() - 0.01).abs() < 1e-9);
    /// ```
    pub fn process_gyroscope_sample(&self, sample: &GyroscopeData) {
        if self.reset_requested.load(Ordering::Acquire) {
            trace!("gyroscope sample ignored while a reset is pending");
            return;
        }

        let mut state = self.lock();
        if state
            .last_gyroscope_timestamp_ns
            .is_some_and(|last| sample.sensor_timestamp_ns <= last)
        {
            trace!("dropping out-of-order gyroscope sample at {} ns", sample.sensor_timestamp_ns);
            return;
        }

        state.process_gyroscope(sample, self.aligned_with_gravity.load(Ordering::Acquire));
    }

    /// Correct tilt with an accelerometer sample
    ///
    /// The first sample after construction or reset aligns the filter with
    /// gravity without a Kalman update.
    pub fn process_accelerometer_sample(&self, sample: &AccelerometerData) {
        let mut state = self.lock();

        if self.reset_requested.swap(false, Ordering::AcqRel) {
            state.reset();
            self.aligned_with_gravity.store(false, Ordering::Release);
            info!("orientation filter reset");
        }

        if state
            .last_accelerometer_timestamp_ns
            .is_some_and(|last| sample.sensor_timestamp_ns <= last)
        {
            trace!(
                "dropping out-of-order accelerometer sample at {} ns",
                sample.sensor_timestamp_ns
            );
            return;
        }

        let aligned = self.aligned_with_gravity.load(Ordering::Acquire);
        if state.process_accelerometer(sample, aligned) {
            self.aligned_with_gravity.store(true, Ordering::Release);
            debug!("orientation aligned with gravity");
        }
    }

    /// Copy of the current filter output
    pub fn latest_rotation_state(&self) -> RotationState {
        self.lock().rotation_state
    }

    /// Rotation extrapolated to `timestamp_ns` (system clock)
    ///
    /// # Arguments
    /// * `timestamp_ns` - Target time; `0` requests no prediction
    ///
    /// # Returns
    /// The current rotation advanced at the latest angular velocity
    pub fn predict_rotation(&self, timestamp_ns: i64) -> UnitQuaternion<f64> {
        predict_rotation(&self.lock().rotation_state, timestamp_ns)
    }

    /// Stop the predicted motion
    ///
    /// Integrates a zero angular velocity sample one nanosecond after the last
    /// accepted gyroscope sample, then clears the velocity and its low-pass
    /// history. The velocity is cleared even while a reset is pending, so
    /// [`predict_rotation`](Self::predict_rotation) stops extrapolating until
    /// the next real gyroscope sample arrives.
    pub fn inject_zero_velocity_sample(&self) {
        let mut state = self.lock();

        let last_accepted = state.last_gyroscope_timestamp_ns;
        if let Some(last) = last_accepted.filter(|_| !self.reset_requested.load(Ordering::Acquire)) {
            let sample = GyroscopeData {
                sensor_timestamp_ns: last + 1,
                system_timestamp_ns: state.rotation_state.timestamp_ns + 1,
                data: Vector3::zeros(),
            };
            state.process_gyroscope(&sample, self.aligned_with_gravity.load(Ordering::Acquire));
        }

        if let Some(filter) = state.velocity_filter.as_mut() {
            filter.reset();
        }
        state.rotation_state.sensor_from_start_rotation_velocity = Vector3::zeros();
    }

    /// Request a reset, executed with the next accelerometer sample
    pub fn reset(&self) {
        self.reset_requested.store(true, Ordering::Release);
    }

    /// Whether a requested reset has not run yet
    pub fn is_reset_pending(&self) -> bool {
        self.reset_requested.load(Ordering::Acquire)
    }

    /// Whether at least one accelerometer sample has anchored the orientation
    pub fn is_aligned_with_gravity(&self) -> bool {
        self.aligned_with_gravity.load(Ordering::Acquire)
    }

    /// Post-multiply the state by `rotation`, changing the start frame
    pub fn rotate_sensor_space_to_start_space_transformation(&self, rotation: &UnitQuaternion<f64>) {
        let mut state = self.lock();
        state.rotation_state.sensor_from_start_rotation *= rotation;
    }

    /// Install a fresh low-pass on the prediction velocity
    pub fn set_low_pass_filter(&self, cutoff_frequency_hz: f64) {
        let mut state = self.lock();
        state.velocity_filter = Some(LowpassFilter::new(cutoff_frequency_hz));
        state.rotation_state.sensor_from_start_rotation_velocity = Vector3::zeros();
    }

    /// Enable or disable gyroscope bias estimation
    ///
    /// Disabling also drops the latched estimate.
    pub fn set_bias_estimation_enabled(&self, enabled: bool) {
        let mut state = self.lock();
        if state.bias_estimation_enabled == enabled {
            return;
        }
        state.bias_estimation_enabled = enabled;
        state.bias_estimator.reset();
        state.gyroscope_bias_estimate = Vector3::zeros();
    }

    /// Whether gyroscope samples are corrected by the bias estimator
    pub fn is_bias_estimation_enabled(&self) -> bool {
        self.lock().bias_estimation_enabled
    }

    /// Bias currently subtracted from gyroscope samples
    pub fn gyroscope_bias_estimate(&self) -> Vector3<f64> {
        self.lock().gyroscope_bias_estimate
    }

    /// Whether the bias estimator currently reports a trustworthy estimate
    pub fn is_bias_estimate_valid(&self) -> bool {
        self.lock().bias_estimator.is_current_estimate_valid()
    }

    /// Current state covariance
    pub fn state_covariance(&self) -> Matrix3<f64> {
        self.lock().state_covariance
    }
}

impl Default for SensorFusionEkf {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const PERIOD_NS: i64 = 10_000_000;

    fn gravity() -> Vector3<f64> {
        Vector3::new(0.0, 0.0, 9.81)
    }

    #[test]
    fn test_new_filter() {
        let ekf = SensorFusionEkf::new();
        let state = ekf.latest_rotation_state();
        assert_eq!(state, RotationState::default());
        assert!(!ekf.is_aligned_with_gravity());
        assert!(ekf.is_bias_estimation_enabled());
        assert_eq!(ekf.state_covariance(), Matrix3::identity() * INITIAL_STATE_COVARIANCE);
    }

    #[test]
    fn test_gyroscope_ignored_before_alignment() {
        let ekf = SensorFusionEkf::new();
        ekf.process_gyroscope_sample(&GyroscopeData::new(0, Vector3::new(1.0, 0.0, 0.0)));
        ekf.process_gyroscope_sample(&GyroscopeData::new(PERIOD_NS, Vector3::new(1.0, 0.0, 0.0)));

        let state = ekf.latest_rotation_state();
        assert_eq!(state.sensor_from_start_rotation, UnitQuaternion::identity());
        assert_eq!(state.timestamp_ns, PERIOD_NS);
    }

    #[test]
    fn test_large_gap_uses_default_timestep() {
        let ekf = SensorFusionEkf::with_settings(EkfSettings {
            bias_estimation_enabled: false,
            velocity_filter_cutoff_hz: None,
        });
        ekf.process_accelerometer_sample(&AccelerometerData::new(0, gravity()));
        ekf.process_gyroscope_sample(&GyroscopeData::new(0, Vector3::zeros()));

        // One second gap at 1 rad/s integrates the 10 ms default step, not a full radian.
        ekf.process_gyroscope_sample(&GyroscopeData::new(1_000_000_000, Vector3::new(0.0, 0.0, 1.0)));
        let angle = ekf.latest_rotation_state().sensor_from_start_rotation.angle();
        assert_relative_eq!(angle, DEFAULT_GYROSCOPE_TIMESTEP_S, epsilon = 1e-9);
    }

    #[test]
    fn test_large_gap_uses_filtered_timestep() {
        let ekf = SensorFusionEkf::with_settings(EkfSettings {
            bias_estimation_enabled: false,
            velocity_filter_cutoff_hz: None,
        });
        ekf.process_accelerometer_sample(&AccelerometerData::new(0, gravity()));

        let period_ns = 5_000_000;
        for i in 0..20 {
            ekf.process_gyroscope_sample(&GyroscopeData::new(i * period_ns, Vector3::zeros()));
        }
        let before = ekf.latest_rotation_state().sensor_from_start_rotation;
        ekf.process_gyroscope_sample(&GyroscopeData::new(2_000_000_000, Vector3::new(0.0, 0.0, 1.0)));
        let after = ekf.latest_rotation_state().sensor_from_start_rotation;

        assert_relative_eq!(after.angle_to(&before), 0.005, epsilon = 1e-9);
    }

    #[test]
    fn test_timestep_filter_validity() {
        let mut filter = TimestepFilter::default();
        for _ in 0..=TIMESTEP_FILTER_MIN_SAMPLES {
            assert!(!filter.valid);
            filter.add(0.002);
        }
        assert!(filter.valid);
        assert_relative_eq!(filter.filtered_timestep_s, 0.002, epsilon = 1e-12);
    }

    #[test]
    fn test_measurement_covariance_adapts_to_norm_change() {
        let mut state = FilterState::new(EkfSettings::default());
        state.accelerometer_measurement = gravity();
        state.previous_accelerometer_norm = 9.81;
        state.update_measurement_covariance();
        let min = MIN_ACCELEROMETER_NOISE_SIGMA * MIN_ACCELEROMETER_NOISE_SIGMA;
        assert_relative_eq!(state.accelerometer_measurement_covariance, Matrix3::identity() * min);

        // A violent shake saturates at the maximum sigma.
        state.accelerometer_measurement = gravity() * 3.0;
        state.update_measurement_covariance();
        let max = MAX_ACCELEROMETER_NOISE_SIGMA * MAX_ACCELEROMETER_NOISE_SIGMA;
        assert_relative_eq!(state.accelerometer_measurement_covariance, Matrix3::identity() * max);
    }

    #[test]
    fn test_jacobian_is_near_identity_at_rest() {
        let mut state = FilterState::new(EkfSettings::default());
        state.accelerometer_measurement = gravity();
        let innovation = state.compute_innovation(&state.rotation_state.sensor_from_start_rotation);
        assert_relative_eq!(innovation, Vector3::zeros(), epsilon = 1e-12);

        // Tilt is observable about X and Y, heading about Z is not.
        let jacobian = state.compute_measurement_jacobian(&innovation);
        assert_relative_eq!(jacobian[(0, 0)], 1.0, epsilon = 1e-4);
        assert_relative_eq!(jacobian[(1, 1)], 1.0, epsilon = 1e-4);
        assert_relative_eq!(jacobian[(2, 2)], 0.0, epsilon = 1e-4);
    }

    #[test]
    fn test_accelerometer_corrects_tilt() {
        let ekf = SensorFusionEkf::with_settings(EkfSettings {
            bias_estimation_enabled: false,
            velocity_filter_cutoff_hz: None,
        });
        ekf.process_accelerometer_sample(&AccelerometerData::new(0, gravity()));

        // Inject a tilt error, then let gravity pull it back.
        let tilt = UnitQuaternion::from_axis_and_angle(&Vector3::x(), 0.2);
        ekf.rotate_sensor_space_to_start_space_transformation(&tilt);
        for i in 1..=200 {
            let t = i * PERIOD_NS;
            ekf.process_gyroscope_sample(&GyroscopeData::new(t, Vector3::zeros()));
            ekf.process_accelerometer_sample(&AccelerometerData::new(t, gravity()));
        }

        let rotation = ekf.latest_rotation_state().sensor_from_start_rotation;
        let down = rotation * Vector3::z();
        assert_relative_eq!(down, Vector3::z(), epsilon = 1e-3);
    }

    #[test]
    fn test_reset_is_deferred_to_accelerometer() {
        let ekf = SensorFusionEkf::new();
        ekf.process_accelerometer_sample(&AccelerometerData::new(0, Vector3::new(0.0, 9.81, 0.0)));
        assert!(ekf.is_aligned_with_gravity());

        ekf.reset();
        assert!(ekf.is_reset_pending());
        ekf.process_gyroscope_sample(&GyroscopeData::new(PERIOD_NS, Vector3::new(1.0, 0.0, 0.0)));
        assert_eq!(ekf.latest_rotation_state().timestamp_ns, 0);

        // Timestamps restart after a reset.
        ekf.process_accelerometer_sample(&AccelerometerData::new(0, gravity()));
        assert!(!ekf.is_reset_pending());
        assert!(ekf.is_aligned_with_gravity());
        assert_relative_eq!(
            ekf.latest_rotation_state().sensor_from_start_rotation.angle(),
            0.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_velocity_low_pass() {
        let ekf = SensorFusionEkf::with_settings(EkfSettings {
            bias_estimation_enabled: false,
            velocity_filter_cutoff_hz: None,
        });
        ekf.process_gyroscope_sample(&GyroscopeData::new(0, Vector3::new(0.0, 0.0, 1.0)));
        assert_eq!(
            ekf.latest_rotation_state().sensor_from_start_rotation_velocity,
            Vector3::new(0.0, 0.0, 1.0)
        );

        ekf.set_low_pass_filter(1.0);
        assert_eq!(ekf.latest_rotation_state().sensor_from_start_rotation_velocity, Vector3::zeros());

        ekf.process_gyroscope_sample(&GyroscopeData::new(PERIOD_NS, Vector3::zeros()));
        ekf.process_gyroscope_sample(&GyroscopeData::new(2 * PERIOD_NS, Vector3::new(0.0, 0.0, 1.0)));
        let velocity = ekf.latest_rotation_state().sensor_from_start_rotation_velocity;
        assert!(velocity.z > 0.0 && velocity.z < 0.1);
    }

    #[test]
    fn test_disabling_bias_estimation_clears_estimate() {
        let ekf = SensorFusionEkf::new();
        for i in 0..300 {
            let t = i * PERIOD_NS;
            ekf.process_accelerometer_sample(&AccelerometerData::new(t, gravity()));
            ekf.process_gyroscope_sample(&GyroscopeData::new(t, Vector3::new(0.02, 0.0, 0.0)));
        }
        assert!(ekf.gyroscope_bias_estimate().norm() > 0.0);

        ekf.set_bias_estimation_enabled(false);
        assert!(!ekf.is_bias_estimation_enabled());
        assert_eq!(ekf.gyroscope_bias_estimate(), Vector3::zeros());
    }

    #[test]
    fn test_zero_velocity_sample_follows_last_accepted_gyroscope() {
        let ekf = SensorFusionEkf::with_settings(EkfSettings {
            bias_estimation_enabled: false,
            velocity_filter_cutoff_hz: None,
        });
        ekf.process_accelerometer_sample(&AccelerometerData::new(0, gravity()));
        ekf.process_gyroscope_sample(&GyroscopeData::new(0, Vector3::zeros()));
        ekf.process_gyroscope_sample(&GyroscopeData::new(10 * PERIOD_NS, Vector3::new(0.0, 0.0, 1.0)));
        // Late sample, dropped
        ekf.process_gyroscope_sample(&GyroscopeData::new(5 * PERIOD_NS, Vector3::new(0.0, 0.0, 1.0)));

        ekf.inject_zero_velocity_sample();
        let state = ekf.latest_rotation_state();
        assert_eq!(state.timestamp_ns, 10 * PERIOD_NS + 1);
        assert_eq!(state.sensor_from_start_rotation_velocity, Vector3::zeros());

        let now = ekf.predict_rotation(state.timestamp_ns);
        let later = ekf.predict_rotation(state.timestamp_ns + 1_000_000_000);
        assert_relative_eq!(now.angle_to(&later), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_velocity_sample_with_reset_pending() {
        let ekf = SensorFusionEkf::with_settings(EkfSettings {
            bias_estimation_enabled: false,
            velocity_filter_cutoff_hz: Some(1.0),
        });
        ekf.process_accelerometer_sample(&AccelerometerData::new(0, gravity()));
        ekf.process_gyroscope_sample(&GyroscopeData::new(0, Vector3::new(0.0, 0.0, 1.0)));
        assert!(ekf.latest_rotation_state().sensor_from_start_rotation_velocity.z > 0.0);

        ekf.reset();
        ekf.inject_zero_velocity_sample();
        assert!(ekf.is_reset_pending());
        assert_eq!(ekf.latest_rotation_state().sensor_from_start_rotation_velocity, Vector3::zeros());
    }
}
