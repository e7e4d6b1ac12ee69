//! Core types and settings for the tracking library

use nalgebra::{UnitQuaternion, Vector3};

use crate::math::RotationExt;

/// A single accelerometer sample
///
/// `data` is the specific force in m/s² in the sensor frame. At rest it points
/// away from the ground with a magnitude of about 9.81.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccelerometerData {
    /// Timestamp assigned by the sensor clock in nanoseconds
    pub sensor_timestamp_ns: i64,
    /// Timestamp in the application (system) clock in nanoseconds
    pub system_timestamp_ns: i64,
    /// Sample value in m/s²
    pub data: Vector3<f64>,
}

/// A single gyroscope sample
///
/// `data` is the angular velocity of the device in rad/s in the sensor frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GyroscopeData {
    /// Timestamp assigned by the sensor clock in nanoseconds
    pub sensor_timestamp_ns: i64,
    /// Timestamp in the application (system) clock in nanoseconds
    pub system_timestamp_ns: i64,
    /// Sample value in rad/s
    pub data: Vector3<f64>,
}

impl AccelerometerData {
    /// Sample whose sensor and system clocks agree
    pub fn new(timestamp_ns: i64, data: Vector3<f64>) -> Self {
        Self {
            sensor_timestamp_ns: timestamp_ns,
            system_timestamp_ns: timestamp_ns,
            data,
        }
    }
}

impl GyroscopeData {
    /// Sample whose sensor and system clocks agree
    pub fn new(timestamp_ns: i64, data: Vector3<f64>) -> Self {
        Self {
            sensor_timestamp_ns: timestamp_ns,
            system_timestamp_ns: timestamp_ns,
            data,
        }
    }
}

/// Snapshot of the orientation filter
///
/// `sensor_from_start_rotation` maps vectors expressed in the start frame
/// (gravity along +Z) into the sensor frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationState {
    /// System clock timestamp of the last gyroscope sample, in nanoseconds
    pub timestamp_ns: i64,
    /// Current orientation estimate
    pub sensor_from_start_rotation: UnitQuaternion<f64>,
    /// Angular velocity used for forward prediction, in rad/s
    pub sensor_from_start_rotation_velocity: Vector3<f64>,
}

impl Default for RotationState {
    fn default() -> Self {
        Self {
            timestamp_ns: 0,
            sensor_from_start_rotation: UnitQuaternion::identity(),
            sensor_from_start_rotation_velocity: Vector3::zeros(),
        }
    }
}

/// Orientation of the viewport relative to the device's natural orientation
///
/// The display layer reports which way the screen is rotated; the head tracker
/// uses it to express sensor rotations in display axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ViewportOrientation {
    /// Device rotated so its left edge points down
    #[default]
    LandscapeLeft,
    /// Device rotated so its right edge points down
    LandscapeRight,
    /// Natural orientation
    Portrait,
    /// Natural orientation turned upside down
    PortraitUpsideDown,
}

impl ViewportOrientation {
    /// Fixed rotation from sensor axes to display axes
    pub fn sensor_to_display(self) -> UnitQuaternion<f64> {
        let half = core::f64::consts::FRAC_1_SQRT_2;
        let xyzw = match self {
            ViewportOrientation::LandscapeLeft => [0.0, 0.0, -half, half],
            ViewportOrientation::LandscapeRight => [0.0, 0.0, half, half],
            ViewportOrientation::Portrait => [0.0, 0.0, 0.0, 1.0],
            ViewportOrientation::PortraitUpsideDown => [0.0, 0.0, 1.0, 0.0],
        };
        UnitQuaternion::from_xyzw(xyzw)
    }

    /// Calibration rotation applied on the start-frame side of the filter output
    ///
    /// It undoes [`Self::sensor_to_display`] so that a device at rest with +Z
    /// pointing up reports the identity orientation for every viewport.
    pub fn ekf_to_head_tracker(self) -> UnitQuaternion<f64> {
        self.sensor_to_display().inverse()
    }
}

/// Source of the current viewport orientation
///
/// Queried synchronously on every pose request.
pub trait ViewportOrientationSource: Send {
    /// Current viewport orientation
    fn viewport_orientation(&self) -> ViewportOrientation;
}

impl ViewportOrientationSource for ViewportOrientation {
    fn viewport_orientation(&self) -> ViewportOrientation {
        *self
    }
}

/// A head pose handed to the rendering layer
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose {
    /// Head position in meters
    pub position: [f32; 3],
    /// Head orientation quaternion in `(x, y, z, w)` order
    pub orientation: [f32; 4],
}

/// Orientation filter settings
///
/// # Example
/// ```
/// use cardboard_tracking::{EkfSettings, SensorFusionEkf};
///
/// let settings = EkfSettings {
///     bias_estimation_enabled: false,
///     velocity_filter_cutoff_hz: Some(5.0),
/// };
/// let ekf = SensorFusionEkf::with_settings(settings);
/// assert!(!ekf.is_bias_estimation_enabled());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EkfSettings {
    /// Whether gyroscope bias is estimated and subtracted
    pub bias_estimation_enabled: bool,
    /// Cutoff of the low-pass applied to the prediction velocity
    ///
    /// `None` uses the raw bias-corrected gyroscope reading.
    pub velocity_filter_cutoff_hz: Option<f64>,
}

impl Default for EkfSettings {
    fn default() -> Self {
        Self {
            bias_estimation_enabled: true,
            velocity_filter_cutoff_hz: None,
        }
    }
}

/// Head tracker settings
///
/// # Example
/// ```
/// use cardboard_tracking::{HeadTracker, HeadTrackerSettings};
///
/// let settings = HeadTrackerSettings {
///     position_buffer_size: 8,
///     ..Default::default()
/// };
/// let tracker = HeadTracker::new(settings).unwrap();
/// assert!(!tracker.is_tracking());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HeadTrackerSettings {
    /// Settings of the owned orientation filter
    pub ekf: EkfSettings,
    /// Number of head rotations kept for 6-DoF reconciliation (at least 2)
    pub rotation_buffer_size: usize,
    /// Number of 6-DoF positions kept for extrapolation (at least 6)
    pub position_buffer_size: usize,
    /// Neck model weight used when no fresh 6-DoF position is available
    pub neck_model_factor: f64,
}

impl Default for HeadTrackerSettings {
    fn default() -> Self {
        Self {
            ekf: EkfSettings::default(),
            rotation_buffer_size: 10,
            position_buffer_size: 6,
            neck_model_factor: 1.0,
        }
    }
}
