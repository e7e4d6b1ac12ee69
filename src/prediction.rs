//! Gyroscope integration and constant-velocity rotation prediction

use nalgebra::{UnitQuaternion, Vector3};

use crate::math::{EPSILON, RotationExt, nanos_to_seconds};
use crate::types::RotationState;

/// Incremental sensor-from-start rotation for an angular velocity held for `timestep_s`
///
/// The gyroscope reports how the device turns relative to the world; the
/// filter tracks the inverse (how the world turns in the sensor frame), hence
/// the negated angle. A zero velocity yields the identity.
///
/// # Example
/// ```
/// use nalgebra::{UnitQuaternion, Vector3};
/// use cardboard_tracking::rotation_from_gyroscope;
///
/// let step = rotation_from_gyroscope(&Vector3::new(0.0, 0.0, 1.0), 0.5);
/// assert!((step.angle() - 0.5).abs() < 1e-12);
/// assert_eq!(rotation_from_gyroscope(&Vector3::zeros(), 0.5), UnitQuaternion::identity());
/// ```
pub fn rotation_from_gyroscope(angular_velocity: &Vector3<f64>, timestep_s: f64) -> UnitQuaternion<f64> {
    let velocity = angular_velocity.norm();
    if velocity < EPSILON || !velocity.is_finite() {
        return UnitQuaternion::identity();
    }
    UnitQuaternion::from_axis_and_angle(&(angular_velocity / velocity), -timestep_s * velocity)
}

/// Extrapolate a state to `timestamp_ns` assuming constant angular velocity
///
/// A timestamp of `0` requests no prediction and returns the state's rotation.
pub fn predict_rotation(state: &RotationState, timestamp_ns: i64) -> UnitQuaternion<f64> {
    if timestamp_ns == 0 {
        return state.sensor_from_start_rotation;
    }
    let timestep_s = nanos_to_seconds(timestamp_ns - state.timestamp_ns);
    let update = rotation_from_gyroscope(&state.sensor_from_start_rotation_velocity, timestep_s);
    update * state.sensor_from_start_rotation
}
