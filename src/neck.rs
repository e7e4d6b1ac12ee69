//! Neck model approximating head translation from orientation alone
//!
//! The eyes sit forward of and above the neck pivot, so turning the head also
//! moves them. Without positional tracking this offset is the only source of
//! translation in the pose.

use nalgebra::{UnitQuaternion, Vector3};

use crate::math::RotationExt;

/// Eyes relative to the neck pivot in meters: up and forward (-Z)
const NECK_OFFSET_M: [f64; 3] = [0.0, 0.075, -0.080];

/// Height of the eyes above the pivot, removed so the rest pose is at the origin
const NECK_HEIGHT_M: f64 = 0.075;

/// Head position for an orientation, scaled by `factor`
///
/// The identity orientation yields `(0, 0, -0.08)·factor`.
///
/// # Arguments
/// * `orientation` - Head orientation
/// * `factor` - Model weight, clamped to `[0, 1]`; zero disables the model
///
/// # Returns
/// Eye position relative to the rest pose in meters
///
/// # Example
/// ```
/// use nalgebra::UnitQuaternion;
/// use cardboard_tracking::apply_neck_model;
///
/// let position = apply_neck_model(&UnitQuaternion::identity(), 1.0);
/// assert!(position.x.abs() < 1e-12);
/// assert!(position.y.abs() < 1e-12);
/// assert!((position.z + 0.08).abs() < 1e-12);
/// ```
pub fn apply_neck_model(orientation: &UnitQuaternion<f64>, factor: f64) -> Vector3<f64> {
    let factor = if factor.is_nan() { 0.0 } else { factor.clamp(0.0, 1.0) };
    let [x, y, z] = NECK_OFFSET_M;
    let neck = orientation * Vector3::new(x, y, z);
    (neck - Vector3::new(0.0, NECK_HEIGHT_M, 0.0)) * factor
}

/// [`apply_neck_model`] for an `(x, y, z, w)` single precision orientation
pub fn apply_neck_model_f32(orientation_xyzw: [f32; 4], factor: f64) -> [f32; 3] {
    let orientation = UnitQuaternion::from_xyzw_f32(orientation_xyzw);
    let position = apply_neck_model(&orientation, factor);
    [position.x as f32, position.y as f32, position.z as f32]
}
