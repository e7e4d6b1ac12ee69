//! Rotation and matrix utilities built on nalgebra for the tracking core
//!
//! Rotations are `UnitQuaternion<f64>`. Composition follows nalgebra: `a * b`
//! applies `b` first, then `a`. The inverse of a rotation is its conjugate.

use nalgebra::{Matrix3, Quaternion, Unit, UnitQuaternion, Vector3};

/// Smallest norm treated as a usable direction or rotation angle
pub const EPSILON: f64 = 1.0e-12;

/// Smallest determinant magnitude accepted by [`safe_inverse`]
pub const DETERMINANT_EPSILON: f64 = 1.0e-15;

const NANOS_PER_SECOND: f64 = 1.0e9;

/// Converts a nanosecond duration into seconds
pub fn nanos_to_seconds(nanos: i64) -> f64 {
    nanos as f64 / NANOS_PER_SECOND
}

/// Extension trait for Vector3 operations
pub trait Vector3Ext {
    /// Normalize the vector, returning zero vector if magnitude is too small
    fn safe_normalize(&self) -> Vector3<f64>;

    /// Component of the vector orthogonal to `direction`
    ///
    /// Returns the vector unchanged when `direction` has no usable length.
    fn reject_from(&self, direction: &Vector3<f64>) -> Vector3<f64>;
}

impl Vector3Ext for Vector3<f64> {
    fn safe_normalize(&self) -> Vector3<f64> {
        let mag = self.norm();
        if mag > EPSILON {
            *self / mag
        } else {
            Vector3::zeros()
        }
    }

    fn reject_from(&self, direction: &Vector3<f64>) -> Vector3<f64> {
        let length_squared = direction.norm_squared();
        if length_squared <= EPSILON * EPSILON {
            return *self;
        }
        self - direction * (direction.dot(self) / length_squared)
    }
}

/// Extension trait for rotations stored as `UnitQuaternion<f64>`
///
/// Every constructor degrades to the identity rotation instead of producing
/// NaN when handed zero-length or degenerate input.
pub trait RotationExt: Sized {
    /// Rotation of `angle` radians about `axis` (normalized internally)
    fn from_axis_and_angle(axis: &Vector3<f64>, angle: f64) -> Self;

    /// Rotation from quaternion components in `(x, y, z, w)` order
    fn from_xyzw(xyzw: [f64; 4]) -> Self;

    /// Rotation from single precision `(x, y, z, w)` components
    fn from_xyzw_f32(xyzw: [f32; 4]) -> Self {
        Self::from_xyzw(xyzw.map(f64::from))
    }

    /// Rotation of angle `|v|` about `v / |v|`
    fn from_rotation_vector(v: &Vector3<f64>) -> Self;

    /// Minimal rotation taking the direction of `from` onto the direction of `to`
    fn rotate_into(from: &Vector3<f64>, to: &Vector3<f64>) -> Self;

    /// Rotation taking `from` to `to`, so that `difference(a, b) * a == b`
    fn difference(from: &Self, to: &Self) -> Self;

    /// Quaternion components in `(x, y, z, w)` order
    fn to_xyzw(&self) -> [f64; 4];

    /// Single precision `(x, y, z, w)` components
    fn to_xyzw_f32(&self) -> [f32; 4] {
        self.to_xyzw().map(|c| c as f32)
    }

    /// Decompose into a unit axis and an angle in `[0, π]`
    ///
    /// Near-identity rotations return `(+Z, 0.0)`.
    fn axis_and_angle(&self) -> (Vector3<f64>, f64);

    /// Axis scaled by angle
    fn rotation_vector(&self) -> Vector3<f64> {
        let (axis, angle) = self.axis_and_angle();
        axis * angle
    }

    /// Interpolate along the shortest arc; `t = 0` gives `self`, `t = 1` gives `other`
    ///
    /// `t` outside `[0, 1]` extrapolates along the same arc.
    fn slerp_to(&self, other: &Self, t: f64) -> Self;
}

impl RotationExt for UnitQuaternion<f64> {
    fn from_axis_and_angle(axis: &Vector3<f64>, angle: f64) -> Self {
        match Unit::try_new(*axis, EPSILON) {
            Some(axis) if angle.is_finite() => UnitQuaternion::from_axis_angle(&axis, angle),
            _ => UnitQuaternion::identity(),
        }
    }

    fn from_xyzw(xyzw: [f64; 4]) -> Self {
        let [x, y, z, w] = xyzw;
        let q = Quaternion::new(w, x, y, z);
        let norm = q.norm();
        if norm > EPSILON && norm.is_finite() {
            UnitQuaternion::new_unchecked(q / norm)
        } else {
            UnitQuaternion::identity()
        }
    }

    fn from_rotation_vector(v: &Vector3<f64>) -> Self {
        Self::from_axis_and_angle(v, v.norm())
    }

    fn rotate_into(from: &Vector3<f64>, to: &Vector3<f64>) -> Self {
        let from = from.safe_normalize();
        let to = to.safe_normalize();
        if from == Vector3::zeros() || to == Vector3::zeros() {
            return UnitQuaternion::identity();
        }

        let cross = from.cross(&to);
        let cos_angle = from.dot(&to);
        let sin_angle = cross.norm();

        if sin_angle > EPSILON {
            return Self::from_axis_and_angle(&cross, sin_angle.atan2(cos_angle));
        }
        if cos_angle > 0.0 {
            return UnitQuaternion::identity();
        }

        // Antiparallel: any axis orthogonal to `from` works.
        let mut axis = from.cross(&Vector3::x());
        if axis.norm() <= EPSILON {
            axis = from.cross(&Vector3::y());
        }
        Self::from_axis_and_angle(&axis, core::f64::consts::PI)
    }

    fn difference(from: &Self, to: &Self) -> Self {
        to * from.inverse()
    }

    fn to_xyzw(&self) -> [f64; 4] {
        let q = self.as_ref();
        [q.i, q.j, q.k, q.w]
    }

    fn axis_and_angle(&self) -> (Vector3<f64>, f64) {
        let q = self.as_ref();
        let (mut w, mut v) = (q.w, q.vector().clone_owned());
        // q and -q encode the same rotation; pick the short way round.
        if w < 0.0 {
            w = -w;
            v = -v;
        }

        let sin_half_angle = v.norm();
        if sin_half_angle <= EPSILON || !sin_half_angle.is_finite() {
            return (Vector3::z(), 0.0);
        }

        let angle = 2.0 * sin_half_angle.atan2(w);
        (v / sin_half_angle, angle)
    }

    fn slerp_to(&self, other: &Self, t: f64) -> Self {
        let delta = Self::difference(self, other);
        Self::from_rotation_vector(&(delta.rotation_vector() * t)) * self
    }
}

/// 3x3 rotation matrix of a rotation
pub fn rotation_matrix(rotation: &UnitQuaternion<f64>) -> Matrix3<f64> {
    rotation.to_rotation_matrix().into_inner()
}

/// Inverse of a 3x3 matrix, or `None` when it is numerically singular
pub fn safe_inverse(matrix: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    let determinant = matrix.determinant();
    if !determinant.is_finite() || determinant.abs() < DETERMINANT_EPSILON {
        return None;
    }
    matrix.try_inverse()
}
