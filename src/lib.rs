//! Cardboard Tracking - head tracking for phone-in-headset VR viewers
//!
//! This library turns the raw inertial sensors of a phone into a predicted
//! head pose for each rendered frame. An Extended Kalman Filter fuses
//! gyroscope and accelerometer samples into an orientation, a bias estimator
//! removes gyroscope drift while the device rests, and a neck model supplies
//! head translation when no positional tracking is available.
//!
//! # Features
//!
//! - Orientation EKF with adaptive accelerometer trust
//! - Automatic gyroscope bias estimation during static periods
//! - Constant-velocity pose prediction to the display time
//! - Neck model for translation from orientation alone
//! - Blending of external 6-DoF poses with slow drift correction
//! - Background sensor polling with a pluggable [`SensorSource`]
//!
//! # Quick Start
//!
//! ```rust
//! use nalgebra::Vector3;
//! use cardboard_tracking::{AccelerometerData, GyroscopeData, HeadTracker, HeadTrackerSettings};
//!
//! let mut tracker = HeadTracker::new(HeadTrackerSettings::default()).unwrap();
//! tracker.resume();
//!
//! // Sensor readings at 100 Hz
//! for i in 0..50 {
//!     let timestamp_ns = i * 10_000_000;
//!     let accelerometer = Vector3::new(0.0, 0.0, 9.81); // m/s²
//!     let gyroscope = Vector3::new(0.0, 0.0, 0.0);      // rad/s
//!     tracker.on_accelerometer_data(&AccelerometerData::new(timestamp_ns, accelerometer));
//!     tracker.on_gyroscope_data(&GyroscopeData::new(timestamp_ns, gyroscope));
//! }
//!
//! // Pose predicted for the next display refresh
//! let pose = tracker.get_pose(500_000_000);
//! let [x, y, z, w] = pose.orientation;
//! let [px, py, pz] = pose.position;
//! ```

mod bias;
mod ekf;
mod error;
mod head_tracker;
mod history;
mod lowpass;
mod math;
mod neck;
mod prediction;
mod producer;
mod types;

// Re-export all public types and functions
pub use bias::GyroscopeBiasEstimator;
pub use ekf::SensorFusionEkf;
pub use error::TrackingError;
pub use head_tracker::{HeadTracker, SensorHandle};
pub use history::{MIN_POSITION_BUFFER_SIZE, MIN_ROTATION_BUFFER_SIZE, PositionData, RotationData};
pub use lowpass::LowpassFilter;
pub use math::{RotationExt, Vector3Ext, nanos_to_seconds, rotation_matrix, safe_inverse};
pub use neck::{apply_neck_model, apply_neck_model_f32};
pub use prediction::{predict_rotation, rotation_from_gyroscope};
pub use producer::{SensorEventProducer, SensorPoll, SensorSource};
pub use types::*;
