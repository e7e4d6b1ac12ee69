//! Head tracker tying sensor input, the orientation filter and 6-DoF blending together
//!
//! Sensor threads only ever touch the shared filter through a
//! [`SensorHandle`]. Everything else (the rotation and position histories and
//! the 6-DoF drift correction) belongs to the [`HeadTracker`] and is mutated
//! through `&mut self`, so a single render thread owns it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, trace};
use nalgebra::{UnitQuaternion, Vector3};

use crate::ekf::SensorFusionEkf;
use crate::error::TrackingError;
use crate::history::{PositionData, RotationData};
use crate::math::{EPSILON, RotationExt};
use crate::neck::apply_neck_model;
use crate::prediction::predict_rotation;
use crate::producer::{SensorEventProducer, SensorSource};
use crate::types::{
    AccelerometerData, GyroscopeData, HeadTrackerSettings, Pose, ViewportOrientation, ViewportOrientationSource,
};

/// 6-DoF data older than this relative to the filter state is considered stale
const SIX_DOF_FRESHNESS_NS: i64 = 200_000_000;

/// `|w|` of the frame-to-frame 6-DoF rotation at or above which a frame is steady
const STEADY_FRAME_MIN_W: f64 = 0.9995;

/// Consecutive steady frames before the filter-to-6-DoF offset is recomputed
const STEADY_FRAMES_FOR_OFFSET: u32 = 30;

/// Fraction of the remaining offset applied on every 6-DoF sample
const OFFSET_SMOOTHING_FACTOR: f64 = 0.05;

/// State reachable from sensor threads
struct SharedState {
    ekf: SensorFusionEkf,
    is_tracking: AtomicBool,
}

/// Cloneable entry point for pushing sensor samples from any thread
///
/// Samples are ignored while the tracker is paused.
#[derive(Clone)]
pub struct SensorHandle {
    shared: Arc<SharedState>,
}

impl SensorHandle {
    /// Forward an accelerometer sample to the orientation filter
    ///
    /// # Arguments
    /// * `sample` - Specific force in m/s² with its sensor and system timestamps
    pub fn on_accelerometer_data(&self, sample: &AccelerometerData) {
        if !self.shared.is_tracking.load(Ordering::Acquire) {
            return;
        }
        self.shared.ekf.process_accelerometer_sample(sample);
    }

    /// Forward a gyroscope sample to the orientation filter
    ///
    /// # Arguments
    /// * `sample` - Angular velocity in rad/s with its sensor and system timestamps
    pub fn on_gyroscope_data(&self, sample: &GyroscopeData) {
        if !self.shared.is_tracking.load(Ordering::Acquire) {
            return;
        }
        self.shared.ekf.process_gyroscope_sample(sample);
    }
}

/// Predicts head poses from inertial sensors and optional 6-DoF samples
///
/// A tracker starts paused. [`resume`](Self::resume) starts the attached
/// sensor producers; [`get_pose`](Self::get_pose) is then called once per
/// rendered frame.
///
/// # Example
/// ```
/// use nalgebra::Vector3;
/// use cardboard_tracking::{AccelerometerData, GyroscopeData, HeadTracker, HeadTrackerSettings};
///
/// let mut tracker = HeadTracker::new(HeadTrackerSettings::default()).unwrap();
/// tracker.resume();
///
/// for i in 0..100 {
///     let t = i * 10_000_000;
///     tracker.on_accelerometer_data(&AccelerometerData::new(t, Vector3::new(0.0, 0.0, 9.81)));
///     tracker.on_gyroscope_data(&GyroscopeData::new(t, Vector3::zeros()));
/// }
///
/// let pose = tracker.get_pose(1_000_000_000);
/// assert!((pose.orientation[3].abs() - 1.0).abs() < 1e-4);
/// ```
pub struct HeadTracker {
    shared: Arc<SharedState>,
    accelerometer_producer: Option<SensorEventProducer<AccelerometerData>>,
    gyroscope_producer: Option<SensorEventProducer<GyroscopeData>>,
    viewport: Box<dyn ViewportOrientationSource>,
    rotation_data: RotationData,
    position_data: PositionData,
    ekf_to_six_dof: UnitQuaternion<f64>,
    smooth_ekf_to_six_dof: UnitQuaternion<f64>,
    steady_frame_count: u32,
    previous_six_dof_orientation: Option<UnitQuaternion<f64>>,
    six_dof_fresh: bool,
    settings: HeadTrackerSettings,
}

impl HeadTracker {
    /// Create a paused tracker without sensor producers
    ///
    /// # Arguments
    /// * `settings` - Filter settings, history sizes and neck model weight
    ///
    /// # Returns
    /// The tracker, or [`TrackingError::BufferTooSmall`] when either history
    /// size is below its minimum
    pub fn new(settings: HeadTrackerSettings) -> Result<Self, TrackingError> {
        Ok(Self {
            shared: Arc::new(SharedState {
                ekf: SensorFusionEkf::with_settings(settings.ekf),
                is_tracking: AtomicBool::new(false),
            }),
            accelerometer_producer: None,
            gyroscope_producer: None,
            viewport: Box::new(ViewportOrientation::default()),
            rotation_data: RotationData::new(settings.rotation_buffer_size)?,
            position_data: PositionData::new(settings.position_buffer_size)?,
            ekf_to_six_dof: UnitQuaternion::identity(),
            smooth_ekf_to_six_dof: UnitQuaternion::identity(),
            steady_frame_count: 0,
            previous_six_dof_orientation: None,
            six_dof_fresh: false,
            settings,
        })
    }

    /// Use `source` for the viewport orientation queried on every pose
    pub fn with_viewport_source(mut self, source: impl ViewportOrientationSource + 'static) -> Self {
        self.viewport = Box::new(source);
        self
    }

    /// Poll the given sensor streams on background threads while tracking
    pub fn with_sensor_sources(
        mut self,
        accelerometer: impl SensorSource<AccelerometerData>,
        gyroscope: impl SensorSource<GyroscopeData>,
    ) -> Self {
        self.stop_producers();
        self.accelerometer_producer = Some(SensorEventProducer::new(accelerometer));
        self.gyroscope_producer = Some(SensorEventProducer::new(gyroscope));
        if self.is_tracking() {
            self.start_producers();
        }
        self
    }

    pub fn settings(&self) -> &HeadTrackerSettings {
        &self.settings
    }

    /// The orientation filter fed by this tracker
    pub fn ekf(&self) -> &SensorFusionEkf {
        &self.shared.ekf
    }

    /// Handle for pushing samples from other threads
    pub fn sensor_handle(&self) -> SensorHandle {
        SensorHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Whether sensor samples are currently accepted
    pub fn is_tracking(&self) -> bool {
        self.shared.is_tracking.load(Ordering::Acquire)
    }

    /// Start tracking and the sensor producers
    pub fn resume(&mut self) {
        self.shared.is_tracking.store(true, Ordering::Release);
        self.start_producers();
        self.steady_frame_count = 0;
        info!("head tracking resumed");
    }

    /// Stop the sensor producers and freeze the predicted motion
    ///
    /// Returns after both polling threads have exited. A zero angular velocity
    /// sample is injected just after the last accepted gyroscope sample so that
    /// poses requested while paused do not keep extrapolating the last head turn.
    pub fn pause(&mut self) {
        if !self.is_tracking() {
            return;
        }
        self.stop_producers();
        self.shared.ekf.inject_zero_velocity_sample();

        self.shared.is_tracking.store(false, Ordering::Release);
        info!("head tracking paused");
    }

    /// Feed an accelerometer sample; ignored while paused
    pub fn on_accelerometer_data(&self, sample: &AccelerometerData) {
        self.sensor_handle().on_accelerometer_data(sample);
    }

    /// Feed a gyroscope sample; ignored while paused
    pub fn on_gyroscope_data(&self, sample: &GyroscopeData) {
        self.sensor_handle().on_gyroscope_data(sample);
    }

    /// Head pose predicted for `timestamp_ns` (system clock)
    ///
    /// Blends in 6-DoF samples while they are fresh and falls back to the
    /// neck model otherwise.
    ///
    /// # Arguments
    /// * `timestamp_ns` - Time the frame will be displayed, in nanoseconds
    ///
    /// # Returns
    /// Position in meters and `(x, y, z, w)` orientation of the head
    pub fn get_pose(&mut self, timestamp_ns: i64) -> Pose {
        let viewport = self.viewport.viewport_orientation();
        let sensor_to_display = viewport.sensor_to_display();
        let ekf_to_head_tracker = viewport.ekf_to_head_tracker();

        let state = self.shared.ekf.latest_rotation_state();
        let to_head = |rotation: UnitQuaternion<f64>| sensor_to_display * rotation * ekf_to_head_tracker;

        if self.rotation_data.is_empty() || state.timestamp_ns > self.rotation_data.latest_timestamp() {
            self.rotation_data
                .add_sample(to_head(state.sensor_from_start_rotation), state.timestamp_ns);
        }

        let predicted = to_head(predict_rotation(&state, timestamp_ns));

        let six_dof_fresh = self.position_data.is_valid()
            && (state.timestamp_ns - self.position_data.latest_timestamp()).abs() < SIX_DOF_FRESHNESS_NS;
        if six_dof_fresh != self.six_dof_fresh {
            debug!(
                "6-DoF input {}",
                if six_dof_fresh { "fresh, blending positions" } else { "stale, using neck model" }
            );
            self.six_dof_fresh = six_dof_fresh;
        }

        let (orientation, position) = if six_dof_fresh {
            (
                self.smooth_ekf_to_six_dof * predicted,
                self.position_data.extrapolated_for_timestamp(timestamp_ns),
            )
        } else {
            let mut position = apply_neck_model(&predicted, self.settings.neck_model_factor);
            if self.position_data.is_valid() {
                position += self.position_data.latest_data();
            }
            (predicted, position)
        };

        Pose {
            position: [position.x as f32, position.y as f32, position.z as f32],
            orientation: orientation.to_xyzw_f32(),
        }
    }

    /// Add an external 6-DoF pose sample
    ///
    /// Ignored while paused and for timestamps not newer than the latest
    /// sample. After enough steady frames the rotation between the filter and
    /// the 6-DoF orientation is recomputed; the applied offset moves 5% of the
    /// way toward it on every call.
    ///
    /// # Arguments
    /// * `timestamp_ns` - Sample time in the system clock
    /// * `position` - Head position in meters
    /// * `orientation` - Head orientation as `(x, y, z, w)`
    pub fn add_six_dof_data(&mut self, timestamp_ns: i64, position: [f32; 3], orientation: [f32; 4]) {
        if !self.is_tracking() {
            return;
        }
        if !self.position_data.is_empty() && timestamp_ns <= self.position_data.latest_timestamp() {
            trace!("dropping 6-DoF sample at {timestamp_ns} ns, not newer than the latest");
            return;
        }

        let six_dof_orientation = UnitQuaternion::from_xyzw_f32(orientation);
        self.position_data
            .add_sample(Vector3::from(position.map(f64::from)), timestamp_ns);

        // Steadiness is tracked from the first sample so that reconciliation can
        // start as soon as the rotation history fills.
        if let Some(previous) = self.previous_six_dof_orientation {
            let frame_rotation = previous.inverse() * six_dof_orientation;
            if frame_rotation.w.abs() >= STEADY_FRAME_MIN_W {
                self.steady_frame_count = self.steady_frame_count.saturating_add(1);
            } else {
                self.steady_frame_count = 0;
            }
        }
        self.previous_six_dof_orientation = Some(six_dof_orientation);

        if !self.position_data.is_valid() || !self.rotation_data.is_valid() {
            return;
        }

        if self.steady_frame_count >= STEADY_FRAMES_FOR_OFFSET {
            let ekf_rotation = if timestamp_ns > self.rotation_data.latest_timestamp() {
                self.rotation_data.extrapolated_for_timestamp(timestamp_ns)
            } else {
                self.rotation_data.interpolated_for_timestamp(timestamp_ns)
            };
            self.ekf_to_six_dof = UnitQuaternion::difference(&ekf_rotation, &six_dof_orientation);
            self.steady_frame_count = 0;
            debug!(
                "6-DoF offset recomputed, {:.4} rad from the filter",
                self.ekf_to_six_dof.angle()
            );
        }

        self.smooth_ekf_to_six_dof = self
            .smooth_ekf_to_six_dof
            .slerp_to(&self.ekf_to_six_dof, OFFSET_SMOOTHING_FACTOR);
    }

    /// Make the current heading the forward direction
    ///
    /// Removes the rotation about the gravity axis from the filter state;
    /// tilt is kept. The rotation history is cleared because its samples no
    /// longer share a start frame with new ones.
    pub fn recenter(&mut self) {
        let rotation = self.shared.ekf.latest_rotation_state().sensor_from_start_rotation;
        let q = rotation.quaternion();
        if q.w.hypot(q.k) <= EPSILON {
            debug!("heading undefined for the current orientation, recenter skipped");
            return;
        }

        let heading = UnitQuaternion::from_xyzw([0.0, 0.0, q.k, q.w]);
        self.shared
            .ekf
            .rotate_sensor_space_to_start_space_transformation(&heading.inverse());
        self.rotation_data.reset();
        info!("head tracker recentered, removed {:.3} rad of heading", heading.angle());
    }

    /// Forget all orientation and 6-DoF history
    ///
    /// The filter itself resets with its next accelerometer sample.
    pub fn reset(&mut self) {
        self.shared.ekf.reset();
        self.rotation_data.reset();
        self.position_data.reset();
        self.ekf_to_six_dof = UnitQuaternion::identity();
        self.smooth_ekf_to_six_dof = UnitQuaternion::identity();
        self.steady_frame_count = 0;
        self.previous_six_dof_orientation = None;
        self.six_dof_fresh = false;
        info!("head tracker reset");
    }

    /// Smoothed rotation applied to filter orientations while 6-DoF is fresh
    pub fn six_dof_offset(&self) -> UnitQuaternion<f64> {
        self.smooth_ekf_to_six_dof
    }

    fn start_producers(&mut self) {
        let handle = self.sensor_handle();
        if let Some(producer) = self.accelerometer_producer.as_mut() {
            let handle = handle.clone();
            producer.start(move |sample| handle.on_accelerometer_data(&sample));
        }
        if let Some(producer) = self.gyroscope_producer.as_mut() {
            producer.start(move |sample| handle.on_gyroscope_data(&sample));
        }
    }

    fn stop_producers(&mut self) {
        if let Some(producer) = self.accelerometer_producer.as_mut() {
            producer.stop();
        }
        if let Some(producer) = self.gyroscope_producer.as_mut() {
            producer.stop();
        }
    }
}

impl Drop for HeadTracker {
    fn drop(&mut self) {
        self.pause();
    }
}
