use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use cardboard_tracking::{
    AccelerometerData, GyroscopeData, HeadTracker, HeadTrackerSettings, PositionData, RotationData, RotationExt,
    ViewportOrientation,
};
use nalgebra::{UnitQuaternion, Vector3};

const EPSILON: f32 = 1e-4;
const PERIOD_NS: i64 = 10_000_000; // 100 Hz

fn gravity() -> Vector3<f64> {
    Vector3::new(0.0, 0.0, 9.81)
}

fn feed_rest(tracker: &HeadTracker, from: i64, to: i64) {
    for i in from..to {
        let t = i * PERIOD_NS;
        tracker.on_accelerometer_data(&AccelerometerData::new(t, gravity()));
        tracker.on_gyroscope_data(&GyroscopeData::new(t, Vector3::zeros()));
    }
}

fn assert_identity(orientation: [f32; 4]) {
    let [x, y, z, w] = orientation;
    assert!(x.abs() < EPSILON && y.abs() < EPSILON && z.abs() < EPSILON, "{orientation:?}");
    assert!((w.abs() - 1.0).abs() < EPSILON, "{orientation:?}");
}

fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..2000 {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(1));
    }
    panic!("condition not reached in time");
}

/// A device at rest reports the identity orientation in every viewport, offset by the neck
#[test]
fn test_rest_pose_is_identity_with_neck_offset() {
    for viewport in [
        ViewportOrientation::LandscapeLeft,
        ViewportOrientation::LandscapeRight,
        ViewportOrientation::Portrait,
        ViewportOrientation::PortraitUpsideDown,
    ] {
        let mut tracker = HeadTracker::new(HeadTrackerSettings::default())
            .unwrap()
            .with_viewport_source(viewport);
        tracker.resume();
        feed_rest(&tracker, 0, 100);

        let pose = tracker.get_pose(100 * PERIOD_NS);
        assert_identity(pose.orientation);
        assert!(pose.position[0].abs() < EPSILON);
        assert!(pose.position[1].abs() < EPSILON);
        assert!((pose.position[2] + 0.08).abs() < EPSILON);
    }
}

/// A single sample pair at time zero already produces the rest pose
#[test]
fn test_first_samples_produce_rest_pose() {
    let mut tracker = HeadTracker::new(HeadTrackerSettings::default()).unwrap();
    tracker.resume();
    tracker.on_accelerometer_data(&AccelerometerData::new(0, gravity()));
    tracker.on_gyroscope_data(&GyroscopeData::new(0, Vector3::zeros()));

    let pose = tracker.get_pose(0);
    assert_identity(pose.orientation);
    assert!(pose.position[0].abs() < EPSILON);
    assert!(pose.position[1].abs() < EPSILON);
    assert!((pose.position[2] + 0.08).abs() < EPSILON);
}

/// Neck model strength follows the settings
#[test]
fn test_neck_model_factor_setting() {
    let settings = HeadTrackerSettings {
        neck_model_factor: 0.0,
        ..Default::default()
    };
    let mut tracker = HeadTracker::new(settings).unwrap();
    tracker.resume();
    feed_rest(&tracker, 0, 10);

    let pose = tracker.get_pose(10 * PERIOD_NS);
    assert_eq!(pose.position, [0.0, 0.0, 0.0]);
}

/// Fresh 6-DoF positions are used directly and stale ones fall back to the neck model
#[test]
fn test_six_dof_staleness_fallback() {
    let mut tracker = HeadTracker::new(HeadTrackerSettings::default()).unwrap();
    tracker.resume();
    feed_rest(&tracker, 0, 101);

    let identity = [0.0, 0.0, 0.0, 1.0];
    for i in 95..=100 {
        tracker.add_six_dof_data(i * PERIOD_NS, [1.0, 2.0, 3.0], identity);
    }

    let fresh = tracker.get_pose(100 * PERIOD_NS);
    assert_eq!(fresh.position, [1.0, 2.0, 3.0]);

    // 300 ms later the 6-DoF stream has gone quiet.
    feed_rest(&tracker, 101, 131);
    let stale = tracker.get_pose(130 * PERIOD_NS);
    assert!((stale.position[0] - 1.0).abs() < EPSILON);
    assert!((stale.position[1] - 2.0).abs() < EPSILON);
    assert!((stale.position[2] - 2.92).abs() < EPSILON);
    assert_identity(stale.orientation);
}

/// Fresh 6-DoF positions are extrapolated to the requested time
#[test]
fn test_six_dof_position_extrapolation() {
    let mut tracker = HeadTracker::new(HeadTrackerSettings::default()).unwrap();
    tracker.resume();
    feed_rest(&tracker, 0, 101);

    // Walking along +X at 1 m/s.
    for i in 95..=100 {
        let x = (i - 95) as f32 * 0.01;
        tracker.add_six_dof_data(i * PERIOD_NS, [x, 0.0, 0.0], [0.0, 0.0, 0.0, 1.0]);
    }

    let pose = tracker.get_pose(105 * PERIOD_NS);
    assert!((pose.position[0] - 0.10).abs() < EPSILON, "{:?}", pose.position);
    assert!(pose.position[1].abs() < EPSILON);
}

/// A steady offset between the filter and the 6-DoF stream is absorbed gradually
#[test]
fn test_drift_offset_smoothing() {
    let mut tracker = HeadTracker::new(HeadTrackerSettings::default()).unwrap();
    tracker.resume();

    let offset = UnitQuaternion::from_axis_and_angle(&Vector3::y(), 0.3);
    let six_dof = offset.to_xyzw_f32();

    for i in 0..200 {
        let t = i * PERIOD_NS;
        feed_rest(&tracker, i, i + 1);
        tracker.get_pose(t);
        tracker.add_six_dof_data(t, [0.0, 0.0, 0.0], six_dof);
    }
    let pose = tracker.get_pose(199 * PERIOD_NS);

    let absorbed = tracker.six_dof_offset();
    assert!(absorbed.angle_to(&UnitQuaternion::from_xyzw_f32(six_dof)) < 1e-3);

    let reported = UnitQuaternion::from_xyzw_f32(pose.orientation);
    assert!(reported.angle_to(&offset) < 1e-3);
}

/// 6-DoF samples that arrive before the frame's pose request still drive the offset
#[test]
fn test_drift_offset_with_six_dof_before_pose() {
    let mut tracker = HeadTracker::new(HeadTrackerSettings::default()).unwrap();
    tracker.resume();

    let offset = UnitQuaternion::from_axis_and_angle(&Vector3::y(), 0.3);
    let six_dof = offset.to_xyzw_f32();

    for i in 0..300 {
        let t = i * PERIOD_NS;
        feed_rest(&tracker, i, i + 1);
        tracker.add_six_dof_data(t, [0.0, 0.0, 0.0], six_dof);
        tracker.get_pose(t + 16_000_000);
    }

    let absorbed = tracker.six_dof_offset();
    assert!(absorbed.angle_to(&offset) < 1e-3, "offset {}", absorbed.angle());
}

/// Offsets are not applied until enough steady frames have been seen
#[test]
fn test_drift_offset_needs_steady_frames() {
    let mut tracker = HeadTracker::new(HeadTrackerSettings::default()).unwrap();
    tracker.resume();

    for i in 0..200 {
        let t = i * PERIOD_NS;
        feed_rest(&tracker, i, i + 1);
        tracker.get_pose(t);

        // Alternate between two orientations so no frame is steady.
        let angle = if i % 2 == 0 { 0.3 } else { -0.3 };
        let six_dof = UnitQuaternion::from_axis_and_angle(&Vector3::y(), angle).to_xyzw_f32();
        tracker.add_six_dof_data(t, [0.0, 0.0, 0.0], six_dof);
    }

    assert_eq!(tracker.six_dof_offset(), UnitQuaternion::identity());
}

/// Histories gate extrapolation until full and never extrapolate backwards
#[test]
fn test_history_gating() {
    let mut positions = PositionData::new(6).unwrap();
    for i in 0..5 {
        positions.add_sample(Vector3::new(i as f64, 0.0, 0.0), i * PERIOD_NS);
    }
    assert!(!positions.is_valid());
    assert_eq!(positions.extrapolated_for_timestamp(50 * PERIOD_NS), Vector3::new(4.0, 0.0, 0.0));

    positions.add_sample(Vector3::new(5.0, 0.0, 0.0), 5 * PERIOD_NS);
    assert!(positions.is_valid());
    assert_eq!(positions.extrapolated_for_timestamp(PERIOD_NS), Vector3::new(5.0, 0.0, 0.0));
    let ahead = positions.extrapolated_for_timestamp(6 * PERIOD_NS);
    assert!((ahead.x - 6.0).abs() < 1e-9);

    let mut rotations = RotationData::new(4).unwrap();
    rotations.add_sample(UnitQuaternion::from_axis_and_angle(&Vector3::z(), 0.2), 0);
    assert_eq!(
        rotations.extrapolated_for_timestamp(PERIOD_NS),
        rotations.latest_data()
    );
}

/// Sensor producers feed the tracker from channels and stop on pause
#[test]
fn test_pause_resume_with_channel_sources() {
    let (accel_sender, accel_receiver) = mpsc::channel();
    let (gyro_sender, gyro_receiver) = mpsc::channel();
    let mut tracker = HeadTracker::new(HeadTrackerSettings::default())
        .unwrap()
        .with_sensor_sources(accel_receiver, gyro_receiver);

    tracker.resume();
    assert!(tracker.is_tracking());
    for i in 0..100 {
        let t = i * PERIOD_NS;
        accel_sender.send(AccelerometerData::new(t, gravity())).unwrap();
        gyro_sender.send(GyroscopeData::new(t, Vector3::zeros())).unwrap();
    }
    let last = 99 * PERIOD_NS;
    wait_for(|| {
        tracker.ekf().is_aligned_with_gravity() && tracker.ekf().latest_rotation_state().timestamp_ns == last
    });

    tracker.pause();
    assert!(!tracker.is_tracking());
    assert_eq!(tracker.ekf().latest_rotation_state().timestamp_ns, last + 1);

    // Nothing is consumed while paused.
    for i in 100..110 {
        gyro_sender.send(GyroscopeData::new(i * PERIOD_NS, Vector3::zeros())).unwrap();
    }
    thread::sleep(Duration::from_millis(50));
    assert_eq!(tracker.ekf().latest_rotation_state().timestamp_ns, last + 1);

    tracker.resume();
    wait_for(|| tracker.ekf().latest_rotation_state().timestamp_ns == 109 * PERIOD_NS);
    assert_identity(tracker.get_pose(109 * PERIOD_NS).orientation);
}

/// Pausing after a late gyroscope sample still freezes the predicted pose
#[test]
fn test_pause_after_late_gyroscope_sample() {
    let mut tracker = HeadTracker::new(HeadTrackerSettings::default()).unwrap();
    tracker.resume();
    tracker.on_accelerometer_data(&AccelerometerData::new(0, gravity()));
    tracker.on_gyroscope_data(&GyroscopeData::new(0, Vector3::zeros()));
    tracker.on_gyroscope_data(&GyroscopeData::new(10 * PERIOD_NS, Vector3::new(0.0, 0.0, 1.0)));
    tracker.on_gyroscope_data(&GyroscopeData::new(5 * PERIOD_NS, Vector3::new(0.0, 0.0, 1.0)));

    tracker.pause();
    let state = tracker.ekf().latest_rotation_state();
    assert_eq!(state.timestamp_ns, 10 * PERIOD_NS + 1);
    assert_eq!(state.sensor_from_start_rotation_velocity, Vector3::zeros());

    let now = UnitQuaternion::from_xyzw_f32(tracker.get_pose(10 * PERIOD_NS).orientation);
    let later = UnitQuaternion::from_xyzw_f32(tracker.get_pose(110 * PERIOD_NS).orientation);
    assert!(now.angle_to(&later) < 1e-6);
}

/// Pausing with a reset pending still clears the angular velocity
#[test]
fn test_pause_with_reset_pending() {
    let mut tracker = HeadTracker::new(HeadTrackerSettings::default()).unwrap();
    tracker.resume();
    tracker.on_accelerometer_data(&AccelerometerData::new(0, gravity()));
    tracker.on_gyroscope_data(&GyroscopeData::new(0, Vector3::new(0.0, 0.0, 1.0)));

    tracker.reset();
    tracker.pause();
    assert!(tracker.ekf().is_reset_pending());
    assert_eq!(
        tracker.ekf().latest_rotation_state().sensor_from_start_rotation_velocity,
        Vector3::zeros()
    );
}

/// Samples pushed through a handle from another thread reach the filter
#[test]
fn test_sensor_handle_from_thread() {
    let mut tracker = HeadTracker::new(HeadTrackerSettings::default()).unwrap();
    tracker.resume();

    let handle = tracker.sensor_handle();
    thread::spawn(move || {
        for i in 0..10 {
            let t = i * PERIOD_NS;
            handle.on_accelerometer_data(&AccelerometerData::new(t, gravity()));
            handle.on_gyroscope_data(&GyroscopeData::new(t, Vector3::zeros()));
        }
    })
    .join()
    .unwrap();

    assert!(tracker.ekf().is_aligned_with_gravity());
    assert_eq!(tracker.ekf().latest_rotation_state().timestamp_ns, 9 * PERIOD_NS);
}
