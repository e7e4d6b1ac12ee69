//! Head tracker demonstration
//!
//! Simulated sensor threads push samples through channels that the tracker
//! polls on its own background threads, while the main thread plays the role
//! of the renderer: it asks for a predicted pose once per frame, feeds a 6-DoF
//! stream for the first second, then pauses and resumes tracking.
//!
//! Run with: `cargo run --example head_tracker`

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use cardboard_tracking::{
    AccelerometerData, GyroscopeData, HeadTracker, HeadTrackerSettings, RotationExt, ViewportOrientation,
};
use nalgebra::{UnitQuaternion, Vector3};

const SENSOR_PERIOD: Duration = Duration::from_millis(5); // 200 Hz
const FRAME_PERIOD: Duration = Duration::from_millis(16); // ~60 fps
const PREDICTION_NS: i64 = 50_000_000;

fn main() {
    let (accel_sender, accel_receiver) = mpsc::channel();
    let (gyro_sender, gyro_receiver) = mpsc::channel();

    let mut tracker = HeadTracker::new(HeadTrackerSettings::default())
        .expect("default settings are valid")
        .with_viewport_source(ViewportOrientation::LandscapeLeft)
        .with_sensor_sources(accel_receiver, gyro_receiver);

    let start = Instant::now();
    let now_ns = move || start.elapsed().as_nanos() as i64;

    // Simulated IMU: the head turns left and right about the vertical axis.
    let sensor_thread = thread::spawn(move || {
        loop {
            let timestamp_ns = now_ns();
            let t = timestamp_ns as f64 * 1e-9;
            let yaw_rate = 0.8 * (t * 2.0).cos();

            let accelerometer = AccelerometerData::new(timestamp_ns, Vector3::new(0.0, 0.0, 9.81));
            let gyroscope = GyroscopeData::new(timestamp_ns, Vector3::new(0.0, 0.0, yaw_rate));
            if accel_sender.send(accelerometer).is_err() || gyro_sender.send(gyroscope).is_err() {
                break;
            }
            if t > 3.0 {
                break;
            }
            thread::sleep(SENSOR_PERIOD);
        }
    });

    tracker.resume();
    println!("Tracking for 3 seconds, pausing once after 2 seconds");

    let mut paused_once = false;
    while now_ns() < 3_000_000_000 {
        let frame_ns = now_ns();

        // 6-DoF input during the first second: a slow step to the side.
        if frame_ns < 1_000_000_000 {
            let x = frame_ns as f32 * 1e-9 * 0.2;
            let orientation = UnitQuaternion::<f64>::identity().to_xyzw_f32();
            tracker.add_six_dof_data(frame_ns, [x, 0.0, 0.0], orientation);
        }

        if frame_ns > 2_000_000_000 && !paused_once {
            tracker.pause();
            println!("-- paused --");
            thread::sleep(Duration::from_millis(100));
            tracker.resume();
            println!("-- resumed --");
            paused_once = true;
        }

        let pose = tracker.get_pose(frame_ns + PREDICTION_NS);
        let orientation = UnitQuaternion::from_xyzw_f32(pose.orientation);
        let (_, _, yaw) = orientation.euler_angles();
        println!(
            "t={:>5.2}s yaw {:>7.2}°  position ({:>6.3}, {:>6.3}, {:>6.3})",
            frame_ns as f64 * 1e-9,
            yaw.to_degrees(),
            pose.position[0],
            pose.position[1],
            pose.position[2]
        );

        thread::sleep(FRAME_PERIOD);
    }

    tracker.pause();
    let _ = sensor_thread.join();
    println!(
        "Final gyroscope bias estimate: {:?}",
        tracker.ekf().gyroscope_bias_estimate()
    );
}
