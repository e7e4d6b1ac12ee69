use cardboard_tracking::{AccelerometerData, GyroscopeData, RotationExt, SensorFusionEkf};
use nalgebra::Vector3;

const SAMPLE_PERIOD_NS: i64 = 10_000_000; // 10 ms sample period

fn main() {
    let ekf = SensorFusionEkf::new();

    for i in 0..10 {
        // this loop should repeat each time new sensor data is available
        let timestamp_ns = i * SAMPLE_PERIOD_NS;
        let gyroscope = Vector3::new(0.0, 0.0, 0.1); // replace this with actual gyroscope data in rad/s
        let accelerometer = Vector3::new(0.0, 0.0, 9.81); // replace this with actual accelerometer data in m/s²

        ekf.process_accelerometer_sample(&AccelerometerData::new(timestamp_ns, accelerometer));
        ekf.process_gyroscope_sample(&GyroscopeData::new(timestamp_ns, gyroscope));

        let rotation = ekf.latest_rotation_state().sensor_from_start_rotation;
        let (roll, pitch, yaw) = rotation.euler_angles();
        let [x, y, z, w] = rotation.to_xyzw();

        println!(
            "Roll: {:.2}, Pitch: {:.2}, Yaw: {:.2}  (x {:.4}, y {:.4}, z {:.4}, w {:.4})",
            roll.to_degrees(),
            pitch.to_degrees(),
            yaw.to_degrees(),
            x,
            y,
            z,
            w
        );
    }
}
