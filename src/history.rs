//! Fixed-capacity histories of timestamped 6-DoF positions and head rotations
//!
//! Both histories only answer extrapolation and interpolation queries once
//! they are full, so a single stray sample can never drive prediction.

use std::collections::VecDeque;

use log::trace;
use nalgebra::{UnitQuaternion, Vector3};

use crate::error::TrackingError;
use crate::math::{RotationExt, nanos_to_seconds};

/// Smallest position history that still supports velocity extrapolation
pub const MIN_POSITION_BUFFER_SIZE: usize = 6;

/// Smallest rotation history that still supports velocity extrapolation
pub const MIN_ROTATION_BUFFER_SIZE: usize = 2;

/// Samples used for the position velocity estimate
const POSITION_VELOCITY_SAMPLES: usize = 6;

/// Samples with their timestamps, oldest first
#[derive(Debug, Clone)]
struct SampleHistory<T> {
    samples: VecDeque<T>,
    timestamps_ns: VecDeque<i64>,
    capacity: usize,
}

impl<T: Copy> SampleHistory<T> {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            timestamps_ns: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, timestamp_ns: i64, sample: T) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
            self.timestamps_ns.pop_front();
        }
        self.samples.push_back(sample);
        self.timestamps_ns.push_back(timestamp_ns);
    }

    fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    fn latest(&self) -> Option<(i64, T)> {
        Some((*self.timestamps_ns.back()?, *self.samples.back()?))
    }

    fn oldest_timestamp(&self) -> Option<i64> {
        self.timestamps_ns.front().copied()
    }

    fn clear(&mut self) {
        self.samples.clear();
        self.timestamps_ns.clear();
    }

    /// `(timestamp, sample)` pairs, oldest first
    fn iter(&self) -> impl DoubleEndedIterator<Item = (i64, T)> + ExactSizeIterator + '_ {
        self.timestamps_ns.iter().copied().zip(self.samples.iter().copied())
    }
}

/// History of external 6-DoF positions
#[derive(Debug, Clone)]
pub struct PositionData {
    history: SampleHistory<Vector3<f64>>,
}

impl PositionData {
    /// Create an empty history holding `buffer_size` positions
    ///
    /// # Example
    /// ```
    /// use cardboard_tracking::{PositionData, TrackingError};
    ///
    /// assert!(PositionData::new(6).is_ok());
    /// assert!(matches!(PositionData::new(3), Err(TrackingError::BufferTooSmall { .. })));
    /// ```
    pub fn new(buffer_size: usize) -> Result<Self, TrackingError> {
        if buffer_size < MIN_POSITION_BUFFER_SIZE {
            return Err(TrackingError::BufferTooSmall {
                kind: "position",
                requested: buffer_size,
                minimum: MIN_POSITION_BUFFER_SIZE,
            });
        }
        Ok(Self {
            history: SampleHistory::new(buffer_size),
        })
    }

    /// Append a position, evicting the oldest when full
    pub fn add_sample(&mut self, position: Vector3<f64>, timestamp_ns: i64) {
        self.history.push(timestamp_ns, position);
    }

    /// Whether the history is full
    pub fn is_valid(&self) -> bool {
        self.history.is_full()
    }

    /// Newest position, or zero when empty
    pub fn latest_data(&self) -> Vector3<f64> {
        self.history.latest().map_or_else(Vector3::zeros, |(_, position)| position)
    }

    /// Newest timestamp, or `0` when empty
    pub fn latest_timestamp(&self) -> i64 {
        self.history.latest().map_or(0, |(timestamp_ns, _)| timestamp_ns)
    }

    pub fn oldest_timestamp(&self) -> Option<i64> {
        self.history.oldest_timestamp()
    }

    /// Position extrapolated to `timestamp_ns` at the recent mean velocity
    ///
    /// Only timestamps beyond the newest sample are extrapolated; anything
    /// else, or a history that is not yet full, yields the newest sample.
    pub fn extrapolated_for_timestamp(&self, timestamp_ns: i64) -> Vector3<f64> {
        let Some((latest_timestamp_ns, latest)) = self.history.latest() else {
            return Vector3::zeros();
        };
        if !self.is_valid() || timestamp_ns <= latest_timestamp_ns {
            return latest;
        }

        let recent: Vec<(i64, Vector3<f64>)> = self
            .history
            .iter()
            .rev()
            .take(POSITION_VELOCITY_SAMPLES)
            .collect();

        let mut velocity_sum = Vector3::zeros();
        let mut velocity_count = 0u32;
        for pair in recent.windows(2) {
            let (newer_ts, newer) = pair[0];
            let (older_ts, older) = pair[1];
            let delta_s = nanos_to_seconds(newer_ts - older_ts);
            if delta_s <= 0.0 {
                trace!("skipping position pair with non-increasing timestamps");
                continue;
            }
            velocity_sum += (newer - older) / delta_s;
            velocity_count += 1;
        }
        if velocity_count == 0 {
            return latest;
        }

        let velocity = velocity_sum / f64::from(velocity_count);
        latest + velocity * nanos_to_seconds(timestamp_ns - latest_timestamp_ns)
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }

    pub fn len(&self) -> usize {
        self.history.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.history.capacity
    }
}

/// History of head rotations reported by the orientation filter
#[derive(Debug, Clone)]
pub struct RotationData {
    history: SampleHistory<UnitQuaternion<f64>>,
}

impl RotationData {
    /// Create an empty history holding `buffer_size` rotations
    pub fn new(buffer_size: usize) -> Result<Self, TrackingError> {
        if buffer_size < MIN_ROTATION_BUFFER_SIZE {
            return Err(TrackingError::BufferTooSmall {
                kind: "rotation",
                requested: buffer_size,
                minimum: MIN_ROTATION_BUFFER_SIZE,
            });
        }
        Ok(Self {
            history: SampleHistory::new(buffer_size),
        })
    }

    /// Append a rotation, evicting the oldest when full
    pub fn add_sample(&mut self, rotation: UnitQuaternion<f64>, timestamp_ns: i64) {
        self.history.push(timestamp_ns, rotation);
    }

    pub fn is_valid(&self) -> bool {
        self.history.is_full()
    }

    /// Newest rotation, or identity when empty
    pub fn latest_data(&self) -> UnitQuaternion<f64> {
        self.history
            .latest()
            .map_or_else(UnitQuaternion::identity, |(_, rotation)| rotation)
    }

    /// Newest timestamp, or `0` when empty
    pub fn latest_timestamp(&self) -> i64 {
        self.history.latest().map_or(0, |(timestamp_ns, _)| timestamp_ns)
    }

    pub fn oldest_timestamp(&self) -> Option<i64> {
        self.history.oldest_timestamp()
    }

    /// Rotation extrapolated to `timestamp_ns` at the angular velocity of the newest pair
    pub fn extrapolated_for_timestamp(&self, timestamp_ns: i64) -> UnitQuaternion<f64> {
        let Some((latest_timestamp_ns, latest)) = self.history.latest() else {
            return UnitQuaternion::identity();
        };
        if !self.is_valid() || timestamp_ns <= latest_timestamp_ns {
            return latest;
        }

        let mut newest = self.history.iter().rev();
        let (Some(_), Some((previous_timestamp_ns, previous))) = (newest.next(), newest.next()) else {
            return latest;
        };
        let delta_s = nanos_to_seconds(latest_timestamp_ns - previous_timestamp_ns);
        if delta_s <= 0.0 {
            return latest;
        }

        let angular_velocity = UnitQuaternion::difference(&previous, &latest).rotation_vector() / delta_s;
        let step = angular_velocity * nanos_to_seconds(timestamp_ns - latest_timestamp_ns);
        UnitQuaternion::from_rotation_vector(&step) * latest
    }

    /// Rotation at `timestamp_ns` interpolated between the bracketing samples
    ///
    /// Timestamps outside the history clamp to its oldest or newest sample.
    /// An incomplete history yields the identity.
    pub fn interpolated_for_timestamp(&self, timestamp_ns: i64) -> UnitQuaternion<f64> {
        if !self.is_valid() {
            return UnitQuaternion::identity();
        }

        let mut previous: Option<(i64, UnitQuaternion<f64>)> = None;
        for (sample_timestamp_ns, rotation) in self.history.iter() {
            if sample_timestamp_ns >= timestamp_ns {
                return match previous {
                    Some((previous_timestamp_ns, previous_rotation)) => {
                        let span = sample_timestamp_ns - previous_timestamp_ns;
                        if span <= 0 {
                            return rotation;
                        }
                        let t = (timestamp_ns - previous_timestamp_ns) as f64 / span as f64;
                        previous_rotation.slerp_to(&rotation, t)
                    }
                    None => rotation,
                };
            }
            previous = Some((sample_timestamp_ns, rotation));
        }
        self.latest_data()
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }

    pub fn len(&self) -> usize {
        self.history.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.history.capacity
    }
}
