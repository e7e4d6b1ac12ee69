//! Errors reported while configuring the tracking core
//!
//! Runtime sensor processing never fails; bad samples are dropped. Only
//! construction can be rejected.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackingError {
    #[error("{kind} buffer size {requested} is below the minimum of {minimum}")]
    BufferTooSmall {
        kind: &'static str,
        requested: usize,
        minimum: usize,
    },
}
