//! Reading classification.
//!
//! The comparison against the threshold is strict: a rack sitting exactly
//! at the threshold is still `NORMAL`. Moving this boundary changes when
//! the shutdown campaign starts.

use crate::models::{Reading, Status};
use crate::sensor::SensorError;

/// Maps an acquisition result to a [`Status`].
///
/// 1. failed acquisition, or a temperature that is not a finite number: `ERROR`
/// 2. `temperature > threshold`: `HIGH`
/// 3. otherwise: `NORMAL`
///
/// Humidity is never looked at.
pub fn classify(acquired: Result<&Reading, &SensorError>, threshold: f64) -> Status {
    match acquired {
        Err(_) => Status::Error,
        Ok(reading) if !reading.temperature.is_finite() => Status::Error,
        Ok(reading) if reading.temperature > threshold => Status::High,
        Ok(_) => Status::Normal,
    }
}
