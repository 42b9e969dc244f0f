use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

use crate::sensor::SensorError;

/// One successful acquisition from the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    /// Degrees Celsius
    pub temperature: f64,
    /// Relative humidity in percent
    pub humidity: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
}

impl Reading {
    pub fn new(temperature: f64, humidity: f64) -> Self {
        Self::at(temperature, humidity, OffsetDateTime::now_utc())
    }

    pub fn at(temperature: f64, humidity: f64, captured_at: OffsetDateTime) -> Self {
        Self { temperature, humidity, captured_at }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Normal,
    High,
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Normal => "NORMAL",
            Status::High => "HIGH",
            Status::Error => "ERROR",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a single tick hands to the sinks.
///
/// `reading` is `None` exactly when the acquisition failed, in which case
/// `status` is [`Status::Error`] and `error` carries the sensor message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub tick: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    pub reading: Option<Reading>,
    pub status: Status,
    pub error: Option<String>,
}

impl Sample {
    pub fn from_acquisition(tick: u64, acquired: &Result<Reading, SensorError>, status: Status) -> Self {
        match acquired {
            Ok(reading) => Self {
                tick,
                captured_at: reading.captured_at,
                reading: Some(*reading),
                status,
                error: None,
            },
            Err(e) => Self {
                tick,
                captured_at: OffsetDateTime::now_utc(),
                reading: None,
                status: Status::Error,
                error: Some(e.to_string()),
            },
        }
    }

    pub fn temperature(&self) -> Option<f64> {
        self.reading.map(|r| r.temperature)
    }

    pub fn humidity(&self) -> Option<f64> {
        self.reading.map(|r| r.humidity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn status_serializes_upper_case() {
        assert_eq!(serde_json::to_value(Status::High).unwrap(), "HIGH");
        assert_eq!(Status::Error.to_string(), "ERROR");
    }

    #[test]
    fn failed_acquisition_always_yields_error_sample() {
        let acquired = Err(SensorError::Timeout(Duration::from_secs(5)));
        // a caller passing NORMAL by mistake must not leak into the sample
        let sample = Sample::from_acquisition(7, &acquired, Status::Normal);

        assert_eq!(sample.tick, 7);
        assert_eq!(sample.status, Status::Error);
        assert!(sample.reading.is_none());
        assert!(sample.error.as_deref().unwrap().contains("timed out"));
        assert_eq!(sample.temperature(), None);
    }

    #[test]
    fn sample_json_carries_reading_fields() {
        let reading = Reading::at(21.5, 40.0, time::macros::datetime!(2024-06-01 12:00 UTC));
        let sample = Sample::from_acquisition(1, &Ok(reading), Status::Normal);
        let json = serde_json::to_value(&sample).unwrap();

        assert_eq!(json["status"], "NORMAL");
        assert_eq!(json["reading"]["temperature"], 21.5);
        assert_eq!(json["captured_at"], "2024-06-01T12:00:00Z");
        assert!(json["error"].is_null());
    }
}
