//! Sensor access.
//!
//! [`SensorSource`] owns the physical device behind an async mutex. The
//! poll loop and the HTTP handlers both go through it, so a device read is
//! never interleaved with another one. Every read is bounded by a timeout.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

use crate::models::Reading;

#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("sensor read timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed sensor payload: {0}")]
    Decode(String),
    #[error("sensor I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SensorError {
    pub fn kind(&self) -> &'static str {
        match self {
            SensorError::Timeout(_) => "timeout",
            SensorError::Decode(_) => "decode",
            SensorError::Io(_) => "io",
        }
    }
}

/// Values as the driver reports them, before timestamping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawReading {
    pub temperature: f64,
    pub humidity: f64,
}

/// A physical (or simulated) temperature/humidity sensor.
#[async_trait]
pub trait SensorDevice: Send {
    async fn read(&mut self) -> Result<RawReading, SensorError>;
}

pub struct SensorSource {
    device: AsyncMutex<Box<dyn SensorDevice>>,
    timeout: Duration,
    override_temperature: Mutex<Option<u8>>,
    last_humidity: Mutex<Option<f64>>,
}

impl SensorSource {
    pub fn new<D: SensorDevice + 'static>(device: D, timeout: Duration) -> Self {
        Self {
            device: AsyncMutex::new(Box::new(device)),
            timeout,
            override_temperature: Mutex::new(None),
            last_humidity: Mutex::new(None),
        }
    }

    /// Reads the sensor, or returns the override temperature when one is set.
    ///
    /// While an override is active the device is not touched; humidity is
    /// the last value the device reported (0.0 before the first good read).
    pub async fn read(&self) -> Result<Reading, SensorError> {
        if let Some(forced) = *self.override_temperature.lock() {
            let humidity = self.last_humidity.lock().unwrap_or(0.0);
            return Ok(Reading::new(f64::from(forced), humidity));
        }

        // The deadline covers waiting for the device too, so queued
        // readers behind a hung one fail together.
        let raw = tokio::time::timeout(self.timeout, async {
            let mut device = self.device.lock().await;
            device.read().await
        })
        .await
        .map_err(|_| SensorError::Timeout(self.timeout))??;

        if !raw.temperature.is_finite() || !raw.humidity.is_finite() {
            return Err(SensorError::Decode(format!(
                "non-finite values (temperature={}, humidity={})",
                raw.temperature, raw.humidity
            )));
        }

        *self.last_humidity.lock() = Some(raw.humidity);
        Ok(Reading::new(raw.temperature, raw.humidity))
    }

    /// Sets (`Some`) or clears (`None`) the temperature override.
    pub fn set_override(&self, value: Option<u8>) {
        *self.override_temperature.lock() = value;
    }

    pub fn override_value(&self) -> Option<u8> {
        *self.override_temperature.lock()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Device that records how many callers are inside `read` at once.
    struct SlowDevice {
        inside: Arc<AtomicUsize>,
        max_seen: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SensorDevice for SlowDevice {
        async fn read(&mut self) -> Result<RawReading, SensorError> {
            let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.inside.fetch_sub(1, Ordering::SeqCst);
            Ok(RawReading { temperature: 30.0, humidity: 55.0 })
        }
    }

    struct HangingDevice;

    #[async_trait]
    impl SensorDevice for HangingDevice {
        async fn read(&mut self) -> Result<RawReading, SensorError> {
            std::future::pending().await
        }
    }

    struct FixedDevice(RawReading);

    #[async_trait]
    impl SensorDevice for FixedDevice {
        async fn read(&mut self) -> Result<RawReading, SensorError> {
            Ok(self.0)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_reads_never_overlap_on_the_device() {
        let max_seen = Arc::new(AtomicUsize::new(0));
        let source = Arc::new(SensorSource::new(
            SlowDevice { inside: Arc::new(AtomicUsize::new(0)), max_seen: max_seen.clone() },
            Duration::from_secs(5),
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let source = source.clone();
                tokio::spawn(async move { source.read().await })
            })
            .collect();
        for h in handles {
            assert!(h.await.unwrap().is_ok());
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_device_times_out() {
        let source = SensorSource::new(HangingDevice, Duration::from_secs(3));
        let err = source.read().await.unwrap_err();
        assert!(matches!(err, SensorError::Timeout(d) if d == Duration::from_secs(3)));
        assert_eq!(err.kind(), "timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn queued_readers_share_one_deadline() {
        let timeout = Duration::from_secs(3);
        let source = Arc::new(SensorSource::new(HangingDevice, timeout));
        let started = tokio::time::Instant::now();

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let source = source.clone();
                tokio::spawn(async move { source.read().await })
            })
            .collect();
        for h in handles {
            assert!(matches!(h.await.unwrap(), Err(SensorError::Timeout(_))));
        }

        assert!(started.elapsed() < timeout * 2, "took {:?}", started.elapsed());
    }

    #[tokio::test]
    async fn non_finite_payload_is_a_decode_error() {
        let source = SensorSource::new(
            FixedDevice(RawReading { temperature: f64::NAN, humidity: 40.0 }),
            Duration::from_secs(1),
        );
        assert!(matches!(source.read().await, Err(SensorError::Decode(_))));
    }

    #[tokio::test]
    async fn override_bypasses_device_and_keeps_last_humidity() {
        let source = SensorSource::new(
            FixedDevice(RawReading { temperature: 22.0, humidity: 48.0 }),
            Duration::from_secs(1),
        );
        source.read().await.unwrap();

        source.set_override(Some(85));
        let forced = source.read().await.unwrap();
        assert_eq!(forced.temperature, 85.0);
        assert_eq!(forced.humidity, 48.0);
        assert_eq!(source.override_value(), Some(85));

        source.set_override(None);
        assert_eq!(source.read().await.unwrap().temperature, 22.0);
    }

    #[tokio::test]
    async fn override_before_any_read_reports_zero_humidity() {
        let source = SensorSource::new(HangingDevice, Duration::from_secs(1));
        source.set_override(Some(0));
        let forced = source.read().await.unwrap();
        assert_eq!(forced.temperature, 0.0);
        assert_eq!(forced.humidity, 0.0);
    }
}
