//! DHT11 through the Linux IIO subsystem.
//!
//! The in-kernel `dht11` driver exposes one reading per pair of sysfs
//! attributes, both in milli-units. A read that fails its checksum comes
//! back as `EIO`, which surfaces here as [`SensorError::Io`].

use async_trait::async_trait;
use rackwatch_core::{RawReading, SensorDevice, SensorError};
use std::path::{Path, PathBuf};

const TEMPERATURE: &str = "in_temp_input";
const HUMIDITY: &str = "in_humidityrelative_input";

pub struct IioDht {
    dir: PathBuf,
}

impl IioDht {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// True when the device directory looks like a DHT11 channel set.
    pub async fn is_present(&self) -> bool {
        tokio::fs::try_exists(self.dir.join(TEMPERATURE)).await.unwrap_or(false)
    }
}

async fn read_milli(path: &Path) -> Result<f64, SensorError> {
    let text = tokio::fs::read_to_string(path).await?;
    let value = text
        .trim()
        .parse::<i64>()
        .map_err(|e| SensorError::Decode(format!("{}: {e} ({:?})", path.display(), text.trim())))?;
    Ok(value as f64 / 1000.0)
}

#[async_trait]
impl SensorDevice for IioDht {
    async fn read(&mut self) -> Result<RawReading, SensorError> {
        let temperature = read_milli(&self.dir.join(TEMPERATURE)).await?;
        let humidity = read_milli(&self.dir.join(HUMIDITY)).await?;
        Ok(RawReading { temperature, humidity })
    }
}
