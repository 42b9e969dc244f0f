/*!
Scripted sensor device

Replays a queue of steps, one per read. When the script runs out the last
successful reading is repeated, or an I/O error is returned if there never
was one. Clones share the same script, so a test can keep a handle after
the device has been moved into a `SensorSource`.
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use rackwatch_core::{RawReading, SensorDevice, SensorError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Step {
    Reading { temperature: f64, humidity: f64 },
    Decode(String),
    Io(String),
    /// Never answers; the source's timeout has to fire.
    Hang,
}

#[derive(Clone, Default)]
pub struct ScriptedSensor {
    script: Arc<Mutex<VecDeque<Step>>>,
    last: Arc<Mutex<Option<RawReading>>>,
    reads: Arc<AtomicUsize>,
}

impl ScriptedSensor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sensor that always reports the same values.
    pub fn constant(temperature: f64, humidity: f64) -> Self {
        Self::new().then_reading(temperature, humidity)
    }

    pub fn then_reading(self, temperature: f64, humidity: f64) -> Self {
        self.push(Step::Reading { temperature, humidity });
        self
    }

    pub fn then_hang(self) -> Self {
        self.push(Step::Hang);
        self
    }

    pub fn then_decode_error(self, message: &str) -> Self {
        self.push(Step::Decode(message.to_string()));
        self
    }

    pub fn push(&self, step: Step) {
        self.script.lock().push_back(step);
    }

    /// Number of times the device was actually read.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SensorDevice for ScriptedSensor {
    async fn read(&mut self) -> Result<RawReading, SensorError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().pop_front();

        match step {
            Some(Step::Reading { temperature, humidity }) => {
                let raw = RawReading { temperature, humidity };
                *self.last.lock() = Some(raw);
                Ok(raw)
            }
            Some(Step::Decode(message)) => Err(SensorError::Decode(message)),
            Some(Step::Io(message)) => Err(SensorError::Io(std::io::Error::other(message))),
            Some(Step::Hang) => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                Err(SensorError::Io(std::io::Error::other("scripted hang ended")))
            }
            None => (*self.last.lock())
                .ok_or_else(|| SensorError::Io(std::io::Error::other("sensor script is empty"))),
        }
    }
}
