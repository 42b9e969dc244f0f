/*!
Sinks for assertions

`RecordingSink` keeps every sample it receives; `FailingSink` counts its
attempts and fails every one of them.
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use rackwatch_core::{Sample, Sink, SinkError, Status};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub struct RecordingSink {
    name: &'static str,
    samples: Arc<Mutex<Vec<Sample>>>,
}

impl RecordingSink {
    pub fn new(name: &'static str) -> Self {
        Self { name, samples: Arc::new(Mutex::new(Vec::new())) }
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.samples.lock().clone()
    }

    pub fn statuses(&self) -> Vec<Status> {
        self.samples.lock().iter().map(|s| s.status).collect()
    }

    pub fn ticks(&self) -> Vec<u64> {
        self.samples.lock().iter().map(|s| s.tick).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn deliver(&self, sample: &Sample) -> Result<(), SinkError> {
        self.samples.lock().push(sample.clone());
        Ok(())
    }
}

#[derive(Clone)]
pub struct FailingSink {
    name: &'static str,
    attempts: Arc<AtomicUsize>,
}

impl FailingSink {
    pub fn new(name: &'static str) -> Self {
        Self { name, attempts: Arc::new(AtomicUsize::new(0)) }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for FailingSink {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn deliver(&self, sample: &Sample) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(SinkError::Delivery(format!("{} refused tick {}", self.name, sample.tick)))
    }
}
