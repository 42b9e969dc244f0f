use parking_lot::RwLock;
use std::sync::Arc;

use crate::models::{Sample, Status};

/// Last sample produced by the poll loop.
///
/// The poll task is the only writer; HTTP handlers only read it.
#[derive(Debug, Clone, Default)]
pub struct LatestSample(Arc<RwLock<Option<Sample>>>);

impl LatestSample {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, sample: Sample) {
        *self.0.write() = Some(sample);
    }

    pub fn get(&self) -> Option<Sample> {
        self.0.read().clone()
    }

    pub fn status(&self) -> Option<Status> {
        self.0.read().as_ref().map(|s| s.status)
    }
}
