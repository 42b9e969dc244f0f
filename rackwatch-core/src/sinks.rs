//! Sink fan-out.
//!
//! Every registered sink receives every sample. Deliveries of one tick run
//! concurrently and each result is kept on its own: a sink that fails is
//! logged and recorded in the [`HealthBoard`], the others are unaffected.

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt::Display;
use std::sync::Arc;
use tracing::{info, warn};

use crate::models::Sample;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("delivery failed: {0}")]
    Delivery(String),
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

impl SinkError {
    pub fn delivery(e: impl Display) -> Self {
        SinkError::Delivery(e.to_string())
    }
}

/// A downstream consumer of samples (storage, display, telemetry...).
#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, sample: &Sample) -> Result<(), SinkError>;
}

/// Per-sink delivery counters, exposed on `GET /health`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SinkHealth {
    pub name: String,
    pub deliveries: u64,
    pub failures: u64,
    pub last_error: Option<String>,
}

/// Shared view of the sink health, one entry per registered sink.
#[derive(Debug, Clone, Default)]
pub struct HealthBoard(Arc<Mutex<Vec<SinkHealth>>>);

impl HealthBoard {
    pub fn snapshot(&self) -> Vec<SinkHealth> {
        self.0.lock().clone()
    }

    fn push(&self, name: &str) {
        self.0.lock().push(SinkHealth { name: name.to_string(), ..Default::default() });
    }

    fn record(&self, index: usize, tick: u64, outcome: &Result<(), SinkError>) {
        let mut board = self.0.lock();
        let Some(entry) = board.get_mut(index) else { return };
        match outcome {
            Ok(()) => {
                entry.deliveries += 1;
                if entry.last_error.take().is_some() {
                    info!(sink = %entry.name, tick, "sink recovered");
                }
            }
            Err(e) => {
                entry.failures += 1;
                entry.last_error = Some(e.to_string());
                warn!(sink = %entry.name, tick, error = %e, "sink delivery failed");
            }
        }
    }
}

/// Result of one fan-out pass, in registration order.
#[derive(Debug)]
pub struct FanOutReport {
    pub outcomes: Vec<(&'static str, Result<(), SinkError>)>,
}

impl FanOutReport {
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|(_, r)| r.is_err()).count()
    }

    pub fn attempted(&self) -> Vec<&'static str> {
        self.outcomes.iter().map(|(name, _)| *name).collect()
    }
}

#[derive(Default)]
pub struct SinkSet {
    sinks: Vec<Box<dyn Sink>>,
    board: HealthBoard,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<S: Sink + 'static>(&mut self, sink: S) {
        self.register_boxed(Box::new(sink));
    }

    pub fn register_boxed(&mut self, sink: Box<dyn Sink>) {
        info!(sink = sink.name(), "sink registered");
        self.board.push(sink.name());
        self.sinks.push(sink);
    }

    /// Registers a sink that is enabled but may not be available.
    ///
    /// An unavailable sink (missing secret, absent hardware...) is left out
    /// for the whole run; this is the only diagnostic it produces.
    pub fn enroll<S, E>(&mut self, name: &'static str, candidate: Result<S, E>) -> bool
    where
        S: Sink + 'static,
        E: Display,
    {
        match candidate {
            Ok(sink) => {
                self.register(sink);
                true
            }
            Err(e) => {
                warn!(sink = name, reason = %e, "sink enabled but unavailable, disabled for this run");
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    pub fn health(&self) -> HealthBoard {
        self.board.clone()
    }

    /// Delivers `sample` to every sink. Never fails as a whole.
    pub async fn fan_out(&self, sample: &Sample) -> FanOutReport {
        let deliveries = self.sinks.iter().enumerate().map(|(index, sink)| async move {
            let outcome = sink.deliver(sample).await;
            self.board.record(index, sample.tick, &outcome);
            (sink.name(), outcome)
        });

        FanOutReport { outcomes: join_all(deliveries).await }
    }
}
