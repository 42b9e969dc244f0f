//! The poll loop.
//!
//! A tick is: read the config snapshot, acquire, classify, publish the
//! sample, fan out, ask the coordinator. Ticks start on a fixed period
//! measured from the start of the previous tick. Only the wait between two
//! ticks can be cancelled; a tick that has started always runs to the end.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classifier::classify;
use crate::models::{Sample, Status};
use crate::sensor::SensorSource;
use crate::shutdown::{ShutdownCoordinator, Verdict};
use crate::sinks::{FanOutReport, HealthBoard, SinkSet};
use crate::state::LatestSample;

/// Settings a tick depends on. Read once at the start of every tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollConfig {
    pub interval: Duration,
    /// Degrees Celsius; a reading strictly above it is `HIGH`.
    pub threshold: f64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(5), threshold: 40.0 }
    }
}

#[derive(Debug)]
pub struct TickOutcome {
    pub sample: Sample,
    pub report: FanOutReport,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The coordinator fired; the loop ran `ticks` ticks including the last one.
    ShutdownFired { ticks: u64 },
    Cancelled { ticks: u64 },
}

pub struct PollLoop {
    sensor: Arc<SensorSource>,
    sinks: SinkSet,
    coordinator: Arc<ShutdownCoordinator>,
    latest: LatestSample,
    config: watch::Receiver<PollConfig>,
    ticks: u64,
}

impl PollLoop {
    pub fn new(
        sensor: Arc<SensorSource>,
        sinks: SinkSet,
        coordinator: Arc<ShutdownCoordinator>,
        config: watch::Receiver<PollConfig>,
    ) -> Self {
        Self {
            sensor,
            sinks,
            coordinator,
            latest: LatestSample::new(),
            config,
            ticks: 0,
        }
    }

    /// Handle on the last published sample, for the HTTP side.
    pub fn latest(&self) -> LatestSample {
        self.latest.clone()
    }

    pub fn sink_health(&self) -> HealthBoard {
        self.sinks.health()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub async fn tick(&mut self) -> TickOutcome {
        self.ticks += 1;
        let tick = self.ticks;
        let config = *self.config.borrow();

        let acquired = self.sensor.read().await;
        let status = classify(acquired.as_ref(), config.threshold);
        let sample = Sample::from_acquisition(tick, &acquired, status);

        match (&acquired, status) {
            (Err(e), _) => warn!(tick, kind = e.kind(), error = %e, "sensor read failed"),
            (Ok(r), Status::High) => warn!(
                tick,
                temperature = r.temperature,
                humidity = r.humidity,
                threshold = config.threshold,
                "temperature above threshold"
            ),
            (Ok(r), _) => info!(
                tick,
                temperature = r.temperature,
                humidity = r.humidity,
                status = %status,
                "reading"
            ),
        }

        self.latest.publish(sample.clone());
        let report = self.sinks.fan_out(&sample).await;
        debug!(tick, failures = report.failures(), "fan-out done");

        let verdict = self.coordinator.observe(&sample).await;
        TickOutcome { sample, report, verdict }
    }

    /// Polls until the coordinator fires or `cancel` is triggered.
    pub async fn run(mut self, cancel: CancellationToken) -> LoopExit {
        info!(sinks = ?self.sinks.names(), shutdown = self.coordinator.is_enabled(), "poll loop started");

        loop {
            if cancel.is_cancelled() {
                info!(ticks = self.ticks, "poll loop cancelled");
                return LoopExit::Cancelled { ticks: self.ticks };
            }

            let started = Instant::now();
            let outcome = self.tick().await;
            if outcome.verdict == Verdict::Stop {
                info!(ticks = self.ticks, "poll loop stopped after shutdown campaign");
                return LoopExit::ShutdownFired { ticks: self.ticks };
            }

            let next = started + self.config.borrow().interval;
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(ticks = self.ticks, "poll loop cancelled");
                    return LoopExit::Cancelled { ticks: self.ticks };
                }
                _ = tokio::time::sleep_until(next) => {}
            }
        }
    }
}
