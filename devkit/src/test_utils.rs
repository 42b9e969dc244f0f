/*!
Test harness

Builds a real `PollLoop` out of fakes: a scripted sensor, a recording sink,
optionally a failing sink and a mock host manager. The handles stay with
the test so it can drive ticks and inspect what every collaborator saw.
*/

use rackwatch_core::{
    HealthBoard, LatestSample, PollConfig, PollLoop, SensorSource, ShutdownCoordinator, SinkSet,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::hosts_stub::MockHostManager;
use crate::sensor_stub::ScriptedSensor;
use crate::sink_stub::{FailingSink, RecordingSink};

pub struct TestHarness {
    pub poll: PollLoop,
    pub sensor: ScriptedSensor,
    pub source: Arc<SensorSource>,
    pub recorder: RecordingSink,
    pub failing: Option<FailingSink>,
    pub hosts: Option<MockHostManager>,
    pub coordinator: Arc<ShutdownCoordinator>,
    pub config: watch::Sender<PollConfig>,
}

pub struct HarnessBuilder {
    sensor: ScriptedSensor,
    threshold: f64,
    interval: Duration,
    timeout: Duration,
    failing: bool,
    hosts: Option<MockHostManager>,
    configured_hosts: Vec<String>,
}

impl TestHarness {
    /// Starts a builder around `sensor`. Also installs a test subscriber so
    /// `RUST_LOG=debug cargo test` shows the loop's logs.
    pub fn builder(sensor: ScriptedSensor) -> HarnessBuilder {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        HarnessBuilder {
            sensor,
            threshold: 40.0,
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(2),
            failing: false,
            hosts: None,
            configured_hosts: Vec::new(),
        }
    }

    pub fn latest(&self) -> LatestSample {
        self.poll.latest()
    }

    pub fn health(&self) -> HealthBoard {
        self.poll.sink_health()
    }

    pub fn sensor_source(&self) -> Arc<SensorSource> {
        Arc::clone(&self.source)
    }

    /// Changes the threshold seen by the next tick.
    pub fn set_threshold(&self, threshold: f64) {
        self.config.send_modify(|c| c.threshold = threshold);
    }
}

impl HarnessBuilder {
    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn sensor_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Registers a `FailingSink` named "store" ahead of the recorder.
    pub fn with_failing_store(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn with_hosts(mut self, hosts: MockHostManager) -> Self {
        self.hosts = Some(hosts);
        self
    }

    /// Hosts given in configuration; the manager is then never asked to list.
    pub fn configured_hosts(mut self, hosts: &[&str]) -> Self {
        self.configured_hosts = hosts.iter().map(|h| h.to_string()).collect();
        self
    }

    pub fn build(self) -> TestHarness {
        let source = Arc::new(SensorSource::new(self.sensor.clone(), self.timeout));

        let mut sinks = SinkSet::new();
        let failing = self.failing.then(|| FailingSink::new("store"));
        if let Some(f) = &failing {
            sinks.register(f.clone());
        }
        let recorder = RecordingSink::new("recorder");
        sinks.register(recorder.clone());

        let coordinator = Arc::new(match &self.hosts {
            Some(hosts) => ShutdownCoordinator::new(Arc::new(hosts.clone()), self.configured_hosts),
            None => ShutdownCoordinator::disabled(),
        });

        let (config, rx) =
            watch::channel(PollConfig { interval: self.interval, threshold: self.threshold });
        let poll = PollLoop::new(Arc::clone(&source), sinks, Arc::clone(&coordinator), rx);

        TestHarness {
            poll,
            sensor: self.sensor,
            source,
            recorder,
            failing,
            hosts: self.hosts,
            coordinator,
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rackwatch_core::{Status, Verdict};

    #[tokio::test]
    async fn harness_drives_a_tick_through_every_fake() {
        let mut h = TestHarness::builder(ScriptedSensor::constant(25.0, 40.0))
            .with_failing_store()
            .build();

        let outcome = h.poll.tick().await;

        assert_eq!(outcome.verdict, Verdict::Continue);
        assert_eq!(h.recorder.statuses(), vec![Status::Normal]);
        assert_eq!(h.failing.as_ref().unwrap().attempts(), 1);
        assert_eq!(h.sensor.reads(), 1);
        assert_eq!(h.health().snapshot()[0].failures, 1);
    }

    #[tokio::test]
    async fn threshold_change_reaches_the_next_tick() {
        let mut h = TestHarness::builder(ScriptedSensor::constant(30.0, 40.0)).build();
        h.poll.tick().await;
        h.set_threshold(29.5);
        h.poll.tick().await;
        assert_eq!(h.recorder.statuses(), vec![Status::Normal, Status::High]);
    }
}
