//! One-shot remote shutdown.
//!
//! The coordinator starts `ARMED` and moves to `FIRED` the first time a
//! `HIGH` sample reaches it while a host manager is configured. The move is
//! a single compare-and-set, so concurrent `HIGH` samples still produce one
//! campaign. There is no way back to `ARMED` for the life of the process.

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::models::{Sample, Status};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ShutdownError {
    #[error("could not list hosts: {0}")]
    ListHosts(String),
    #[error("host {host}: {reason}")]
    Host { host: String, reason: String },
    #[error("remote shutdown unavailable: {0}")]
    Unavailable(String),
}

/// Client for whatever manages the remote compute nodes.
#[async_trait]
pub trait HostManager: Send + Sync {
    /// Short backend name used in logs ("proxmox", "agents"...).
    fn backend(&self) -> &'static str;

    async fn list_hosts(&self) -> Result<Vec<String>, ShutdownError>;

    async fn shutdown(&self, host: &str) -> Result<(), ShutdownError>;

    /// Called once after every host has been attempted. Backends that only
    /// queue commands wait here until they are on the wire.
    async fn settle(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CoordinatorState {
    Armed,
    Fired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Stop,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostOutcome {
    pub host: String,
    pub result: Result<(), ShutdownError>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CampaignReport {
    pub listing_error: Option<ShutdownError>,
    pub outcomes: Vec<HostOutcome>,
}

impl CampaignReport {
    pub fn attempted(&self) -> Vec<&str> {
        self.outcomes.iter().map(|o| o.host.as_str()).collect()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }
}

pub struct ShutdownCoordinator {
    manager: Option<Arc<dyn HostManager>>,
    hosts: Vec<String>,
    fired: AtomicBool,
    report: Mutex<Option<CampaignReport>>,
}

impl ShutdownCoordinator {
    /// `hosts` empty means "ask the manager for the host list".
    pub fn new(manager: Arc<dyn HostManager>, hosts: Vec<String>) -> Self {
        Self {
            manager: Some(manager),
            hosts,
            fired: AtomicBool::new(false),
            report: Mutex::new(None),
        }
    }

    /// Coordinator for a run without remote shutdown: `HIGH` is only logged.
    pub fn disabled() -> Self {
        Self {
            manager: None,
            hosts: Vec::new(),
            fired: AtomicBool::new(false),
            report: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.manager.is_some()
    }

    pub fn state(&self) -> CoordinatorState {
        if self.fired.load(Ordering::Acquire) {
            CoordinatorState::Fired
        } else {
            CoordinatorState::Armed
        }
    }

    /// The finished campaign, once there has been one.
    pub fn report(&self) -> Option<CampaignReport> {
        self.report.lock().clone()
    }

    /// Looks at one classified sample and decides whether polling goes on.
    pub async fn observe(&self, sample: &Sample) -> Verdict {
        if sample.status != Status::High {
            return Verdict::Continue;
        }

        let Some(manager) = &self.manager else {
            warn!(
                tick = sample.tick,
                temperature = sample.temperature(),
                "temperature above threshold, remote shutdown not configured"
            );
            return Verdict::Continue;
        };

        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Verdict::Stop;
        }

        error!(
            tick = sample.tick,
            temperature = sample.temperature(),
            backend = manager.backend(),
            "temperature above threshold, starting shutdown campaign"
        );
        let report = self.campaign(manager.as_ref()).await;
        *self.report.lock() = Some(report);
        Verdict::Stop
    }

    async fn campaign(&self, manager: &dyn HostManager) -> CampaignReport {
        let hosts = if self.hosts.is_empty() {
            match manager.list_hosts().await {
                Ok(hosts) => hosts,
                Err(e) => {
                    error!(error = %e, "shutdown campaign could not list hosts");
                    return CampaignReport { listing_error: Some(e), outcomes: Vec::new() };
                }
            }
        } else {
            self.hosts.clone()
        };

        if hosts.is_empty() {
            warn!("shutdown campaign has no host to contact");
        }

        let attempts = hosts.into_iter().map(|host| async move {
            let result = manager.shutdown(&host).await;
            match &result {
                Ok(()) => info!(host = %host, "shutdown command sent"),
                Err(e) => error!(host = %host, error = %e, "shutdown command failed"),
            }
            HostOutcome { host, result }
        });
        let outcomes = join_all(attempts).await;
        manager.settle().await;

        let report = CampaignReport { listing_error: None, outcomes };
        info!(
            attempted = report.outcomes.len(),
            succeeded = report.succeeded(),
            "shutdown campaign finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Reading;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Recorder {
        listed: AtomicUsize,
        shut: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl HostManager for Recorder {
        fn backend(&self) -> &'static str {
            "test"
        }

        async fn list_hosts(&self) -> Result<Vec<String>, ShutdownError> {
            self.listed.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(vec!["pve1".into(), "pve2".into()])
        }

        async fn shutdown(&self, host: &str) -> Result<(), ShutdownError> {
            self.shut.lock().push(host.to_string());
            if host == "pve1" {
                return Err(ShutdownError::Host { host: host.into(), reason: "refused".into() });
            }
            Ok(())
        }
    }

    fn sample(temperature: f64, status: Status) -> Sample {
        Sample::from_acquisition(1, &Ok(Reading::new(temperature, 30.0)), status)
    }

    #[tokio::test]
    async fn normal_sample_keeps_coordinator_armed() {
        let recorder = Arc::new(Recorder::default());
        let coordinator = ShutdownCoordinator::new(recorder.clone(), vec![]);

        assert_eq!(coordinator.observe(&sample(75.0, Status::Normal)).await, Verdict::Continue);
        assert_eq!(coordinator.state(), CoordinatorState::Armed);
        assert_eq!(recorder.listed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn high_sample_fires_once_and_stops_despite_host_failure() {
        let recorder = Arc::new(Recorder::default());
        let coordinator = ShutdownCoordinator::new(recorder.clone(), vec![]);

        assert_eq!(coordinator.observe(&sample(85.0, Status::High)).await, Verdict::Stop);
        assert_eq!(coordinator.observe(&sample(90.0, Status::High)).await, Verdict::Stop);

        assert_eq!(coordinator.state(), CoordinatorState::Fired);
        assert_eq!(recorder.listed.load(Ordering::SeqCst), 1);
        let mut shut = recorder.shut.lock().clone();
        shut.sort();
        assert_eq!(shut, vec!["pve1", "pve2"]);

        let report = coordinator.report().unwrap();
        assert_eq!(report.succeeded(), 1);
        assert!(report.listing_error.is_none());
    }

    #[tokio::test]
    async fn configured_hosts_skip_listing() {
        let recorder = Arc::new(Recorder::default());
        let coordinator = ShutdownCoordinator::new(recorder.clone(), vec!["nas".into()]);

        coordinator.observe(&sample(85.0, Status::High)).await;

        assert_eq!(recorder.listed.load(Ordering::SeqCst), 0);
        assert_eq!(recorder.shut.lock().clone(), vec!["nas"]);
    }

    #[tokio::test]
    async fn disabled_coordinator_never_stops_the_loop() {
        let coordinator = ShutdownCoordinator::disabled();
        assert_eq!(coordinator.observe(&sample(99.0, Status::High)).await, Verdict::Continue);
        assert_eq!(coordinator.state(), CoordinatorState::Armed);
        assert!(coordinator.report().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_high_samples_run_a_single_campaign() {
        let recorder = Arc::new(Recorder::default());
        let coordinator = Arc::new(ShutdownCoordinator::new(recorder.clone(), vec![]));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.observe(&sample(95.0, Status::High)).await })
            })
            .collect();
        for h in handles {
            assert_eq!(h.await.unwrap(), Verdict::Stop);
        }

        assert_eq!(recorder.listed.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.shut.lock().len(), 2);
    }
}
