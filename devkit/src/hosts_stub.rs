/*!
Mock host manager

Pretends to be a Proxmox cluster (or an agent fleet): a fixed host list,
optional per-host failures and a record of every shutdown command.
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use rackwatch_core::{HostManager, ShutdownError};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct Inner {
    hosts: Vec<String>,
    failing: HashSet<String>,
    list_fails: AtomicBool,
    latency: Option<Duration>,
    list_calls: AtomicUsize,
    settles: AtomicUsize,
    shutdowns: Mutex<Vec<String>>,
}

#[derive(Clone, Default)]
pub struct MockHostManager(Arc<Inner>);

impl MockHostManager {
    pub fn with_hosts(hosts: &[&str]) -> Self {
        Self(Arc::new(Inner {
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            ..Default::default()
        }))
    }

    /// Same hosts, but `shutdown` fails for the ones listed here.
    pub fn failing_on(self, failing: &[&str]) -> Self {
        let inner = Inner {
            hosts: self.0.hosts.clone(),
            failing: failing.iter().map(|h| h.to_string()).collect(),
            latency: self.0.latency,
            ..Default::default()
        };
        Self(Arc::new(inner))
    }

    /// Every call sleeps this long first, to widen race windows.
    pub fn with_latency(self, latency: Duration) -> Self {
        let inner = Inner {
            hosts: self.0.hosts.clone(),
            failing: self.0.failing.clone(),
            latency: Some(latency),
            ..Default::default()
        };
        Self(Arc::new(inner))
    }

    pub fn fail_listing(&self) {
        self.0.list_fails.store(true, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.0.list_calls.load(Ordering::SeqCst)
    }

    pub fn settles(&self) -> usize {
        self.0.settles.load(Ordering::SeqCst)
    }

    /// Hosts a shutdown was attempted on, sorted.
    pub fn shutdowns(&self) -> Vec<String> {
        let mut hosts = self.0.shutdowns.lock().clone();
        hosts.sort();
        hosts
    }

    async fn pause(&self) {
        match self.0.latency {
            Some(latency) => tokio::time::sleep(latency).await,
            None => tokio::task::yield_now().await,
        }
    }
}

#[async_trait]
impl HostManager for MockHostManager {
    fn backend(&self) -> &'static str {
        "mock"
    }

    async fn list_hosts(&self) -> Result<Vec<String>, ShutdownError> {
        self.0.list_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.0.list_fails.load(Ordering::SeqCst) {
            return Err(ShutdownError::ListHosts("cluster unreachable".into()));
        }
        Ok(self.0.hosts.clone())
    }

    async fn shutdown(&self, host: &str) -> Result<(), ShutdownError> {
        self.pause().await;
        self.0.shutdowns.lock().push(host.to_string());
        if self.0.failing.contains(host) {
            return Err(ShutdownError::Host { host: host.to_string(), reason: "connection refused".into() });
        }
        Ok(())
    }

    async fn settle(&self) {
        self.0.settles.fetch_add(1, Ordering::SeqCst);
    }
}
