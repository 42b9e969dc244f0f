//! Remote host managers the shutdown coordinator can drive.

pub mod agents;
pub mod proxmox;

pub use agents::{AgentCommand, AgentFleet};
pub use proxmox::ProxmoxClient;

use rackwatch_core::{HostManager, ShutdownError};
use std::sync::Arc;

use crate::config::{read_secret, Backend, ShutdownSettings};

const MIN_AGENT_QUEUE: usize = 10;

/// Builds the configured backend, or says why remote shutdown is
/// unavailable for this run. A Proxmox cluster has to accept a login and a
/// node listing now rather than during the emergency.
pub async fn build_host_manager(
    settings: &ShutdownSettings,
) -> Result<Arc<dyn HostManager>, ShutdownError> {
    match settings.backend {
        Backend::Proxmox => {
            let password = match (&settings.proxmox.password_file, &settings.proxmox.password) {
                (Some(file), _) => read_secret(file)
                    .await
                    .map_err(|e| ShutdownError::Unavailable(e.to_string()))?,
                (None, Some(inline)) if !inline.is_empty() => inline.clone(),
                _ => {
                    return Err(ShutdownError::Unavailable(
                        "shutdown.proxmox has neither password_file nor password".into(),
                    ))
                }
            };
            let client = ProxmoxClient::new(&settings.proxmox, password)?;
            client
                .check()
                .await
                .map_err(|e| ShutdownError::Unavailable(format!("startup check failed: {e}")))?;
            Ok(Arc::new(client))
        }
        Backend::Agents => {
            if settings.hosts.is_empty() {
                return Err(ShutdownError::Unavailable(
                    "the agents backend needs shutdown.hosts".into(),
                ));
            }
            let capacity = settings.hosts.len().max(MIN_AGENT_QUEUE);
            Ok(Arc::new(AgentFleet::connect(&settings.agents, capacity)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxmoxSettings;

    #[tokio::test]
    async fn proxmox_without_credentials_is_unavailable() {
        let settings = ShutdownSettings {
            enabled: true,
            proxmox: ProxmoxSettings { password: None, password_file: None, ..Default::default() },
            ..Default::default()
        };
        assert!(matches!(
            build_host_manager(&settings).await.err(),
            Some(ShutdownError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn unreadable_password_file_is_unavailable() {
        let settings = ShutdownSettings {
            enabled: true,
            proxmox: ProxmoxSettings {
                password_file: Some("/nonexistent/proxmox.password".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(build_host_manager(&settings).await.is_err());
    }

    #[tokio::test]
    async fn unreachable_cluster_is_unavailable() {
        let settings = ShutdownSettings {
            enabled: true,
            proxmox: ProxmoxSettings {
                url: "http://127.0.0.1:1".into(),
                password: Some("hunter2".into()),
                password_file: None,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = build_host_manager(&settings).await.err().unwrap();
        assert!(matches!(&err, ShutdownError::Unavailable(msg) if msg.contains("startup check")));
    }

    #[tokio::test]
    async fn agents_backend_accepts_a_full_campaign_while_the_broker_is_down() {
        use rackwatch_core::{Reading, Sample, ShutdownCoordinator, Status, Verdict};
        use std::time::Duration;

        let hosts: Vec<String> = (1..=12).map(|n| format!("node{n}")).collect();
        let mut settings =
            ShutdownSettings { enabled: true, backend: Backend::Agents, hosts: hosts.clone(), ..Default::default() };
        settings.agents.broker_host = "127.0.0.1".into();
        settings.agents.broker_port = 1;

        let manager = build_host_manager(&settings).await.unwrap();
        let coordinator = ShutdownCoordinator::new(manager, hosts);
        let hot = Sample::from_acquisition(1, &Ok(Reading::new(90.0, 30.0)), Status::High);

        let verdict = tokio::time::timeout(Duration::from_secs(15), coordinator.observe(&hot))
            .await
            .expect("campaign must finish while the broker is down");
        assert_eq!(verdict, Verdict::Stop);
        assert_eq!(coordinator.report().unwrap().succeeded(), 12);
    }

    #[tokio::test]
    async fn agents_need_configured_hosts() {
        let settings = ShutdownSettings { enabled: true, backend: Backend::Agents, ..Default::default() };
        assert!(build_host_manager(&settings).await.is_err());
    }
}
