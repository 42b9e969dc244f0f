//! Shutdown through host agents listening on MQTT.
//!
//! Each agent subscribes to `{topic_prefix}/{agent_id}` and executes the
//! commands it receives. Agents cannot be discovered from here, so the host
//! list has to come from the configuration.

use async_trait::async_trait;
use rackwatch_core::{HostManager, ShutdownError};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AgentsSettings;

const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
pub struct AgentCommand {
    pub command_id: String,
    pub agent_id: String,
    pub command_type: String,
    pub parameters: Option<serde_json::Value>,
    pub timeout_seconds: Option<u32>,
    pub timestamp: String,
}

impl AgentCommand {
    pub fn shutdown(agent_id: &str) -> Self {
        Self {
            command_id: Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            command_type: "shutdown".into(),
            parameters: Some(serde_json::json!({ "force": false, "delay_seconds": 0 })),
            timeout_seconds: Some(30),
            timestamp: OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
        }
    }
}

pub struct AgentFleet {
    client: AsyncClient,
    topic_prefix: String,
    sent: AtomicUsize,
    acked: Arc<AtomicUsize>,
    event_loop: JoinHandle<()>,
}

/// Spacing of reconnect attempts while the broker is unreachable. Only the
/// first failure of an outage is logged at warn.
#[derive(Debug)]
struct Reconnect {
    failures: u32,
}

impl Reconnect {
    const FIRST: Duration = Duration::from_secs(1);
    const MAX: Duration = Duration::from_secs(30);

    fn new() -> Self {
        Self { failures: 0 }
    }

    /// Records a failure and returns how long to wait before the next try.
    fn failed(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let shift = (self.failures - 1).min(5);
        (Self::FIRST * (1 << shift)).min(Self::MAX)
    }

    fn is_first(&self) -> bool {
        self.failures == 1
    }

    fn connected(&mut self) {
        self.failures = 0;
    }
}

impl AgentFleet {
    /// Connects lazily: the event loop task dials the broker in the
    /// background and keeps retrying. `capacity` bounds the outgoing queue;
    /// give it at least one slot per agent so a whole campaign fits while
    /// the broker is away.
    pub fn connect(settings: &AgentsSettings, capacity: usize) -> Self {
        let client_id = format!("rackwatch-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let mut opts = MqttOptions::new(client_id, &settings.broker_host, settings.broker_port);
        opts.set_keep_alive(Duration::from_secs(30));

        let (client, mut eventloop) = AsyncClient::new(opts, capacity.max(1));
        let acked = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&acked);
        let broker = format!("{}:{}", settings.broker_host, settings.broker_port);

        let event_loop = tokio::spawn(async move {
            let mut reconnect = Reconnect::new();
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!(%broker, "connected to MQTT broker");
                        reconnect.connected();
                    }
                    Ok(Event::Incoming(Packet::PubAck(ack))) => {
                        debug!(pkid = ack.pkid, "command acknowledged by broker");
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let wait = reconnect.failed();
                        if reconnect.is_first() {
                            warn!(%broker, error = %e, "MQTT broker unreachable, retrying in the background");
                        } else {
                            debug!(%broker, error = %e, retry_in = ?wait, "MQTT reconnect failed");
                        }
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        });

        Self {
            client,
            topic_prefix: settings.topic_prefix.trim_end_matches('/').to_string(),
            sent: AtomicUsize::new(0),
            acked,
            event_loop,
        }
    }

    pub fn topic_for(&self, agent_id: &str) -> String {
        format!("{}/{agent_id}", self.topic_prefix)
    }
}

impl Drop for AgentFleet {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

#[async_trait]
impl HostManager for AgentFleet {
    fn backend(&self) -> &'static str {
        "agents"
    }

    async fn list_hosts(&self) -> Result<Vec<String>, ShutdownError> {
        Err(ShutdownError::ListHosts("agents cannot be discovered, set shutdown.hosts".into()))
    }

    async fn shutdown(&self, host: &str) -> Result<(), ShutdownError> {
        let command = AgentCommand::shutdown(host);
        let payload = serde_json::to_vec(&command)
            .map_err(|e| ShutdownError::Host { host: host.to_string(), reason: e.to_string() })?;

        // Never wait for queue space: with the broker gone nothing drains it.
        self.client
            .try_publish(self.topic_for(host), QoS::AtLeastOnce, false, payload)
            .map_err(|e| ShutdownError::Host {
                host: host.to_string(),
                reason: format!("command not queued: {e}"),
            })?;
        self.sent.fetch_add(1, Ordering::SeqCst);

        info!(agent = host, command_id = %command.command_id, "shutdown command queued");
        Ok(())
    }

    /// Queuing is not delivery; wait for the broker to acknowledge every
    /// command before the process is allowed to exit.
    async fn settle(&self) {
        let sent = self.sent.load(Ordering::SeqCst);
        let waiting = async {
            while self.acked.load(Ordering::SeqCst) < sent {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };
        if tokio::time::timeout(SETTLE_TIMEOUT, waiting).await.is_err() {
            warn!(
                sent,
                acked = self.acked.load(Ordering::SeqCst),
                "broker did not acknowledge every shutdown command"
            );
        }
    }
}
