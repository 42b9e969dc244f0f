//! Proxmox VE API client, just enough for an emergency shutdown: ticket
//! login, node listing, node shutdown.

use async_trait::async_trait;
use rackwatch_core::{HostManager, ShutdownError};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::ProxmoxSettings;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Clone, Deserialize)]
struct Ticket {
    ticket: String,
    #[serde(rename = "CSRFPreventionToken")]
    csrf: String,
}

#[derive(Debug, Deserialize)]
struct Node {
    node: String,
    status: Option<String>,
}

pub struct ProxmoxClient {
    http: Client,
    base: String,
    username: String,
    password: String,
    ticket: Mutex<Option<Ticket>>,
}

impl ProxmoxClient {
    pub fn new(settings: &ProxmoxSettings, password: String) -> Result<Self, ShutdownError> {
        let http = Client::builder()
            .danger_accept_invalid_certs(!settings.verify_ssl)
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()
            .map_err(|e| ShutdownError::Unavailable(format!("proxmox http client: {e}")))?;

        Ok(Self {
            http,
            base: format!("{}/api2/json", settings.url.trim_end_matches('/')),
            username: settings.username.clone(),
            password,
            ticket: Mutex::new(None),
        })
    }

    async fn ticket(&self) -> Result<Ticket, String> {
        let mut cached = self.ticket.lock().await;
        if let Some(ticket) = cached.as_ref() {
            return Ok(ticket.clone());
        }

        let response = self
            .http
            .post(format!("{}/access/ticket", self.base))
            .form(&[("username", self.username.as_str()), ("password", self.password.as_str())])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| format!("login as {} failed: {e}", self.username))?;
        let ticket = response
            .json::<Envelope<Ticket>>()
            .await
            .map_err(|e| format!("unexpected login response: {e}"))?
            .data;

        debug!(user = %self.username, "proxmox ticket acquired");
        *cached = Some(ticket.clone());
        Ok(ticket)
    }

    /// Logs in and lists the nodes, then forgets the ticket: PVE tickets
    /// expire after two hours and the campaign may be much later.
    pub async fn check(&self) -> Result<Vec<String>, ShutdownError> {
        let listed = self.list_hosts().await;
        self.ticket.lock().await.take();
        let nodes = listed?;
        info!(url = %self.base, nodes = ?nodes, "proxmox reachable");
        Ok(nodes)
    }

    fn authenticated(request: RequestBuilder, ticket: &Ticket) -> RequestBuilder {
        request
            .header("Cookie", format!("PVEAuthCookie={}", ticket.ticket))
            .header("CSRFPreventionToken", &ticket.csrf)
    }
}

#[async_trait]
impl HostManager for ProxmoxClient {
    fn backend(&self) -> &'static str {
        "proxmox"
    }

    /// Online nodes of the cluster.
    async fn list_hosts(&self) -> Result<Vec<String>, ShutdownError> {
        let ticket = self.ticket().await.map_err(ShutdownError::ListHosts)?;
        let nodes = Self::authenticated(self.http.get(format!("{}/nodes", self.base)), &ticket)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ShutdownError::ListHosts(e.to_string()))?
            .json::<Envelope<Vec<Node>>>()
            .await
            .map_err(|e| ShutdownError::ListHosts(e.to_string()))?
            .data;

        Ok(nodes
            .into_iter()
            .filter(|n| n.status.as_deref().map_or(true, |s| s == "online"))
            .map(|n| n.node)
            .collect())
    }

    async fn shutdown(&self, host: &str) -> Result<(), ShutdownError> {
        let failed = |reason: String| ShutdownError::Host { host: host.to_string(), reason };

        let ticket = self.ticket().await.map_err(failed)?;
        let url = format!("{}/nodes/{host}/status", self.base);
        Self::authenticated(self.http.post(url), &ticket)
            .form(&[("command", "shutdown")])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| failed(e.to_string()))?;

        info!(node = host, "proxmox accepted shutdown");
        Ok(())
    }
}
