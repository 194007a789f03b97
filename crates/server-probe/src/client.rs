//! Probe client implementations.

use crate::steam::{DEFAULT_API_BASE, ServerListEnvelope};
use crate::types::{ProbeAttempt, ProbeError, ServerMetadata};
use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Extra time granted on top of the socket timeout before an attempt is abandoned.
pub const ATTEMPT_GRACE: Duration = Duration::from_millis(1000);

/// Probe client trait
#[async_trait]
pub trait ProbeClient: Send + Sync {
    /// Perform one query exchange against `host:port`
    async fn query(
        &self,
        host: IpAddr,
        port: u16,
        timeout: Duration,
    ) -> Result<ServerMetadata, ProbeError>;

    /// Get the name of this client
    fn name(&self) -> &str;
}

/// Wraps a [`ProbeClient`] with an overall attempt deadline.
///
/// The inner client gets the socket timeout; the whole attempt is cut off at
/// socket timeout + [`ATTEMPT_GRACE`] even if the client ignores its timeout.
#[derive(Clone)]
pub struct TimedProbe {
    client: Arc<dyn ProbeClient>,
    socket_timeout: Duration,
}

impl TimedProbe {
    /// Create a new timed probe
    pub fn new(client: Arc<dyn ProbeClient>, socket_timeout: Duration) -> Self {
        Self {
            client,
            socket_timeout,
        }
    }

    /// Overall deadline for one attempt
    pub fn attempt_timeout(&self) -> Duration {
        self.socket_timeout + ATTEMPT_GRACE
    }

    /// Run one attempt against `addr`
    pub async fn attempt(&self, addr: SocketAddr) -> ProbeAttempt {
        let start = Instant::now();
        let deadline = self.attempt_timeout();

        match timeout(
            deadline,
            self.client.query(addr.ip(), addr.port(), self.socket_timeout),
        )
        .await
        {
            Ok(Ok(mut metadata)) => {
                let duration = start.elapsed();
                if metadata.ping.is_zero() {
                    metadata.ping = duration;
                }
                debug!(address = %addr, client = self.client.name(), duration_ms = duration.as_millis(), "Probe succeeded");
                ProbeAttempt::success(metadata, duration)
            }
            Ok(Err(e)) => {
                let duration = start.elapsed();
                debug!(address = %addr, client = self.client.name(), error = %e, "Probe failed");
                ProbeAttempt::failure(e, duration)
            }
            Err(_) => {
                let duration = start.elapsed();
                debug!(address = %addr, client = self.client.name(), "Probe attempt deadline exceeded");
                ProbeAttempt::failure(ProbeError::Timeout(deadline), duration)
            }
        }
    }
}

/// Probe backed by the Steam Web API server list.
///
/// Asks the directory for the single entry matching the game address. A
/// server the directory does not list is treated as refused.
///
/// The Web API does not expose whether a server is password protected, so
/// every result reports `password: false` and password filters downstream
/// match nothing. Only the binary query protocol carries that flag.
pub struct WebApiProbeClient {
    api_base: String,
    api_key: String,
    client: reqwest::Client,
}

impl WebApiProbeClient {
    /// Create a new web API probe client
    pub fn new(api_base: Option<String>, api_key: String) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ProbeError::Refused(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_base: api_base.unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            api_key,
            client,
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/IGameServersService/GetServerList/v1/",
            self.api_base.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl ProbeClient for WebApiProbeClient {
    async fn query(
        &self,
        host: IpAddr,
        port: u16,
        timeout_duration: Duration,
    ) -> Result<ServerMetadata, ProbeError> {
        let start = Instant::now();
        let filter = format!("\\gameaddr\\{}:{}", host, port);

        let response = self
            .client
            .get(self.url())
            .query(&[
                ("key", self.api_key.as_str()),
                ("filter", filter.as_str()),
                ("limit", "1"),
            ])
            .timeout(timeout_duration)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProbeError::Timeout(timeout_duration)
                } else {
                    ProbeError::Refused(format!("request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(host = %host, port, status = status.as_u16(), "Web API probe rejected");
            return Err(ProbeError::Refused(format!("unexpected status code: {}", status)));
        }

        let envelope: ServerListEnvelope = response
            .json()
            .await
            .map_err(|e| ProbeError::Malformed(e.to_string()))?;

        let target = SocketAddr::new(host, port);
        let entry = envelope
            .response
            .servers
            .into_iter()
            .find(|entry| entry.connect_addr() == Some(target))
            .ok_or_else(|| ProbeError::Refused("server not listed".to_string()))?;

        Ok(entry.into_metadata(start.elapsed()))
    }

    fn name(&self) -> &str {
        "steam-web-api"
    }
}
