//! Master directory clients.

use async_trait::async_trait;
use server_probe::steam::{DEFAULT_API_BASE, ServerListEnvelope};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Directory error types
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("Master directory unavailable: {0}")]
    Unavailable(String),
}

/// Source of candidate server addresses
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MasterDirectory: Send + Sync {
    /// Addresses of every server matching `filter`, deduplicated
    async fn list(&self, filter: &str) -> Result<BTreeSet<SocketAddr>, DirectoryError>;
}

/// Build the directory filter for a Steam app id.
pub fn app_filter(app_id: u32) -> String {
    format!("\\appid\\{}", app_id)
}

/// Steam Web API `IGameServersService/GetServerList` directory
pub struct SteamWebDirectory {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    limit: u32,
}

impl SteamWebDirectory {
    /// Create a new directory client
    pub fn new(
        api_base: Option<String>,
        api_key: String,
        limit: u32,
        request_timeout: Duration,
    ) -> Result<Self, DirectoryError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| DirectoryError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: api_base.unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            api_key,
            limit,
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
impl MasterDirectory for SteamWebDirectory {
    async fn list(&self, filter: &str) -> Result<BTreeSet<SocketAddr>, DirectoryError> {
        let limit = self.limit.to_string();
        let response = self
            .client
            .get(self.url())
            .query(&[
                ("key", self.api_key.as_str()),
                ("filter", filter),
                ("limit", limit.as_str()),
            ])
            .send()
            .await
            .map_err(|e| DirectoryError::Unavailable(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::Unavailable(format!(
                "unexpected status code: {}",
                status
            )));
        }

        let envelope: ServerListEnvelope = response
            .json()
            .await
            .map_err(|e| DirectoryError::Unavailable(format!("malformed response: {}", e)))?;

        Ok(collect_addresses(envelope))
    }
}

/// Deduplicated connect addresses from a server list.
pub fn collect_addresses(envelope: ServerListEnvelope) -> BTreeSet<SocketAddr> {
    let listed = envelope.response.servers.len();
    let mut addresses = BTreeSet::new();

    for entry in envelope.response.servers {
        match entry.connect_addr() {
            Some(addr) => {
                addresses.insert(addr);
            }
            None => warn!(addr = %entry.addr, "Skipping unparseable directory entry"),
        }
    }

    debug!(listed, unique = addresses.len(), "Directory response parsed");
    addresses
}
