//! Types shared by the registry pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use server_probe::{Gamemode, ServerMetadata, classify_metadata};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Interval between discovery polls
    pub poll_interval: Duration,

    /// Master directory filter string
    pub discovery_filter: String,

    /// Per-probe socket timeout
    pub probe_timeout: Duration,

    /// Number of concurrent probe workers
    pub worker_concurrency: usize,

    /// Addresses per dispatch batch
    pub batch_size: usize,

    /// Retry policy attached to every probe task
    pub retry_policy: RetryPolicy,

    /// Task queue capacity
    pub queue_capacity: usize,

    /// Consecutive misses before an online server goes offline
    pub offline_threshold: u32,

    /// Interval between reaper sweeps
    pub reap_interval: Duration,

    /// Offline age after which a record is deleted
    pub retention_days: u32,

    /// How long in-flight probes may run after shutdown is requested
    pub drain_timeout: Duration,

    /// Metrics endpoint listen address, `None` disables it
    pub metrics_listen_addr: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(300),
            discovery_filter: "\\appid\\730".to_string(),
            probe_timeout: Duration::from_millis(5000),
            worker_concurrency: 20,
            batch_size: 100,
            retry_policy: RetryPolicy::default(),
            queue_capacity: 10_000,
            offline_threshold: 3,
            reap_interval: Duration::from_secs(24 * 60 * 60),
            retention_days: 7,
            drain_timeout: Duration::from_secs(10),
            metrics_listen_addr: Some("127.0.0.1:9464".to_string()),
        }
    }
}

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles for each further attempt
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before re-running a task that just failed `attempt`.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff.saturating_mul(1 << exponent)
    }

    /// Whether a task that just failed `attempt` may run again.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// A single probe job for one address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTask {
    pub address: SocketAddr,

    /// 1-based attempt number
    pub attempt: u32,

    /// When the task became eligible to run
    pub scheduled_at: tokio::time::Instant,
}

impl ProbeTask {
    /// First attempt for `address`, runnable now
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            attempt: 1,
            scheduled_at: tokio::time::Instant::now(),
        }
    }

    /// The follow-up attempt, scheduled after `delay`
    pub fn retry(&self, delay: Duration) -> Self {
        Self {
            address: self.address,
            attempt: self.attempt + 1,
            scheduled_at: tokio::time::Instant::now() + delay,
        }
    }
}

/// Stored lifecycle state. A missing record is "unknown".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Online,
    Offline,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Online => "online",
            Status::Offline => "offline",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(Status::Online),
            "offline" => Ok(Status::Offline),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

/// Fields refreshed from a successful probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerCandidate {
    pub address: SocketAddr,
    pub query_port: u16,
    pub steam_id: Option<String>,
    pub name: String,
    pub map: String,
    pub gamemode: Gamemode,
    pub password: bool,
    pub vac: bool,
    pub version: Option<String>,
    pub players: u32,
    pub max_players: u32,
    pub bots: u32,
    pub ping_ms: u32,
}

impl ServerCandidate {
    /// Build a candidate from probe metadata, classifying the gamemode.
    pub fn from_metadata(address: SocketAddr, metadata: &ServerMetadata) -> Self {
        Self {
            address,
            query_port: metadata.query_port.unwrap_or(address.port()),
            steam_id: metadata.steam_id.clone(),
            name: metadata.name.clone(),
            map: metadata.map.clone(),
            gamemode: classify_metadata(metadata),
            password: metadata.password,
            vac: metadata.secure,
            version: metadata.version.clone(),
            players: metadata.player_count(),
            max_players: metadata.max_players,
            bots: metadata.bot_count(),
            ping_ms: metadata.ping.as_millis().min(u32::MAX as u128) as u32,
        }
    }
}

/// Persisted server record, one per address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub address: SocketAddr,
    pub query_port: u16,
    pub steam_id: Option<String>,
    pub name: String,
    pub map: String,
    pub gamemode: Gamemode,
    pub password: bool,
    pub vac: bool,
    pub version: Option<String>,
    pub players: u32,
    pub max_players: u32,
    pub bots: u32,
    pub ping_ms: u32,
    pub status: Status,
    pub seen_count: u32,
    pub missed_count: u32,
    pub first_seen: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub offline_since: Option<DateTime<Utc>>,
}

impl ServerRecord {
    /// A freshly discovered online server
    pub fn from_candidate(candidate: ServerCandidate, now: DateTime<Utc>) -> Self {
        Self {
            address: candidate.address,
            query_port: candidate.query_port,
            steam_id: candidate.steam_id,
            name: candidate.name,
            map: candidate.map,
            gamemode: candidate.gamemode,
            password: candidate.password,
            vac: candidate.vac,
            version: candidate.version,
            players: candidate.players,
            max_players: candidate.max_players,
            bots: candidate.bots,
            ping_ms: candidate.ping_ms,
            status: Status::Online,
            seen_count: 1,
            missed_count: 0,
            first_seen: now,
            updated_at: now,
            offline_since: None,
        }
    }

    /// Overwrite the probe-derived fields, leaving lifecycle fields alone.
    pub fn refresh(&mut self, candidate: ServerCandidate) {
        self.query_port = candidate.query_port;
        self.steam_id = candidate.steam_id;
        self.name = candidate.name;
        self.map = candidate.map;
        self.gamemode = candidate.gamemode;
        self.password = candidate.password;
        self.vac = candidate.vac;
        self.version = candidate.version;
        self.players = candidate.players;
        self.max_players = candidate.max_players;
        self.bots = candidate.bots;
        self.ping_ms = candidate.ping_ms;
    }

    pub fn ip(&self) -> IpAddr {
        self.address.ip()
    }

    pub fn port(&self) -> u16 {
        self.address.port()
    }

    pub fn is_full(&self) -> bool {
        self.max_players > 0 && self.players >= self.max_players
    }
}

/// Record counts per stored status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub online: u64,
    pub offline: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_from_initial() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_after(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_after(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_after(3), Duration::from_secs(4));
    }

    #[test]
    fn test_default_policy_allows_one_retry() {
        let policy = RetryPolicy::default();
        assert!(policy.allows_retry(1));
        assert!(!policy.allows_retry(2));
    }

    #[test]
    fn test_status_round_trip() {
        assert_eq!("online".parse::<Status>(), Ok(Status::Online));
        assert_eq!(Status::Offline.to_string(), "offline");
        assert!("unknown".parse::<Status>().is_err());
    }

    #[test]
    fn test_candidate_from_metadata() {
        let meta = ServerMetadata {
            name: "Surf Heaven".into(),
            map: "surf_kitsune".into(),
            reported_players: Some(10),
            reported_bots: Some(2),
            max_players: 24,
            ping: Duration::from_millis(37),
            secure: true,
            query_port: Some(27016),
            ..Default::default()
        };
        let addr: SocketAddr = "203.0.113.7:27015".parse().unwrap();
        let candidate = ServerCandidate::from_metadata(addr, &meta);

        assert_eq!(candidate.gamemode, Gamemode::Surf);
        assert_eq!(candidate.players, 10);
        assert_eq!(candidate.bots, 2);
        assert_eq!(candidate.ping_ms, 37);
        assert_eq!(candidate.query_port, 27016);
        assert!(candidate.vac);
    }

    #[test]
    fn test_query_port_defaults_to_game_port() {
        let addr: SocketAddr = "203.0.113.7:27015".parse().unwrap();
        let candidate = ServerCandidate::from_metadata(addr, &ServerMetadata::default());
        assert_eq!(candidate.query_port, 27015);
    }
}
