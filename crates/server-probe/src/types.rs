//! Probe types and structures.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Probe failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    /// No response within the allotted time
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    /// The server actively refused or is not reachable
    #[error("probe refused: {0}")]
    Refused(String),

    /// The server answered with something we could not interpret
    #[error("malformed probe response: {0}")]
    Malformed(String),
}

impl ProbeError {
    /// Short label used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProbeError::Timeout(_) => "timeout",
            ProbeError::Refused(_) => "refused",
            ProbeError::Malformed(_) => "malformed",
        }
    }
}

/// A connected player or bot as reported by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub name: String,
    pub score: i32,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

/// Tag data as it arrives from a query source.
///
/// Some sources send a list of tags, others a single comma-delimited string.
/// Both collapse into a [`crate::tags::TagSet`] before classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTags {
    List(Vec<String>),
    Delimited(String),
}

impl Default for RawTags {
    fn default() -> Self {
        RawTags::List(Vec::new())
    }
}

/// Everything a single successful probe tells us about a server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerMetadata {
    pub name: String,
    pub map: String,
    pub players: Vec<PlayerInfo>,
    pub bots: Vec<PlayerInfo>,
    /// Player count for sources that only report totals
    pub reported_players: Option<u32>,
    /// Bot count for sources that only report totals
    pub reported_bots: Option<u32>,
    pub max_players: u32,
    #[serde(with = "humantime_serde")]
    pub ping: Duration,
    pub password: bool,
    /// VAC secured
    pub secure: bool,
    pub version: Option<String>,
    pub steam_id: Option<String>,
    /// Game port clients connect to, when it differs from the query port
    pub connect_address: Option<String>,
    pub query_port: Option<u16>,
    pub raw_tags: RawTags,
    pub raw_rules: HashMap<String, String>,
}

impl ServerMetadata {
    /// Human players currently connected.
    pub fn player_count(&self) -> u32 {
        self.reported_players
            .unwrap_or(self.players.len() as u32)
    }

    /// Bots currently connected.
    pub fn bot_count(&self) -> u32 {
        self.reported_bots.unwrap_or(self.bots.len() as u32)
    }
}

/// Gamemode tag derived from server metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Gamemode {
    Surf,
    Bhop,
    ZombieEscape,
    Kz,
    Deathmatch,
    Retake,
    Awp,
    Aim,
    Jailbreak,
    Gungame,
    CombatSurf,
    Minigame,
    HideAndSeek,
    Public,
}

impl Gamemode {
    /// Stable string form used in storage and metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Gamemode::Surf => "surf",
            Gamemode::Bhop => "bhop",
            Gamemode::ZombieEscape => "zombie-escape",
            Gamemode::Kz => "kz",
            Gamemode::Deathmatch => "deathmatch",
            Gamemode::Retake => "retake",
            Gamemode::Awp => "awp",
            Gamemode::Aim => "aim",
            Gamemode::Jailbreak => "jailbreak",
            Gamemode::Gungame => "gungame",
            Gamemode::CombatSurf => "combat-surf",
            Gamemode::Minigame => "minigame",
            Gamemode::HideAndSeek => "hide-and-seek",
            Gamemode::Public => "public",
        }
    }
}

impl fmt::Display for Gamemode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gamemode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "surf" => Ok(Gamemode::Surf),
            "bhop" => Ok(Gamemode::Bhop),
            "zombie-escape" => Ok(Gamemode::ZombieEscape),
            "kz" => Ok(Gamemode::Kz),
            "deathmatch" => Ok(Gamemode::Deathmatch),
            "retake" => Ok(Gamemode::Retake),
            "awp" => Ok(Gamemode::Awp),
            "aim" => Ok(Gamemode::Aim),
            "jailbreak" => Ok(Gamemode::Jailbreak),
            "gungame" => Ok(Gamemode::Gungame),
            "combat-surf" => Ok(Gamemode::CombatSurf),
            "minigame" => Ok(Gamemode::Minigame),
            "hide-and-seek" => Ok(Gamemode::HideAndSeek),
            "public" => Ok(Gamemode::Public),
            other => Err(format!("unknown gamemode: {}", other)),
        }
    }
}

/// Result of one timed probe attempt
#[derive(Debug, Clone)]
pub struct ProbeAttempt {
    /// Metadata on success, the failure otherwise
    pub outcome: Result<ServerMetadata, ProbeError>,

    /// Wall time spent on the attempt
    pub duration: Duration,
}

impl ProbeAttempt {
    /// Create a successful attempt
    pub fn success(metadata: ServerMetadata, duration: Duration) -> Self {
        Self {
            outcome: Ok(metadata),
            duration,
        }
    }

    /// Create a failed attempt
    pub fn failure(error: ProbeError, duration: Duration) -> Self {
        Self {
            outcome: Err(error),
            duration,
        }
    }

    /// Check if the attempt succeeded
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}
