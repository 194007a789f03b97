//! Steam Web API `IGameServersService/GetServerList` response shapes.

use crate::types::{RawTags, ServerMetadata};
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

/// Default Steam Web API base URL
pub const DEFAULT_API_BASE: &str = "https://api.steampowered.com";

/// Top-level envelope
#[derive(Debug, Clone, Deserialize)]
pub struct ServerListEnvelope {
    pub response: ServerListResponse,
}

/// Server list payload
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerListResponse {
    #[serde(default)]
    pub servers: Vec<ServerListEntry>,
}

/// One server as listed by the master directory
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerListEntry {
    /// Query address (`ip:query_port`)
    pub addr: String,
    #[serde(default)]
    pub gameport: Option<u16>,
    #[serde(default)]
    pub steamid: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub appid: u32,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub players: u32,
    #[serde(default)]
    pub max_players: u32,
    #[serde(default)]
    pub bots: u32,
    #[serde(default)]
    pub map: String,
    #[serde(default)]
    pub secure: bool,
    /// Comma-delimited server tags
    #[serde(default)]
    pub gametype: Option<String>,
}

impl ServerListEntry {
    /// Connect address (`ip:game_port`), falling back to the query address.
    pub fn connect_addr(&self) -> Option<SocketAddr> {
        let query: SocketAddr = self.addr.parse().ok()?;
        Some(match self.gameport {
            Some(port) if port != 0 => SocketAddr::new(query.ip(), port),
            _ => query,
        })
    }

    /// Query port parsed from `addr`.
    pub fn query_port(&self) -> Option<u16> {
        self.addr.parse::<SocketAddr>().ok().map(|a| a.port())
    }

    /// Convert into probe metadata, using `ping` as the measured round trip.
    ///
    /// Password protection is not reported by the server list, so `password`
    /// is always false.
    pub fn into_metadata(self, ping: Duration) -> ServerMetadata {
        let connect_address = self.connect_addr().map(|a| a.to_string());
        let query_port = self.query_port();
        ServerMetadata {
            name: self.name,
            map: self.map,
            players: Vec::new(),
            bots: Vec::new(),
            reported_players: Some(self.players.saturating_sub(self.bots)),
            reported_bots: Some(self.bots),
            max_players: self.max_players,
            ping,
            // The server list carries no password flag; unknown reads as open
            password: false,
            secure: self.secure,
            version: self.version,
            steam_id: self.steamid,
            connect_address,
            query_port,
            raw_tags: RawTags::Delimited(self.gametype.unwrap_or_default()),
            raw_rules: Default::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "response": {
            "servers": [
                {
                    "addr": "203.0.113.7:27016",
                    "gameport": 27015,
                    "steamid": "90000000000000001",
                    "name": "Surf Heaven #1",
                    "appid": 730,
                    "gamedir": "csgo",
                    "version": "1.40.2.1",
                    "product": "csgo",
                    "region": 255,
                    "players": 14,
                    "max_players": 32,
                    "bots": 2,
                    "map": "surf_kitsune",
                    "secure": true,
                    "dedicated": true,
                    "os": "l",
                    "gametype": "surf,timer,secure"
                }
            ]
        }
    }"#;

    #[test]
    fn test_parses_server_list() {
        let envelope: ServerListEnvelope = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(envelope.response.servers.len(), 1);

        let entry = &envelope.response.servers[0];
        assert_eq!(entry.connect_addr(), Some("203.0.113.7:27015".parse().unwrap()));
        assert_eq!(entry.query_port(), Some(27016));
    }

    #[test]
    fn test_empty_response_has_no_servers() {
        let envelope: ServerListEnvelope = serde_json::from_str(r#"{"response":{}}"#).unwrap();
        assert!(envelope.response.servers.is_empty());
    }

    #[test]
    fn test_into_metadata_separates_bots() {
        let envelope: ServerListEnvelope = serde_json::from_str(SAMPLE).unwrap();
        let entry = envelope.response.servers.into_iter().next().unwrap();
        let meta = entry.into_metadata(Duration::from_millis(42));

        assert_eq!(meta.player_count(), 12);
        assert_eq!(meta.bot_count(), 2);
        assert_eq!(meta.query_port, Some(27016));
        assert_eq!(meta.connect_address.as_deref(), Some("203.0.113.7:27015"));
        assert!(meta.secure);
        assert_eq!(meta.raw_tags, RawTags::Delimited("surf,timer,secure".into()));
    }

    #[test]
    fn test_password_is_never_reported() {
        let envelope: ServerListEnvelope = serde_json::from_str(SAMPLE).unwrap();
        for entry in envelope.response.servers {
            assert!(!entry.into_metadata(Duration::ZERO).password);
        }
    }
}
