//! SQLite-backed durable store.

use super::{OnlineFilter, Page, RecordPatch, RegistryStore, SortOrder, StoreError};
use crate::types::{ServerRecord, Status, StatusCounts};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS servers (
    address       TEXT PRIMARY KEY,
    ip            TEXT NOT NULL,
    port          INTEGER NOT NULL,
    query_port    INTEGER NOT NULL,
    steam_id      TEXT,
    name          TEXT NOT NULL,
    map           TEXT NOT NULL,
    gamemode      TEXT NOT NULL,
    password      INTEGER NOT NULL,
    vac           INTEGER NOT NULL,
    version       TEXT,
    players       INTEGER NOT NULL,
    max_players   INTEGER NOT NULL,
    bots          INTEGER NOT NULL,
    ping_ms       INTEGER NOT NULL,
    status        TEXT NOT NULL,
    seen_count    INTEGER NOT NULL,
    missed_count  INTEGER NOT NULL,
    first_seen    INTEGER NOT NULL,
    updated_at    INTEGER NOT NULL,
    offline_since INTEGER
);

CREATE INDEX IF NOT EXISTS idx_servers_status ON servers(status, offline_since);
CREATE INDEX IF NOT EXISTS idx_servers_gamemode ON servers(gamemode);
"#;

const COLUMNS: &str = "address, query_port, steam_id, name, map, gamemode, password, vac, \
     version, players, max_players, bots, ping_ms, status, seen_count, missed_count, \
     first_seen, updated_at, offline_since";

/// Durable store. Timestamps are stored as milliseconds since the epoch.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the database with WAL mode enabled
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Unavailable(format!(
                        "failed to create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::init(conn, &path.display().to_string())
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, ":memory:")
    }

    fn init(conn: Connection, label: &str) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        info!(database = label, "Registry database ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Unavailable("connection mutex poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("store task failed: {}", e)))?
    }
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

fn from_millis(idx: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| conversion_error(idx, format!("timestamp out of range: {}", millis)))
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ServerRecord> {
    let address: String = row.get(0)?;
    let gamemode: String = row.get(5)?;
    let status: String = row.get(13)?;
    let offline_since: Option<i64> = row.get(18)?;

    Ok(ServerRecord {
        address: address.parse().map_err(|e| conversion_error(0, e))?,
        query_port: row.get(1)?,
        steam_id: row.get(2)?,
        name: row.get(3)?,
        map: row.get(4)?,
        gamemode: gamemode.parse().map_err(|e: String| conversion_error(5, e))?,
        password: row.get(6)?,
        vac: row.get(7)?,
        version: row.get(8)?,
        players: row.get(9)?,
        max_players: row.get(10)?,
        bots: row.get(11)?,
        ping_ms: row.get(12)?,
        status: status.parse().map_err(|e: String| conversion_error(13, e))?,
        seen_count: row.get(14)?,
        missed_count: row.get(15)?,
        first_seen: from_millis(16, row.get(16)?)?,
        updated_at: from_millis(17, row.get(17)?)?,
        offline_since: offline_since.map(|m| from_millis(18, m)).transpose()?,
    })
}

fn get_record(conn: &Connection, address: &str) -> Result<Option<ServerRecord>, StoreError> {
    let record = conn
        .query_row(
            &format!("SELECT {} FROM servers WHERE address = ?1", COLUMNS),
            params![address],
            row_to_record,
        )
        .optional()?;
    Ok(record)
}

/// WHERE clause and bound values for an online query
fn online_clause(filter: &OnlineFilter) -> (String, Vec<Value>) {
    let mut clauses = vec!["status = 'online'".to_string()];
    let mut values = Vec::new();

    if let Some(mode) = filter.gamemode {
        values.push(Value::Text(mode.as_str().to_string()));
        clauses.push(format!("gamemode = ?{}", values.len()));
    }
    if let Some(prefix) = &filter.map_prefix {
        values.push(Value::Text(prefix.to_ascii_lowercase()));
        let n = values.len();
        clauses.push(format!("substr(lower(map), 1, length(?{n})) = ?{n}"));
    }
    if let Some(needle) = &filter.name_contains {
        values.push(Value::Text(needle.to_ascii_lowercase()));
        clauses.push(format!("instr(lower(name), ?{}) > 0", values.len()));
    }
    if filter.hide_empty {
        clauses.push("players > 0".to_string());
    }
    if filter.hide_full {
        clauses.push("NOT (max_players > 0 AND players >= max_players)".to_string());
    }
    if filter.hide_password {
        clauses.push("password = 0".to_string());
    }
    if filter.vac_only {
        clauses.push("vac = 1".to_string());
    }

    (clauses.join(" AND "), values)
}

fn order_clause(sort: SortOrder) -> &'static str {
    match sort {
        SortOrder::PlayersDesc => "players DESC, address ASC",
        SortOrder::PlayersAsc => "players ASC, address ASC",
        SortOrder::NameAsc => "name COLLATE NOCASE ASC, address ASC",
        SortOrder::PingAsc => "ping_ms ASC, address ASC",
    }
}

#[async_trait]
impl RegistryStore for SqliteStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }

    async fn get(&self, address: SocketAddr) -> Result<Option<ServerRecord>, StoreError> {
        self.with_conn(move |conn| get_record(conn, &address.to_string()))
            .await
    }

    async fn upsert(&self, record: &ServerRecord) -> Result<(), StoreError> {
        let r = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO servers (
                    address, ip, port, query_port, steam_id, name, map, gamemode,
                    password, vac, version, players, max_players, bots, ping_ms,
                    status, seen_count, missed_count, first_seen, updated_at, offline_since
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                          ?15, ?16, ?17, ?18, ?19, ?20, ?21)
                ON CONFLICT(address) DO UPDATE SET
                    ip = excluded.ip,
                    port = excluded.port,
                    query_port = excluded.query_port,
                    steam_id = excluded.steam_id,
                    name = excluded.name,
                    map = excluded.map,
                    gamemode = excluded.gamemode,
                    password = excluded.password,
                    vac = excluded.vac,
                    version = excluded.version,
                    players = excluded.players,
                    max_players = excluded.max_players,
                    bots = excluded.bots,
                    ping_ms = excluded.ping_ms,
                    status = excluded.status,
                    seen_count = excluded.seen_count,
                    missed_count = excluded.missed_count,
                    updated_at = excluded.updated_at,
                    offline_since = excluded.offline_since
                "#,
                params![
                    r.address.to_string(),
                    r.ip().to_string(),
                    r.port(),
                    r.query_port,
                    r.steam_id,
                    r.name,
                    r.map,
                    r.gamemode.as_str(),
                    r.password,
                    r.vac,
                    r.version,
                    r.players,
                    r.max_players,
                    r.bots,
                    r.ping_ms,
                    r.status.as_str(),
                    r.seen_count,
                    r.missed_count,
                    to_millis(r.first_seen),
                    to_millis(r.updated_at),
                    r.offline_since.map(to_millis),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn increment_seen(&self, address: SocketAddr) -> Result<Option<u32>, StoreError> {
        self.with_conn(move |conn| {
            let seen = conn
                .query_row(
                    "UPDATE servers SET seen_count = seen_count + 1, missed_count = 0
                     WHERE address = ?1 RETURNING seen_count",
                    params![address.to_string()],
                    |row| row.get::<_, u32>(0),
                )
                .optional()?;
            Ok(seen)
        })
        .await
    }

    async fn update_fields(
        &self,
        address: SocketAddr,
        patch: &RecordPatch,
    ) -> Result<bool, StoreError> {
        let patch = patch.clone();
        self.with_conn(move |conn| {
            let key = address.to_string();
            if patch.is_empty() {
                return Ok(get_record(conn, &key)?.is_some());
            }

            let mut sets = Vec::new();
            let mut values: Vec<Value> = Vec::new();
            let mut push = |column: &str, value: Value| {
                values.push(value);
                sets.push(format!("{} = ?{}", column, values.len()));
            };

            if let Some(status) = patch.status {
                push("status", Value::Text(status.as_str().to_string()));
            }
            if let Some(seen) = patch.seen_count {
                push("seen_count", Value::Integer(seen as i64));
            }
            if let Some(missed) = patch.missed_count {
                push("missed_count", Value::Integer(missed as i64));
            }
            if let Some(offline_since) = patch.offline_since {
                push(
                    "offline_since",
                    offline_since
                        .map(|ts| Value::Integer(to_millis(ts)))
                        .unwrap_or(Value::Null),
                );
            }
            if let Some(updated_at) = patch.updated_at {
                push("updated_at", Value::Integer(to_millis(updated_at)));
            }

            values.push(Value::Text(key));
            let sql = format!(
                "UPDATE servers SET {} WHERE address = ?{}",
                sets.join(", "),
                values.len()
            );
            let changed = conn.execute(&sql, params_from_iter(values))?;
            Ok(changed > 0)
        })
        .await
    }

    async fn delete_where(
        &self,
        status: Status,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM servers
                 WHERE status = ?1 AND offline_since IS NOT NULL AND offline_since <= ?2",
                params![status.as_str(), to_millis(cutoff)],
            )?;
            Ok(deleted as u64)
        })
        .await
    }

    async fn query_online(
        &self,
        filter: &OnlineFilter,
        sort: SortOrder,
        page: Page,
    ) -> Result<(Vec<ServerRecord>, u64), StoreError> {
        let (where_clause, values) = online_clause(filter);
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;

            let total: i64 = tx.query_row(
                &format!("SELECT COUNT(*) FROM servers WHERE {}", where_clause),
                params_from_iter(values.iter()),
                |row| row.get(0),
            )?;

            let mut page_values = values.clone();
            page_values.push(Value::Integer(page.limit as i64));
            page_values.push(Value::Integer(page.offset as i64));
            let n = page_values.len();
            let sql = format!(
                "SELECT {} FROM servers WHERE {} ORDER BY {} LIMIT ?{} OFFSET ?{}",
                COLUMNS,
                where_clause,
                order_clause(sort),
                n - 1,
                n
            );

            let records = {
                let mut stmt = tx.prepare(&sql)?;
                let rows = stmt.query_map(params_from_iter(page_values.iter()), row_to_record)?;
                rows.collect::<Result<Vec<_>, _>>()?
            };
            tx.commit()?;

            Ok((records, total as u64))
        })
        .await
    }

    async fn count_by_status(&self) -> Result<StatusCounts, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM servers GROUP BY status")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;

            let mut counts = StatusCounts::default();
            for row in rows {
                let (status, count) = row?;
                match status.parse::<Status>() {
                    Ok(Status::Online) => counts.online = count as u64,
                    Ok(Status::Offline) => counts.offline = count as u64,
                    Err(reason) => {
                        return Err(StoreError::Corrupt {
                            address: "*".to_string(),
                            reason,
                        });
                    }
                }
            }
            Ok(counts)
        })
        .await
    }
}
