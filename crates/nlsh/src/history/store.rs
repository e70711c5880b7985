//! SQLite-backed event log.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;
use tokio::task::spawn_blocking;

use super::event::{
    EventId, EventKind, HistoryEvent, HistoryStats, INTERACTION, InteractionEvent, KindCounts,
    SHELL, ShellEvent, TOOL_CALL, ToolCallEvent,
};
use crate::executor::CommandResult;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, strftime('%s', 'now'));

-- AUTOINCREMENT keeps ids monotonic even after the newest rows are pruned.
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL CHECK (kind IN ('shell', 'interaction', 'tool_call')),
    timestamp TEXT NOT NULL,
    success INTEGER,
    parent_id INTEGER,
    payload TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_kind ON events(kind);
CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
"#;

/// Errors from the history store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The database file could not be opened or initialised.
    #[error("failed to open history database {path}: {source}")]
    Open {
        /// Database location.
        path: PathBuf,
        /// Underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },
    /// The directory holding the database could not be created.
    #[error("failed to create history directory {path}: {source}")]
    CreateDir {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
    /// A statement failed.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// An event payload could not be encoded or decoded.
    #[error("event payload error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// A tool call named a parent that is not an earlier interaction.
    #[error("parent {0} is not a recorded interaction")]
    InvalidParent(EventId),
    /// A stored row does not describe a valid event.
    #[error("corrupt event #{id}: {reason}")]
    Corrupt {
        /// Row id.
        id: i64,
        /// What was wrong with it.
        reason: String,
    },
    /// The blocking worker failed.
    #[error("history task failed: {0}")]
    Task(String),
}

/// Result type for history operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Durable, append-only log of session activity.
///
/// Cheap to clone; clones share one connection. Every append runs in its own
/// transaction, so an event is either fully stored or not at all.
#[derive(Clone)]
pub struct HistoryStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for HistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl HistoryStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(&path).map_err(|source| StorageError::Open {
            path: path.clone(),
            source,
        })?;
        Self::init(conn, Some(path))
    }

    /// An in-memory store, mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| StorageError::Open {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        let shown = path.clone().unwrap_or_else(|| PathBuf::from(":memory:"));
        conn.busy_timeout(BUSY_TIMEOUT)
            .and_then(|_| conn.execute_batch(SCHEMA))
            .map_err(|source| StorageError::Open {
                path: shown,
                source,
            })?;
        tracing::debug!(path = ?path, "history store ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Database location, None for an in-memory store.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record a manual shell command.
    pub async fn log_shell(
        &self,
        command: impl Into<String>,
        result: CommandResult,
    ) -> Result<EventId> {
        let event = EventKind::Shell(ShellEvent {
            command: command.into(),
            result,
        });
        self.append(event).await
    }

    /// Record a model interaction.
    pub async fn log_interaction(&self, interaction: InteractionEvent) -> Result<EventId> {
        self.append(EventKind::Interaction(interaction)).await
    }

    /// Record a tool call, optionally linked to an earlier interaction.
    pub async fn log_tool_call(
        &self,
        tool_name: impl Into<String>,
        arguments: serde_json::Map<String, serde_json::Value>,
        result_text: impl Into<String>,
        parent_interaction_id: Option<EventId>,
    ) -> Result<EventId> {
        let event = EventKind::ToolCall(ToolCallEvent {
            tool_name: tool_name.into(),
            arguments,
            result_text: result_text.into(),
            parent_interaction_id,
        });
        self.append(event).await
    }

    /// The newest `limit` events, oldest first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<HistoryEvent>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, kind, timestamp, payload FROM events ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], |row| {
                Ok(RawEvent {
                    id: row.get(0)?,
                    kind: row.get(1)?,
                    timestamp: row.get(2)?,
                    payload: row.get(3)?,
                })
            })?;

            let mut events = rows
                .map(|row| row.map_err(StorageError::from).and_then(RawEvent::decode))
                .collect::<Result<Vec<_>>>()?;
            events.reverse();
            Ok(events)
        })
        .await
    }

    /// Totals over the whole log.
    pub async fn stats(&self) -> Result<HistoryStats> {
        self.query(|conn| {
            let counts: [i64; 6] = conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(kind = 'shell'), 0),
                        COALESCE(SUM(kind = 'interaction'), 0),
                        COALESCE(SUM(kind = 'tool_call'), 0),
                        COALESCE(SUM(kind = 'shell' AND success = 1), 0),
                        COALESCE(SUM(kind = 'shell' AND success = 0), 0)
                 FROM events",
                [],
                |row| {
                    Ok([
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ])
                },
            )?;
            let [total, shell, interaction, tool_call, ok, failed] = counts.map(to_count);
            Ok(HistoryStats {
                total_entries: total,
                per_kind: KindCounts {
                    shell,
                    interaction,
                    tool_call,
                },
                shell_successes: ok,
                shell_failures: failed,
            })
        })
        .await
    }

    /// Delete all but the newest `keep` events. Returns how many were removed.
    pub async fn retain_latest(&self, keep: usize) -> Result<usize> {
        let keep = i64::try_from(keep).unwrap_or(i64::MAX);
        let removed = self
            .transaction(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM events WHERE id NOT IN
                         (SELECT id FROM events ORDER BY id DESC LIMIT ?1)",
                    params![keep],
                )?)
            })
            .await?;
        tracing::debug!(removed, "pruned history by count");
        Ok(removed)
    }

    /// Delete events appended before `cutoff`. Returns how many were removed.
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let cutoff = format_timestamp(&cutoff);
        let removed = self
            .transaction(move |conn| {
                Ok(conn.execute("DELETE FROM events WHERE timestamp < ?1", params![cutoff])?)
            })
            .await?;
        tracing::debug!(removed, "pruned history by age");
        Ok(removed)
    }

    async fn append(&self, event: EventKind) -> Result<EventId> {
        let kind = event.label();
        let timestamp = format_timestamp(&Utc::now());
        let (success, parent, payload) = match &event {
            EventKind::Shell(e) => (Some(e.result.success()), None, serde_json::to_string(e)?),
            EventKind::Interaction(e) => (None, None, serde_json::to_string(e)?),
            EventKind::ToolCall(e) => (None, e.parent_interaction_id, serde_json::to_string(e)?),
        };

        let id = self
            .transaction(move |conn| {
                if let Some(parent) = parent {
                    let parent_kind: Option<String> = conn
                        .query_row(
                            "SELECT kind FROM events WHERE id = ?1",
                            params![parent.0],
                            |row| row.get(0),
                        )
                        .optional()?;
                    if parent_kind.as_deref() != Some(INTERACTION) {
                        return Err(StorageError::InvalidParent(parent));
                    }
                }
                conn.execute(
                    "INSERT INTO events (kind, timestamp, success, parent_id, payload)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![kind, timestamp, success, parent.map(|p| p.0), payload],
                )?;
                Ok(EventId(conn.last_insert_rowid()))
            })
            .await?;

        tracing::debug!(%id, kind, "history event stored");
        Ok(id)
    }

    async fn query<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        spawn_blocking(move || {
            let guard = lock(&conn);
            f(&guard)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
    }

    async fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        spawn_blocking(move || {
            let mut guard = lock(&conn);
            let tx = guard.transaction()?;
            let value = f(&*tx)?;
            tx.commit()?;
            Ok(value)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

/// Take the connection lock, rolling back any transaction a panicking
/// holder left open.
fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("history connection lock poisoned, recovering");
        let inner = poisoned.into_inner();
        if !inner.is_autocommit()
            && let Err(e) = inner.execute_batch("ROLLBACK")
        {
            tracing::error!(error = %e, "rollback after poisoned lock failed");
        }
        inner
    })
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn to_count(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

struct RawEvent {
    id: i64,
    kind: String,
    timestamp: String,
    payload: String,
}

impl RawEvent {
    fn decode(self) -> Result<HistoryEvent> {
        let corrupt = |reason: String| StorageError::Corrupt {
            id: self.id,
            reason,
        };
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| corrupt(format!("bad timestamp: {e}")))?
            .with_timezone(&Utc);
        let kind = match self.kind.as_str() {
            SHELL => serde_json::from_str(&self.payload).map(EventKind::Shell),
            INTERACTION => serde_json::from_str(&self.payload).map(EventKind::Interaction),
            TOOL_CALL => serde_json::from_str(&self.payload).map(EventKind::ToolCall),
            other => return Err(corrupt(format!("unknown kind {other:?}"))),
        }
        .map_err(|e| corrupt(format!("bad payload: {e}")))?;

        Ok(HistoryEvent {
            id: EventId(self.id),
            timestamp,
            kind,
        })
    }
}
