//! SQLite-backed session history storage.
//!
//! [`Database`] owns the connection and implements [`SessionStorage`], the
//! scan primitive queries run against. Writes from the connection manager go
//! through the [`Sessions`] accessor.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreError;
use crate::types::{Direction, Identity, SessionHistory};

/// A store that can be scanned record by record.
///
/// Implementations visit every record exactly once, in a stable order of
/// their choosing. The visitor may stop the scan early by returning
/// [`ControlFlow::Break`].
pub trait SessionStorage {
    fn scan(
        &self,
        visit: &mut dyn FnMut(SessionHistory) -> ControlFlow<()>,
    ) -> Result<(), StoreError>;
}

/// The main database struct that owns the SQLite connection.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at a specific path.
    pub fn open_at(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Database file location inside a node data directory.
    pub fn path_in(data_dir: &Path) -> PathBuf {
        data_dir.join("mystnode.db")
    }

    /// Access the session history store.
    pub fn sessions(&self) -> Sessions<'_> {
        Sessions::new(self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("Database lock poisoned")
    }

    fn init_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS session_history (
                session_id TEXT PRIMARY KEY,
                consumer_id TEXT NOT NULL,
                provider_id TEXT NOT NULL,
                direction TEXT NOT NULL,
                data_sent INTEGER NOT NULL DEFAULT 0,
                data_received INTEGER NOT NULL DEFAULT 0,
                tokens INTEGER NOT NULL DEFAULT 0,
                started_at TEXT NOT NULL,
                ended_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_session_history_direction ON session_history(direction);
            CREATE INDEX IF NOT EXISTS idx_session_history_started_at ON session_history(started_at);
            "#,
        )
    }
}

impl SessionStorage for Database {
    fn scan(
        &self,
        visit: &mut dyn FnMut(SessionHistory) -> ControlFlow<()>,
    ) -> Result<(), StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT session_id, consumer_id, provider_id, direction,
                   data_sent, data_received, tokens, started_at, ended_at
            FROM session_history
            ORDER BY rowid
            "#,
        )?;

        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            if visit(row_to_history(row)?).is_break() {
                break;
            }
        }

        Ok(())
    }
}

/// Session history store with a borrowed connection.
pub struct Sessions<'db> {
    conn: MutexGuard<'db, Connection>,
}

impl<'db> Sessions<'db> {
    pub(crate) fn new(conn: MutexGuard<'db, Connection>) -> Self {
        Self { conn }
    }

    /// Record a newly started session.
    pub fn start(&self, session: &SessionHistory) -> Result<(), StoreError> {
        if self.insert(session, false)? == 0 {
            return Err(StoreError::Duplicate(session.session_id.clone()));
        }
        Ok(())
    }

    /// Store a complete record, ignoring ids that are already present.
    ///
    /// Returns `true` when the record was inserted.
    pub fn save(&self, session: &SessionHistory) -> Result<bool, StoreError> {
        Ok(self.insert(session, true)? > 0)
    }

    /// Raise the counters of an open session.
    ///
    /// Counters never move backwards and finished sessions are left untouched.
    /// Returns `true` when an open session was updated.
    pub fn update_counters(
        &self,
        session_id: &str,
        data_sent: u64,
        data_received: u64,
        tokens: u64,
    ) -> Result<bool, StoreError> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE session_history SET
                data_sent = MAX(data_sent, ?1),
                data_received = MAX(data_received, ?2),
                tokens = MAX(tokens, ?3)
            WHERE session_id = ?4 AND ended_at IS NULL
            "#,
            params![
                to_sql_counter(session_id, data_sent)?,
                to_sql_counter(session_id, data_received)?,
                to_sql_counter(session_id, tokens)?,
                session_id,
            ],
        )?;
        Ok(rows_affected > 0)
    }

    /// Finalize a session. Only the first call sets the end timestamp.
    pub fn finish(&self, session_id: &str, ended: DateTime<Utc>) -> Result<bool, StoreError> {
        let rows_affected = self.conn.execute(
            "UPDATE session_history SET ended_at = ?1 WHERE session_id = ?2 AND ended_at IS NULL",
            params![ended.to_rfc3339(), session_id],
        )?;
        Ok(rows_affected > 0)
    }

    /// Get a session by ID.
    pub fn get(&self, session_id: &str) -> Result<Option<SessionHistory>, StoreError> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT session_id, consumer_id, provider_id, direction,
                       data_sent, data_received, tokens, started_at, ended_at
                FROM session_history WHERE session_id = ?1
                "#,
                params![session_id],
                RawRow::read,
            )
            .optional()?;

        row.map(RawRow::into_history).transpose()
    }

    /// Number of stored sessions.
    pub fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM session_history", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn insert(&self, session: &SessionHistory, or_ignore: bool) -> Result<usize, StoreError> {
        let id = session.session_id.as_str();
        let sql = format!(
            r#"
            INSERT {} INTO session_history (
                session_id, consumer_id, provider_id, direction,
                data_sent, data_received, tokens, started_at, ended_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            if or_ignore { "OR IGNORE" } else { "OR FAIL" }
        );

        let result = self.conn.execute(
            &sql,
            params![
                id,
                session.consumer_id.as_str(),
                session.provider_id.as_str(),
                session.direction.as_str(),
                to_sql_counter(id, session.data_sent)?,
                to_sql_counter(id, session.data_received)?,
                to_sql_counter(id, session.tokens)?,
                session.started.to_rfc3339(),
                session.ended.map(|t| t.to_rfc3339()),
            ],
        );

        match result {
            Ok(rows) => Ok(rows),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Column values as stored, before validation.
struct RawRow {
    session_id: String,
    consumer_id: String,
    provider_id: String,
    direction: String,
    data_sent: i64,
    data_received: i64,
    tokens: i64,
    started_at: String,
    ended_at: Option<String>,
}

impl RawRow {
    fn read(row: &rusqlite::Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            session_id: row.get(0)?,
            consumer_id: row.get(1)?,
            provider_id: row.get(2)?,
            direction: row.get(3)?,
            data_sent: row.get(4)?,
            data_received: row.get(5)?,
            tokens: row.get(6)?,
            started_at: row.get(7)?,
            ended_at: row.get(8)?,
        })
    }

    fn into_history(self) -> Result<SessionHistory, StoreError> {
        let id = self.session_id;
        let corrupt = |reason: String| StoreError::Corrupt {
            id: id.clone(),
            reason,
        };

        let direction: Direction = self.direction.parse().map_err(&corrupt)?;
        let counter = |name: &str, value: i64| {
            u64::try_from(value).map_err(|_| corrupt(format!("negative {}: {}", name, value)))
        };
        let timestamp = |value: &str| {
            DateTime::parse_from_rfc3339(value)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| corrupt(format!("bad timestamp {:?}: {}", value, e)))
        };

        Ok(SessionHistory {
            consumer_id: Identity::new(self.consumer_id),
            provider_id: Identity::new(self.provider_id),
            direction,
            data_sent: counter("data_sent", self.data_sent)?,
            data_received: counter("data_received", self.data_received)?,
            tokens: counter("tokens", self.tokens)?,
            started: timestamp(&self.started_at)?,
            ended: self.ended_at.as_deref().map(timestamp).transpose()?,
            session_id: id.clone(),
        })
    }
}

fn row_to_history(row: &rusqlite::Row) -> Result<SessionHistory, StoreError> {
    RawRow::read(row)?.into_history()
}

fn to_sql_counter(session_id: &str, value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Corrupt {
        id: session_id.to_string(),
        reason: format!("counter {} does not fit in storage", value),
    })
}
