//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees
//! that migrations are run before any other operation.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/murmur/murmur.db`
    /// - macOS:   `~/Library/Application Support/com.murmur.murmur/murmur.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\murmur\murmur\data\murmur.db`
    pub fn new() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("com", "murmur", "murmur").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        let db_path = data_dir.join("murmur.db");

        tracing::info!(path = %db_path.display(), "opening database");

        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path.
    ///
    /// This is useful for tests and for embedding the store inside custom
    /// directory layouts.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Recommended SQLite settings.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        // Run schema migrations.
        migrations::run_migrations(&conn)?;

        Ok(Self { conn })
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    ///
    /// Callers should prefer the typed helpers, but direct access is
    /// occasionally needed for ad-hoc queries.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }

    /// Next `(created_at, seq)` pair for a message insert.
    ///
    /// Creation time is monotonic per store: if the wall clock reads earlier
    /// than the newest stored message (clock adjustment), the previous
    /// timestamp is reused so feed ordering never regresses.
    pub(crate) fn next_message_clock(&self) -> Result<(DateTime<Utc>, i64)> {
        let newest: Option<(String, i64)> = self
            .conn
            .query_row(
                "SELECT created_at, seq FROM messages ORDER BY seq DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        let now = Utc::now();
        match newest {
            None => Ok((now, 1)),
            Some((ts, seq)) => {
                let last: DateTime<Utc> =
                    DateTime::parse_from_rfc3339(&ts)?.with_timezone(&Utc);
                Ok((now.max(last), seq + 1))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = Database::open_at(&path).expect("should open");
        assert!(db.path().is_some());
    }

    #[test]
    fn message_clock_starts_at_one() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        let (_, seq) = db.next_message_clock().unwrap();
        assert_eq!(seq, 1);
    }
}
