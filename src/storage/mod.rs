//! SQLite persistence.
//!
//! A single [`Database`] wraps one `rusqlite` connection behind a mutex;
//! async callers go through [`Database::run`], which moves the work onto the
//! blocking pool. Repositories for personas, boards, and sessions live in
//! sibling modules, as does the append-only interaction log.

mod boards;
mod interaction_log;
mod migrations;
mod personas;
mod sessions;

pub use boards::BoardStore;
pub use interaction_log::{InteractionLogEntry, InteractionLogger, LogOutcome};
pub use personas::{PersonaStore, PersonaSummary};
pub use sessions::SessionStore;

use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};

/// Shared handle to the SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database and apply connection pragmas.
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        let conn = Connection::open(&config.path)?;
        Self::apply_pragmas(&conn, config)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// An in-memory database for tests and throwaway runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn apply_pragmas(conn: &Connection, config: &DatabaseConfig) -> Result<()> {
        conn.pragma_update(None, "busy_timeout", config.busy_timeout_ms as i64)?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        if config.enable_foreign_keys {
            conn.pragma_update(None, "foreign_keys", "ON")?;
        }
        if config.enable_wal {
            // journal_mode returns the resulting mode as a row.
            let _: String =
                conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
        }
        Ok(())
    }

    /// Run a closure against the connection synchronously.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run a closure against the connection on the blocking pool.
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&conn)
        })
        .await
        .map_err(|e| Error::Persistence(format!("blocking task failed: {e}")))?
    }

    /// Run a closure inside a transaction.
    pub fn with_transaction<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Apply all pending migrations.
    pub fn migrate(&self) -> Result<()> {
        self.with_conn(migrations::run_all)
    }

    // -----------------------------------------------------------------
    // System config & maintenance
    // -----------------------------------------------------------------

    pub fn get_system_config(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT value FROM system_config WHERE key = ?1")?;
            let mut rows = stmt.query([key])?;
            match rows.next()? {
                Some(row) => Ok(Some(row.get(0)?)),
                None => Ok(None),
            }
        })
    }

    pub fn set_system_config(&self, key: &str, value: &str, description: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO system_config (key, value, description, updated_at)
                 VALUES (?1, ?2, ?3, datetime('now'))",
                rusqlite::params![key, value, description],
            )?;
            Ok(())
        })
    }

    /// Delete interaction logs older than the retention window. Returns
    /// the number of rows removed.
    pub fn cleanup_old_logs(&self, retention_days: u32) -> Result<usize> {
        let removed = self.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM interaction_logs
                 WHERE created_at < datetime('now', '-' || ?1 || ' days')",
                [retention_days],
            )?)
        })?;
        if removed > 0 {
            log::info!("cleaned up old interaction logs removed={removed}");
        }
        Ok(removed)
    }

    pub fn vacuum(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("VACUUM", [])?;
            Ok(())
        })
    }

    /// Row counts for the main tables.
    pub fn stats(&self) -> Result<Vec<(String, i64)>> {
        const TABLES: [&str; 6] = [
            "personas",
            "boards",
            "projects",
            "analysis_sessions",
            "analysis_responses",
            "interaction_logs",
        ];
        self.with_conn(|conn| {
            let mut stats = Vec::new();
            for table in TABLES {
                let count: i64 =
                    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                        row.get(0)
                    })?;
                stats.push((table.to_string(), count));
            }
            Ok(stats)
        })
    }
}

/// Convert a storage-layer failure into the engine's persistence error.
pub(crate) fn persistence_err(e: rusqlite::Error) -> Error {
    Error::Persistence(e.to_string())
}

#[cfg(test)]
pub(crate) fn test_db() -> Database {
    let db = Database::open_in_memory().expect("open in-memory db");
    db.migrate().expect("migrate");
    db
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_and_migrate_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            path: dir
                .path()
                .join("engine.db")
                .to_string_lossy()
                .into_owned(),
            ..DatabaseConfig::default()
        };
        let db = Database::open(&config).unwrap();
        db.migrate().unwrap();
        // Idempotent.
        db.migrate().unwrap();

        let stats = db.stats().unwrap();
        assert!(stats.iter().any(|(t, _)| t == "personas"));
    }

    #[test]
    fn test_system_config_round_trip() {
        let db = test_db();
        assert_eq!(db.get_system_config("absent").unwrap(), None);
        db.set_system_config("default_mode", "discussion", "startup mode")
            .unwrap();
        assert_eq!(
            db.get_system_config("default_mode").unwrap().as_deref(),
            Some("discussion")
        );
        db.set_system_config("default_mode", "analysis", "").unwrap();
        assert_eq!(
            db.get_system_config("default_mode").unwrap().as_deref(),
            Some("analysis")
        );
    }

    #[test]
    fn test_cleanup_old_logs_respects_window() {
        let db = test_db();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO interaction_logs
                 (id, prompt, system_message, response, model_name, temperature,
                  max_tokens, tokens_used, duration_ms, context_data, outcome, created_at)
                 VALUES ('old', 'p', '', 'r', 'm', 0.5, 100, 10, 5, '{}', 'ok',
                         datetime('now', '-100 days'))",
                [],
            )?;
            conn.execute(
                "INSERT INTO interaction_logs
                 (id, prompt, system_message, response, model_name, temperature,
                  max_tokens, tokens_used, duration_ms, context_data, outcome, created_at)
                 VALUES ('new', 'p', '', 'r', 'm', 0.5, 100, 10, 5, '{}', 'ok',
                         datetime('now'))",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        assert_eq!(db.cleanup_old_logs(90).unwrap(), 1);
        let remaining: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM interaction_logs", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(remaining, 1);
    }
}
