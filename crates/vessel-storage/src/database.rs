//! Database connection and settings operations

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;

use crate::migrations::run_migrations;
use crate::Result;

const UPSERT_SETTING: &str =
    "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)";
const DELETE_SETTING: &str = "DELETE FROM settings WHERE key = ?1";

/// Shared handle to the settings database.
///
/// Cloning is cheap; every clone talks to the same connection.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;

        let _: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        // WAL only needs NORMAL to stay durable across process crashes
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        self.with_connection(|conn| {
            let value = conn
                .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(value)
        })
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let updated_at = Utc::now().to_rfc3339();
        self.with_connection(|conn| {
            conn.execute(UPSERT_SETTING, rusqlite::params![key, value, updated_at])?;
            Ok(())
        })?;

        tracing::debug!(key = %key, "Setting stored");
        Ok(())
    }

    /// Removes a setting. Removing a missing key is not an error.
    pub fn delete_setting(&self, key: &str) -> Result<bool> {
        self.with_connection(|conn| {
            let removed = conn.execute(DELETE_SETTING, [key])?;
            Ok(removed > 0)
        })
    }

    /// Writes several settings in one transaction; `None` removes the key.
    pub fn update_settings(&self, changes: &[(&str, Option<&str>)]) -> Result<()> {
        let updated_at = Utc::now().to_rfc3339();
        self.transaction(|conn| {
            for (key, value) in changes {
                match value {
                    Some(value) => conn.execute(UPSERT_SETTING, rusqlite::params![key, value, updated_at])?,
                    None => conn.execute(DELETE_SETTING, [key])?,
                };
            }
            Ok(())
        })?;

        tracing::debug!(count = changes.len(), "Settings updated");
        Ok(())
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
        }
    }
}
