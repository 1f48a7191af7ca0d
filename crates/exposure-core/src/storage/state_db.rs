//! SQLite persistence for the application state.
//!
//! The state is a single JSON document under the `app_state` key of a small
//! key-value table. Unknown or missing fields fall back to their defaults, so
//! documents written by older builds keep loading.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StorageError;
use crate::state::AppState;

use super::data_dir;

const STATE_KEY: &str = "app_state";

/// Key-value store backing [`AppState`].
pub struct StateDb {
    conn: Connection,
}

impl StateDb {
    /// Open the database at `~/.config/exposure/exposure.db`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, StorageError> {
        Self::open_at(data_dir()?.join("exposure.db"))
    }

    pub fn open_at(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let conn = Connection::open(&path).map_err(|source| StorageError::OpenFailed {
            path: path.clone(),
            source,
        })?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(|source| StorageError::OpenFailed {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), StorageError> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS kv (
                    key   TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );",
            )
            .map_err(query_failed)
    }

    // ── Key-value ─────────────────────────────────────────────────────

    pub fn kv_get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(query_failed)
    }

    pub fn kv_set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.conn
            .execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(query_failed)?;
        Ok(())
    }

    pub fn kv_delete(&self, key: &str) -> Result<bool, StorageError> {
        let removed = self
            .conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map_err(query_failed)?;
        Ok(removed > 0)
    }

    // ── Application state ─────────────────────────────────────────────

    /// Load the persisted state, or the fresh-install state if none exists.
    pub fn load_state(&self) -> Result<AppState, StorageError> {
        match self.kv_get(STATE_KEY)? {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| StorageError::QueryFailed(format!("corrupt state: {e}"))),
            None => Ok(AppState::default()),
        }
    }

    pub fn save_state(&self, state: &AppState) -> Result<(), StorageError> {
        let json = serde_json::to_string(state)
            .map_err(|e| StorageError::QueryFailed(format!("cannot encode state: {e}")))?;
        self.kv_set(STATE_KEY, &json)
    }

    /// Forget everything, as after an uninstall.
    pub fn reset_state(&self) -> Result<(), StorageError> {
        self.kv_delete(STATE_KEY).map(|_| ())
    }
}

fn query_failed(err: rusqlite::Error) -> StorageError {
    match err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::DatabaseBusy => {
            StorageError::Locked
        }
        other => StorageError::QueryFailed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateUpdate;
    use crate::status::CovidStatus;

    #[test]
    fn kv_roundtrip() {
        let db = StateDb::open_memory().unwrap();
        assert_eq!(db.kv_get("missing").unwrap(), None);
        db.kv_set("a", "1").unwrap();
        db.kv_set("a", "2").unwrap();
        assert_eq!(db.kv_get("a").unwrap().as_deref(), Some("2"));
        assert!(db.kv_delete("a").unwrap());
        assert!(!db.kv_delete("a").unwrap());
    }

    #[test]
    fn empty_database_loads_fresh_install_state() {
        let db = StateDb::open_memory().unwrap();
        assert_eq!(db.load_state().unwrap(), AppState::default());
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        let state = AppState::default().with_updates(&[
            StateUpdate::SetCovidStatus(CovidStatus::Positive {
                last_upload_day: crate::calendar::CalendarDay::from_ymd(2021, 3, 2).unwrap(),
            }),
            StateUpdate::SetDummyTrafficSequenceCancelled(false),
        ]);

        StateDb::open_at(&path).unwrap().save_state(&state).unwrap();
        let reopened = StateDb::open_at(&path).unwrap();
        assert_eq!(reopened.load_state().unwrap(), state);

        reopened.reset_state().unwrap();
        assert_eq!(reopened.load_state().unwrap(), AppState::default());
    }

    #[test]
    fn corrupt_document_is_an_error() {
        let db = StateDb::open_memory().unwrap();
        db.kv_set(STATE_KEY, "{not json").unwrap();
        assert!(matches!(
            db.load_state(),
            Err(StorageError::QueryFailed(_))
        ));
    }
}
