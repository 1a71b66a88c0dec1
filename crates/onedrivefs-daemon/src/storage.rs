//! Persistent provider state
//!
//! The access token must survive process restarts so that a request
//! arriving in a fresh process can resume the session without asking the
//! user to sign in again. [`StateStore`] keeps it in SQLite next to a
//! small mount registry that stands in for the host's own bookkeeping
//! when the provider runs standalone.

use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::{debug, error, info};

use onedrivefs_core::MountOptions;

use crate::host::{HostError, HostRegistry};

/// Durable key-value storage used for the credential
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove a key; absent keys are not an error
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// SQLite-backed credential store and mount registry
pub struct StateStore {
    conn: Mutex<Connection>,
}

impl StateStore {
    /// Open or create a state database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS mounts (
                file_system_id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                writable INTEGER NOT NULL,
                mounted_at INTEGER NOT NULL
            );
            "#,
        )?;

        info!("State schema initialized");
        Ok(())
    }

    pub fn get_value(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;

        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;

        Ok(value)
    }

    pub fn set_value(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;

        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, current_timestamp()],
        )?;

        debug!("Stored value for key {}", key);
        Ok(())
    }

    pub fn remove_value(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        debug!("Removed key {}", key);
        Ok(())
    }

    pub fn mounted_ids(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;

        let mut stmt = conn.prepare("SELECT file_system_id FROM mounts ORDER BY mounted_at")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(ids)
    }

    pub fn register_mount(&self, options: &MountOptions) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;

        conn.execute(
            "INSERT INTO mounts (file_system_id, display_name, writable, mounted_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                options.file_system_id,
                options.display_name,
                options.writable as i32,
                current_timestamp(),
            ],
        )?;

        debug!("Mount registered: {}", options.file_system_id);
        Ok(())
    }

    pub fn unregister_mount(&self, file_system_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        conn.execute(
            "DELETE FROM mounts WHERE file_system_id = ?1",
            params![file_system_id],
        )?;
        debug!("Mount unregistered: {}", file_system_id);
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for StateStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.get_value(key)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.set_value(key, value)
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.remove_value(key)
    }
}

#[async_trait]
impl HostRegistry for StateStore {
    async fn mounted_file_systems(&self) -> Result<Vec<String>, HostError> {
        self.mounted_ids()
            .map_err(|e| HostError::Unavailable(e.to_string()))
    }

    async fn mount(&self, options: &MountOptions) -> Result<(), HostError> {
        self.register_mount(options)
            .map_err(|e| HostError::Rejected(e.to_string()))
    }

    async fn unmount(&self, file_system_id: &str) -> Result<(), HostError> {
        self.unregister_mount(file_system_id)
            .map_err(|e| HostError::Unavailable(e.to_string()))
    }
}

fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Lock poisoned: a thread panicked while holding the lock")]
    LockPoisoned,
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        error!("Database error: {:?}", e);
        StoreError::Database(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(id: &str) -> MountOptions {
        MountOptions {
            file_system_id: id.into(),
            display_name: "OneDrive".into(),
            writable: true,
        }
    }

    #[test]
    fn test_kv_operations() {
        let store = StateStore::in_memory().unwrap();

        assert_eq!(store.get_value("accessToken").unwrap(), None);

        store.set_value("accessToken", "t1").unwrap();
        assert_eq!(store.get_value("accessToken").unwrap().as_deref(), Some("t1"));

        // Overwrite
        store.set_value("accessToken", "t2").unwrap();
        assert_eq!(store.get_value("accessToken").unwrap().as_deref(), Some("t2"));

        store.remove_value("accessToken").unwrap();
        assert_eq!(store.get_value("accessToken").unwrap(), None);

        // Removing again is fine
        store.remove_value("accessToken").unwrap();
    }

    #[test]
    fn test_mount_registry() {
        let store = StateStore::in_memory().unwrap();
        assert!(store.mounted_ids().unwrap().is_empty());

        store.register_mount(&options("onedrivefs")).unwrap();
        assert_eq!(store.mounted_ids().unwrap(), vec!["onedrivefs".to_string()]);

        // Duplicate registration is rejected
        assert!(store.register_mount(&options("onedrivefs")).is_err());

        store.unregister_mount("onedrivefs").unwrap();
        assert!(store.mounted_ids().unwrap().is_empty());
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("state.db");

        {
            let store = StateStore::open(&path).unwrap();
            store.set_value("accessToken", "persisted").unwrap();
            store.register_mount(&options("onedrivefs")).unwrap();
        }

        let store = StateStore::open(&path).unwrap();
        assert_eq!(
            store.get_value("accessToken").unwrap().as_deref(),
            Some("persisted")
        );
        assert_eq!(store.mounted_ids().unwrap(), vec!["onedrivefs".to_string()]);
    }

    #[tokio::test]
    async fn test_trait_objects() {
        let store = std::sync::Arc::new(StateStore::in_memory().unwrap());
        let creds: std::sync::Arc<dyn CredentialStore> = store.clone();
        let host: std::sync::Arc<dyn HostRegistry> = store;

        creds.set("accessToken", "abc").await.unwrap();
        assert_eq!(creds.get("accessToken").await.unwrap().as_deref(), Some("abc"));

        host.mount(&options("onedrivefs")).await.unwrap();
        assert_eq!(host.mounted_file_systems().await.unwrap().len(), 1);
        host.unmount("onedrivefs").await.unwrap();
        host.unmount("onedrivefs").await.unwrap();
    }
}
