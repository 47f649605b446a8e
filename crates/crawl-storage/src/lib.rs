use chrono::Utc;
use crawl_core::{Credential, Identity};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;

pub const CLIENT_STATE_SCHEMA_VERSION: i64 = 1;

/// Storage keys. Kept stable so an existing state file survives upgrades.
pub const CREDENTIAL_KEY: &str = "token";
pub const IDENTITY_KEY: &str = "user";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

/// Durable key/value store for client-side state.
pub struct ClientStateStore {
    conn: Connection,
}

impl ClientStateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let current = self.schema_version()?;
        if current > CLIENT_STATE_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: CLIENT_STATE_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_client_state.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
        }

        Ok(())
    }

    pub fn load_credential(&self) -> Result<Option<Credential>, StorageError> {
        Ok(self
            .get(CREDENTIAL_KEY)?
            .map(Credential::new)
            .filter(|credential| !credential.is_blank()))
    }

    pub fn load_identity(&self) -> Result<Option<Identity>, StorageError> {
        let Some(raw) = self.get(IDENTITY_KEY)? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|err| StorageError::Serialization(err.to_string()))
    }

    pub fn save_session(
        &self,
        credential: &Credential,
        identity: &Identity,
    ) -> Result<(), StorageError> {
        let identity_json = serde_json::to_string(identity)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        let tx = self.conn.unchecked_transaction()?;
        upsert(&tx, CREDENTIAL_KEY, credential.as_str())?;
        upsert(&tx, IDENTITY_KEY, &identity_json)?;
        tx.commit()?;
        Ok(())
    }

    pub fn clear_session(&self) -> Result<(), StorageError> {
        self.conn.execute(
            "DELETE FROM client_state WHERE key IN (?1, ?2)",
            params![CREDENTIAL_KEY, IDENTITY_KEY],
        )?;
        Ok(())
    }

    pub fn has_session(&self) -> Result<bool, StorageError> {
        Ok(self.load_credential()?.is_some())
    }

    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM client_state WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }
}

fn upsert(conn: &Connection, key: &str, value: &str) -> Result<(), StorageError> {
    conn.execute(
        "
        INSERT INTO client_state (key, value, updated_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(key) DO UPDATE SET
            value=excluded.value,
            updated_at=excluded.updated_at
        ",
        params![key, value, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}
