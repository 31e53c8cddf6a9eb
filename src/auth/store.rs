// Credential storage
// Two durable string entries: the access token and the refresh token

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::{Mutex, RwLock};

const ACCESS_TOKEN_KEY: &str = "access_token";
const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Durable key-value storage for session credentials
///
/// Implementations are process-wide: the client reads both tokens on every request,
/// overwrites the access token on refresh, replaces both on login, and deletes both
/// on logout.
pub trait CredentialStore: Send + Sync {
    fn access_token(&self) -> Result<Option<String>>;
    fn refresh_token(&self) -> Result<Option<String>>;
    fn set_access_token(&self, token: &str) -> Result<()>;
    /// Replace both entries wholesale (login, or refresh with rotation)
    fn set_tokens(&self, access: &str, refresh: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// SQLite-backed credential store, durable across restarts
pub struct SqliteCredentialStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteCredentialStore {
    /// Open (or create) the store at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create credential directory: {}", parent.display())
            })?;
        }
        let conn = rusqlite::Connection::open(path)
            .with_context(|| format!("Failed to open credential database: {}", path.display()))?;
        Self::init(conn)
    }

    /// In-memory store with the same schema, for tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()
            .context("Failed to open in-memory credential database")?;
        Self::init(conn)
    }

    fn init(conn: rusqlite::Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS session_kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .context("Failed to create session_kv table")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Credential store lock poisoned"))?;
        let value = conn
            .query_row(
                "SELECT value FROM session_kv WHERE key = ?",
                [key],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })
            .with_context(|| format!("Failed to read '{}' from credential store", key))?;
        Ok(value)
    }

    fn put(&self, entries: &[(&str, &str)]) -> Result<()> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Credential store lock poisoned"))?;
        let tx = conn
            .transaction()
            .context("Failed to begin credential store transaction")?;
        for &(key, value) in entries {
            tx.execute(
                "INSERT INTO session_kv (key, value) VALUES (?, ?) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                [key, value],
            )
            .with_context(|| format!("Failed to write '{}' to credential store", key))?;
        }
        tx.commit()
            .context("Failed to commit credential store transaction")
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn access_token(&self) -> Result<Option<String>> {
        self.get(ACCESS_TOKEN_KEY)
    }

    fn refresh_token(&self) -> Result<Option<String>> {
        self.get(REFRESH_TOKEN_KEY)
    }

    fn set_access_token(&self, token: &str) -> Result<()> {
        self.put(&[(ACCESS_TOKEN_KEY, token)])
    }

    fn set_tokens(&self, access: &str, refresh: &str) -> Result<()> {
        self.put(&[(ACCESS_TOKEN_KEY, access), (REFRESH_TOKEN_KEY, refresh)])
    }

    fn clear(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Credential store lock poisoned"))?;
        conn.execute("DELETE FROM session_kv", [])
            .context("Failed to clear credential store")?;
        Ok(())
    }
}

#[derive(Default)]
struct StoredTokens {
    access: Option<String>,
    refresh: Option<String>,
}

/// In-memory credential store for tests and embedders that persist elsewhere
#[derive(Default)]
pub struct MemoryCredentialStore {
    tokens: RwLock<StoredTokens>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn access_token(&self) -> Result<Option<String>> {
        let tokens = self
            .tokens
            .read()
            .map_err(|_| anyhow::anyhow!("Credential store lock poisoned"))?;
        Ok(tokens.access.clone())
    }

    fn refresh_token(&self) -> Result<Option<String>> {
        let tokens = self
            .tokens
            .read()
            .map_err(|_| anyhow::anyhow!("Credential store lock poisoned"))?;
        Ok(tokens.refresh.clone())
    }

    fn set_access_token(&self, token: &str) -> Result<()> {
        let mut tokens = self
            .tokens
            .write()
            .map_err(|_| anyhow::anyhow!("Credential store lock poisoned"))?;
        tokens.access = Some(token.to_string());
        Ok(())
    }

    fn set_tokens(&self, access: &str, refresh: &str) -> Result<()> {
        let mut tokens = self
            .tokens
            .write()
            .map_err(|_| anyhow::anyhow!("Credential store lock poisoned"))?;
        tokens.access = Some(access.to_string());
        tokens.refresh = Some(refresh.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut tokens = self
            .tokens
            .write()
            .map_err(|_| anyhow::anyhow!("Credential store lock poisoned"))?;
        tokens.access = None;
        tokens.refresh = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sqlite_round_trip() {
        let store = SqliteCredentialStore::open_in_memory().unwrap();
        assert!(store.access_token().unwrap().is_none());
        assert!(store.refresh_token().unwrap().is_none());

        store.set_tokens("access-1", "refresh-1").unwrap();
        assert_eq!(store.access_token().unwrap().as_deref(), Some("access-1"));
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("refresh-1"));

        // Overwriting the access token leaves the refresh token in place
        store.set_access_token("access-2").unwrap();
        assert_eq!(store.access_token().unwrap().as_deref(), Some("access-2"));
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("refresh-1"));

        store.clear().unwrap();
        assert!(store.access_token().unwrap().is_none());
        assert!(store.refresh_token().unwrap().is_none());
    }

    #[test]
    fn test_sqlite_survives_reopen() {
        let path = std::env::temp_dir().join(format!(
            "cotidomo-client-store-test-{}.sqlite3",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        {
            let store = SqliteCredentialStore::open(&path).unwrap();
            store.set_tokens("persisted-access", "persisted-refresh").unwrap();
        }

        let store = SqliteCredentialStore::open(&path).unwrap();
        assert_eq!(
            store.access_token().unwrap().as_deref(),
            Some("persisted-access")
        );
        assert_eq!(
            store.refresh_token().unwrap().as_deref(),
            Some("persisted-refresh")
        );

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_memory_round_trip() {
        let store = MemoryCredentialStore::new();
        store.set_tokens("a", "r").unwrap();
        assert_eq!(store.access_token().unwrap().as_deref(), Some("a"));
        store.clear().unwrap();
        assert!(store.access_token().unwrap().is_none());
        assert!(store.refresh_token().unwrap().is_none());
    }

    proptest! {
        #[test]
        fn stored_tokens_round_trip(access in "[ -~]{1,128}", refresh in "[ -~]{1,128}") {
            let memory = MemoryCredentialStore::new();
            memory.set_tokens(&access, &refresh).unwrap();
            let memory_access = memory.access_token().unwrap();
            prop_assert_eq!(memory_access.as_deref(), Some(access.as_str()));
            let memory_refresh = memory.refresh_token().unwrap();
            prop_assert_eq!(memory_refresh.as_deref(), Some(refresh.as_str()));

            let sqlite = SqliteCredentialStore::open_in_memory().unwrap();
            sqlite.set_tokens(&access, &refresh).unwrap();
            let sqlite_access = sqlite.access_token().unwrap();
            prop_assert_eq!(sqlite_access.as_deref(), Some(access.as_str()));
            let sqlite_refresh = sqlite.refresh_token().unwrap();
            prop_assert_eq!(sqlite_refresh.as_deref(), Some(refresh.as_str()));
        }
    }
}
