//! Persistent storage using SQLite (rusqlite)
//!
//! This module provides:
//! - OS-standard data directory location (via `directories` crate)
//! - SQLite database with schema versioning
//! - Installation identity, display handle and the last host joined

use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Current schema version. Bump this when making schema changes.
const SCHEMA_VERSION: u32 = 2;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("could not determine data directory")]
    NoDataDirectory,
    #[error("database schema version {found} is newer than supported version {supported}")]
    FutureSchemaVersion { found: u32, supported: u32 },
    #[error("failed to create data directory: {0}")]
    CreateDirFailed(std::io::Error),
    #[error("stored installation id is corrupt")]
    CorruptSessionId,
    #[error("migration from v{from} to v{to} failed: {reason}")]
    MigrationFailed { from: u32, to: u32, reason: String },
}

/// A random 16-byte identifier, shown as hex.
///
/// Every running session mints its own. The installation keeps one as a
/// BLOB in `meta` for the log.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(pub [u8; 16]);

impl SessionId {
    /// Generate a new random session ID.
    pub fn generate() -> Self {
        use rand::Rng;
        let mut bytes = [0u8; 16];
        rand::rng().fill(&mut bytes);
        SessionId(bytes)
    }

    /// Create from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 16] = bytes.try_into().ok()?;
        Some(SessionId(arr))
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Convert to hex string, the form used on the wire.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// The host last joined and the session id used for it, so `rejoin`
/// comes back as the owner of the same players
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastPeer {
    pub address: String,
    pub session_id: String,
}

/// What a session needs to remember between runs
pub trait IdentityStore {
    fn handle(&self) -> Result<Option<String>, StorageError>;
    fn set_handle(&self, handle: &str) -> Result<(), StorageError>;
    fn last_peer(&self) -> Result<Option<LastPeer>, StorageError>;
    fn set_last_peer(&self, peer: &LastPeer) -> Result<(), StorageError>;
}

/// The SQLite-backed store.
pub struct Storage {
    conn: Connection,
    installation_id: SessionId,
}

impl Storage {
    /// Open or create the storage database.
    ///
    /// Uses OS-standard directories:
    /// - Linux: `$XDG_DATA_HOME/alias/` or `~/.local/share/alias/`
    /// - macOS: `~/Library/Application Support/alias/`
    pub fn open() -> Result<Self, StorageError> {
        let data_dir = Self::data_dir()?;
        std::fs::create_dir_all(&data_dir).map_err(StorageError::CreateDirFailed)?;
        Self::open_at(&data_dir.join("alias.db"))
    }

    /// Open or create a database file at an explicit path
    pub fn open_at(path: &Path) -> Result<Self, StorageError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory database (for testing).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        let mut storage = Storage {
            conn,
            installation_id: SessionId([0; 16]), // Placeholder, loaded below
        };
        storage.initialize_schema()?;
        storage.installation_id = storage.load_installation_id()?;
        Ok(storage)
    }

    /// This installation's id, as hex. Not used on the wire.
    pub fn installation_id(&self) -> String {
        self.installation_id.to_hex()
    }

    /// Get the OS-standard data directory
    pub fn data_dir() -> Result<PathBuf, StorageError> {
        ProjectDirs::from("", "", "alias")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or(StorageError::NoDataDirectory)
    }

    fn initialize_schema(&self) -> Result<(), StorageError> {
        let current_version = self.get_schema_version()?;

        if current_version == 0 {
            self.create_schema()?;
        } else if current_version < SCHEMA_VERSION {
            self.migrate_schema(current_version)?;
        } else if current_version > SCHEMA_VERSION {
            return Err(StorageError::FutureSchemaVersion {
                found: current_version,
                supported: SCHEMA_VERSION,
            });
        }
        Ok(())
    }

    fn get_schema_version(&self) -> Result<u32, StorageError> {
        let table_exists: bool = self.conn.query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='meta'",
            [],
            |row| row.get(0),
        )?;
        if !table_exists {
            return Ok(0);
        }

        let version = self
            .conn
            .query_row("SELECT schema_version FROM meta LIMIT 1", [], |row| {
                row.get::<_, u32>(0)
            })
            .optional()?;
        Ok(version.unwrap_or(0))
    }

    fn create_schema(&self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            r#"
            -- Meta table: installation identity and schema version
            CREATE TABLE IF NOT EXISTS meta (
                schema_version INTEGER NOT NULL,
                session_id BLOB NOT NULL,
                handle TEXT,
                last_peer TEXT,
                last_session TEXT,
                created_at INTEGER NOT NULL
            );
            "#,
        )?;

        let installation_id = SessionId::generate();
        let created_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        self.conn.execute(
            "INSERT INTO meta (schema_version, session_id, handle, last_peer, last_session, created_at) \
             VALUES (?1, ?2, NULL, NULL, NULL, ?3)",
            params![SCHEMA_VERSION, installation_id.as_bytes().as_slice(), created_at],
        )?;
        Ok(())
    }

    fn migrate_schema(&self, from_version: u32) -> Result<(), StorageError> {
        let mut current_version = from_version;
        while current_version < SCHEMA_VERSION {
            match current_version {
                1 => {
                    // v2 remembers which session id joined the last host
                    self.conn
                        .execute_batch("ALTER TABLE meta ADD COLUMN last_session TEXT;")?;
                    current_version = 2;
                }
                _ => {
                    return Err(StorageError::MigrationFailed {
                        from: current_version,
                        to: SCHEMA_VERSION,
                        reason: format!("no migration path from version {}", current_version),
                    });
                }
            }
        }
        self.conn
            .execute("UPDATE meta SET schema_version = ?1", params![SCHEMA_VERSION])?;
        Ok(())
    }

    fn load_installation_id(&self) -> Result<SessionId, StorageError> {
        let bytes: Vec<u8> =
            self.conn
                .query_row("SELECT session_id FROM meta LIMIT 1", [], |row| row.get(0))?;
        SessionId::from_bytes(&bytes).ok_or(StorageError::CorruptSessionId)
    }

    fn meta_text(&self, column: &str) -> Result<Option<String>, StorageError> {
        let value = self
            .conn
            .query_row(&format!("SELECT {} FROM meta LIMIT 1", column), [], |row| {
                row.get::<_, Option<String>>(0)
            })
            .optional()?;
        Ok(value.flatten())
    }
}

impl IdentityStore for Storage {
    fn handle(&self) -> Result<Option<String>, StorageError> {
        self.meta_text("handle")
    }

    fn set_handle(&self, handle: &str) -> Result<(), StorageError> {
        self.conn
            .execute("UPDATE meta SET handle = ?1", params![handle])?;
        Ok(())
    }

    fn last_peer(&self) -> Result<Option<LastPeer>, StorageError> {
        let address = self.meta_text("last_peer")?;
        let session_id = self.meta_text("last_session")?;
        Ok(address
            .zip(session_id)
            .map(|(address, session_id)| LastPeer {
                address,
                session_id,
            }))
    }

    fn set_last_peer(&self, peer: &LastPeer) -> Result<(), StorageError> {
        self.conn.execute(
            "UPDATE meta SET last_peer = ?1, last_session = ?2",
            params![peer.address, peer.session_id],
        )?;
        Ok(())
    }
}

/// Store that forgets everything on exit (for testing)
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    handle: std::rc::Rc<std::cell::RefCell<Option<String>>>,
    last_peer: std::rc::Rc<std::cell::RefCell<Option<LastPeer>>>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl IdentityStore for MemoryStore {
    fn handle(&self) -> Result<Option<String>, StorageError> {
        Ok(self.handle.borrow().clone())
    }

    fn set_handle(&self, handle: &str) -> Result<(), StorageError> {
        *self.handle.borrow_mut() = Some(handle.to_string());
        Ok(())
    }

    fn last_peer(&self) -> Result<Option<LastPeer>, StorageError> {
        Ok(self.last_peer.borrow().clone())
    }

    fn set_last_peer(&self, peer: &LastPeer) -> Result<(), StorageError> {
        *self.last_peer.borrow_mut() = Some(peer.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_generation() {
        let id1 = SessionId::generate();
        let id2 = SessionId::generate();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_session_id_from_bytes() {
        let id = SessionId::generate();
        assert_eq!(SessionId::from_bytes(id.as_bytes()), Some(id));
        assert_eq!(SessionId::from_bytes(&[1, 2, 3]), None);
    }

    #[test]
    fn test_session_id_hex() {
        let id = SessionId([0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef,
                            0xfe, 0xdc, 0xba, 0x98, 0x76, 0x54, 0x32, 0x10]);
        assert_eq!(id.to_hex(), "0123456789abcdeffedcba9876543210");
    }

    #[test]
    fn test_storage_creation() {
        let storage = Storage::open_in_memory().unwrap();
        assert_eq!(storage.installation_id().len(), 32);
        assert!(!storage.installation_id.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_handle_storage() {
        let storage = Storage::open_in_memory().unwrap();

        // Initially no handle
        assert!(storage.handle().unwrap().is_none());

        storage.set_handle("TestPlayer").unwrap();
        assert_eq!(storage.handle().unwrap(), Some("TestPlayer".to_string()));

        storage.set_handle("NewName").unwrap();
        assert_eq!(storage.handle().unwrap(), Some("NewName".to_string()));
    }

    #[test]
    fn test_last_peer_storage() {
        let storage = Storage::open_in_memory().unwrap();
        assert!(storage.last_peer().unwrap().is_none());
        let peer = LastPeer {
            address: "192.168.1.4:55333".to_string(),
            session_id: "ab12".to_string(),
        };
        storage.set_last_peer(&peer).unwrap();
        assert_eq!(storage.last_peer().unwrap(), Some(peer));
    }

    #[test]
    fn test_identity_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alias.db");

        let first = Storage::open_at(&path).unwrap();
        first.set_handle("Alice").unwrap();
        let id = first.installation_id();
        drop(first);

        let second = Storage::open_at(&path).unwrap();
        assert_eq!(second.installation_id(), id);
        assert_eq!(second.handle().unwrap().as_deref(), Some("Alice"));
    }

    #[test]
    fn test_future_schema_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alias.db");
        drop(Storage::open_at(&path).unwrap());

        let conn = Connection::open(&path).unwrap();
        conn.execute("UPDATE meta SET schema_version = 99", []).unwrap();
        drop(conn);

        assert!(matches!(
            Storage::open_at(&path),
            Err(StorageError::FutureSchemaVersion { found: 99, .. })
        ));
    }

    #[test]
    fn test_v1_database_migrated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alias.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE meta (schema_version INTEGER NOT NULL, session_id BLOB NOT NULL, \
             handle TEXT, last_peer TEXT, created_at INTEGER NOT NULL);
             INSERT INTO meta VALUES (1, x'0102030405060708090a0b0c0d0e0f10', 'Alice', '10.0.0.2:55333', 0);",
        )
        .unwrap();
        drop(conn);

        let storage = Storage::open_at(&path).unwrap();
        assert_eq!(storage.installation_id(), "0102030405060708090a0b0c0d0e0f10");
        assert_eq!(storage.handle().unwrap().as_deref(), Some("Alice"));
        // No session id was recorded for that host, so there is nothing to rejoin as
        assert_eq!(storage.last_peer().unwrap(), None);

        storage
            .set_last_peer(&LastPeer {
                address: "10.0.0.2:55333".to_string(),
                session_id: "ab12".to_string(),
            })
            .unwrap();
        assert_eq!(storage.last_peer().unwrap().unwrap().session_id, "ab12");
    }

    #[test]
    fn test_schema_version_is_current() {
        let storage = Storage::open_in_memory().unwrap();
        let version: u32 = storage
            .conn
            .query_row("SELECT schema_version FROM meta", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_data_dir() {
        // Might fail in unusual environments, should work on Linux/macOS
        if let Ok(path) = Storage::data_dir() {
            assert!(path.to_string_lossy().contains("alias"));
        }
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        let shared = store.clone();
        let peer = LastPeer {
            address: "mem:1".to_string(),
            session_id: "abc".to_string(),
        };
        store.set_last_peer(&peer).unwrap();
        assert_eq!(shared.last_peer().unwrap(), Some(peer));
    }
}
