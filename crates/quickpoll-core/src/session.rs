//! Session identity: an opaque, locally generated token standing in for a
//! voter. There is no server-side session row and no authentication.
//!
//! The id is created once per process via [`get_or_create_session_id`] and
//! then passed explicitly to every operation that needs it.

use std::{
  collections::HashMap,
  fmt,
  io::Write as _,
  path::{Path, PathBuf},
  sync::Mutex,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Key under which the token is persisted.
pub const SESSION_KEY: &str = "quickpoll_session_id";

// ─── SessionId ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
  /// A fresh random token.
  pub fn generate() -> Self { Self(Uuid::new_v4().to_string()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl From<String> for SessionId {
  fn from(s: String) -> Self { Self(s) }
}

impl From<&str> for SessionId {
  fn from(s: &str) -> Self { Self(s.to_owned()) }
}

impl fmt::Display for SessionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

// ─── Storage ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StorageError {
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("malformed storage file: {0}")]
  Json(#[from] serde_json::Error),

  #[error("storage unavailable: {0}")]
  Unavailable(String),
}

/// Local key/value persistence for the session token.
pub trait SessionStorage {
  fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
  fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// Process-local storage; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
  entries: Mutex<HashMap<String, String>>,
}

impl SessionStorage for MemoryStorage {
  fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
    let entries = self
      .entries
      .lock()
      .map_err(|_| StorageError::Unavailable("memory storage poisoned".into()))?;
    Ok(entries.get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|_| StorageError::Unavailable("memory storage poisoned".into()))?;
    entries.insert(key.to_owned(), value.to_owned());
    Ok(())
  }
}

/// A JSON object on disk holding string entries.
#[derive(Debug, Clone)]
pub struct FileStorage {
  path: PathBuf,
}

impl FileStorage {
  pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into() } }

  fn load(&self) -> Result<HashMap<String, String>, StorageError> {
    match std::fs::read_to_string(&self.path) {
      Ok(raw) => Ok(serde_json::from_str(&raw)?),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
      Err(e) => Err(e.into()),
    }
  }
}

impl SessionStorage for FileStorage {
  fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
    Ok(self.load()?.remove(key))
  }

  fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
    let mut entries = self.load()?;
    entries.insert(key.to_owned(), value.to_owned());
    let dir = match self.path.parent() {
      Some(parent) if !parent.as_os_str().is_empty() => parent,
      _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    // Readers see either the old file or the new one, never a partial write.
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&serde_json::to_vec_pretty(&entries)?)?;
    tmp.as_file().sync_all()?;
    tmp.persist(&self.path).map_err(|e| e.error)?;
    Ok(())
  }
}

// ─── Provider ────────────────────────────────────────────────────────────────

/// Return the persisted session id, creating and persisting one if absent.
///
/// Storage failures never propagate: the caller gets an ephemeral id that
/// lives only as long as this process.
pub fn get_or_create_session_id(storage: &impl SessionStorage) -> SessionId {
  match storage.get(SESSION_KEY) {
    Ok(Some(stored)) if !stored.trim().is_empty() => return SessionId(stored),
    Ok(_) => {}
    Err(e) => {
      tracing::warn!(error = %e, "session storage unreadable; using an ephemeral session id");
      return SessionId::generate();
    }
  }

  let id = SessionId::generate();
  if let Err(e) = storage.set(SESSION_KEY, id.as_str()) {
    tracing::warn!(error = %e, "could not persist session id; it will not survive a restart");
  }
  id
}

#[cfg(test)]
mod tests {
  use super::*;

  struct BrokenStorage;

  impl SessionStorage for BrokenStorage {
    fn get(&self, _: &str) -> Result<Option<String>, StorageError> {
      Err(StorageError::Unavailable("disabled".into()))
    }

    fn set(&self, _: &str, _: &str) -> Result<(), StorageError> {
      Err(StorageError::Unavailable("disabled".into()))
    }
  }

  #[test]
  fn memory_storage_is_idempotent() {
    let storage = MemoryStorage::default();
    let first = get_or_create_session_id(&storage);
    let second = get_or_create_session_id(&storage);
    assert_eq!(first, second);
    assert_eq!(storage.get(SESSION_KEY).unwrap().as_deref(), Some(first.as_str()));
  }

  #[test]
  fn file_storage_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("session.json");

    let first = get_or_create_session_id(&FileStorage::new(&path));
    let second = get_or_create_session_id(&FileStorage::new(&path));
    assert_eq!(first, second);
  }

  #[test]
  fn file_storage_keeps_other_keys() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileStorage::new(dir.path().join("s.json"));
    storage.set("theme", "dark").unwrap();

    let id = get_or_create_session_id(&storage);
    assert_eq!(storage.get("theme").unwrap().as_deref(), Some("dark"));
    assert_eq!(storage.get(SESSION_KEY).unwrap(), Some(id.to_string()));
  }

  #[test]
  fn file_storage_replaces_the_whole_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s.json");
    let storage = FileStorage::new(&path);
    for n in 0..5 {
      storage.set("counter", &n.to_string()).unwrap();
    }

    let names: Vec<_> = std::fs::read_dir(dir.path())
      .unwrap()
      .map(|entry| entry.unwrap().file_name())
      .collect();
    assert_eq!(names, [std::ffi::OsString::from("s.json")]);

    let on_disk: HashMap<String, String> =
      serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(on_disk.get("counter").map(String::as_str), Some("4"));
  }

  #[test]
  fn unavailable_storage_falls_back_to_ephemeral_ids() {
    let a = get_or_create_session_id(&BrokenStorage);
    let b = get_or_create_session_id(&BrokenStorage);
    assert!(!a.as_str().is_empty());
    assert_ne!(a, b);
  }

  #[test]
  fn blank_stored_value_is_replaced() {
    let storage = MemoryStorage::default();
    storage.set(SESSION_KEY, "  ").unwrap();
    let id = get_or_create_session_id(&storage);
    assert!(!id.as_str().trim().is_empty());
    assert_eq!(storage.get(SESSION_KEY).unwrap(), Some(id.to_string()));
  }
}
