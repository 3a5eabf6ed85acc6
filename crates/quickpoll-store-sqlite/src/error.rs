//! Error type for `quickpoll-store-sqlite`.

use quickpoll_core::store::StoreFailure;
use rusqlite::ffi;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A column held a value the domain types cannot represent.
  #[error("bad column value: {0}")]
  Decode(String),
}

impl Error {
  fn sqlite_failure(&self) -> Option<&ffi::Error> {
    match self {
      Error::Database(tokio_rusqlite::Error::Rusqlite(
        rusqlite::Error::SqliteFailure(e, _),
      )) => Some(e),
      _ => None,
    }
  }

  /// A foreign key or CHECK constraint refused the write.
  pub fn is_constraint_violation(&self) -> bool {
    self
      .sqlite_failure()
      .is_some_and(|e| e.code == rusqlite::ErrorCode::ConstraintViolation)
  }
}

impl StoreFailure for Error {
  fn is_unique_violation(&self) -> bool {
    self.sqlite_failure().is_some_and(|e| {
      e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
        || e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    })
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
