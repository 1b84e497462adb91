//! Error type for `croquis-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] croquis_core::Error),

  #[error("database error: {0}")]
  Database(#[from] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),
}

impl Error {
  /// Whether this is a recoverable constraint violation — the caller aborts
  /// the in-progress logical operation and the store is left intact.
  pub fn is_constraint_violation(&self) -> bool {
    matches!(
      self,
      Self::Core(
        croquis_core::Error::UniqueViolation { .. }
          | croquis_core::Error::ForeignKeyViolation { .. }
          | croquis_core::Error::Cycle { .. }
      )
    )
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
