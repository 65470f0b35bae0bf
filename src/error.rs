use std::time::Duration;

use crate::store::StoreError;

/// Errors surfaced by [`crate::Pantry`]
#[derive(Debug, thiserror::Error)]
pub enum PantryError {
  /// `best_by` is later than `use_by`; rejected before any write
  #[error("invalid durations: best by {best_by:?} exceeds use by {use_by:?}")]
  InvalidDurations { best_by: Duration, use_by: Duration },

  /// Key is empty or ends with the metadata suffix
  #[error("reserved key '{0}'")]
  ReservedKey(String),

  #[error(transparent)]
  Backend(#[from] StoreError),

  /// Stored metadata could not be encoded or decoded
  #[error("corrupt metadata for '{key}': {source}")]
  Metadata {
    key: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("restock of '{key}' failed: {source}")]
  RestockFailure {
    key: String,
    #[source]
    source: anyhow::Error,
  },

  #[error("restock of '{key}' timed out after {timeout:?}")]
  RestockTimeout { key: String, timeout: Duration },
}

impl PantryError {
  /// True for failures of the caller-supplied restock function
  pub fn is_restock_error(&self) -> bool {
    matches!(
      self,
      PantryError::RestockFailure { .. } | PantryError::RestockTimeout { .. }
    )
  }
}

pub type Result<T, E = PantryError> = std::result::Result<T, E>;
