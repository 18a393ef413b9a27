//! Error types for remote calls and the sync core.

use thiserror::Error;

use crate::entity::EntityType;

/// Postgres code for a missing relation.
const UNDEFINED_TABLE: &str = "42P01";
/// PostgREST code for a table absent from its schema cache.
const SCHEMA_CACHE_MISS: &str = "PGRST205";

/// Failure side of every call into the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RemoteError {
  pub code: Option<String>,
  pub message: String,
  pub status: Option<u16>,
}

impl RemoteError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      code: None,
      message: message.into(),
      status: None,
    }
  }

  pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      code: Some(code.into()),
      message: message.into(),
      status: None,
    }
  }

  pub fn with_status(mut self, status: u16) -> Self {
    self.status = Some(status);
    self
  }

  /// True when the target relation does not exist on the remote side.
  pub fn is_not_found(&self) -> bool {
    match self.code.as_deref() {
      Some(UNDEFINED_TABLE) | Some(SCHEMA_CACHE_MISS) => true,
      Some(_) => false,
      None => self.status == Some(404),
    }
  }

  /// Whether another attempt could plausibly succeed.
  ///
  /// Only transport failures (no status, no code), timeouts, rate limits and
  /// 5xx replies are transient. Client errors fail the same way every time.
  pub fn is_retryable(&self) -> bool {
    match self.status {
      Some(status) => matches!(status, 408 | 429 | 500..=599),
      None => self.code.is_none(),
    }
  }
}

/// Errors surfaced by the sync core to its callers.
#[derive(Debug, Error)]
pub enum SyncError {
  #[error("no connectivity: the remote store is unreachable")]
  Offline,

  #[error(transparent)]
  Remote(#[from] RemoteError),

  #[error("collection '{entity}' does not exist on the remote store")]
  MissingCollection {
    entity: EntityType,
    #[source]
    source: RemoteError,
  },

  #[error("failed to subscribe to '{entity}': {message}")]
  Subscription { entity: EntityType, message: String },
}

impl SyncError {
  /// Classify a remote write failure for `entity`.
  pub(crate) fn from_write(entity: EntityType, err: RemoteError) -> Self {
    if err.is_not_found() {
      SyncError::MissingCollection {
        entity,
        source: err,
      }
    } else {
      SyncError::Remote(err)
    }
  }

  /// The underlying remote error, if any.
  pub fn remote(&self) -> Option<&RemoteError> {
    match self {
      SyncError::Remote(err) | SyncError::MissingCollection { source: err, .. } => Some(err),
      _ => None,
    }
  }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_not_found_codes() {
    assert!(RemoteError::with_code("42P01", "relation does not exist").is_not_found());
    assert!(RemoteError::with_code("PGRST205", "not in schema cache").is_not_found());
    assert!(RemoteError::new("gone").with_status(404).is_not_found());
    assert!(!RemoteError::with_code("23505", "duplicate key")
      .with_status(404)
      .is_not_found());
    assert!(!RemoteError::new("timeout").is_not_found());
  }

  #[test]
  fn test_only_transient_errors_are_retryable() {
    assert!(RemoteError::new("connection reset").is_retryable());
    assert!(RemoteError::new("timeout").with_status(504).is_retryable());
    assert!(RemoteError::new("slow down").with_status(429).is_retryable());
    assert!(RemoteError::new("request timeout").with_status(408).is_retryable());

    assert!(!RemoteError::with_code("23505", "duplicate key")
      .with_status(409)
      .is_retryable());
    assert!(!RemoteError::new("jwt expired").with_status(401).is_retryable());
    assert!(!RemoteError::with_code("PGRST116", "no rows returned").is_retryable());
    assert!(!RemoteError::with_code("42P01", "relation does not exist").is_retryable());
  }

  #[test]
  fn test_write_against_missing_relation_is_distinct() {
    let err = SyncError::from_write(
      EntityType::Invoices,
      RemoteError::with_code("42P01", "relation \"invoices\" does not exist"),
    );
    assert!(matches!(
      err,
      SyncError::MissingCollection {
        entity: EntityType::Invoices,
        ..
      }
    ));

    let err = SyncError::from_write(EntityType::Invoices, RemoteError::new("bad gateway"));
    assert!(matches!(err, SyncError::Remote(_)));
    assert_eq!(err.to_string(), "bad gateway");
  }
}
