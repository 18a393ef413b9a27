//! Key to {value, timestamp, ttl} store with read-time expiry.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Validity window used when a caller does not pick one.
pub const DEFAULT_TTL: Duration = Duration::minutes(5);

/// A cached value together with when it was captured.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
  pub value: V,
  pub cached_at: DateTime<Utc>,
  pub ttl: Duration,
}

impl<V> CacheEntry<V> {
  /// An entry is valid iff `now - cached_at < ttl`.
  pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
    now - self.cached_at < self.ttl
  }
}

/// Lazy-expiry cache shared between the loader and the reconciler.
pub struct CacheStore<V> {
  entries: Mutex<HashMap<String, CacheEntry<V>>>,
  default_ttl: Duration,
}

impl<V: Clone> CacheStore<V> {
  pub fn new() -> Self {
    Self::with_default_ttl(DEFAULT_TTL)
  }

  pub fn with_default_ttl(default_ttl: Duration) -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      default_ttl,
    }
  }

  pub fn default_ttl(&self) -> Duration {
    self.default_ttl
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Store `value` under `key`, captured now. `None` uses the default ttl.
  pub fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
    self.set_at(key, value, ttl, Utc::now());
  }

  fn set_at(&self, key: &str, value: V, ttl: Option<Duration>, cached_at: DateTime<Utc>) {
    let entry = CacheEntry {
      value,
      cached_at,
      ttl: ttl.unwrap_or(self.default_ttl),
    };
    self.entries().insert(key.to_string(), entry);
  }

  /// The stored wrapper, valid or not.
  pub fn get(&self, key: &str) -> Option<CacheEntry<V>> {
    self.entries().get(key).cloned()
  }

  /// The stored value if its entry is still valid. Expired entries read as absent.
  pub fn get_valid(&self, key: &str) -> Option<V> {
    let now = Utc::now();
    self
      .entries()
      .get(key)
      .filter(|entry| entry.is_valid_at(now))
      .map(|entry| entry.value.clone())
  }

  pub fn is_valid(&self, key: &str) -> bool {
    self.is_valid_at(key, Utc::now())
  }

  fn is_valid_at(&self, key: &str, now: DateTime<Utc>) -> bool {
    self
      .entries()
      .get(key)
      .map(|entry| entry.is_valid_at(now))
      .unwrap_or(false)
  }

  /// Remove one entry. Returns whether it existed.
  pub fn delete(&self, key: &str) -> bool {
    self.entries().remove(key).is_some()
  }

  pub fn clear(&self) {
    self.entries().clear();
  }

  pub fn len(&self) -> usize {
    self.entries().len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries().is_empty()
  }
}

impl<V: Clone> Default for CacheStore<V> {
  fn default() -> Self {
    Self::new()
  }
}
