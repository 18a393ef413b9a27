//! In-memory cache of collection snapshots.
//!
//! This module provides a lazy-expiry cache:
//! - Entries carry their capture timestamp and a time-to-live
//! - Validity is computed at read time, nothing is evicted on a timer
//! - Writers invalidate explicitly (`delete`) or in bulk (`clear`)

mod store;

pub use store::{CacheEntry, CacheStore, DEFAULT_TTL};
