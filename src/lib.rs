//! Client-side synchronization and cache layer for the back-office store.
//!
//! [`DatabaseManager`] keeps an in-memory mirror of ten remote collections
//! consistent across loads, local writes and live push events.

pub mod cache;
pub mod config;
pub mod connection;
pub mod entity;
pub mod error;
pub mod loader;
pub mod manager;
pub mod mutation;
pub mod notify;
pub mod reconcile;
pub mod remote;
pub mod retry;
pub mod store;
pub mod subscription;

#[cfg(test)]
mod testing;

pub use entity::{EntityType, Payload, Record, RecordId};
pub use error::{RemoteError, SyncError, SyncResult};
pub use manager::{DatabaseManager, ManagerSettings, SessionStatus};
