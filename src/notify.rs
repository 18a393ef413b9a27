//! Fan-out of "this entity type changed" to dependent views.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

use crate::entity::EntityType;

/// Error type returned by change callbacks.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

type Callback = Arc<dyn Fn(EntityType) -> Result<(), CallbackError> + Send + Sync>;

/// Handle returned by a registration, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

struct Listener {
  /// `None` listens to every entity type
  entity: Option<EntityType>,
  callback: Callback,
}

/// Registry of change callbacks.
///
/// Callbacks run in registration order. A callback that returns an error or
/// panics is logged and skipped; the remaining callbacks still run.
#[derive(Default)]
pub struct ChangeNotifier {
  listeners: Mutex<BTreeMap<ListenerId, Listener>>,
  next_id: AtomicU64,
}

impl ChangeNotifier {
  pub fn new() -> Self {
    Self::default()
  }

  fn register(&self, entity: Option<EntityType>, callback: Callback) -> ListenerId {
    let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
    self
      .listeners
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(id, Listener { entity, callback });
    id
  }

  /// Call `callback` whenever `entity` changes.
  pub fn on_change<F>(&self, entity: EntityType, callback: F) -> ListenerId
  where
    F: Fn(EntityType) -> Result<(), CallbackError> + Send + Sync + 'static,
  {
    self.register(Some(entity), Arc::new(callback))
  }

  /// Call `callback` whenever any entity type changes.
  pub fn on_any_change<F>(&self, callback: F) -> ListenerId
  where
    F: Fn(EntityType) -> Result<(), CallbackError> + Send + Sync + 'static,
  {
    self.register(None, Arc::new(callback))
  }

  pub fn remove_listener(&self, id: ListenerId) -> bool {
    self
      .listeners
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(&id)
      .is_some()
  }

  pub fn listener_count(&self) -> usize {
    self
      .listeners
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }

  /// Invoke every callback interested in `entity`.
  pub fn notify(&self, entity: EntityType) {
    // Snapshot so callbacks can register or remove listeners without deadlocking.
    let callbacks: Vec<(ListenerId, Callback)> = self
      .listeners
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .iter()
      .filter(|(_, l)| l.entity.map_or(true, |e| e == entity))
      .map(|(id, l)| (*id, Arc::clone(&l.callback)))
      .collect();

    for (id, callback) in callbacks {
      match catch_unwind(AssertUnwindSafe(|| callback(entity))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(%entity, listener = id.0, error = %e, "change listener failed"),
        Err(_) => warn!(%entity, listener = id.0, "change listener panicked"),
      }
    }
  }
}
