//! Applies create/update/delete deltas to the in-memory collections.
//!
//! The reconciler is the single writer of [`Collections`]. Every write, whether
//! from a local mutation, a push event or a bulk load, goes through here and is
//! followed by cache invalidation and a change notification.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::cache::CacheStore;
use crate::entity::{EntityType, Record, RecordId};
use crate::notify::ChangeNotifier;
use crate::remote::{PushEvent, PushKind};
use crate::store::{Collections, LoadStatus};

/// Cache of collection snapshots keyed by table name.
pub type SnapshotCache = CacheStore<Vec<Record>>;

/// A single change to one collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
  Create(Record),
  Update(Record),
  Delete(RecordId),
}

impl Delta {
  /// Translate a push event. `None` when the event lacks the record it needs.
  pub fn from_push(event: PushEvent) -> Option<Self> {
    match event.kind {
      PushKind::Insert => event.new.map(Delta::Create),
      PushKind::Update => event.new.map(Delta::Update),
      PushKind::Delete => event.old.map(|old| Delta::Delete(old.id)),
    }
  }

  fn op_name(&self) -> &'static str {
    match self {
      Delta::Create(_) => "create",
      Delta::Update(_) => "update",
      Delta::Delete(_) => "delete",
    }
  }
}

/// Session generation a remote call was started in.
///
/// [`Reconciler::clear`] starts a new one; results tagged with an older epoch
/// are dropped instead of applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Epoch(u64);

pub struct Reconciler {
  collections: Mutex<Collections>,
  /// Only changed while `collections` is locked.
  epoch: AtomicU64,
  cache: Arc<SnapshotCache>,
  notifier: Arc<ChangeNotifier>,
}

impl Reconciler {
  pub fn new(cache: Arc<SnapshotCache>, notifier: Arc<ChangeNotifier>) -> Self {
    Self {
      collections: Mutex::new(Collections::new()),
      epoch: AtomicU64::new(0),
      cache,
      notifier,
    }
  }

  fn collections(&self) -> MutexGuard<'_, Collections> {
    self
      .collections
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  /// Lock the collections, unless `epoch` belongs to an ended session.
  fn collections_in(&self, epoch: Epoch) -> Option<MutexGuard<'_, Collections>> {
    let collections = self.collections();
    (self.epoch.load(Ordering::SeqCst) == epoch.0).then_some(collections)
  }

  /// The current session. Capture it before a remote call and pass it to the
  /// `*_in` variants once the call returns.
  pub fn epoch(&self) -> Epoch {
    Epoch(self.epoch.load(Ordering::SeqCst))
  }

  /// Apply `delta` to the `entity` collection in the current session.
  pub fn reconcile(&self, entity: EntityType, delta: Delta) -> bool {
    self.reconcile_in(self.epoch(), entity, delta)
  }

  /// Apply `delta` to the `entity` collection.
  ///
  /// Returns false on a reconciliation miss (update/delete of an unknown id),
  /// which leaves the collection untouched. The cache entry is invalidated and
  /// listeners are notified either way. A delta from an ended session is
  /// dropped without touching anything.
  pub fn reconcile_in(&self, epoch: Epoch, entity: EntityType, delta: Delta) -> bool {
    let op = delta.op_name();
    let applied = {
      let Some(mut collections) = self.collections_in(epoch) else {
        debug!(%entity, op, "session ended, delta dropped");
        return false;
      };
      match delta {
        Delta::Create(record) => {
          collections.insert_front(entity, record);
          true
        }
        Delta::Update(record) => collections.replace_record(entity, record),
        Delta::Delete(id) => collections.remove(entity, &id),
      }
    };

    if applied {
      debug!(%entity, op, "reconciled");
    } else {
      debug!(%entity, op, "reconciliation miss, local state unchanged");
    }

    self.cache.delete(entity.table_name());
    self.notifier.notify(entity);
    applied
  }

  /// Route a push event from a live channel.
  pub fn apply_push(&self, entity: EntityType, event: PushEvent) {
    let kind = event.kind;
    match Delta::from_push(event) {
      Some(delta) => {
        self.reconcile(entity, delta);
      }
      None => warn!(%entity, ?kind, "push event without a record, ignored"),
    }
  }

  pub fn replace(&self, entity: EntityType, records: Vec<Record>) -> bool {
    self.replace_in(self.epoch(), entity, records)
  }

  /// Full replace after a successful fetch. Seeds the cache entry.
  pub fn replace_in(&self, epoch: Epoch, entity: EntityType, records: Vec<Record>) -> bool {
    {
      let Some(mut collections) = self.collections_in(epoch) else {
        debug!(%entity, "session ended, fetched rows dropped");
        return false;
      };
      self.cache.set(entity.table_name(), records.clone(), None);
      collections.replace(entity, records, LoadStatus::Ready);
    }
    self.notifier.notify(entity);
    true
  }

  pub fn reset_failed(&self, entity: EntityType) -> bool {
    self.reset_failed_in(self.epoch(), entity)
  }

  /// Reset to empty after a failed fetch, so stale rows are never shown.
  pub fn reset_failed_in(&self, epoch: Epoch, entity: EntityType) -> bool {
    {
      let Some(mut collections) = self.collections_in(epoch) else {
        return false;
      };
      self.cache.delete(entity.table_name());
      collections.replace(entity, Vec::new(), LoadStatus::Failed);
    }
    self.notifier.notify(entity);
    true
  }

  pub fn mark_loading(&self, entity: EntityType) {
    self.collections().set_status(entity, LoadStatus::Loading);
  }

  pub fn snapshot(&self, entity: EntityType) -> Vec<Record> {
    self.collections().records(entity).to_vec()
  }

  pub fn status(&self, entity: EntityType) -> LoadStatus {
    self.collections().status(entity)
  }

  /// Drop every collection and the whole cache, and start a new epoch.
  pub fn clear(&self) {
    let mut collections = self.collections();
    self.epoch.fetch_add(1, Ordering::SeqCst);
    collections.clear();
    self.cache.clear();
  }
}
