//! Bulk fetch of entity collections into the local mirror.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::entity::EntityType;
use crate::error::RemoteError;
use crate::reconcile::{Reconciler, SnapshotCache};
use crate::remote::RemoteStore;
use crate::retry::RetryPolicy;
use crate::store::LoadStatus;

/// Fetches whole collections and hands them to the reconciler as full replaces.
///
/// Read failures never escape: a collection that cannot be fetched is reset to
/// empty and marked [`LoadStatus::Failed`].
pub struct CollectionLoader {
  remote: Arc<dyn RemoteStore>,
  retry: RetryPolicy,
  reconciler: Arc<Reconciler>,
  cache: Arc<SnapshotCache>,
}

impl CollectionLoader {
  pub fn new(
    remote: Arc<dyn RemoteStore>,
    retry: RetryPolicy,
    reconciler: Arc<Reconciler>,
    cache: Arc<SnapshotCache>,
  ) -> Self {
    Self {
      remote,
      retry,
      reconciler,
      cache,
    }
  }

  /// Fetch every record of `entity` and replace the local collection.
  ///
  /// A fetch that settles after a teardown is discarded; the returned status
  /// is then the (cleared) current one.
  pub async fn load(&self, entity: EntityType) -> LoadStatus {
    let epoch = self.reconciler.epoch();
    self.reconciler.mark_loading(entity);

    let result = self
      .retry
      .retry_if(|| self.remote.select(entity), RemoteError::is_retryable)
      .await;

    let (applied, status) = match result {
      Ok(records) => {
        debug!(%entity, count = records.len(), "collection loaded");
        (
          self.reconciler.replace_in(epoch, entity, records),
          LoadStatus::Ready,
        )
      }
      Err(e) if e.is_not_found() => {
        debug!(%entity, "relation missing on remote, treating as empty");
        (
          self.reconciler.replace_in(epoch, entity, Vec::new()),
          LoadStatus::Ready,
        )
      }
      Err(e) => {
        warn!(%entity, error = %e, "failed to load collection");
        (
          self.reconciler.reset_failed_in(epoch, entity),
          LoadStatus::Failed,
        )
      }
    };

    if applied {
      status
    } else {
      self.reconciler.status(entity)
    }
  }

  /// Like [`load`](Self::load), but skips the fetch while the cached snapshot
  /// is still valid.
  pub async fn ensure_loaded(&self, entity: EntityType) -> LoadStatus {
    if self.cache.is_valid(entity.table_name()) {
      debug!(%entity, "cache still valid, skipping fetch");
      return self.reconciler.status(entity);
    }
    self.load(entity).await
  }

  /// Load all entity types concurrently and wait for every one to settle.
  pub async fn load_all(&self) -> Vec<(EntityType, LoadStatus)> {
    let statuses = join_all(EntityType::ALL.into_iter().map(|e| self.load(e))).await;
    EntityType::ALL.into_iter().zip(statuses).collect()
  }
}
