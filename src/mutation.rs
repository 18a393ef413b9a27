//! Create/update/delete against the remote store, reconciled locally on success.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::connection::ConnectionMonitor;
use crate::entity::{EntityType, Payload, Record, RecordId};
use crate::error::{RemoteError, SyncError, SyncResult};
use crate::reconcile::{Delta, Reconciler};
use crate::remote::RemoteStore;
use crate::retry::RetryPolicy;

/// Write path of the sync core.
///
/// Fails fast while offline, retries transient errors, and only touches local
/// state once the remote write succeeded. A failed write leaves local state
/// exactly as it was. A write that lands after a teardown still returns its
/// result but is not applied to the cleared mirror.
pub struct MutationGateway {
  remote: Arc<dyn RemoteStore>,
  retry: RetryPolicy,
  connection: Arc<ConnectionMonitor>,
  reconciler: Arc<Reconciler>,
}

impl MutationGateway {
  pub fn new(
    remote: Arc<dyn RemoteStore>,
    retry: RetryPolicy,
    connection: Arc<ConnectionMonitor>,
    reconciler: Arc<Reconciler>,
  ) -> Self {
    Self {
      remote,
      retry,
      connection,
      reconciler,
    }
  }

  fn ensure_online(&self, entity: EntityType, op: &str) -> SyncResult<()> {
    if self.connection.is_online() {
      Ok(())
    } else {
      debug!(%entity, op, "rejecting write while offline");
      Err(SyncError::Offline)
    }
  }

  fn failed(entity: EntityType, op: &str, err: RemoteError) -> SyncError {
    warn!(%entity, op, error = %err, "remote write failed");
    SyncError::from_write(entity, err)
  }

  pub async fn create(&self, entity: EntityType, payload: &Payload) -> SyncResult<Record> {
    self.ensure_online(entity, "create")?;
    let epoch = self.reconciler.epoch();

    let record = self
      .retry
      .retry_if(
        || self.remote.insert(entity, payload),
        RemoteError::is_retryable,
      )
      .await
      .map_err(|e| Self::failed(entity, "create", e))?;

    self
      .reconciler
      .reconcile_in(epoch, entity, Delta::Create(record.clone()));
    Ok(record)
  }

  pub async fn update(
    &self,
    entity: EntityType,
    id: &RecordId,
    payload: &Payload,
  ) -> SyncResult<Record> {
    self.ensure_online(entity, "update")?;
    let epoch = self.reconciler.epoch();

    let record = self
      .retry
      .retry_if(
        || self.remote.update(entity, id, payload),
        RemoteError::is_retryable,
      )
      .await
      .map_err(|e| Self::failed(entity, "update", e))?;

    self
      .reconciler
      .reconcile_in(epoch, entity, Delta::Update(record.clone()));
    Ok(record)
  }

  pub async fn delete(&self, entity: EntityType, id: &RecordId) -> SyncResult<RecordId> {
    self.ensure_online(entity, "delete")?;
    let epoch = self.reconciler.epoch();

    self
      .retry
      .retry_if(|| self.remote.remove(entity, id), RemoteError::is_retryable)
      .await
      .map_err(|e| Self::failed(entity, "delete", e))?;

    self
      .reconciler
      .reconcile_in(epoch, entity, Delta::Delete(id.clone()));
    Ok(id.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::connection::{MonitorSettings, NetworkEvent};
  use crate::notify::ChangeNotifier;
  use crate::reconcile::SnapshotCache;
  use crate::testing::MockStore;
  use serde_json::{json, Map};
  use std::time::Duration;

  fn record(id: i64, name: &str) -> Record {
    let mut fields = Map::new();
    fields.insert("name".into(), json!(name));
    Record::new(id, fields)
  }

  fn payload(name: &str) -> Payload {
    let mut fields = Map::new();
    fields.insert("name".into(), json!(name));
    fields
  }

  struct Fixture {
    store: Arc<MockStore>,
    gateway: MutationGateway,
    connection: Arc<ConnectionMonitor>,
    reconciler: Arc<Reconciler>,
    cache: Arc<SnapshotCache>,
  }

  fn fixture() -> Fixture {
    let store = Arc::new(MockStore::with_rows(
      EntityType::Projects,
      vec![record(1, "A"), record(2, "B")],
    ));
    let cache = Arc::new(SnapshotCache::new());
    let reconciler = Arc::new(Reconciler::new(
      cache.clone(),
      Arc::new(ChangeNotifier::new()),
    ));
    reconciler.replace(EntityType::Projects, store.rows(EntityType::Projects));
    let connection = Arc::new(ConnectionMonitor::new(
      store.clone(),
      MonitorSettings::default(),
    ));
    let gateway = MutationGateway::new(
      store.clone(),
      RetryPolicy::new(3, Duration::from_millis(1000)),
      connection.clone(),
      reconciler.clone(),
    );
    Fixture {
      store,
      gateway,
      connection,
      reconciler,
      cache,
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_create_prepends_canonical_record() {
    let f = fixture();
    f.store.set_next_id(3);

    let created = f
      .gateway
      .create(EntityType::Projects, &payload("C"))
      .await
      .unwrap();

    assert_eq!(created, record(3, "C"));
    assert_eq!(
      f.reconciler.snapshot(EntityType::Projects),
      vec![record(3, "C"), record(1, "A"), record(2, "B")]
    );
  }

  #[tokio::test(start_paused = true)]
  async fn test_update_invalidates_cache() {
    let f = fixture();
    assert!(f.cache.is_valid("projects"));

    f.gateway
      .update(EntityType::Projects, &RecordId::Int(2), &payload("B2"))
      .await
      .unwrap();

    assert!(!f.cache.is_valid("projects"));
    assert_eq!(
      f.reconciler.snapshot(EntityType::Projects),
      vec![record(1, "A"), record(2, "B2")]
    );
  }

  #[tokio::test(start_paused = true)]
  async fn test_delete_removes_exactly_one() {
    let f = fixture();
    let deleted = f
      .gateway
      .delete(EntityType::Projects, &RecordId::Int(1))
      .await
      .unwrap();

    assert_eq!(deleted, RecordId::Int(1));
    assert_eq!(f.reconciler.snapshot(EntityType::Projects), vec![record(2, "B")]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_offline_fails_fast_without_remote_call() {
    let f = fixture();
    f.connection
      .handle_network_event(NetworkEvent::Offline)
      .await;

    let err = f
      .gateway
      .create(EntityType::Projects, &payload("C"))
      .await
      .unwrap_err();

    assert!(matches!(err, SyncError::Offline));
    assert_eq!(f.store.calls("insert"), 0);
    assert_eq!(f.reconciler.snapshot(EntityType::Projects).len(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_failed_write_propagates_and_leaves_state_untouched() {
    let f = fixture();
    let before = f.reconciler.snapshot(EntityType::Projects);
    f.store
      .fail_next(3, RemoteError::new("service unavailable").with_status(503));

    let err = f
      .gateway
      .update(EntityType::Projects, &RecordId::Int(2), &payload("B2"))
      .await
      .unwrap_err();

    assert_eq!(f.store.calls("update"), 3);
    assert_eq!(
      err.remote().map(|e| e.message.as_str()),
      Some("service unavailable")
    );
    assert_eq!(f.reconciler.snapshot(EntityType::Projects), before);
    assert!(f.cache.is_valid("projects"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_constraint_violation_is_not_retried() {
    let f = fixture();
    f.store.fail_next(
      3,
      RemoteError::with_code("23505", "duplicate key value violates unique constraint")
        .with_status(409),
    );
    let started = tokio::time::Instant::now();

    let err = f
      .gateway
      .create(EntityType::Projects, &payload("A"))
      .await
      .unwrap_err();

    assert!(matches!(err, SyncError::Remote(_)));
    assert_eq!(f.store.calls("insert"), 1);
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(f.reconciler.snapshot(EntityType::Projects).len(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_write_landing_after_clear_is_not_applied() {
    let f = fixture();
    f.store.set_latency("insert", Duration::from_millis(500));

    let body = payload("C");
    let (created, ()) = tokio::join!(
      f.gateway.create(EntityType::Projects, &body),
      async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        f.reconciler.clear();
      }
    );

    assert!(created.is_ok());
    assert!(f.reconciler.snapshot(EntityType::Projects).is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_write_to_missing_collection_is_distinct() {
    let f = fixture();
    f.store.break_entity(
      EntityType::EquipmentBorrows,
      RemoteError::with_code("42P01", "relation does not exist"),
    );

    let err = f
      .gateway
      .create(EntityType::EquipmentBorrows, &payload("Crane"))
      .await
      .unwrap_err();

    assert!(matches!(err, SyncError::MissingCollection { .. }));
    assert_eq!(f.store.calls("insert"), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_update_of_unknown_local_id_still_succeeds() {
    let f = fixture();
    f.store.set_rows(EntityType::Projects, vec![record(1, "A"), record(2, "B"), record(7, "G")]);

    let updated = f
      .gateway
      .update(EntityType::Projects, &RecordId::Int(7), &payload("G2"))
      .await
      .unwrap();

    assert_eq!(updated, record(7, "G2"));
    // Local mirror never had id 7
    assert_eq!(f.reconciler.snapshot(EntityType::Projects).len(), 2);
  }
}
