//! Scripted in-memory remote store for unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::entity::{EntityType, Payload, Record, RecordId};
use crate::error::RemoteError;
use crate::remote::{Channel, ChannelMessage, RemoteStore};

struct MockChannel {
  name: String,
  entity: EntityType,
  tx: mpsc::UnboundedSender<ChannelMessage>,
  shutdown: oneshot::Receiver<()>,
}

#[derive(Default)]
pub struct MockStore {
  tables: Mutex<HashMap<EntityType, Vec<Record>>>,
  /// Errors handed out, one per call, before any call does real work
  failures: Mutex<VecDeque<RemoteError>>,
  /// Entity types whose every call fails
  broken: Mutex<HashMap<EntityType, RemoteError>>,
  calls: Mutex<HashMap<&'static str, usize>>,
  /// Time each call of an operation spends before doing anything
  latency: Mutex<HashMap<&'static str, Duration>>,
  channels: Mutex<Vec<MockChannel>>,
  next_id: AtomicI64,
}

impl MockStore {
  pub fn new() -> Self {
    Self {
      next_id: AtomicI64::new(100),
      ..Default::default()
    }
  }

  pub fn with_rows(entity: EntityType, rows: Vec<Record>) -> Self {
    let store = Self::new();
    store.set_rows(entity, rows);
    store
  }

  pub fn set_rows(&self, entity: EntityType, rows: Vec<Record>) {
    self.tables.lock().unwrap().insert(entity, rows);
  }

  pub fn rows(&self, entity: EntityType) -> Vec<Record> {
    self
      .tables
      .lock()
      .unwrap()
      .get(&entity)
      .cloned()
      .unwrap_or_default()
  }

  pub fn set_next_id(&self, id: i64) {
    self.next_id.store(id, Ordering::SeqCst);
  }

  /// Fail the next `n` calls of any kind with `err`.
  pub fn fail_next(&self, n: usize, err: RemoteError) {
    let mut failures = self.failures.lock().unwrap();
    failures.extend(std::iter::repeat(err).take(n));
  }

  /// Fail every call touching `entity`.
  pub fn break_entity(&self, entity: EntityType, err: RemoteError) {
    self.broken.lock().unwrap().insert(entity, err);
  }

  pub fn set_latency(&self, op: &'static str, latency: Duration) {
    self.latency.lock().unwrap().insert(op, latency);
  }

  pub fn calls(&self, op: &str) -> usize {
    self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
  }

  async fn enter(&self, op: &'static str, entity: EntityType) -> Result<(), RemoteError> {
    let latency = self.latency.lock().unwrap().get(op).copied();
    if let Some(latency) = latency {
      tokio::time::sleep(latency).await;
    }
    *self.calls.lock().unwrap().entry(op).or_default() += 1;
    if let Some(err) = self.failures.lock().unwrap().pop_front() {
      return Err(err);
    }
    if let Some(err) = self.broken.lock().unwrap().get(&entity) {
      return Err(err.clone());
    }
    Ok(())
  }

  pub fn channel_names(&self, entity: EntityType) -> Vec<String> {
    self
      .channels
      .lock()
      .unwrap()
      .iter()
      .filter(|c| c.entity == entity)
      .map(|c| c.name.clone())
      .collect()
  }

  /// Deliver `message` on the most recently opened channel for `entity`.
  pub fn push(&self, entity: EntityType, message: ChannelMessage) -> bool {
    self
      .channels
      .lock()
      .unwrap()
      .iter()
      .rev()
      .find(|c| c.entity == entity)
      .map(|c| c.tx.send(message).is_ok())
      .unwrap_or(false)
  }

  /// Whether the subscriber asked channel `name` to shut down.
  pub fn was_shut_down(&self, name: &str) -> bool {
    self
      .channels
      .lock()
      .unwrap()
      .iter_mut()
      .find(|c| c.name == name)
      .map(|c| {
        !matches!(
          c.shutdown.try_recv(),
          Err(oneshot::error::TryRecvError::Empty)
        )
      })
      .unwrap_or(false)
  }
}

#[async_trait]
impl RemoteStore for MockStore {
  async fn select(&self, entity: EntityType) -> Result<Vec<Record>, RemoteError> {
    self.enter("select", entity).await?;
    Ok(self.rows(entity))
  }

  async fn insert(&self, entity: EntityType, payload: &Payload) -> Result<Record, RemoteError> {
    self.enter("insert", entity).await?;
    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
    let record = Record::new(id, payload.clone());
    self
      .tables
      .lock()
      .unwrap()
      .entry(entity)
      .or_default()
      .insert(0, record.clone());
    Ok(record)
  }

  async fn update(
    &self,
    entity: EntityType,
    id: &RecordId,
    payload: &Payload,
  ) -> Result<Record, RemoteError> {
    self.enter("update", entity).await?;
    let mut tables = self.tables.lock().unwrap();
    let row = tables
      .entry(entity)
      .or_default()
      .iter_mut()
      .find(|r| &r.id == id)
      .ok_or_else(|| RemoteError::with_code("PGRST116", "no rows returned"))?;
    for (key, value) in payload {
      row.fields.insert(key.clone(), value.clone());
    }
    Ok(row.clone())
  }

  async fn remove(&self, entity: EntityType, id: &RecordId) -> Result<(), RemoteError> {
    self.enter("remove", entity).await?;
    self
      .tables
      .lock()
      .unwrap()
      .entry(entity)
      .or_default()
      .retain(|r| &r.id != id);
    Ok(())
  }

  async fn probe(&self, entity: EntityType) -> Result<(), RemoteError> {
    self.enter("probe", entity).await
  }

  async fn open_channel(&self, name: &str, entity: EntityType) -> Result<Channel, RemoteError> {
    self.enter("open_channel", entity).await?;
    let (tx, messages) = mpsc::unbounded_channel();
    let (shutdown, shutdown_rx) = oneshot::channel();
    self.channels.lock().unwrap().push(MockChannel {
      name: name.to_string(),
      entity,
      tx,
      shutdown: shutdown_rx,
    });
    Ok(Channel {
      name: name.to_string(),
      messages,
      shutdown,
    })
  }
}
