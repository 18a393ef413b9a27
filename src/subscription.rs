//! Live-update channels, at most one per entity type.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::entity::EntityType;
use crate::error::{SyncError, SyncResult};
use crate::reconcile::Reconciler;
use crate::remote::{Channel, ChannelMessage, ChannelStatus, RemoteStore};

/// Lifecycle of a registered subscription.
///
/// Closed and errored channels are dropped from the registry right away, so
/// only these two states are ever observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
  /// Channel is being opened or waiting for the join acknowledgement
  Pending,
  /// Channel confirmed and delivering events
  Active,
}

/// Snapshot of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
  pub entity: EntityType,
  pub channel: String,
  pub state: SubscriptionState,
}

struct Entry {
  channel: String,
  state: SubscriptionState,
  shutdown: Option<oneshot::Sender<()>>,
  task: Option<JoinHandle<()>>,
}

type Entries = Arc<Mutex<HashMap<EntityType, Entry>>>;

fn lock(entries: &Entries) -> MutexGuard<'_, HashMap<EntityType, Entry>> {
  entries.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SubscriptionRegistry {
  remote: Arc<dyn RemoteStore>,
  reconciler: Arc<Reconciler>,
  entries: Entries,
  counter: AtomicU64,
}

impl SubscriptionRegistry {
  pub fn new(remote: Arc<dyn RemoteStore>, reconciler: Arc<Reconciler>) -> Self {
    Self {
      remote,
      reconciler,
      entries: Arc::new(Mutex::new(HashMap::new())),
      counter: AtomicU64::new(0),
    }
  }

  /// Unique per call so a quick resubscribe never reuses a closing channel.
  fn channel_name(&self, entity: EntityType) -> String {
    let n = self.counter.fetch_add(1, Ordering::Relaxed);
    format!(
      "{}-changes-{}-{}",
      entity.table_name(),
      Utc::now().timestamp_millis(),
      n
    )
  }

  /// Start watching `entity`.
  ///
  /// Returns `Ok(false)` without opening anything when a subscription for the
  /// type already exists. The entry is claimed before the channel is opened,
  /// so concurrent calls cannot both open one.
  pub async fn subscribe(&self, entity: EntityType) -> SyncResult<bool> {
    let name = {
      let mut entries = lock(&self.entries);
      if entries.contains_key(&entity) {
        debug!(%entity, "already subscribed");
        return Ok(false);
      }
      let name = self.channel_name(entity);
      entries.insert(
        entity,
        Entry {
          channel: name.clone(),
          state: SubscriptionState::Pending,
          shutdown: None,
          task: None,
        },
      );
      name
    };

    let claim = Claim {
      entries: &self.entries,
      entity,
      channel: &name,
      armed: true,
    };

    let channel = match self.remote.open_channel(&name, entity).await {
      Ok(channel) => channel,
      Err(err) => {
        warn!(%entity, error = %err, "failed to open channel");
        return Err(SyncError::Subscription {
          entity,
          message: err.message,
        });
      }
    };

    let Channel {
      messages, shutdown, ..
    } = channel;

    let orphaned = {
      let mut entries = lock(&self.entries);
      match entries.get_mut(&entity) {
        Some(entry) if entry.channel == name => {
          let task = tokio::spawn(pump(
            entity,
            name.clone(),
            messages,
            Arc::clone(&self.reconciler),
            Arc::clone(&self.entries),
          ));
          entry.shutdown = Some(shutdown);
          entry.task = Some(task);
          None
        }
        _ => Some(shutdown),
      }
    };

    match orphaned {
      None => {
        claim.disarm();
        info!(%entity, channel = %name, "subscribed");
        Ok(true)
      }
      Some(shutdown) => {
        // Torn down while the channel was opening.
        let _ = shutdown.send(());
        Ok(false)
      }
    }
  }

  /// Close the subscription for `entity`, if any.
  pub fn unsubscribe(&self, entity: EntityType) -> bool {
    let entry = lock(&self.entries).remove(&entity);
    match entry {
      Some(entry) => {
        close(entity, entry);
        true
      }
      None => false,
    }
  }

  /// Tear down every channel and empty the registry. Returns how many closed.
  pub fn unsubscribe_all(&self) -> usize {
    let drained: Vec<(EntityType, Entry)> = lock(&self.entries).drain().collect();
    let count = drained.len();
    for (entity, entry) in drained {
      close(entity, entry);
    }
    if count > 0 {
      info!(count, "all subscriptions closed");
    }
    count
  }

  pub fn state(&self, entity: EntityType) -> Option<SubscriptionState> {
    lock(&self.entries).get(&entity).map(|e| e.state)
  }

  pub fn handles(&self) -> Vec<SubscriptionHandle> {
    let mut handles: Vec<_> = lock(&self.entries)
      .iter()
      .map(|(entity, e)| SubscriptionHandle {
        entity: *entity,
        channel: e.channel.clone(),
        state: e.state,
      })
      .collect();
    handles.sort_by_key(|h| h.entity);
    handles
  }

  pub fn len(&self) -> usize {
    lock(&self.entries).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl Drop for SubscriptionRegistry {
  fn drop(&mut self) {
    self.unsubscribe_all();
  }
}

fn close(entity: EntityType, entry: Entry) {
  if let Some(shutdown) = entry.shutdown {
    let _ = shutdown.send(());
  }
  if let Some(task) = entry.task {
    task.abort();
  }
  debug!(%entity, channel = %entry.channel, "subscription closed");
}

/// A slot claimed by an in-progress `subscribe`.
///
/// Released on drop unless disarmed, so a failed or abandoned open never
/// leaves a `Pending` entry behind.
struct Claim<'a> {
  entries: &'a Entries,
  entity: EntityType,
  channel: &'a str,
  armed: bool,
}

impl Claim<'_> {
  fn disarm(mut self) {
    self.armed = false;
  }
}

impl Drop for Claim<'_> {
  fn drop(&mut self) {
    if self.armed {
      remove_if_current(self.entries, self.entity, self.channel);
    }
  }
}

fn remove_if_current(entries: &Entries, entity: EntityType, channel: &str) {
  let mut entries = lock(entries);
  if entries.get(&entity).is_some_and(|e| e.channel == channel) {
    entries.remove(&entity);
  }
}

/// Route channel traffic into the reconciler until the channel ends.
async fn pump(
  entity: EntityType,
  channel: String,
  mut messages: mpsc::UnboundedReceiver<ChannelMessage>,
  reconciler: Arc<Reconciler>,
  entries: Entries,
) {
  while let Some(message) = messages.recv().await {
    match message {
      ChannelMessage::Event(event) => reconciler.apply_push(entity, event),
      ChannelMessage::Status(ChannelStatus::Subscribed) => {
        if let Some(entry) = lock(&entries).get_mut(&entity) {
          if entry.channel == channel {
            entry.state = SubscriptionState::Active;
          }
        }
        debug!(%entity, %channel, "channel active");
      }
      ChannelMessage::Status(ChannelStatus::Closed) => {
        info!(%entity, %channel, "channel closed");
        break;
      }
      ChannelMessage::Status(ChannelStatus::Error(message)) => {
        warn!(%entity, %channel, error = %message, "channel error");
        break;
      }
    }
  }
  remove_if_current(&entries, entity, &channel);
}
