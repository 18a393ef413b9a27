//! View-facing entry point of the sync core.

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::cache::DEFAULT_TTL;
use crate::config::SyncSettings;
use crate::connection::{ConnectionMonitor, ConnectionState, MonitorSettings, NetworkEvent};
use crate::entity::{EntityType, Payload, Record, RecordId};
use crate::error::{RemoteError, SyncResult};
use crate::loader::CollectionLoader;
use crate::mutation::MutationGateway;
use crate::notify::{CallbackError, ChangeNotifier, ListenerId};
use crate::reconcile::{Reconciler, SnapshotCache};
use crate::remote::RemoteStore;
use crate::retry::RetryPolicy;
use crate::store::LoadStatus;
use crate::subscription::{SubscriptionHandle, SubscriptionRegistry};

/// Authentication signal consumed from the session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
  SignedIn,
  SignedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerSettings {
  pub retry: RetryPolicy,
  pub cache_ttl: ChronoDuration,
  pub monitor: MonitorSettings,
}

impl Default for ManagerSettings {
  fn default() -> Self {
    Self {
      retry: RetryPolicy::default(),
      cache_ttl: DEFAULT_TTL,
      monitor: MonitorSettings::default(),
    }
  }
}

impl TryFrom<&SyncSettings> for ManagerSettings {
  type Error = color_eyre::Report;

  fn try_from(settings: &SyncSettings) -> Result<Self, Self::Error> {
    Ok(Self {
      retry: settings.retry_policy(),
      cache_ttl: settings.cache_ttl()?,
      monitor: settings.monitor_settings(),
    })
  }
}

/// Keeps a local mirror of the remote collections consistent.
///
/// Owns every component of the core and wires them together. Subscriptions
/// are never opened implicitly; call [`subscribe`](Self::subscribe).
pub struct DatabaseManager {
  cache: Arc<SnapshotCache>,
  notifier: Arc<ChangeNotifier>,
  reconciler: Arc<Reconciler>,
  connection: Arc<ConnectionMonitor>,
  loader: CollectionLoader,
  mutations: MutationGateway,
  subscriptions: SubscriptionRegistry,
}

impl DatabaseManager {
  pub fn new(remote: Arc<dyn RemoteStore>, settings: ManagerSettings) -> Self {
    let cache = Arc::new(SnapshotCache::with_default_ttl(settings.cache_ttl));
    let notifier = Arc::new(ChangeNotifier::new());
    let reconciler = Arc::new(Reconciler::new(cache.clone(), notifier.clone()));
    let connection = Arc::new(ConnectionMonitor::new(remote.clone(), settings.monitor));

    let loader = CollectionLoader::new(
      remote.clone(),
      settings.retry,
      reconciler.clone(),
      cache.clone(),
    );
    let mutations = MutationGateway::new(
      remote.clone(),
      settings.retry,
      connection.clone(),
      reconciler.clone(),
    );
    let subscriptions = SubscriptionRegistry::new(remote, reconciler.clone());

    Self {
      cache,
      notifier,
      reconciler,
      connection,
      loader,
      mutations,
      subscriptions,
    }
  }

  // Reads

  /// Snapshot of the current local collection.
  pub fn get_collection(&self, entity: EntityType) -> Vec<Record> {
    self.reconciler.snapshot(entity)
  }

  pub fn load_status(&self, entity: EntityType) -> LoadStatus {
    self.reconciler.status(entity)
  }

  pub fn cache(&self) -> &SnapshotCache {
    &self.cache
  }

  // Change notification

  pub fn on_change<F>(&self, entity: EntityType, callback: F) -> ListenerId
  where
    F: Fn(EntityType) -> Result<(), CallbackError> + Send + Sync + 'static,
  {
    self.notifier.on_change(entity, callback)
  }

  pub fn on_any_change<F>(&self, callback: F) -> ListenerId
  where
    F: Fn(EntityType) -> Result<(), CallbackError> + Send + Sync + 'static,
  {
    self.notifier.on_any_change(callback)
  }

  pub fn remove_listener(&self, id: ListenerId) -> bool {
    self.notifier.remove_listener(id)
  }

  // Loading

  pub async fn load(&self, entity: EntityType) -> LoadStatus {
    self.loader.load(entity).await
  }

  pub async fn ensure_loaded(&self, entity: EntityType) -> LoadStatus {
    self.loader.ensure_loaded(entity).await
  }

  /// Load every collection. Never fails; see each type's status.
  pub async fn load_all_data(&self) -> Vec<(EntityType, LoadStatus)> {
    self.loader.load_all().await
  }

  // Writes

  pub async fn create(&self, entity: EntityType, payload: &Payload) -> SyncResult<Record> {
    self.mutations.create(entity, payload).await
  }

  pub async fn update(
    &self,
    entity: EntityType,
    id: &RecordId,
    payload: &Payload,
  ) -> SyncResult<Record> {
    self.mutations.update(entity, id, payload).await
  }

  pub async fn delete(&self, entity: EntityType, id: &RecordId) -> SyncResult<RecordId> {
    self.mutations.delete(entity, id).await
  }

  // Live updates

  pub async fn subscribe(&self, entity: EntityType) -> SyncResult<bool> {
    self.subscriptions.subscribe(entity).await
  }

  pub fn unsubscribe(&self, entity: EntityType) -> bool {
    self.subscriptions.unsubscribe(entity)
  }

  pub fn unsubscribe_all(&self) -> usize {
    self.subscriptions.unsubscribe_all()
  }

  pub fn subscriptions(&self) -> Vec<SubscriptionHandle> {
    self.subscriptions.handles()
  }

  // Connectivity

  pub async fn check_connection(&self) -> Result<(), RemoteError> {
    self.connection.check_connection().await
  }

  pub async fn handle_network_event(&self, event: NetworkEvent) {
    self.connection.handle_network_event(event).await
  }

  pub fn is_online(&self) -> bool {
    self.connection.is_online()
  }

  pub fn connection_state(&self) -> ConnectionState {
    self.connection.state()
  }

  pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
    self.connection.subscribe()
  }

  // Lifecycle

  pub fn handle_session(&self, status: SessionStatus) {
    if status == SessionStatus::SignedOut {
      info!("session ended, tearing down");
      self.teardown();
    }
  }

  /// Close every channel, drop the cache and empty all collections.
  pub fn teardown(&self) {
    self.subscriptions.unsubscribe_all();
    self.reconciler.clear();
  }
}
