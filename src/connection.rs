//! Online/offline tracking and the reachability probe.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::entity::EntityType;
use crate::error::RemoteError;
use crate::remote::RemoteStore;

/// What the connection indicator currently shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Indicator {
  Hidden,
  Checking,
  Connected,
  Disconnected(String),
}

impl Indicator {
  pub fn is_visible(&self) -> bool {
    !matches!(self, Indicator::Hidden)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
  pub online: bool,
  pub indicator: Indicator,
}

/// OS-level network transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
  Online,
  Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
  pub probe_entity: EntityType,
  pub indicator_hide_delay: Duration,
}

impl Default for MonitorSettings {
  fn default() -> Self {
    Self {
      probe_entity: EntityType::Projects,
      indicator_hide_delay: Duration::from_millis(3000),
    }
  }
}

/// Tracks reachability of the remote store.
///
/// Starts out optimistic (online, indicator hidden). State changes are
/// published on a watch channel so listeners see every transition.
pub struct ConnectionMonitor {
  remote: Arc<dyn RemoteStore>,
  settings: MonitorSettings,
  state: Arc<watch::Sender<ConnectionState>>,
  /// Bumped on every indicator change so a stale hide timer does nothing.
  generation: Arc<AtomicU64>,
}

impl ConnectionMonitor {
  pub fn new(remote: Arc<dyn RemoteStore>, settings: MonitorSettings) -> Self {
    let (state, _) = watch::channel(ConnectionState {
      online: true,
      indicator: Indicator::Hidden,
    });
    Self {
      remote,
      settings,
      state: Arc::new(state),
      generation: Arc::new(AtomicU64::new(0)),
    }
  }

  pub fn is_online(&self) -> bool {
    self.state.borrow().online
  }

  pub fn state(&self) -> ConnectionState {
    self.state.borrow().clone()
  }

  /// Receive every future state change.
  pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
    self.state.subscribe()
  }

  fn publish(&self, online: bool, indicator: Indicator) -> u64 {
    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
    self.state.send_replace(ConnectionState { online, indicator });
    generation
  }

  /// Probe the remote store and update the online state.
  ///
  /// A not-found reply still proves the store is reachable.
  pub async fn check_connection(&self) -> Result<(), RemoteError> {
    let online = self.is_online();
    self.publish(online, Indicator::Checking);

    match self.remote.probe(self.settings.probe_entity).await {
      Err(e) if !e.is_not_found() => {
        warn!(error = %e, "connection check failed");
        self.publish(false, Indicator::Disconnected(e.message.clone()));
        Err(e)
      }
      _ => {
        debug!("connection check succeeded");
        let generation = self.publish(true, Indicator::Connected);
        self.schedule_hide(generation);
        Ok(())
      }
    }
  }

  /// Hide the indicator after the configured delay, unless it changed since.
  fn schedule_hide(&self, generation: u64) {
    let state = Arc::clone(&self.state);
    let current = Arc::clone(&self.generation);
    let delay = self.settings.indicator_hide_delay;

    tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      if current.load(Ordering::SeqCst) == generation {
        state.send_modify(|s| s.indicator = Indicator::Hidden);
      }
    });
  }

  /// React to an OS-level network transition.
  ///
  /// Going offline is applied immediately without touching the network; coming
  /// back online triggers a fresh probe.
  pub async fn handle_network_event(&self, event: NetworkEvent) {
    match event {
      NetworkEvent::Offline => {
        info!("network went offline");
        self.publish(false, Indicator::Disconnected("offline".to_string()));
      }
      NetworkEvent::Online => {
        info!("network back online, probing");
        // The probe result is reflected in the published state.
        let _ = self.check_connection().await;
      }
    }
  }
}
