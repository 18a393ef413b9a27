//! Boundary with the hosted store: fetch, mutate, probe and live channels.

mod realtime;
mod rest;

pub use rest::RestStore;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};

use crate::entity::{EntityType, Payload, Record, RecordId};
use crate::error::RemoteError;

/// Kind of remote-side change carried by a push event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushKind {
  #[serde(alias = "INSERT")]
  Insert,
  #[serde(alias = "UPDATE")]
  Update,
  #[serde(alias = "DELETE")]
  Delete,
}

/// A change notification from a live channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PushEvent {
  #[serde(rename = "eventType")]
  pub kind: PushKind,
  #[serde(default)]
  pub new: Option<Record>,
  #[serde(default)]
  pub old: Option<Record>,
}

/// Lifecycle status reported by a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
  Subscribed,
  Closed,
  Error(String),
}

/// Messages delivered by an open channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
  Event(PushEvent),
  Status(ChannelStatus),
}

/// An opened live-update channel.
///
/// Dropping or firing `shutdown` asks the transport to close the channel.
#[derive(Debug)]
pub struct Channel {
  pub name: String,
  pub messages: mpsc::UnboundedReceiver<ChannelMessage>,
  pub shutdown: oneshot::Sender<()>,
}

/// The remote store as seen by the sync core.
///
/// Every method returns a tagged result; the core never sees a half-filled
/// `{data, error}` pair.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
  /// All records of `entity`, newest first by creation time.
  async fn select(&self, entity: EntityType) -> Result<Vec<Record>, RemoteError>;

  /// Insert and return the canonical record.
  async fn insert(&self, entity: EntityType, payload: &Payload) -> Result<Record, RemoteError>;

  /// Patch `id` and return the canonical record.
  async fn update(
    &self,
    entity: EntityType,
    id: &RecordId,
    payload: &Payload,
  ) -> Result<Record, RemoteError>;

  async fn remove(&self, entity: EntityType, id: &RecordId) -> Result<(), RemoteError>;

  /// Minimal liveness check against `entity`.
  async fn probe(&self, entity: EntityType) -> Result<(), RemoteError>;

  /// Open a live channel named `name` carrying changes to `entity`.
  async fn open_channel(&self, name: &str, entity: EntityType) -> Result<Channel, RemoteError>;
}
