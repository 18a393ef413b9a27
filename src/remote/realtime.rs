//! Live-update channels over the hosted store's realtime websocket.
//!
//! Speaks the Phoenix channel framing: join a `realtime:<name>` topic with a
//! `postgres_changes` filter for one table, heartbeat periodically, and forward
//! row changes as push events.

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

use super::{Channel, ChannelMessage, ChannelStatus, PushEvent, PushKind};
use crate::entity::Record;
use crate::error::RemoteError;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const JOIN_REF: &str = "1";

pub(super) struct JoinConfig {
  pub topic: String,
  pub schema: String,
  pub table: String,
  pub access_token: String,
}

/// Incoming Phoenix frame.
#[derive(Debug, Deserialize)]
struct PhxFrame {
  topic: String,
  event: String,
  #[serde(default)]
  payload: Value,
  #[serde(rename = "ref")]
  reference: Option<String>,
}

/// Row change body inside a `postgres_changes` frame.
#[derive(Debug, Deserialize)]
struct ChangeData {
  #[serde(rename = "type")]
  kind: PushKind,
  #[serde(default)]
  record: Option<Value>,
  #[serde(default)]
  old_record: Option<Value>,
}

/// Connect, join the topic and spawn the pump that feeds the returned channel.
pub(super) async fn open(url: Url, name: &str, join: JoinConfig) -> Result<Channel, RemoteError> {
  let (mut ws, _response) = connect_async(url.as_str())
    .await
    .map_err(|e| RemoteError::new(format!("realtime connection failed: {}", e)))?;

  let join_frame = json!({
    "topic": join.topic,
    "event": "phx_join",
    "payload": {
      "config": {
        "broadcast": { "self": false },
        "presence": { "key": "" },
        "postgres_changes": [
          { "event": "*", "schema": join.schema, "table": join.table }
        ]
      },
      "access_token": join.access_token
    },
    "ref": JOIN_REF
  });
  ws.send(Message::Text(join_frame.to_string().into()))
    .await
    .map_err(|e| RemoteError::new(format!("failed to join realtime topic: {}", e)))?;

  let (tx, rx) = mpsc::unbounded_channel();
  let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
  let topic = join.topic;

  tokio::spawn(async move {
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut next_ref: u64 = 2;

    loop {
      tokio::select! {
        _ = &mut shutdown_rx => {
          let leave = json!({
            "topic": topic,
            "event": "phx_leave",
            "payload": {},
            "ref": next_ref.to_string()
          });
          let _ = ws.send(Message::Text(leave.to_string().into())).await;
          let _ = ws.close(None).await;
          let _ = tx.send(ChannelMessage::Status(ChannelStatus::Closed));
          break;
        }
        _ = heartbeat.tick() => {
          let beat = json!({
            "topic": "phoenix",
            "event": "heartbeat",
            "payload": {},
            "ref": next_ref.to_string()
          });
          next_ref += 1;
          if let Err(e) = ws.send(Message::Text(beat.to_string().into())).await {
            let _ = tx.send(ChannelMessage::Status(ChannelStatus::Error(e.to_string())));
            break;
          }
        }
        incoming = ws.next() => {
          let message = match incoming {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<PhxFrame>(text.as_str()) {
              Ok(frame) if frame.topic == topic => translate(frame),
              Ok(_) => None,
              Err(e) => {
                warn!(error = %e, "undecodable realtime frame");
                None
              }
            },
            Some(Ok(Message::Close(_))) | None => {
              Some(ChannelMessage::Status(ChannelStatus::Closed))
            }
            Some(Ok(_)) => None,
            Some(Err(e)) => Some(ChannelMessage::Status(ChannelStatus::Error(e.to_string()))),
          };

          let Some(message) = message else { continue };
          let terminal = matches!(
            message,
            ChannelMessage::Status(ChannelStatus::Closed | ChannelStatus::Error(_))
          );
          if tx.send(message).is_err() || terminal {
            let _ = ws.close(None).await;
            break;
          }
        }
      }
    }
    debug!(%topic, "realtime pump stopped");
  });

  Ok(Channel {
    name: name.to_string(),
    messages: rx,
    shutdown: shutdown_tx,
  })
}

/// Map a frame on our topic to a channel message.
fn translate(frame: PhxFrame) -> Option<ChannelMessage> {
  match frame.event.as_str() {
    "phx_reply" if frame.reference.as_deref() == Some(JOIN_REF) => {
      let status = frame.payload.get("status").and_then(Value::as_str);
      if status == Some("ok") {
        Some(ChannelMessage::Status(ChannelStatus::Subscribed))
      } else {
        let reason = frame
          .payload
          .get("response")
          .map(Value::to_string)
          .unwrap_or_else(|| "join rejected".to_string());
        Some(ChannelMessage::Status(ChannelStatus::Error(reason)))
      }
    }
    "postgres_changes" => {
      let data: ChangeData = match serde_json::from_value(frame.payload["data"].clone()) {
        Ok(data) => data,
        Err(e) => {
          warn!(error = %e, "malformed postgres_changes payload");
          return None;
        }
      };
      Some(ChannelMessage::Event(PushEvent {
        kind: data.kind,
        new: data.record.and_then(as_record),
        old: data.old_record.and_then(as_record),
      }))
    }
    "phx_error" => Some(ChannelMessage::Status(ChannelStatus::Error(
      "channel error".to_string(),
    ))),
    "phx_close" => Some(ChannelMessage::Status(ChannelStatus::Closed)),
    "system" if frame.payload.get("status").and_then(Value::as_str) == Some("error") => {
      let message = frame
        .payload
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("system error")
        .to_string();
      Some(ChannelMessage::Status(ChannelStatus::Error(message)))
    }
    _ => None,
  }
}

/// Rows without an id (e.g. an empty `old_record`) carry nothing we can apply.
fn as_record(value: Value) -> Option<Record> {
  serde_json::from_value(value).ok()
}
