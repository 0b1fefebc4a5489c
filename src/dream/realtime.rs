//! Realtime change feed over WebSocket.
//!
//! Joins one channel with `postgres_changes` filters, keeps it alive with a
//! heartbeat and forwards decoded row changes over an mpsc channel.

use crate::dream::error::SdkError;
use crate::dream::message::models::Message;
use anyhow::{Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

pub type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
pub type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    fn parse(tag: &str) -> Option<Self> {
        match tag {
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// One row-level change.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
    pub record: Option<Value>,
    pub old_record: Option<Value>,
}

impl ChangeEvent {
    /// Decode the new row as a message.
    pub fn message(&self) -> Result<Message, SdkError> {
        let row = self
            .record
            .clone()
            .ok_or_else(|| SdkError::Decode(format!("{:?} on {} without record", self.kind, self.table)))?;
        Message::from_row(row)
    }

    /// Id of the affected row, from the new or the old record.
    pub fn row_id(&self) -> Option<&str> {
        self.record
            .as_ref()
            .and_then(|r| r.get("id"))
            .or_else(|| self.old_record.as_ref().and_then(|r| r.get("id")))
            .and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    Connected,
    Change(ChangeEvent),
    Disconnected(String),
}

/// A table subscription with an optional equality filter.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub table: String,
    /// e.g. `receiver_id=eq.<id>`
    pub filter: Option<String>,
}

impl Subscription {
    pub fn eq(table: &str, column: &str, value: &str) -> Self {
        Self {
            table: table.to_string(),
            filter: Some(format!("{column}=eq.{value}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Base URL, e.g. `wss://project.example.co`
    pub url: String,
    pub anon_key: String,
    pub access_token: String,
    pub topic: String,
    pub subscriptions: Vec<Subscription>,
    pub heartbeat: Duration,
}

impl RealtimeConfig {
    /// Messages addressed to or sent by `user_id`.
    pub fn for_messages(url: &str, anon_key: &str, access_token: &str, user_id: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            access_token: access_token.to_string(),
            topic: format!("realtime:messages:{user_id}"),
            subscriptions: vec![
                Subscription::eq("messages", "receiver_id", user_id),
                Subscription::eq("messages", "sender_id", user_id),
            ],
            heartbeat: HEARTBEAT_INTERVAL,
        }
    }

    fn socket_url(&self) -> String {
        format!(
            "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            self.url, self.anon_key
        )
    }
}

pub fn join_frame(config: &RealtimeConfig, msg_ref: u64) -> String {
    let changes: Vec<Value> = config
        .subscriptions
        .iter()
        .map(|s| {
            let mut entry = json!({ "event": "*", "schema": "public", "table": s.table });
            if let Some(filter) = &s.filter {
                entry["filter"] = json!(filter);
            }
            entry
        })
        .collect();
    json!({
        "topic": config.topic,
        "event": "phx_join",
        "payload": {
            "config": { "postgres_changes": changes },
            "access_token": config.access_token,
        },
        "ref": msg_ref.to_string(),
        "join_ref": msg_ref.to_string(),
    })
    .to_string()
}

pub fn heartbeat_frame(msg_ref: u64) -> String {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": msg_ref.to_string(),
    })
    .to_string()
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Change(ChangeEvent),
    /// Reply to a join or heartbeat.
    Reply { topic: String, ok: bool },
    Closed { topic: String },
    Other,
}

/// Decode one text frame.
pub fn parse_frame(text: &str) -> Result<Frame, SdkError> {
    let env: Envelope = serde_json::from_str(text)
        .map_err(|e| SdkError::Decode(format!("realtime frame: {e}")))?;
    match env.event.as_str() {
        "postgres_changes" => {
            let data = env.payload.get("data").unwrap_or(&env.payload);
            let table = data
                .get("table")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let tag = data
                .get("eventType")
                .or_else(|| data.get("type"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            let kind = ChangeKind::parse(tag)
                .ok_or_else(|| SdkError::Decode(format!("unknown change type {tag:?}")))?;
            let non_empty = |key: &str| {
                data.get(key)
                    .filter(|v| v.as_object().is_some_and(|o| !o.is_empty()))
                    .cloned()
            };
            Ok(Frame::Change(ChangeEvent {
                table,
                kind,
                record: non_empty("new").or_else(|| non_empty("record")),
                old_record: non_empty("old").or_else(|| non_empty("old_record")),
            }))
        }
        "phx_reply" => {
            let ok = env.payload.get("status").and_then(Value::as_str) == Some("ok");
            Ok(Frame::Reply { topic: env.topic, ok })
        }
        "phx_close" | "phx_error" => Ok(Frame::Closed { topic: env.topic }),
        _ => Ok(Frame::Other),
    }
}

/// A live subscription. Dropping it stops the socket tasks.
pub struct RealtimeConnection {
    pub events: mpsc::Receiver<RealtimeEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl RealtimeConnection {
    pub fn close(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for RealtimeConnection {
    fn drop(&mut self) {
        self.close();
    }
}

pub struct RealtimeClient {
    config: RealtimeConfig,
    next_ref: Arc<AtomicU64>,
}

impl RealtimeClient {
    pub fn new(config: RealtimeConfig) -> Self {
        Self {
            config,
            next_ref: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Open the socket, join the channel and start the reader and heartbeat.
    pub async fn connect(&self) -> Result<RealtimeConnection> {
        info!("[Realtime] 🔗 connecting to {}", self.config.url);
        let (ws_stream, response) = connect_async(self.config.socket_url())
            .await
            .context("realtime connect failed")?;
        info!("[Realtime] ✅ WebSocket connected, status: {}", response.status());

        let (write, read) = ws_stream.split();
        let writer = Arc::new(Mutex::new(write));

        let join = join_frame(&self.config, self.next_ref.fetch_add(1, Ordering::SeqCst));
        debug!("[Realtime] 📤 join: {}", join);
        writer
            .lock()
            .await
            .send(WsMessage::Text(join))
            .await
            .context("failed to join realtime channel")?;

        let (tx, rx) = mpsc::channel(256);

        let writer_for_heartbeat = writer.clone();
        let refs = self.next_ref.clone();
        let every = self.config.heartbeat;
        let heartbeat = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let frame = heartbeat_frame(refs.fetch_add(1, Ordering::SeqCst));
                let mut w = writer_for_heartbeat.lock().await;
                if w.send(WsMessage::Text(frame)).await.is_err() {
                    warn!("[Realtime] 💔 heartbeat failed, stopping");
                    break;
                }
            }
        });

        let topic = self.config.topic.clone();
        let reader = tokio::spawn(async move {
            let reason = handle_frames(read, &topic, &tx).await;
            let _ = tx.send(RealtimeEvent::Disconnected(reason)).await;
        });

        Ok(RealtimeConnection {
            events: rx,
            tasks: vec![heartbeat, reader],
        })
    }
}

/// Read loop; returns why it ended.
async fn handle_frames(
    mut read: WsReader,
    topic: &str,
    tx: &mpsc::Sender<RealtimeEvent>,
) -> String {
    while let Some(msg_result) = read.next().await {
        match msg_result {
            Ok(WsMessage::Text(text)) => match parse_frame(&text) {
                Ok(Frame::Change(change)) => {
                    debug!("[Realtime] 📥 {:?} on {}", change.kind, change.table);
                    if tx.send(RealtimeEvent::Change(change)).await.is_err() {
                        return "receiver dropped".into();
                    }
                }
                Ok(Frame::Reply { topic: t, ok }) if t == topic => {
                    if ok {
                        info!("[Realtime] ✅ joined {}", t);
                        if tx.send(RealtimeEvent::Connected).await.is_err() {
                            return "receiver dropped".into();
                        }
                    } else {
                        error!("[Realtime] ❌ join rejected: {}", text);
                        return "join rejected".into();
                    }
                }
                Ok(Frame::Closed { topic: t }) if t == topic => {
                    warn!("[Realtime] channel {} closed by server", t);
                    return "channel closed".into();
                }
                Ok(_) => {}
                Err(e) => warn!("[Realtime] ignoring frame: {}", e),
            },
            Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => {}
            Ok(WsMessage::Close(frame)) => {
                warn!("[Realtime] 👋 connection closed: {:?}", frame);
                return "connection closed".into();
            }
            Err(e) => {
                error!("[Realtime] WebSocket error: {}", e);
                return format!("websocket error: {e}");
            }
            _ => {}
        }
    }
    "stream ended".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RealtimeConfig {
        RealtimeConfig::for_messages("wss://rt.example.co/", "anon", "jwt", "me")
    }

    #[test]
    fn join_frame_carries_filters_and_token() {
        let frame: Value = serde_json::from_str(&join_frame(&config(), 1)).unwrap();
        assert_eq!(frame["event"], "phx_join");
        assert_eq!(frame["topic"], "realtime:messages:me");
        assert_eq!(frame["payload"]["access_token"], "jwt");
        let changes = frame["payload"]["config"]["postgres_changes"].as_array().unwrap();
        assert_eq!(changes[0]["filter"], "receiver_id=eq.me");
        assert_eq!(changes[1]["filter"], "sender_id=eq.me");
        assert_eq!(
            config().socket_url(),
            "wss://rt.example.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );
    }

    #[test]
    fn parses_insert_into_message() {
        let text = json!({
            "topic": "realtime:messages:me",
            "event": "postgres_changes",
            "payload": {"data": {
                "table": "messages",
                "eventType": "INSERT",
                "new": {
                    "id": "m1", "sender_id": "luna", "receiver_id": "me",
                    "content": "hi", "created_at": "2025-06-01T10:00:00Z"
                },
                "old": {}
            }},
            "ref": null
        })
        .to_string();
        let Frame::Change(change) = parse_frame(&text).unwrap() else {
            panic!("expected a change");
        };
        assert_eq!(change.kind, ChangeKind::Insert);
        assert!(change.old_record.is_none());
        assert_eq!(change.row_id(), Some("m1"));
        let msg = change.message().unwrap();
        assert_eq!(msg.body, "hi");
        assert!(msg.read_at.is_none());
    }

    #[test]
    fn parses_replies_and_rejects_garbage() {
        let reply = r#"{"topic":"phoenix","event":"phx_reply","payload":{"status":"ok","response":{}},"ref":"2"}"#;
        assert_eq!(
            parse_frame(reply).unwrap(),
            Frame::Reply { topic: "phoenix".into(), ok: true }
        );
        assert!(parse_frame("not json").is_err());
        let bad = r#"{"topic":"t","event":"postgres_changes","payload":{"data":{"table":"messages","eventType":"TRUNCATE"}}}"#;
        assert!(parse_frame(bad).is_err());
    }

    #[test]
    fn delete_exposes_old_row_id() {
        let text = r#"{"topic":"t","event":"postgres_changes","payload":{"data":{"table":"messages","eventType":"DELETE","new":{},"old":{"id":"m9"}}}}"#;
        let Frame::Change(change) = parse_frame(text).unwrap() else {
            panic!("expected a change");
        };
        assert_eq!(change.kind, ChangeKind::Delete);
        assert_eq!(change.row_id(), Some("m9"));
        assert!(change.message().is_err());
    }
}
