//! Realtime websocket client speaking the Phoenix channel protocol.
//!
//! One socket is shared by every subscription. A background task owns the
//! socket, joins and leaves channels on request, sends heartbeats and routes
//! `postgres_changes` frames to the matching subscriptions. When the socket
//! goes away every open subscription is told `Closed`; the next subscribe
//! opens a fresh socket.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use murmur_types::events::{ChangeEvent, ChangeFilter, ChannelStatus, SubscriptionEvent};

use crate::error::{PlatformError, Result};
use crate::subscription::Subscription;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Realtime endpoint for a platform base URL.
pub fn websocket_url(base: &Url, api_key: &str) -> Result<Url> {
    let mut url = base.clone();
    let scheme = match base.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => return Err(PlatformError::Invalid(format!("unsupported scheme {}", other))),
    };
    url.set_scheme(scheme)
        .map_err(|_| PlatformError::Invalid(format!("cannot derive websocket url from {}", base)))?;
    let path = format!("{}/realtime/v1/websocket", base.path().trim_end_matches('/'));
    url.set_path(&path);
    url.query_pairs_mut()
        .clear()
        .append_pair("apikey", api_key)
        .append_pair("vsn", "1.0.0");
    Ok(url)
}

enum Command {
    Join {
        join_ref: String,
        topic: String,
        filters: Vec<ChangeFilter>,
        access_token: Option<String>,
        events: mpsc::Sender<SubscriptionEvent>,
    },
    Leave {
        join_ref: String,
    },
}

struct Connection {
    commands: mpsc::UnboundedSender<Command>,
    alive: CancellationToken,
}

impl Connection {
    fn is_open(&self) -> bool {
        !self.alive.is_cancelled() && !self.commands.is_closed()
    }
}

pub struct RealtimeClient {
    url: Url,
    connection: Mutex<Option<Connection>>,
    next_ref: AtomicU64,
}

impl RealtimeClient {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            connection: Mutex::new(None),
            next_ref: AtomicU64::new(1),
        }
    }

    pub async fn subscribe(
        &self,
        topic: &str,
        filters: Vec<ChangeFilter>,
        access_token: Option<String>,
    ) -> Result<Subscription> {
        let commands = self.connect().await?;

        let join_ref = self.next_ref.fetch_add(1, Ordering::Relaxed).to_string();
        let (tx, rx) = mpsc::channel(256);
        let token = CancellationToken::new();

        commands
            .send(Command::Join {
                join_ref: join_ref.clone(),
                topic: topic.to_string(),
                filters,
                access_token,
                events: tx,
            })
            .map_err(|_| PlatformError::Realtime("socket closed".into()))?;

        // Leave the channel once the subscription is dropped
        let cancelled = token.clone();
        tokio::spawn(async move {
            cancelled.cancelled().await;
            let _ = commands.send(Command::Leave { join_ref });
        });

        Ok(Subscription::new(topic, rx, token))
    }

    /// Command sender of the live socket, connecting first if needed.
    async fn connect(&self) -> Result<mpsc::UnboundedSender<Command>> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref().filter(|c| c.is_open()) {
            return Ok(conn.commands.clone());
        }

        let (ws, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| PlatformError::Realtime(format!("connect failed: {}", e)))?;
        info!("Realtime socket connected to {}", self.url.host_str().unwrap_or("platform"));

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let alive = CancellationToken::new();
        let guard = alive.clone().drop_guard();
        tokio::spawn(async move {
            let _guard = guard;
            run_socket(ws, commands_rx).await;
        });

        *slot = Some(Connection {
            commands: commands.clone(),
            alive,
        });
        Ok(commands)
    }
}

struct Channel {
    topic: String,
    filters: Vec<ChangeFilter>,
    events: mpsc::Sender<SubscriptionEvent>,
}

async fn run_socket<S>(ws: S, mut commands: mpsc::UnboundedReceiver<Command>)
where
    S: futures_util::Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let (mut sink, mut stream) = ws.split();
    let mut channels: HashMap<String, Channel> = HashMap::new();
    let mut heartbeat_ref: u64 = 0;

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                let frame = match command {
                    Command::Join { join_ref, topic, filters, access_token, events } => {
                        let frame = join_frame(&topic, &join_ref, &filters, access_token.as_deref());
                        debug!("Joining realtime channel {}", topic);
                        channels.insert(join_ref, Channel { topic, filters, events });
                        frame
                    }
                    Command::Leave { join_ref } => {
                        let Some(channel) = channels.remove(&join_ref) else { continue };
                        // Another local subscription may still use the topic
                        if channels.values().any(|c| c.topic == channel.topic) {
                            continue;
                        }
                        debug!("Leaving realtime channel {}", channel.topic);
                        frame(&channel_topic(&channel.topic), "phx_leave", json!({}), &join_ref)
                    }
                };
                if sink.send(Message::text(frame.to_string())).await.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                heartbeat_ref += 1;
                let beat = frame("phoenix", "heartbeat", json!({}), &format!("hb-{}", heartbeat_ref));
                if sink.send(Message::text(beat.to_string())).await.is_err() {
                    warn!("Realtime heartbeat failed, dropping socket");
                    break;
                }
            }
            message = stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => route(&mut channels, text.as_str()),
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Realtime socket closed by platform");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Realtime socket error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    for (_, channel) in channels.drain() {
        let _ = channel.events.try_send(SubscriptionEvent::Status(ChannelStatus::Closed));
    }
}

/// Deliver one incoming frame to the channels it concerns. Never waits on a
/// consumer: a full channel loses the event, a closed one is dropped.
fn route(channels: &mut HashMap<String, Channel>, text: &str) {
    let Some(incoming) = decode_frame(text) else {
        trace!("Ignoring realtime frame: {}", text);
        return;
    };

    let mut gone = Vec::new();
    match incoming {
        Incoming::Reply { reference, ok } => {
            if let Some(channel) = channels.get(&reference) {
                let status = if ok { ChannelStatus::Subscribed } else { ChannelStatus::ChannelError };
                if !deliver(channel, SubscriptionEvent::Status(status)) {
                    gone.push(reference);
                }
            }
        }
        Incoming::Change { topic, event } => {
            for (join_ref, channel) in channels.iter() {
                if channel_topic(&channel.topic) != topic || !channel.filters.iter().any(|f| f.matches(&event)) {
                    continue;
                }
                if !deliver(channel, SubscriptionEvent::Change(event.clone())) {
                    gone.push(join_ref.clone());
                }
            }
        }
        Incoming::Status { topic, status } => {
            for (join_ref, channel) in channels.iter() {
                if channel_topic(&channel.topic) == topic {
                    let open = deliver(channel, SubscriptionEvent::Status(status));
                    if !open || status == ChannelStatus::Closed {
                        gone.push(join_ref.clone());
                    }
                }
            }
        }
    }

    for join_ref in gone {
        channels.remove(&join_ref);
    }
}

/// Returns false once the subscriber has gone away.
fn deliver(channel: &Channel, event: SubscriptionEvent) -> bool {
    match channel.events.try_send(event) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("Realtime channel {} lagging, dropped an event", channel.topic);
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

fn channel_topic(topic: &str) -> String {
    format!("realtime:{}", topic)
}

fn frame(topic: &str, event: &str, payload: Value, reference: &str) -> Value {
    json!({
        "topic": topic,
        "event": event,
        "payload": payload,
        "ref": reference,
    })
}

fn join_frame(topic: &str, join_ref: &str, filters: &[ChangeFilter], access_token: Option<&str>) -> Value {
    let changes: Vec<Value> = filters
        .iter()
        .map(|f| {
            let mut clause = json!({
                "event": f.event.as_str(),
                "schema": "public",
                "table": f.table.as_str(),
            });
            if let Some(eq) = &f.column {
                clause["filter"] = Value::String(eq.to_string());
            }
            clause
        })
        .collect();

    let mut payload = json!({ "config": { "postgres_changes": changes } });
    if let Some(token) = access_token {
        payload["access_token"] = Value::String(token.to_string());
    }
    frame(&channel_topic(topic), "phx_join", payload, join_ref)
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
}

#[derive(Debug, PartialEq)]
enum Incoming {
    Reply { reference: String, ok: bool },
    Change { topic: String, event: ChangeEvent },
    Status { topic: String, status: ChannelStatus },
}

fn decode_frame(text: &str) -> Option<Incoming> {
    let raw: RawFrame = serde_json::from_str(text).ok()?;
    match raw.event.as_str() {
        "phx_reply" => {
            let reference = raw.reference?;
            let ok = raw.payload.get("status").and_then(Value::as_str) == Some("ok");
            Some(Incoming::Reply { reference, ok })
        }
        "postgres_changes" => {
            let data = raw.payload.get("data")?.clone();
            match serde_json::from_value::<ChangeEvent>(data) {
                Ok(event) => Some(Incoming::Change { topic: raw.topic, event }),
                Err(e) => {
                    debug!("Undecodable change on {}: {}", raw.topic, e);
                    None
                }
            }
        }
        "phx_close" => Some(Incoming::Status {
            topic: raw.topic,
            status: ChannelStatus::Closed,
        }),
        "phx_error" => Some(Incoming::Status {
            topic: raw.topic,
            status: ChannelStatus::ChannelError,
        }),
        _ => None,
    }
}
