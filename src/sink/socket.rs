//! Slack Socket Mode receive loop.
//!
//! Every envelope is acknowledged by echoing its `envelope_id`; `message`
//! events are forwarded as [`SinkMessage`]s.

use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ConstantBuilder};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::common::error::SinkResult;
use crate::common::{SinkFile, SinkMessage};
use crate::sink::slack::SlackClient;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    envelope_id: Option<String>,
    #[serde(default)]
    payload: Option<EventPayload>,
    /// Present on `disconnect` envelopes.
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventPayload {
    event: Option<MessageEvent>,
}

#[derive(Debug, Deserialize)]
struct MessageEvent {
    #[serde(rename = "type")]
    kind: String,
    channel: Option<String>,
    user: Option<String>,
    #[serde(default)]
    text: String,
    subtype: Option<String>,
    ts: Option<String>,
    #[serde(default)]
    files: Vec<FileObject>,
}

#[derive(Debug, Deserialize)]
struct FileObject {
    name: Option<String>,
    mimetype: Option<String>,
    url_private_download: Option<String>,
    url_private: Option<String>,
}

/// What to do with one frame.
#[derive(Debug, PartialEq, Eq)]
enum Frame {
    /// Acknowledge, then forward the message if any.
    Event {
        envelope_id: Option<String>,
        message: Option<SinkMessage>,
    },
    /// Slack asked us to reconnect.
    Disconnect(String),
    Ignore,
}

/// Why a session ended.
enum SessionEnd {
    Cancelled,
    Reconnect,
}

pub struct SocketModeListener {
    client: Arc<SlackClient>,
    events: mpsc::Sender<SinkMessage>,
    reconnect_delay: Duration,
}

impl SocketModeListener {
    pub fn new(
        client: Arc<SlackClient>,
        events: mpsc::Sender<SinkMessage>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            client,
            events,
            reconnect_delay,
        }
    }

    /// Receive events until cancelled, reconnecting with a fixed delay.
    pub async fn run(self, cancel: CancellationToken) {
        let mut delays = ConstantBuilder::default()
            .with_delay(self.reconnect_delay)
            .without_max_times()
            .build();

        loop {
            match self.session(&cancel).await {
                Ok(SessionEnd::Cancelled) => {
                    info!("Slack event loop stopped");
                    return;
                }
                Ok(SessionEnd::Reconnect) => debug!("Reopening Socket Mode session"),
                Err(e) => {
                    warn!("Slack socket error: {}", e);
                    let delay = delays.next().unwrap_or(self.reconnect_delay);
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn session(&self, cancel: &CancellationToken) -> SinkResult<SessionEnd> {
        let url = self.client.open_socket_url().await?;
        let (stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (mut writer, mut reader) = stream.split();
        info!("Connected to Slack Socket Mode");

        loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let _ = writer.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Cancelled);
                }
                message = reader.next() => message,
            };

            let text = match message {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Ping(data))) => {
                    writer.send(Message::Pong(data)).await?;
                    continue;
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(tungstenite::Error::ConnectionClosed.into())
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            };

            match parse_frame(text.as_str()) {
                Frame::Event {
                    envelope_id,
                    message,
                } => {
                    if let Some(id) = envelope_id {
                        let ack = serde_json::json!({ "envelope_id": id }).to_string();
                        writer.send(Message::Text(ack.into())).await?;
                    }
                    if let Some(message) = message {
                        if self.events.send(message).await.is_err() {
                            return Ok(SessionEnd::Cancelled);
                        }
                    }
                }
                Frame::Disconnect(reason) => {
                    info!(reason = %reason, "Slack requested reconnect");
                    return Ok(SessionEnd::Reconnect);
                }
                Frame::Ignore => {}
            }
        }
    }
}

fn parse_frame(text: &str) -> Frame {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!("Unparseable Socket Mode frame: {}", e);
            return Frame::Ignore;
        }
    };

    match envelope.kind.as_str() {
        "disconnect" => Frame::Disconnect(envelope.reason.unwrap_or_default()),
        "hello" => Frame::Ignore,
        _ => Frame::Event {
            envelope_id: envelope.envelope_id,
            message: envelope
                .payload
                .and_then(|p| p.event)
                .and_then(to_sink_message),
        },
    }
}

fn to_sink_message(event: MessageEvent) -> Option<SinkMessage> {
    if event.kind != "message" {
        return None;
    }

    let files = event
        .files
        .into_iter()
        .filter_map(|file| {
            Some(SinkFile {
                url: file.url_private_download.or(file.url_private)?,
                name: file.name.unwrap_or_else(|| "file".to_string()),
                mime_type: file
                    .mimetype
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
            })
        })
        .collect();

    Some(SinkMessage {
        channel_id: event.channel?,
        user_id: event.user,
        text: event.text,
        sub_type: event.subtype,
        timestamp: event.ts?,
        files,
    })
}
