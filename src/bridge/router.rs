//! Event routing between the WeeChat relay and Slack.
//!
//! Relay lines are classified by their IRC tags, filtered, normalized and
//! posted to the mapped Slack channel. Slack messages are unescaped and sent
//! to the mapped buffer as input; the Slack original is then deleted, so the
//! message comes back to Slack only through the relay's own echo.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::bridge::dm::DmChannels;
use crate::bridge::filter::TagFilter;
use crate::bridge::identity::PrefixMapping;
use crate::bridge::normalize::normalize;
use crate::common::error::{SinkError, UploadError};
use crate::common::{
    MessageKind, NormalizedMessage, RelayEvent, SinkFile, SinkMessage, ACTION_SUB_TYPE,
    FILE_SHARE_SUB_TYPE,
};
use crate::config::types::Config;
use crate::relay::SourceRelay;
use crate::sink::markup::MarkupResolver;
use crate::sink::SinkMessaging;
use crate::upload::Uploader;

/// Kind of a relay line, from its `irc_*` tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEventKind {
    Message,
    Join,
    Part,
    Quit,
    Mode,
    NickChange,
    Kick,
    Topic,
    NumericError,
}

impl SourceEventKind {
    /// Server events take precedence over `irc_privmsg`.
    pub fn classify(tags: &[String]) -> Option<Self> {
        let has = |tag: &str| tags.iter().any(|t| t == tag);

        if has("irc_join") {
            Some(Self::Join)
        } else if has("irc_part") {
            Some(Self::Part)
        } else if has("irc_quit") {
            Some(Self::Quit)
        } else if has("irc_mode") {
            Some(Self::Mode)
        } else if has("irc_nick") || has("irc_nick_back") {
            Some(Self::NickChange)
        } else if has("irc_kick") {
            Some(Self::Kick)
        } else if has("irc_topic") {
            Some(Self::Topic)
        } else if has("irc_401") || has("irc_402") {
            Some(Self::NumericError)
        } else if has("irc_privmsg") {
            Some(Self::Message)
        } else {
            None
        }
    }
}

#[derive(Debug, Error)]
enum AttachmentError {
    #[error("Failed to download file ({0})")]
    Download(#[from] SinkError),

    #[error(transparent)]
    Upload(#[from] UploadError),
}

pub struct Router {
    relay: Arc<dyn SourceRelay>,
    messaging: Arc<dyn SinkMessaging>,
    uploader: Arc<dyn Uploader>,
    dm: Arc<DmChannels>,
    filter: TagFilter,
    prefixes: PrefixMapping,
    markup: MarkupResolver,
    /// Buffer full name -> Slack channel name.
    to_sink: HashMap<String, String>,
    /// Slack channel name -> buffer full name.
    to_source: HashMap<String, String>,
    /// Identity whose Slack messages are never relayed back.
    bridge_user_id: String,
    resolve_timeout: Duration,
    tasks: TaskTracker,
}

impl Router {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        relay: Arc<dyn SourceRelay>,
        messaging: Arc<dyn SinkMessaging>,
        uploader: Arc<dyn Uploader>,
        dm: Arc<DmChannels>,
        bridge_user_id: String,
        tasks: TaskTracker,
    ) -> Self {
        let to_sink = config
            .channels
            .iter()
            .map(|m| (m.source.clone(), m.sink.clone()))
            .collect();
        let to_source = config
            .channels
            .iter()
            .map(|m| (m.sink.clone(), m.source.clone()))
            .collect();

        Self {
            relay,
            messaging,
            uploader,
            dm,
            filter: TagFilter::new(&config.filters),
            prefixes: PrefixMapping::from_config(&config.direct_messages),
            markup: MarkupResolver::new(),
            to_sink,
            to_source,
            bridge_user_id,
            resolve_timeout: config.bridge.resolve_timeout(),
            tasks,
        }
    }

    /// Runs to completion once admitted; shutdown waits for it in the drain.
    pub async fn handle_relay_event(&self, event: RelayEvent) {
        match event {
            RelayEvent::LineAdded {
                buffer_pointer,
                message,
                prefix,
                tags,
            } => {
                self.forward_line(&buffer_pointer, &message, &prefix, &tags)
                    .await
            }
            RelayEvent::BufferOpened(buffer) => {
                if let Some(sink) = self.dm.open(&buffer.full_name).await {
                    debug!(buffer = %buffer.full_name, channel = %sink, "DM buffer opened");
                }
            }
            RelayEvent::BufferClosing(buffer) => self.dm.close(&buffer.full_name).await,
        }
    }

    async fn forward_line(
        &self,
        pointer: &str,
        message: &str,
        prefix: &str,
        tags: &[String],
    ) {
        let Some(kind) = SourceEventKind::classify(tags) else {
            return;
        };

        let Some(buffer) = self.relay.wait_for_buffer(pointer, self.resolve_timeout).await else {
            error!(pointer = %pointer, "Timed out while waiting for buffer");
            return;
        };

        if self.filter.should_filter(&buffer.full_name, tags) {
            debug!(buffer = %buffer.full_name, "Line filtered");
            return;
        }

        let mut line = compose(kind, &buffer.full_name, message, prefix, tags);
        if line.body.trim().is_empty() {
            return;
        }

        let Some(sink) = self.resolve_sink(&buffer.full_name).await else {
            return;
        };

        let result = self
            .messaging
            .post_message(&sink, line.author.as_deref(), &line.body, line.kind)
            .await;
        if let Err(e) = result {
            warn!(buffer = %line.source_channel, channel = %sink, "Failed to post message: {}", e);
            return;
        }
        line.sink_channel = Some(sink);
        debug!(buffer = %line.source_channel, channel = ?line.sink_channel, "Relayed line");
    }

    /// Static mapping first, then a confirmed DM channel.
    async fn resolve_sink(&self, full_name: &str) -> Option<String> {
        if let Some(sink) = self.to_sink.get(full_name) {
            return Some(sink.clone());
        }

        let sink = self.prefixes.to_sink_name(full_name)?;
        if self.dm.wait_confirmed(&sink, self.resolve_timeout).await {
            return Some(sink);
        }

        warn!(channel = %sink, "DM channel not ready, forcing reconcile");
        let still_open = self
            .relay
            .list_buffers()
            .iter()
            .any(|b| b.full_name == full_name);
        self.dm.force_reconcile(full_name, still_open).await;
        if self.dm.wait_confirmed(&sink, self.resolve_timeout).await {
            return Some(sink);
        }

        error!(buffer = %full_name, channel = %sink, "Timed out while waiting for DM channel");
        None
    }

    pub async fn handle_sink_message(&self, message: SinkMessage, cancel: &CancellationToken) {
        let Some(user_id) = message.user_id.as_deref() else {
            return;
        };
        if user_id == self.bridge_user_id {
            return;
        }

        let kind = match message.sub_type.as_deref() {
            None | Some(FILE_SHARE_SUB_TYPE) => MessageKind::Text,
            Some(ACTION_SUB_TYPE) => MessageKind::Action,
            Some(other) => {
                debug!(sub_type = %other, "Ignoring Slack message");
                return;
            }
        };

        let channel = match self.messaging.channel_name(&message.channel_id).await {
            Ok(channel) => channel,
            Err(e) => {
                warn!(channel_id = %message.channel_id, "Failed to resolve channel: {}", e);
                return;
            }
        };

        let Some(target) = self.resolve_source(&channel).await else {
            debug!(channel = %channel, "Slack channel is not bridged");
            return;
        };

        // Nothing sent yet, so the Slack original stays visible.
        if cancel.is_cancelled() {
            debug!(channel = %channel, "Shutting down, leaving message in Slack");
            return;
        }

        let mut forwarded = false;
        let text = self.markup.unescape(&message.text);
        if !text.trim().is_empty() {
            let input = match kind {
                MessageKind::Action => format!("/me {}", text),
                _ => text,
            };
            if let Err(e) = self.relay.send_input(&target, &input).await {
                warn!(buffer = %target, "Failed to send input: {}", e);
                return;
            }
            forwarded = true;
        }

        for file in &message.files {
            match self.rehost(file).await {
                Ok(url) => match self.relay.send_input(&target, &url).await {
                    Ok(()) => forwarded = true,
                    Err(e) => warn!(buffer = %target, "Failed to send file link: {}", e),
                },
                Err(e) => {
                    warn!(file = %file.name, "Failed to relay attachment: {}", e);
                    let notice = self
                        .messaging
                        .post_message(&channel, None, &e.to_string(), MessageKind::Notice)
                        .await;
                    if let Err(e) = notice {
                        warn!(channel = %channel, "Failed to post notice: {}", e);
                    }
                }
            }
        }

        if forwarded {
            self.delete_original(message.channel_id, message.timestamp);
        }
    }

    /// DM channels first, then the static mapping, then an open private
    /// buffer the DM set missed (opened while the relay was reconnecting).
    async fn resolve_source(&self, sink: &str) -> Option<String> {
        if let Some(source) = self.dm.source_for(sink).await {
            return Some(source);
        }
        if let Some(source) = self.to_source.get(sink) {
            return Some(source.clone());
        }

        let guess = self.prefixes.to_source_name(sink)?;
        let buffers = self.relay.list_buffers();
        buffers
            .iter()
            .find(|b| b.full_name == guess)
            .or_else(|| {
                buffers
                    .iter()
                    .find(|b| self.prefixes.to_sink_name(&b.full_name).as_deref() == Some(sink))
            })
            .map(|b| b.full_name.clone())
    }

    async fn rehost(&self, file: &SinkFile) -> Result<String, AttachmentError> {
        let content = self.messaging.download_file(file).await?;
        let url = self
            .uploader
            .upload(&file.name, content, &file.mime_type)
            .await?;
        info!(file = %file.name, url = %url, "Uploaded attachment");
        Ok(url)
    }

    /// Runs on the tracker and is not cancelled: the input was already sent.
    fn delete_original(&self, channel_id: String, timestamp: String) {
        let messaging = Arc::clone(&self.messaging);
        self.tasks.spawn(async move {
            if let Err(e) = messaging.delete_message(&channel_id, &timestamp).await {
                warn!(channel_id = %channel_id, ts = %timestamp, "Failed to delete message: {}", e);
            }
        });
    }
}

/// Build the Slack-side message for one relay line.
fn compose(
    kind: SourceEventKind,
    full_name: &str,
    message: &str,
    prefix: &str,
    tags: &[String],
) -> NormalizedMessage {
    let body = normalize(message);
    let (author, body, kind) = match kind {
        SourceEventKind::Message if tags.iter().any(|t| t == "irc_action") => {
            (None, body, MessageKind::Action)
        }
        SourceEventKind::Message => (Some(normalize(prefix)), body, MessageKind::Text),
        other => (None, describe(other, full_name, tags).unwrap_or(body), MessageKind::Action),
    };

    NormalizedMessage {
        source_channel: full_name.to_string(),
        sink_channel: None,
        author,
        body,
        kind,
    }
}

/// Short phrasing for membership events; `None` keeps WeeChat's own text.
fn describe(kind: SourceEventKind, full_name: &str, tags: &[String]) -> Option<String> {
    let nick = tags.iter().find_map(|t| t.strip_prefix("nick_"))?;
    // `irc.<server>.<channel>`
    let channel = full_name.splitn(3, '.').nth(2).unwrap_or(full_name);

    match kind {
        SourceEventKind::Join => Some(format!("{} joined {}", nick, channel)),
        SourceEventKind::Part => Some(format!("{} left {}", nick, channel)),
        SourceEventKind::Quit => Some(format!("{} quit", nick)),
        _ => None,
    }
}
