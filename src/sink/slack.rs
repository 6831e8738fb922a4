//! Slack Web API client.
//!
//! Posting, identity and file downloads use the bot token. Channel
//! management and deleting relayed originals use the user token, since
//! only a member user can archive channels or delete someone's message.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::common::error::{SinkError, SinkResult};
use crate::common::{MessageKind, SinkFile};
use crate::config::types::SlackConfig;
use crate::sink::markup::escape;
use crate::sink::{SinkChannelRecord, SinkDirectory, SinkMessaging};

const API_BASE: &str = "https://slack.com/api";

/// Page size for list methods.
const PAGE_LIMIT: &str = "200";

#[derive(Debug, Deserialize)]
struct AuthTestResponse {
    user_id: String,
    #[serde(default)]
    team: Option<String>,
    #[serde(default)]
    user: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChannelObject {
    id: String,
    name: String,
    #[serde(default)]
    is_archived: bool,
    #[serde(default)]
    is_general: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Debug, Deserialize)]
struct ChannelListResponse {
    #[serde(default)]
    channels: Vec<ChannelObject>,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

#[derive(Debug, Deserialize)]
struct MembersResponse {
    #[serde(default)]
    members: Vec<String>,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

#[derive(Debug, Deserialize)]
struct ChannelResponse {
    channel: ChannelObject,
}

#[derive(Debug, Deserialize)]
struct ConnectionsOpenResponse {
    url: String,
}

/// Which credential a call is made with.
#[derive(Debug, Clone, Copy)]
enum Token {
    Bot,
    User,
    App,
}

pub struct SlackClient {
    http: Client,
    config: SlackConfig,
    /// Channel id -> name, refreshed on every listing and on misses.
    names: RwLock<HashMap<String, String>>,
    bot_user_id: OnceCell<String>,
}

impl SlackClient {
    pub fn new(config: SlackConfig) -> Self {
        Self {
            http: Client::new(),
            config,
            names: RwLock::new(HashMap::new()),
            bot_user_id: OnceCell::new(),
        }
    }

    fn token(&self, token: Token) -> &str {
        match token {
            Token::Bot => &self.config.bot_token,
            Token::User => &self.config.user_token,
            Token::App => &self.config.app_token,
        }
    }

    /// Call a Web API method with form parameters and decode the payload.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        token: Token,
        params: &[(&str, &str)],
    ) -> SinkResult<T> {
        let body: Value = self
            .http
            .post(format!("{API_BASE}/{method}"))
            .bearer_auth(self.token(token))
            .form(params)
            .send()
            .await?
            .json()
            .await?;

        check_response(method, body)
    }

    /// Verify both tokens. Returns the bot's user id.
    pub async fn authenticate(&self) -> SinkResult<String> {
        let auth_failed = |who: &str, e: SinkError| {
            if e.is_auth_error() {
                SinkError::AuthFailed {
                    reason: format!("{} token rejected ({})", who, e),
                }
            } else {
                e
            }
        };

        let bot: AuthTestResponse = self
            .call("auth.test", Token::Bot, &[])
            .await
            .map_err(|e| auth_failed("bot", e))?;
        let user: AuthTestResponse = self
            .call("auth.test", Token::User, &[])
            .await
            .map_err(|e| auth_failed("user", e))?;

        info!(
            team = bot.team.as_deref().unwrap_or("?"),
            bot = bot.user.as_deref().unwrap_or("?"),
            user = user.user.as_deref().unwrap_or("?"),
            "Authenticated with Slack"
        );

        let id = bot.user_id;
        // Ignore a concurrent initialisation; both saw the same auth.test.
        let _ = self.bot_user_id.set(id.clone());
        Ok(id)
    }

    /// WebSocket URL for a new Socket Mode session.
    pub async fn open_socket_url(&self) -> SinkResult<String> {
        let response: ConnectionsOpenResponse =
            self.call("apps.connections.open", Token::App, &[]).await?;
        Ok(response.url)
    }

    /// All public channels, archived ones included.
    async fn fetch_channels(&self) -> SinkResult<Vec<ChannelObject>> {
        let mut channels = Vec::new();
        let mut cursor = String::new();
        loop {
            let page: ChannelListResponse = self
                .call(
                    "conversations.list",
                    Token::User,
                    &[
                        ("types", "public_channel"),
                        ("exclude_archived", "false"),
                        ("limit", PAGE_LIMIT),
                        ("cursor", cursor.as_str()),
                    ],
                )
                .await?;
            channels.extend(page.channels);

            if page.response_metadata.next_cursor.is_empty() {
                break;
            }
            cursor = page.response_metadata.next_cursor;
        }

        self.remember(channels.iter().map(|c| (c.id.clone(), c.name.clone())), true);
        Ok(channels)
    }

    async fn fetch_members(&self, channel_id: &str) -> SinkResult<Vec<String>> {
        let mut members = Vec::new();
        let mut cursor = String::new();
        loop {
            let page: MembersResponse = self
                .call(
                    "conversations.members",
                    Token::User,
                    &[("channel", channel_id), ("limit", PAGE_LIMIT), ("cursor", cursor.as_str())],
                )
                .await?;
            members.extend(page.members);

            if page.response_metadata.next_cursor.is_empty() {
                break;
            }
            cursor = page.response_metadata.next_cursor;
        }
        Ok(members)
    }

    fn remember(&self, entries: impl Iterator<Item = (String, String)>, replace: bool) {
        let mut names = self.names.write().unwrap_or_else(|e| e.into_inner());
        if replace {
            names.clear();
        }
        names.extend(entries);
    }

    fn cached_name(&self, channel_id: &str) -> Option<String> {
        self.names
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(channel_id)
            .cloned()
    }

    fn cached_id(&self, name: &str) -> Option<String> {
        self.names
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(id, _)| id.clone())
    }

    async fn channel_id(&self, name: &str) -> SinkResult<String> {
        if let Some(id) = self.cached_id(name) {
            return Ok(id);
        }
        self.fetch_channels().await?;
        self.cached_id(name).ok_or_else(|| SinkError::ChannelNotFound {
            channel: name.to_string(),
        })
    }
}

#[async_trait]
impl SinkDirectory for SlackClient {
    async fn list_channels(&self) -> SinkResult<Vec<SinkChannelRecord>> {
        let mut records = Vec::new();
        for channel in self.fetch_channels().await? {
            let member_ids = if channel.is_archived {
                Vec::new()
            } else {
                self.fetch_members(&channel.id).await?
            };
            records.push(SinkChannelRecord {
                id: channel.id,
                name: channel.name,
                is_archived: channel.is_archived,
                is_general: channel.is_general,
                member_ids,
            });
        }
        Ok(records)
    }

    async fn create_channel(&self, name: &str) -> SinkResult<String> {
        let response: ChannelResponse = self
            .call("conversations.create", Token::User, &[("name", name)])
            .await?;
        self.remember(
            std::iter::once((response.channel.id.clone(), response.channel.name)),
            false,
        );
        Ok(response.channel.id)
    }

    async fn archive_channel(&self, channel_id: &str) -> SinkResult<()> {
        self.call::<Value>("conversations.archive", Token::User, &[("channel", channel_id)])
            .await
            .map(drop)
    }

    async fn unarchive_channel(&self, channel_id: &str) -> SinkResult<()> {
        self.call::<Value>("conversations.unarchive", Token::User, &[("channel", channel_id)])
            .await
            .map(drop)
    }

    async fn invite_member(&self, channel_id: &str, user_id: &str) -> SinkResult<()> {
        self.call::<Value>(
            "conversations.invite",
            Token::User,
            &[("channel", channel_id), ("users", user_id)],
        )
        .await
        .map(drop)
    }

    async fn current_user_id(&self) -> SinkResult<String> {
        self.bot_user_id
            .get_or_try_init(|| async {
                let response: AuthTestResponse = self.call("auth.test", Token::Bot, &[]).await?;
                Ok::<_, SinkError>(response.user_id)
            })
            .await
            .cloned()
    }
}

#[async_trait]
impl SinkMessaging for SlackClient {
    async fn post_message(
        &self,
        channel: &str,
        author: Option<&str>,
        text: &str,
        kind: MessageKind,
    ) -> SinkResult<()> {
        let channel_id = self.channel_id(channel).await?;
        let (username, text) = render(author, text, kind);

        let mut params = vec![("channel", channel_id.as_str()), ("text", text.as_str())];
        if let Some(username) = username {
            params.push(("username", username));
        }

        self.call::<Value>("chat.postMessage", Token::Bot, &params)
            .await
            .map(drop)
    }

    async fn delete_message(&self, channel_id: &str, timestamp: &str) -> SinkResult<()> {
        self.call::<Value>(
            "chat.delete",
            Token::User,
            &[("channel", channel_id), ("ts", timestamp)],
        )
        .await
        .map(drop)
    }

    async fn channel_name(&self, channel_id: &str) -> SinkResult<String> {
        if let Some(name) = self.cached_name(channel_id) {
            return Ok(name);
        }
        debug!(channel_id, "Channel name cache miss");
        self.fetch_channels().await?;
        self.cached_name(channel_id)
            .ok_or_else(|| SinkError::ChannelNotFound {
                channel: channel_id.to_string(),
            })
    }

    async fn download_file(&self, file: &SinkFile) -> SinkResult<Vec<u8>> {
        let bytes = self
            .http
            .get(&file.url)
            .bearer_auth(&self.config.bot_token)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }
}

/// Check Slack's `ok` flag and decode the rest of the payload.
fn check_response<T: DeserializeOwned>(method: &str, body: Value) -> SinkResult<T> {
    if body.get("ok").and_then(Value::as_bool) != Some(true) {
        let error = body
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string);
        return Err(SinkError::api(method, error));
    }
    Ok(serde_json::from_value(body)?)
}

/// Display name and escaped text for a post.
fn render<'a>(author: Option<&'a str>, text: &str, kind: MessageKind) -> (Option<&'a str>, String) {
    let author = author.filter(|a| !a.trim().is_empty());
    match kind {
        MessageKind::Text => (author, escape(text)),
        MessageKind::Action => (author, format!("_{}_", escape(text))),
        MessageKind::Notice => (None, escape(text)),
    }
}
