//! Configuration type definitions.

use std::time::Duration;

use serde::Deserialize;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub relay: RelayConfig,
    pub slack: SlackConfig,
    /// Static buffer -> channel mappings.
    #[serde(default)]
    pub channels: Vec<ChannelMapping>,
    /// Ordered prefix table for private buffers.
    #[serde(default)]
    pub direct_messages: Vec<PrefixMappingConfig>,
    /// Tag filters per buffer.
    #[serde(default)]
    pub filters: Vec<TagFilterConfig>,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub bridge: BridgeTuning,
}

/// WeeChat relay connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    #[serde(default)]
    pub use_tls: bool,
}

/// Slack credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct SlackConfig {
    /// Bot token (`xoxb-`): posting, identity, file downloads.
    pub bot_token: String,
    /// User token (`xoxp-`): channel management and message deletion.
    pub user_token: String,
    /// App-level token (`xapp-`) for Socket Mode.
    pub app_token: String,
}

/// Maps a WeeChat buffer to a Slack channel.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelMapping {
    /// Buffer full name, e.g. `irc.libera.#rust`.
    pub source: String,
    /// Slack channel name, e.g. `rust`.
    pub sink: String,
}

/// One entry of the private buffer prefix table.
#[derive(Debug, Clone, Deserialize)]
pub struct PrefixMappingConfig {
    /// WeeChat prefix, e.g. `irc.libera.`.
    pub source_prefix: String,
    /// Slack prefix, e.g. `dm-`.
    pub sink_prefix: String,
}

/// Tag filter groups for one buffer.
#[derive(Debug, Clone, Deserialize)]
pub struct TagFilterConfig {
    /// Buffer full name the filters apply to.
    pub buffer: String,
    /// Groups of `+`-joined tags, e.g. `irc_join` or `irc_privmsg+nick_bot`.
    pub tags: Vec<String>,
}

/// Upload backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadProvider {
    #[default]
    None,
    GcfUpload,
    Lolisafe,
    Pomf,
}

/// Upload configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadConfig {
    #[serde(default)]
    pub provider: UploadProvider,
    pub gcf_upload: Option<UploadEndpoint>,
    pub lolisafe: Option<UploadEndpoint>,
    pub pomf: Option<UploadEndpoint>,
}

impl UploadConfig {
    /// Endpoint settings for the selected provider.
    pub fn endpoint(&self) -> Option<&UploadEndpoint> {
        match self.provider {
            UploadProvider::None => None,
            UploadProvider::GcfUpload => self.gcf_upload.as_ref(),
            UploadProvider::Lolisafe => self.lolisafe.as_ref(),
            UploadProvider::Pomf => self.pomf.as_ref(),
        }
    }
}

/// Base URL and credential of an upload host.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadEndpoint {
    pub url: String,
    /// API key (gcf_upload) or token (lolisafe, pomf).
    pub token: String,
}

/// Bridge tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeTuning {
    /// Maximum number of events processed concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Bounded wait for buffers and DM channels.
    #[serde(default = "default_resolve_timeout_ms")]
    pub resolve_timeout_ms: u64,
    /// Delay before archiving a closed DM channel (defaults to the resolve timeout).
    pub dm_archive_grace_ms: Option<u64>,
    /// Fixed delay between reconnection attempts.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    /// Time allowed for in-flight work on shutdown.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_workers() -> usize {
    32
}

fn default_resolve_timeout_ms() -> u64 {
    5000
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

impl Default for BridgeTuning {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            resolve_timeout_ms: default_resolve_timeout_ms(),
            dm_archive_grace_ms: None,
            reconnect_delay_secs: default_reconnect_delay_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl BridgeTuning {
    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    pub fn dm_archive_grace(&self) -> Duration {
        Duration::from_millis(self.dm_archive_grace_ms.unwrap_or(self.resolve_timeout_ms))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
