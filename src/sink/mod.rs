//! Slack side of the bridge.
//!
//! The bridge only talks to Slack through [`SinkDirectory`] (channel
//! lifecycle) and [`SinkMessaging`] (posting, deleting, files). The concrete
//! client lives in [`slack`], the real-time event loop in [`socket`].

pub mod markup;
pub mod slack;
pub mod socket;

use async_trait::async_trait;

use crate::common::error::SinkResult;
use crate::common::{MessageKind, SinkFile};

pub use slack::SlackClient;
pub use socket::SocketModeListener;

/// A Slack channel as listed by the directory. Never cached by the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkChannelRecord {
    pub id: String,
    pub name: String,
    pub is_archived: bool,
    /// The workspace default channel, which can never be archived.
    pub is_general: bool,
    pub member_ids: Vec<String>,
}

/// Channel lifecycle operations used by the reconciler.
#[async_trait]
pub trait SinkDirectory: Send + Sync {
    async fn list_channels(&self) -> SinkResult<Vec<SinkChannelRecord>>;

    /// Create a channel and return its id.
    async fn create_channel(&self, name: &str) -> SinkResult<String>;

    async fn archive_channel(&self, channel_id: &str) -> SinkResult<()>;

    async fn unarchive_channel(&self, channel_id: &str) -> SinkResult<()>;

    async fn invite_member(&self, channel_id: &str, user_id: &str) -> SinkResult<()>;

    /// User id of the identity that posts bridged messages.
    async fn current_user_id(&self) -> SinkResult<String>;
}

/// Message operations used by the router.
#[async_trait]
pub trait SinkMessaging: Send + Sync {
    /// Post into a channel addressed by name.
    async fn post_message(
        &self,
        channel: &str,
        author: Option<&str>,
        text: &str,
        kind: MessageKind,
    ) -> SinkResult<()>;

    async fn delete_message(&self, channel_id: &str, timestamp: &str) -> SinkResult<()>;

    /// Name of a channel addressed by id.
    async fn channel_name(&self, channel_id: &str) -> SinkResult<String>;

    async fn download_file(&self, file: &SinkFile) -> SinkResult<Vec<u8>>;
}
