//! Canonical message types for bridge communication.
//!
//! This module defines the single source of truth for the event and message
//! types exchanged between the WeeChat relay, the bridge and Slack.

/// How a message is rendered on either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Plain message with an explicit author.
    Text,
    /// `/me`-style emphasis, also used for joins, parts and other server lines.
    Action,
    /// Notice emitted by the bridge itself (delivery or upload failures).
    Notice,
}

/// A message after escape stripping, on its way to Slack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMessage {
    /// Full name of the WeeChat buffer the line came from.
    pub source_channel: String,
    /// Slack channel name, filled in once the destination is resolved.
    pub sink_channel: Option<String>,
    /// Author shown on Slack (None for server lines).
    pub author: Option<String>,
    /// Plain text body.
    pub body: String,
    pub kind: MessageKind,
}

/// A WeeChat buffer as seen through the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffer {
    /// Pointer in `0x...` form (or a `gui_` symbolic pointer).
    pub pointer: String,
    /// Full name, e.g. `irc.libera.#rust` or `irc.libera.nick`.
    pub full_name: String,
}

/// Events delivered by the relay receive loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// `_buffer_line_added`: a new line was printed in a buffer.
    LineAdded {
        buffer_pointer: String,
        message: String,
        prefix: String,
        tags: Vec<String>,
    },
    /// `_buffer_opened`: a buffer was created.
    BufferOpened(Buffer),
    /// `_buffer_closing`: a buffer is about to be closed.
    BufferClosing(Buffer),
}

/// A file attached to a Slack message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkFile {
    pub name: String,
    pub mime_type: String,
    /// Private download URL (requires the bot token).
    pub url: String,
}

/// A real-time message event received from Slack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkMessage {
    pub channel_id: String,
    /// Author; None for bot and system messages.
    pub user_id: Option<String>,
    pub text: String,
    /// Slack message subtype (`me_message`, `message_changed`, ...).
    pub sub_type: Option<String>,
    pub timestamp: String,
    pub files: Vec<SinkFile>,
}

/// Slack subtype used for `/me` messages.
pub const ACTION_SUB_TYPE: &str = "me_message";

/// Slack subtype of a message carrying uploaded files.
pub const FILE_SHARE_SUB_TYPE: &str = "file_share";
