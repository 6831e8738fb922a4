//! WeeChat relay side of the bridge.

pub mod buffers;
pub mod protocol;
pub mod weechat;

use std::time::Duration;

use async_trait::async_trait;

use crate::common::error::RelayResult;
use crate::common::Buffer;

pub use buffers::BufferRegistry;
pub use weechat::WeeChatRelay;

/// Operations the bridge needs from the relay connection.
#[async_trait]
pub trait SourceRelay: Send + Sync {
    /// Buffers currently known to the relay.
    fn list_buffers(&self) -> Vec<Buffer>;

    /// Look up a buffer by pointer. Accepts pointers with or without `0x`.
    fn buffer_by_pointer(&self, pointer: &str) -> Option<Buffer>;

    /// Wait up to `timeout` for a buffer to become known.
    async fn wait_for_buffer(&self, pointer: &str, timeout: Duration) -> Option<Buffer>;

    /// Send text to a buffer as if typed in it.
    async fn send_input(&self, full_name: &str, text: &str) -> RelayResult<()>;
}

/// Canonical pointer form: `0x`-prefixed, except symbolic `gui_` pointers.
pub fn normalize_pointer(pointer: &str) -> String {
    if pointer.starts_with("0x") || pointer.starts_with("gui_") {
        pointer.to_string()
    } else {
        format!("0x{}", pointer)
    }
}
