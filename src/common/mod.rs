//! Common utilities and types shared across the application.

pub mod error;
pub mod messages;

// Re-export message types from messages module
pub use messages::{
    Buffer, MessageKind, NormalizedMessage, RelayEvent, SinkFile, SinkMessage, ACTION_SUB_TYPE,
    FILE_SHARE_SUB_TYPE,
};
