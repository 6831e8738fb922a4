//! Bridge core: routing and channel reconciliation between WeeChat and Slack.
//!
//! ## Module Structure
//!
//! - `normalize`: strips WeeChat color and attribute codes
//! - `identity`: buffer name <-> Slack channel name mapping
//! - `filter`: per-buffer tag filters
//! - `reconciler`: keeps Slack channels in line with the desired set
//! - `dm`: live DM buffers and their confirmed channels
//! - `router`: event handling in both directions
//! - `runtime`: dispatch loops and the worker pool

pub mod dm;
pub mod filter;
pub mod identity;
pub mod normalize;
pub mod reconciler;
pub mod router;
pub mod runtime;

#[cfg(test)]
pub mod testing;

pub use dm::DmChannels;
pub use reconciler::Reconciler;
pub use router::Router;
pub use runtime::{dispatch, WorkerPool};
