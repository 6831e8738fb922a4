//! Mapping between WeeChat buffer names and Slack channel names.
//!
//! Private buffers (e.g. `irc.libera.somenick`) get a derived Slack channel
//! through an ordered prefix table: the first entry whose WeeChat prefix
//! matches wins. Buffers whose remainder is itself a channel (`#`/`&`) are
//! not private and must be mapped statically.

use crate::config::types::PrefixMappingConfig;

/// Maximum Slack channel name length.
pub const MAX_CHANNEL_NAME_LENGTH: usize = 80;

/// Leading characters of a multi-user channel (RFC 1459).
const CHANNEL_SIGILS: [char; 2] = ['#', '&'];

/// One `(source_prefix, sink_prefix)` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixPair {
    pub source_prefix: String,
    pub sink_prefix: String,
}

/// Ordered prefix table for private buffers.
#[derive(Debug, Clone, Default)]
pub struct PrefixMapping {
    pairs: Vec<PrefixPair>,
}

impl PrefixMapping {
    pub fn new(pairs: Vec<PrefixPair>) -> Self {
        Self { pairs }
    }

    pub fn from_config(entries: &[PrefixMappingConfig]) -> Self {
        Self::new(
            entries
                .iter()
                .map(|entry| PrefixPair {
                    source_prefix: entry.source_prefix.clone(),
                    sink_prefix: entry.sink_prefix.clone(),
                })
                .collect(),
        )
    }

    /// Slack channel name for a private WeeChat buffer.
    pub fn to_sink_name(&self, source_full_name: &str) -> Option<String> {
        for pair in &self.pairs {
            let Some(rest) = source_full_name.strip_prefix(pair.source_prefix.as_str()) else {
                continue;
            };

            let name = sanitize(rest);
            if name.starts_with(CHANNEL_SIGILS) {
                return None;
            }
            return Some(format!("{}{}", pair.sink_prefix, name));
        }

        None
    }

    /// WeeChat buffer name for a derived Slack channel.
    pub fn to_source_name(&self, sink_full_name: &str) -> Option<String> {
        self.pairs.iter().find_map(|pair| {
            sink_full_name
                .strip_prefix(pair.sink_prefix.as_str())
                .map(|rest| format!("{}{}", pair.source_prefix, sanitize(rest)))
        })
    }

    /// Whether a Slack channel name lives in the derived (DM) namespace.
    pub fn is_dm_sink_name(&self, sink_name: &str) -> bool {
        self.pairs
            .iter()
            .any(|pair| sink_name.starts_with(pair.sink_prefix.as_str()))
    }

    /// Index pairs `(earlier, later)` where the earlier source prefix is a
    /// prefix of the later one, so the later entry can never match.
    pub fn shadowed_entries(&self) -> Vec<(usize, usize)> {
        let mut shadowed = Vec::new();
        for (i, earlier) in self.pairs.iter().enumerate() {
            for (j, later) in self.pairs.iter().enumerate().skip(i + 1) {
                if later.source_prefix.starts_with(earlier.source_prefix.as_str()) {
                    shadowed.push((i, j));
                }
            }
        }
        shadowed
    }
}

/// Make a name acceptable as a Slack channel name.
///
/// Lowercases, truncates to [`MAX_CHANNEL_NAME_LENGTH`] chars and replaces
/// anything outside `a-z 0-9 - _ # &` with `_`. Idempotent.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .flat_map(char::to_lowercase)
        .take(MAX_CHANNEL_NAME_LENGTH)
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '#' | '&') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
