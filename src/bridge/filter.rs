//! Per-buffer tag filters.
//!
//! A filter group is a `+`-joined list of WeeChat line tags. A line is
//! dropped when every tag of at least one group for its buffer is present.

use std::collections::HashMap;

use crate::config::types::TagFilterConfig;

/// Tag filters keyed by buffer full name.
#[derive(Debug, Clone, Default)]
pub struct TagFilter {
    groups: HashMap<String, Vec<Vec<String>>>,
}

impl TagFilter {
    pub fn new(entries: &[TagFilterConfig]) -> Self {
        let mut groups: HashMap<String, Vec<Vec<String>>> = HashMap::new();
        for entry in entries {
            let parsed = entry.tags.iter().map(|group| {
                group
                    .split('+')
                    .map(|tag| tag.trim().to_string())
                    .filter(|tag| !tag.is_empty())
                    .collect::<Vec<_>>()
            });
            groups
                .entry(entry.buffer.clone())
                .or_default()
                .extend(parsed.filter(|group| !group.is_empty()));
        }
        Self { groups }
    }

    /// Returns `true` if the line should be dropped.
    pub fn should_filter(&self, buffer: &str, tags: &[String]) -> bool {
        let Some(groups) = self.groups.get(buffer) else {
            return false;
        };

        groups
            .iter()
            .any(|group| group.iter().all(|tag| tags.contains(tag)))
    }
}
