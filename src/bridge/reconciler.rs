//! Drives the Slack channel directory towards a desired set of names.
//!
//! One pass:
//! 1. list the directory,
//! 2. archive managed channels that are no longer desired,
//! 3. create missing desired channels and unarchive archived ones,
//! 4. re-list if anything changed, then invite the bridge identity to every
//!    live managed channel it is not a member of.
//!
//! Failed mutations are logged and retried by the next pass.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tracing::{info, warn};

use crate::bridge::identity::PrefixMapping;
use crate::common::error::SinkResult;
use crate::sink::{SinkChannelRecord, SinkDirectory};

/// Outcome of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub archived: usize,
    pub created: usize,
    pub unarchived: usize,
    pub invited: usize,
    /// Channel names whose mutation failed this pass.
    pub failed: BTreeSet<String>,
}

impl ReconcileReport {
    pub fn mutations(&self) -> usize {
        self.archived + self.created + self.unarchived + self.invited
    }
}

pub struct Reconciler {
    directory: Arc<dyn SinkDirectory>,
    static_names: BTreeSet<String>,
    prefixes: PrefixMapping,
}

impl Reconciler {
    pub fn new(
        directory: Arc<dyn SinkDirectory>,
        static_names: BTreeSet<String>,
        prefixes: PrefixMapping,
    ) -> Self {
        Self {
            directory,
            static_names,
            prefixes,
        }
    }

    pub fn static_names(&self) -> &BTreeSet<String> {
        &self.static_names
    }

    pub fn prefixes(&self) -> &PrefixMapping {
        &self.prefixes
    }

    /// Whether the bridge may create or archive a channel of this name.
    pub fn is_managed(&self, name: &str) -> bool {
        self.static_names.contains(name) || self.prefixes.is_dm_sink_name(name)
    }

    /// Run one pass. Only listing failures abort the pass.
    pub async fn reconcile(&self, desired: &BTreeSet<String>) -> SinkResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let mut channels = self.directory.list_channels().await?;
        let mut archived_ids = HashSet::new();

        for channel in &channels {
            if desired.contains(&channel.name)
                || channel.is_general
                || channel.is_archived
                || !self.is_managed(&channel.name)
            {
                continue;
            }

            match self.directory.archive_channel(&channel.id).await {
                Ok(()) => {
                    info!(channel = %channel.name, "Archived channel");
                    archived_ids.insert(channel.id.clone());
                    report.archived += 1;
                }
                Err(e) => {
                    warn!(channel = %channel.name, "Failed to archive channel: {}", e);
                    report.failed.insert(channel.name.clone());
                }
            }
        }

        for name in desired {
            match channels.iter().find(|c| &c.name == name) {
                None => match self.directory.create_channel(name).await {
                    Ok(_) => {
                        info!(channel = %name, "Created channel");
                        report.created += 1;
                    }
                    Err(e) => {
                        warn!(channel = %name, "Failed to create channel: {}", e);
                        report.failed.insert(name.clone());
                    }
                },
                Some(channel) if channel.is_archived => {
                    match self.directory.unarchive_channel(&channel.id).await {
                        Ok(()) => {
                            info!(channel = %name, "Unarchived channel");
                            report.unarchived += 1;
                        }
                        Err(e) => {
                            warn!(channel = %name, "Failed to unarchive channel: {}", e);
                            report.failed.insert(name.clone());
                        }
                    }
                }
                Some(_) => {}
            }
        }

        if report.created + report.unarchived > 0 {
            channels = self.directory.list_channels().await?;
        }

        let member_id = self.directory.current_user_id().await?;
        for channel in channels.iter().filter(|c| self.needs_member(c, &member_id)) {
            if archived_ids.contains(&channel.id) {
                continue;
            }

            match self.directory.invite_member(&channel.id, &member_id).await {
                Ok(()) => {
                    info!(channel = %channel.name, "Joined bridge identity to channel");
                    report.invited += 1;
                }
                Err(e) => {
                    warn!(channel = %channel.name, "Failed to invite bridge identity: {}", e);
                    report.failed.insert(channel.name.clone());
                }
            }
        }

        Ok(report)
    }

    fn needs_member(&self, channel: &SinkChannelRecord, member_id: &str) -> bool {
        !channel.is_general
            && !channel.is_archived
            && self.is_managed(&channel.name)
            && !channel.member_ids.iter().any(|m| m == member_id)
    }
}
