//! Live set of private (DM) buffers and their Slack channels.
//!
//! All mutations and the reconcile passes they trigger run under one async
//! mutex, so the last processed open or close wins. Closing a buffer only
//! schedules archival; until then the channel stays live and deliverable,
//! and a re-open within the grace window cancels it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::bridge::reconciler::Reconciler;
use crate::common::error::SinkResult;
use crate::common::Buffer;

#[derive(Debug, Default)]
struct DmState {
    /// Slack channel name -> WeeChat buffer full name.
    by_sink: BTreeMap<String, String>,
    /// Closed buffers whose channel waits out the grace window.
    closing: BTreeMap<String, String>,
    /// Bumped on every open and close of a channel name.
    generations: HashMap<String, u64>,
}

impl DmState {
    fn bump(&mut self, sink: &str) -> u64 {
        let generation = self.generations.entry(sink.to_string()).or_default();
        *generation += 1;
        *generation
    }
}

pub struct DmChannels {
    state: Mutex<DmState>,
    /// Channels the last reconcile pass left live and joined.
    confirmed: watch::Sender<BTreeSet<String>>,
    reconciler: Reconciler,
    archive_grace: Duration,
    tasks: TaskTracker,
    cancel: CancellationToken,
}

impl DmChannels {
    pub fn new(
        reconciler: Reconciler,
        archive_grace: Duration,
        tasks: TaskTracker,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            state: Mutex::new(DmState::default()),
            confirmed: watch::Sender::new(BTreeSet::new()),
            reconciler,
            archive_grace,
            tasks,
            cancel,
        }
    }

    /// Register the private buffers already open and run the startup pass.
    pub async fn seed(&self, buffers: &[Buffer]) -> SinkResult<()> {
        let mut state = self.state.lock().await;
        for buffer in buffers {
            if let Some(sink) = self.reconciler.prefixes().to_sink_name(&buffer.full_name) {
                debug!(buffer = %buffer.full_name, channel = %sink, "Found open DM buffer");
                state.by_sink.insert(sink, buffer.full_name.clone());
            }
        }
        info!(dms = state.by_sink.len(), "Reconciling Slack channels");
        self.reconcile(&state).await
    }

    /// A buffer was opened. Returns the Slack channel name if it is a DM.
    pub async fn open(&self, full_name: &str) -> Option<String> {
        let sink = self.reconciler.prefixes().to_sink_name(full_name)?;
        let mut state = self.state.lock().await;

        state.bump(&sink);
        state.closing.remove(&sink);
        let previous = state.by_sink.insert(sink.clone(), full_name.to_string());
        if previous.is_none() {
            info!(buffer = %full_name, channel = %sink, "Adding DM channel");
        }

        if !self.is_confirmed(&sink) {
            if let Err(e) = self.reconcile(&state).await {
                warn!(channel = %sink, "Failed to reconcile DM channel: {}", e);
            }
        }
        Some(sink)
    }

    /// A buffer is closing. Archival of its channel runs after the grace window.
    pub async fn close(self: &Arc<Self>, full_name: &str) {
        let Some(sink) = self.reconciler.prefixes().to_sink_name(full_name) else {
            return;
        };
        let mut state = self.state.lock().await;

        // Another buffer may have taken over the name since.
        if state.by_sink.get(&sink).map(String::as_str) != Some(full_name) {
            return;
        }
        state.by_sink.remove(&sink);
        state.closing.insert(sink.clone(), full_name.to_string());
        let generation = state.bump(&sink);
        info!(buffer = %full_name, channel = %sink, "Closing DM channel");
        drop(state);

        let this = Arc::clone(self);
        self.tasks.spawn(async move {
            tokio::select! {
                _ = this.cancel.cancelled() => return,
                _ = tokio::time::sleep(this.archive_grace) => {}
            }

            let mut state = this.state.lock().await;
            if state.generations.get(&sink) != Some(&generation) {
                debug!(channel = %sink, "DM reopened, keeping channel");
                return;
            }
            state.closing.remove(&sink);
            if let Err(e) = this.reconcile(&state).await {
                warn!(channel = %sink, "Failed to archive DM channel: {}", e);
            }
        });
    }

    /// Reconcile pass for a line whose channel is not confirmed. The buffer
    /// is registered only when it is still open and not closing.
    pub async fn force_reconcile(&self, full_name: &str, still_open: bool) {
        let Some(sink) = self.reconciler.prefixes().to_sink_name(full_name) else {
            return;
        };
        let mut state = self.state.lock().await;

        let known = state.by_sink.contains_key(&sink) || state.closing.contains_key(&sink);
        if still_open && !known {
            info!(buffer = %full_name, channel = %sink, "Adding missed DM channel");
            state.bump(&sink);
            state.by_sink.insert(sink.clone(), full_name.to_string());
        }
        if let Err(e) = self.reconcile(&state).await {
            warn!(channel = %sink, "Failed to reconcile DM channel: {}", e);
        }
    }

    /// Wait until `sink` is confirmed live, at most `timeout`.
    pub async fn wait_confirmed(&self, sink: &str, timeout: Duration) -> bool {
        let mut rx = self.confirmed.subscribe();
        let confirmed = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|set| set.contains(sink))).await,
            Ok(Ok(_))
        );
        confirmed
    }

    /// WeeChat buffer currently bound to a DM channel.
    pub async fn source_for(&self, sink: &str) -> Option<String> {
        self.state.lock().await.by_sink.get(sink).cloned()
    }

    fn is_confirmed(&self, sink: &str) -> bool {
        self.confirmed.borrow().contains(sink)
    }

    /// One reconcile pass for the current state. Caller holds the lock.
    async fn reconcile(&self, state: &DmState) -> SinkResult<()> {
        let desired: BTreeSet<String> = self
            .reconciler
            .static_names()
            .iter()
            .chain(state.by_sink.keys())
            .chain(state.closing.keys())
            .cloned()
            .collect();

        let report = self.reconciler.reconcile(&desired).await?;
        if report.mutations() > 0 || !report.failed.is_empty() {
            info!(
                archived = report.archived,
                created = report.created,
                unarchived = report.unarchived,
                invited = report.invited,
                failed = report.failed.len(),
                "Reconciled Slack channels"
            );
        }

        let confirmed = desired.difference(&report.failed).cloned().collect();
        self.confirmed.send_replace(confirmed);
        Ok(())
    }
}
