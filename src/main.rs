//! weeslack - WeeChat relay to Slack bridge
//!
//! Connects to a WeeChat relay and a Slack workspace and relays messages,
//! joins, parts and private conversations between the two, keeping Slack
//! channels in step with the open WeeChat buffers.

mod bridge;
mod common;
mod config;
mod relay;
mod sink;
mod upload;

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use bridge::identity::PrefixMapping;
use bridge::{dispatch, DmChannels, Reconciler, Router, WorkerPool};
use common::{RelayEvent, SinkMessage};
use config::{env::get_config_path, load_and_validate};
use relay::{SourceRelay, WeeChatRelay};
use sink::{SlackClient, SocketModeListener};
use upload::HttpUploader;

/// Capacity of each backend's event queue.
const EVENT_QUEUE: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("weeslack v{} starting...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_path = get_config_path();
    info!("Loading configuration from {}...", config_path);

    let config = load_and_validate(&config_path).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        error!("Please ensure {} exists and is properly formatted.", config_path);
        e
    })?;

    info!("Configuration loaded successfully");
    info!("  Relay: {}:{} (tls: {})", config.relay.host, config.relay.port, config.relay.use_tls);
    info!("  Static channels: {}", config.channels.len());
    info!("  DM prefixes: {}", config.direct_messages.len());
    info!("  Upload provider: {:?}", config.upload.provider);

    let tuning = config.bridge.clone();
    let cancel = CancellationToken::new();
    let pool = WorkerPool::new(tuning.workers, cancel.clone());

    // ============================================================
    // Connect both backends; authentication failures are fatal
    // ============================================================
    let (relay_tx, relay_rx) = mpsc::channel::<RelayEvent>(EVENT_QUEUE);
    let (slack_tx, slack_rx) = mpsc::channel::<SinkMessage>(EVENT_QUEUE);

    let (relay, mut connector) =
        WeeChatRelay::new(config.relay.clone(), relay_tx, tuning.reconnect_delay());
    info!("Connecting to WeeChat relay...");
    let session = connector.connect().await.map_err(|e| {
        error!("Failed to connect to WeeChat relay: {}", e);
        e
    })?;

    let slack = Arc::new(SlackClient::new(config.slack.clone()));
    info!("Authenticating with Slack...");
    let bridge_user_id = slack.authenticate().await.map_err(|e| {
        error!("Failed to authenticate with Slack: {}", e);
        e
    })?;

    // ============================================================
    // Build the bridge and run the startup reconcile
    // ============================================================
    let reconciler = Reconciler::new(
        slack.clone(),
        config.channels.iter().map(|m| m.sink.clone()).collect::<BTreeSet<_>>(),
        PrefixMapping::from_config(&config.direct_messages),
    );
    let dm = Arc::new(DmChannels::new(
        reconciler,
        tuning.dm_archive_grace(),
        pool.tracker(),
        cancel.clone(),
    ));

    if let Err(e) = dm.seed(&relay.list_buffers()).await {
        warn!("Startup reconcile failed, continuing: {}", e);
    }

    let router = Arc::new(Router::new(
        &config,
        relay.clone(),
        slack.clone(),
        Arc::new(HttpUploader::new(&config.upload)),
        dm,
        bridge_user_id,
        pool.tracker(),
    ));

    // ============================================================
    // Spawn receive and dispatch loops
    // ============================================================
    let relay_task = tokio::spawn(connector.run(session, cancel.clone()));

    let listener = SocketModeListener::new(slack.clone(), slack_tx, tuning.reconnect_delay());
    let slack_task = tokio::spawn(listener.run(cancel.clone()));

    let relay_dispatch = {
        let router = router.clone();
        tokio::spawn(dispatch(
            "relay",
            relay_rx,
            pool.clone(),
            cancel.clone(),
            move |event| {
                let router = router.clone();
                async move { router.handle_relay_event(event).await }
            },
        ))
    };

    let slack_dispatch = {
        let router = router.clone();
        let token = cancel.clone();
        tokio::spawn(dispatch(
            "slack",
            slack_rx,
            pool.clone(),
            cancel.clone(),
            move |message| {
                let router = router.clone();
                let token = token.clone();
                async move { router.handle_sink_message(message, &token).await }
            },
        ))
    };

    info!("Bridge running");

    // ============================================================
    // Wait for a shutdown signal
    // ============================================================
    shutdown_signal().await;
    info!("Shutdown signal received - stopping bridge...");

    cancel.cancel();
    for (name, task) in [
        ("relay", relay_task),
        ("slack", slack_task),
        ("relay dispatch", relay_dispatch),
        ("slack dispatch", slack_dispatch),
    ] {
        match tokio::time::timeout(tuning.shutdown_grace(), task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("{} task panicked: {}", name, e),
            Err(_) => warn!("{} task did not stop in time", name),
        }
    }

    if pool.drain(tuning.shutdown_grace()).await {
        info!("All in-flight work finished");
    }

    info!("Exiting...");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
