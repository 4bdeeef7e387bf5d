// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `fieldsync serve` command implementation.
//!
//! Runs every long-lived task until SIGINT/SIGTERM: the reachability probe,
//! the outbox pipe consumer, the reconnect drain, periodic background sync,
//! and the realtime order feed.

use std::sync::Arc;
use std::time::Duration;

use fieldsync_config::model::FieldsyncConfig;
use fieldsync_core::{CredentialEvent, FieldsyncError, Order, OutboxEvent};
use fieldsync_outbox::{
    spawn_probe, BackgroundSyncTrigger, ConnectivityMonitor, ReachabilityProbe, TcpProbe,
};
use fieldsync_realtime::{OrderStore, RealtimeChannel};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app::AppContext;
use crate::shutdown;

/// How long each background task gets to wind down after cancellation.
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs the `fieldsync serve` command.
pub async fn run_serve(config: FieldsyncConfig) -> Result<(), FieldsyncError> {
    info!(
        agent = config.agent.agent_id.as_deref().unwrap_or("unassigned"),
        "starting fieldsync serve"
    );

    let app = AppContext::open(config).await?;
    let cancel = shutdown::install_signal_handler();
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    // Connectivity starts from a real probe so an offline boot skips the first drain.
    let probe = TcpProbe::from_config(&app.config.connectivity, &app.config.api)?;
    let connectivity = Arc::new(ConnectivityMonitor::new(probe.probe().await));
    info!(
        probe_target = probe.target(),
        online = connectivity.is_online(),
        "connectivity monitor started"
    );
    tasks.push(spawn_probe(
        Arc::clone(&connectivity),
        Arc::new(probe),
        Duration::from_secs(app.config.connectivity.probe_interval_secs),
        cancel.clone(),
    ));

    let outbox = app.outbox(Arc::clone(&connectivity))?;
    tasks.push(spawn_outbox_logger(outbox.subscribe(), cancel.clone()));
    tasks.push(outbox.spawn_consumer(cancel.clone()).await?);
    tasks.push(outbox.spawn_connectivity_drain(cancel.clone()));
    info!(pending = outbox.pending_count().await?, "request outbox ready");

    if app.config.sync.enabled {
        let trigger = Arc::new(BackgroundSyncTrigger::new(
            Arc::clone(&outbox),
            Arc::clone(&connectivity),
            &app.config.sync,
        ));
        tasks.push(trigger.spawn(cancel.clone()));
    } else {
        info!("background sync disabled by configuration");
    }

    let store = Arc::new(OrderStore::new());
    let channel = RealtimeChannel::new(
        &app.config.realtime,
        &app.config.api,
        Arc::clone(&app.credentials),
        Arc::clone(&store),
    );
    tasks.push(spawn_order_logger(store.subscribe(), cancel.clone()));
    tasks.push(spawn_logout_watch(
        app.credentials.subscribe(),
        channel.clone(),
        cancel.clone(),
    ));

    if let Err(e) = channel.connect(&app.config.realtime.topic).await {
        warn!(error = %e, "initial realtime connect failed, retry scheduled");
    }

    cancel.cancelled().await;
    info!("shutting down");

    channel.disconnect().await;
    for task in tasks {
        if tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, task).await.is_err() {
            warn!("background task did not stop in time");
        }
    }
    app.close().await?;
    info!("fieldsync stopped");
    Ok(())
}

/// Log delivery outcomes of queued requests.
fn spawn_outbox_logger(
    mut events: broadcast::Receiver<OutboxEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(OutboxEvent::Enqueued { id }) => debug!(id, "request queued"),
                    Ok(OutboxEvent::Delivered { id, status }) => info!(id, status, "request delivered"),
                    Ok(OutboxEvent::Failed { id, attempts, error }) => {
                        warn!(id, attempts, %error, "request delivery failed, kept for retry");
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "outbox event logger lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    })
}

/// Log the size of every published order snapshot.
fn spawn_order_logger(
    mut snapshots: watch::Receiver<Vec<Order>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let orders = snapshots.borrow_and_update().len();
                    info!(orders, "order snapshot updated");
                }
            }
        }
    })
}

/// Drop the realtime socket when the credentials are cleared.
fn spawn_logout_watch(
    mut credentials: broadcast::Receiver<CredentialEvent>,
    channel: RealtimeChannel,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = credentials.recv() => match event {
                    Ok(CredentialEvent::Cleared) => {
                        info!("credentials cleared, closing realtime channel");
                        channel.disconnect().await;
                    }
                    Ok(CredentialEvent::Saved(_)) => debug!("credentials updated"),
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    })
}
