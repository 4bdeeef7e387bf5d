// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Network reachability as an observable online/offline flag.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fieldsync_config::model::{ApiConfig, ConnectivityConfig};
use fieldsync_core::FieldsyncError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Current reachability plus a stream of transitions.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    state: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (state, _) = watch::channel(initially_online);
        Self { state }
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Record a reachability observation. Returns `true` on a transition;
    /// subscribers are only woken for transitions.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "connectivity changed");
        }
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

/// Something that can tell whether the backend is reachable right now.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self) -> bool;
}

/// Reachability by opening (and immediately dropping) a TCP connection.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    target: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(target: impl Into<String>, timeout: Duration) -> Self {
        Self {
            target: target.into(),
            timeout,
        }
    }

    /// Probe `connectivity.probe_target`, or the host and port of `api.base_url`.
    pub fn from_config(
        connectivity: &ConnectivityConfig,
        api: &ApiConfig,
    ) -> Result<Self, FieldsyncError> {
        let timeout = Duration::from_millis(connectivity.probe_timeout_ms);
        if let Some(target) = &connectivity.probe_target {
            return Ok(Self::new(target.clone(), timeout));
        }

        let url = reqwest::Url::parse(&api.base_url)
            .map_err(|e| FieldsyncError::Config(format!("invalid api.base_url: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| FieldsyncError::Config("api.base_url has no host".to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| FieldsyncError::Config("api.base_url has no port".to_string()))?;
        Ok(Self::new(format!("{host}:{port}"), timeout))
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn probe(&self) -> bool {
        match tokio::time::timeout(self.timeout, tokio::net::TcpStream::connect(&self.target)).await
        {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(probe_target = %self.target, error = %e, "reachability probe failed");
                false
            }
            Err(_) => {
                debug!(probe_target = %self.target, "reachability probe timed out");
                false
            }
        }
    }
}

/// Probe on every `interval` tick and feed the result into `monitor`.
pub fn spawn_probe(
    monitor: Arc<ConnectivityMonitor>,
    probe: Arc<dyn ReachabilityProbe>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let online = probe.probe().await;
                    monitor.set_online(online);
                }
                _ = cancel.cancelled() => {
                    debug!("reachability probe shutting down");
                    break;
                }
            }
        }
    })
}
