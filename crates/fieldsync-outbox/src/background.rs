// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic and on-demand full outbox drains.
//!
//! Rows persisted by a previous process never reach the in-memory pipe, so
//! this trigger is what eventually delivers them: once at start-up, then on
//! every interval tick or explicit wake.

use std::sync::Arc;
use std::time::Duration;

use fieldsync_config::model::SyncConfig;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connectivity::ConnectivityMonitor;
use crate::outbox::{DrainSummary, RequestOutbox};

/// Forces `drain_all` on a schedule and on wake-ups.
pub struct BackgroundSyncTrigger {
    outbox: Arc<RequestOutbox>,
    connectivity: Arc<ConnectivityMonitor>,
    interval: Duration,
    run_on_start: bool,
    wake: Notify,
}

impl BackgroundSyncTrigger {
    pub fn new(
        outbox: Arc<RequestOutbox>,
        connectivity: Arc<ConnectivityMonitor>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            outbox,
            connectivity,
            interval: Duration::from_secs(config.interval_secs.max(1)),
            run_on_start: config.run_on_start,
            wake: Notify::new(),
        }
    }

    /// Request an immediate pass from the running loop.
    pub fn trigger_now(&self) {
        self.wake.notify_one();
    }

    /// One full drain, or `None` when offline or the pass failed.
    pub async fn run_once(&self) -> Option<DrainSummary> {
        if !self.connectivity.is_online() {
            debug!("background sync skipped: offline");
            return None;
        }
        match self.outbox.drain_all().await {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!(error = %e, "background sync failed");
                None
            }
        }
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "background sync started");
            if self.run_on_start {
                self.run_once().await;
            }

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                    _ = self.wake.notified() => {
                        debug!("background sync woken");
                        self.run_once().await;
                    }
                    _ = cancel.cancelled() => {
                        info!("background sync shutting down");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_auth::AuthenticatedClient;
    use fieldsync_core::NewRequest;
    use fieldsync_test_utils::TestHarness;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup(
        server: &MockServer,
        config: SyncConfig,
        online: bool,
    ) -> (TestHarness, Arc<RequestOutbox>, Arc<BackgroundSyncTrigger>) {
        let harness = TestHarness::builder()
            .with_credential("access-1", "refresh-1")
            .with_base_url(server.uri())
            .build()
            .await
            .unwrap();
        let client = AuthenticatedClient::new(
            harness.credentials.clone(),
            &harness.config.api,
            Duration::from_secs(5),
        )
        .unwrap();
        let connectivity = Arc::new(ConnectivityMonitor::new(online));
        let outbox = Arc::new(RequestOutbox::new(
            harness.db.clone(),
            client,
            Arc::clone(&connectivity),
            &harness.config.outbox,
        ));
        let trigger = Arc::new(BackgroundSyncTrigger::new(
            Arc::clone(&outbox),
            connectivity,
            &config,
        ));
        (harness, outbox, trigger)
    }

    async fn wait_for_empty(outbox: &RequestOutbox) -> bool {
        for _ in 0..200 {
            if outbox.pending_count().await.unwrap() == 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn run_once_skips_when_offline() {
        let server = MockServer::start().await;
        let (_harness, outbox, trigger) = setup(&server, SyncConfig::default(), false).await;
        outbox.enqueue(NewRequest::new("POST", "/x")).await.unwrap();

        assert!(trigger.run_once().await.is_none());
        assert_eq!(outbox.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn start_pass_recovers_existing_rows() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(2)
            .mount(&server)
            .await;

        let config = SyncConfig {
            enabled: true,
            interval_secs: 3600,
            run_on_start: true,
        };
        let (_harness, outbox, trigger) = setup(&server, config, true).await;
        outbox.enqueue(NewRequest::new("POST", "/a")).await.unwrap();
        outbox.enqueue(NewRequest::new("POST", "/b")).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = Arc::clone(&trigger).spawn(cancel.clone());
        assert!(wait_for_empty(&outbox).await);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn trigger_now_wakes_the_loop() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let config = SyncConfig {
            enabled: true,
            interval_secs: 3600,
            run_on_start: false,
        };
        let (_harness, outbox, trigger) = setup(&server, config, true).await;
        let cancel = CancellationToken::new();
        let handle = Arc::clone(&trigger).spawn(cancel.clone());

        outbox.enqueue(NewRequest::new("PATCH", "/orders/1")).await.unwrap();
        trigger.trigger_now();
        assert!(wait_for_empty(&outbox).await);

        cancel.cancel();
        handle.await.unwrap();
    }
}
