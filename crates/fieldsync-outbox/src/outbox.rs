// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The request outbox: persist first, then deliver when possible.
//!
//! `enqueue` writes the row and offers its id to a bounded pipe; a full pipe
//! suspends the caller. Rows leave the table only after a successful
//! execution. Failures bump `attempts` and keep the row for the next pass.

use std::sync::Arc;
use std::time::Duration;

use fieldsync_auth::AuthenticatedClient;
use fieldsync_config::model::OutboxConfig;
use fieldsync_core::{FieldsyncError, NewRequest, OutboxEvent, QueuedRequest};
use fieldsync_storage::queries::outbox as rows;
use fieldsync_storage::Database;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Method, Request};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connectivity::ConnectivityMonitor;

const EVENT_CAPACITY: usize = 256;

/// Result of draining a single row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Executed with a 2xx status; the row was deleted.
    Delivered { status: u16 },
    /// Execution failed; the row stays with its new attempt count.
    Failed { attempts: i64, error: String },
    /// Offline; the row was left untouched.
    Skipped,
    /// The row was already gone.
    Missing,
}

/// Tally of one `drain_all` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub delivered: usize,
    pub failed: usize,
    pub skipped: usize,
    pub missing: usize,
    /// Rows whose drain hit a storage error; they stay queued.
    pub errors: usize,
}

impl DrainSummary {
    fn record(&mut self, outcome: &DrainOutcome) {
        match outcome {
            DrainOutcome::Delivered { .. } => self.delivered += 1,
            DrainOutcome::Failed { .. } => self.failed += 1,
            DrainOutcome::Skipped => self.skipped += 1,
            DrainOutcome::Missing => self.missing += 1,
        }
    }
}

/// Durable queue of pending mutating HTTP calls.
pub struct RequestOutbox {
    db: Database,
    client: AuthenticatedClient,
    connectivity: Arc<ConnectivityMonitor>,
    pipe: mpsc::Sender<i64>,
    pipe_rx: Mutex<Option<mpsc::Receiver<i64>>>,
    drain_lock: Mutex<()>,
    events: broadcast::Sender<OutboxEvent>,
    timeout: Duration,
}

impl RequestOutbox {
    pub fn new(
        db: Database,
        client: AuthenticatedClient,
        connectivity: Arc<ConnectivityMonitor>,
        config: &OutboxConfig,
    ) -> Self {
        let (pipe, pipe_rx) = mpsc::channel(config.pipe_capacity.max(1));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            db,
            client,
            connectivity,
            pipe,
            pipe_rx: Mutex::new(Some(pipe_rx)),
            drain_lock: Mutex::new(()),
            events,
            timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    /// Persist `request` and offer its id to the drain pipe.
    ///
    /// Suspends while the pipe is full. The row is durable before this
    /// returns, even if no consumer is running.
    pub async fn enqueue(&self, request: NewRequest) -> Result<i64, FieldsyncError> {
        if request.url.trim().is_empty() {
            return Err(FieldsyncError::Internal("cannot enqueue a request without url".to_string()));
        }
        Method::from_bytes(request.method.as_bytes()).map_err(|e| {
            FieldsyncError::Internal(format!("invalid HTTP method `{}`: {e}", request.method))
        })?;

        let id = rows::insert(&self.db, &request).await?;
        debug!(id, method = %request.method, url = %request.url, "request enqueued");
        let _ = self.events.send(OutboxEvent::Enqueued { id });

        if self.pipe.send(id).await.is_err() {
            warn!(id, "drain pipe closed; request will be picked up by the next full drain");
        }
        Ok(id)
    }

    /// Try to deliver one row.
    pub async fn drain_one(&self, id: i64) -> Result<DrainOutcome, FieldsyncError> {
        let Some(row) = rows::get(&self.db, id).await? else {
            return Ok(DrainOutcome::Missing);
        };
        if !self.connectivity.is_online() {
            debug!(id, "offline, leaving request queued");
            return Ok(DrainOutcome::Skipped);
        }

        match self.execute(&row).await {
            Ok(status) => {
                rows::delete(&self.db, id).await?;
                info!(id, status, "queued request delivered");
                let _ = self.events.send(OutboxEvent::Delivered { id, status });
                Ok(DrainOutcome::Delivered { status })
            }
            Err(error) => {
                let attempts = match rows::increment_attempts(&self.db, id).await? {
                    Some(attempts) => attempts,
                    // Delivered concurrently by the other drain path.
                    None => return Ok(DrainOutcome::Missing),
                };
                warn!(id, attempts, error = %error, "queued request failed");
                let _ = self.events.send(OutboxEvent::Failed {
                    id,
                    attempts,
                    error: error.clone(),
                });
                Ok(DrainOutcome::Failed { attempts, error })
            }
        }
    }

    /// Drain every persisted row in insertion order. Only one pass runs at a time.
    pub async fn drain_all(&self) -> Result<DrainSummary, FieldsyncError> {
        let _guard = self.drain_lock.lock().await;
        let ids = rows::list_ids(&self.db).await?;
        let mut summary = DrainSummary::default();
        for id in ids {
            match self.drain_one(id).await {
                Ok(outcome) => summary.record(&outcome),
                Err(e) => {
                    warn!(id, error = %e, "failed to drain request, continuing with the next");
                    summary.errors += 1;
                }
            }
        }
        if summary != DrainSummary::default() {
            info!(
                delivered = summary.delivered,
                failed = summary.failed,
                skipped = summary.skipped,
                errors = summary.errors,
                "outbox drain pass finished"
            );
        }
        Ok(summary)
    }

    pub async fn pending_count(&self) -> Result<i64, FieldsyncError> {
        rows::count(&self.db).await
    }

    /// Pending rows, oldest first.
    pub async fn list(&self) -> Result<Vec<QueuedRequest>, FieldsyncError> {
        rows::list(&self.db).await
    }

    /// Delivery notifications for UI feedback.
    pub fn subscribe(&self) -> broadcast::Receiver<OutboxEvent> {
        self.events.subscribe()
    }

    /// Start the consumer loop that drains ids arriving on the pipe.
    ///
    /// The pipe has a single receiver, so this can only be called once.
    pub async fn spawn_consumer(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, FieldsyncError> {
        let mut rx = self.pipe_rx.lock().await.take().ok_or_else(|| {
            FieldsyncError::Internal("outbox consumer is already running".to_string())
        })?;
        let outbox = Arc::clone(self);

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("outbox consumer shutting down");
                        break;
                    }
                    next = rx.recv() => match next {
                        Some(id) => {
                            if let Err(e) = outbox.drain_one(id).await {
                                warn!(id, error = %e, "outbox consumer failed to drain request");
                            }
                        }
                        None => break,
                    },
                }
            }
        }))
    }

    /// Run `drain_all` on every offline to online transition.
    pub fn spawn_connectivity_drain(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let outbox = Arc::clone(self);
        let mut rx = self.connectivity.subscribe();

        tokio::spawn(async move {
            let mut was_online = *rx.borrow_and_update();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let online = *rx.borrow_and_update();
                        if online && !was_online {
                            info!("back online, draining outbox");
                            if let Err(e) = outbox.drain_all().await {
                                warn!(error = %e, "outbox drain after reconnect failed");
                            }
                        }
                        was_online = online;
                    }
                }
            }
        })
    }

    /// Execute a row. `Ok` carries a 2xx status; `Err` describes the failure.
    async fn execute(&self, row: &QueuedRequest) -> Result<u16, String> {
        let method = Method::from_bytes(row.method.as_bytes()).map_err(|e| e.to_string())?;
        let url = self.client.resolve_url(&row.url).map_err(|e| e.to_string())?;

        let mut request = Request::new(method, url);
        *request.timeout_mut() = Some(self.timeout);
        if let Some(content_type) = &row.content_type {
            let value = HeaderValue::from_str(content_type).map_err(|e| e.to_string())?;
            request.headers_mut().insert(CONTENT_TYPE, value);
        }
        if let Some(body) = &row.body_text {
            *request.body_mut() = Some(body.clone().into());
        }

        let response = tokio::time::timeout(self.timeout, self.client.execute(request))
            .await
            .map_err(|_| format!("timed out after {:?}", self.timeout))?
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(format!("server returned {status}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_test_utils::TestHarness;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup(server: &MockServer, online: bool) -> (TestHarness, Arc<RequestOutbox>) {
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
        let outbox = Arc::new(RequestOutbox::new(
            harness.db.clone(),
            client,
            Arc::new(ConnectivityMonitor::new(online)),
            &harness.config.outbox,
        ));
        (harness, outbox)
    }

    #[tokio::test]
    async fn drain_one_delivers_and_deletes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders/5"))
            .and(body_json(serde_json::json!({"status": "PICKUP"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (_harness, outbox) = setup(&server, true).await;
        let id = outbox
            .enqueue(NewRequest::json(
                "POST",
                "/orders/5",
                &serde_json::json!({"status": "PICKUP"}),
            ))
            .await
            .unwrap();

        assert_eq!(
            outbox.drain_one(id).await.unwrap(),
            DrainOutcome::Delivered { status: 200 }
        );
        assert_eq!(outbox.pending_count().await.unwrap(), 0);
        assert_eq!(outbox.drain_one(id).await.unwrap(), DrainOutcome::Missing);
    }

    #[tokio::test]
    async fn failures_increment_attempts_monotonically() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let (_harness, outbox) = setup(&server, true).await;
        let mut events = outbox.subscribe();
        let id = outbox.enqueue(NewRequest::new("PUT", "/orders/9")).await.unwrap();
        assert_eq!(events.recv().await.unwrap(), OutboxEvent::Enqueued { id });

        for expected in 1..=3 {
            match outbox.drain_one(id).await.unwrap() {
                DrainOutcome::Failed { attempts, error } => {
                    assert_eq!(attempts, expected);
                    assert!(error.contains("503"));
                }
                other => panic!("expected failure, got {other:?}"),
            }
        }
        let rows = outbox.list().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].attempts, 3);
        assert!(matches!(
            events.recv().await.unwrap(),
            OutboxEvent::Failed { attempts: 1, .. }
        ));
    }

    #[tokio::test]
    async fn offline_drain_skips_without_touching_row() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (_harness, outbox) = setup(&server, false).await;
        let id = outbox.enqueue(NewRequest::get("/ping")).await.unwrap();

        assert_eq!(outbox.drain_one(id).await.unwrap(), DrainOutcome::Skipped);
        let summary = outbox.drain_all().await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(outbox.list().await.unwrap()[0].attempts, 0);
    }

    #[tokio::test]
    async fn drain_all_runs_in_insertion_order() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(204))
            .expect(3)
            .mount(&server)
            .await;

        let (_harness, outbox) = setup(&server, true).await;
        for n in 1..=3 {
            outbox
                .enqueue(NewRequest::new("DELETE", format!("/orders/{n}")))
                .await
                .unwrap();
        }

        let summary = outbox.drain_all().await.unwrap();
        assert_eq!(summary.delivered, 3);

        let paths: Vec<String> = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|r| r.url.path().to_string())
            .collect();
        assert_eq!(paths, ["/orders/1", "/orders/2", "/orders/3"]);
    }

    #[tokio::test]
    async fn full_pipe_suspends_enqueue_without_losing_rows() {
        let server = MockServer::start().await;
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
        let config = OutboxConfig {
            pipe_capacity: 1,
            ..harness.config.outbox.clone()
        };
        let outbox = Arc::new(RequestOutbox::new(
            harness.db.clone(),
            client,
            Arc::new(ConnectivityMonitor::new(false)),
            &config,
        ));

        let first = outbox.enqueue(NewRequest::get("/orders/1")).await.unwrap();

        let second = tokio::spawn({
            let outbox = Arc::clone(&outbox);
            async move { outbox.enqueue(NewRequest::get("/orders/2")).await }
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!second.is_finished(), "enqueue should wait for pipe capacity");
        assert_eq!(outbox.pending_count().await.unwrap(), 2);

        let mut rx = outbox.pipe_rx.lock().await.take().unwrap();
        assert_eq!(rx.recv().await, Some(first));
        let second_id = tokio::time::timeout(Duration::from_secs(5), second)
            .await
            .expect("enqueue should resume once the pipe drains")
            .unwrap()
            .unwrap();
        assert_eq!(rx.recv().await, Some(second_id));
    }

    #[tokio::test]
    async fn concurrent_drain_passes_execute_each_row_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(100)))
            .expect(3)
            .mount(&server)
            .await;

        let (_harness, outbox) = setup(&server, true).await;
        for n in 1..=3 {
            outbox
                .enqueue(NewRequest::new("POST", format!("/orders/{n}/ack")))
                .await
                .unwrap();
        }

        let (a, b) = tokio::join!(outbox.drain_all(), outbox.drain_all());
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.delivered + b.delivered, 3);
        assert_eq!(a.missing + b.missing, 0);
        assert!(a.delivered == 0 || b.delivered == 0, "passes overlapped: {a:?} {b:?}");
        assert_eq!(outbox.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn storage_error_on_one_row_does_not_stop_the_pass() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(3)
            .mount(&server)
            .await;

        let (harness, outbox) = setup(&server, true).await;
        let mut ids = Vec::new();
        for n in 1..=3 {
            ids.push(
                outbox
                    .enqueue(NewRequest::new("PUT", format!("/orders/{n}")))
                    .await
                    .unwrap(),
            );
        }
        let stuck = ids[0];
        harness
            .db
            .connection()
            .call(move |conn| {
                conn.execute_batch(&format!(
                    "CREATE TRIGGER keep_row BEFORE DELETE ON outbox WHEN OLD.id = {stuck}
                     BEGIN SELECT RAISE(ABORT, 'row is pinned'); END;"
                ))
            })
            .await
            .unwrap();

        let summary = outbox.drain_all().await.unwrap();
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.delivered, 2);

        let remaining: Vec<i64> = outbox.list().await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(remaining, [stuck]);
        let paths: Vec<String> = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|r| r.url.path().to_string())
            .collect();
        assert_eq!(paths, ["/orders/1", "/orders/2", "/orders/3"]);
    }

    #[tokio::test]
    async fn invalid_method_is_rejected_before_persisting() {
        let server = MockServer::start().await;
        let (_harness, outbox) = setup(&server, true).await;

        assert!(outbox.enqueue(NewRequest::new("NOT A METHOD", "/x")).await.is_err());
        assert!(outbox.enqueue(NewRequest::new("POST", " ")).await.is_err());
        assert_eq!(outbox.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn consumer_can_only_start_once() {
        let server = MockServer::start().await;
        let (_harness, outbox) = setup(&server, true).await;
        let cancel = CancellationToken::new();

        let handle = outbox.spawn_consumer(cancel.clone()).await.unwrap();
        assert!(outbox.spawn_consumer(cancel.clone()).await.is_err());

        cancel.cancel();
        handle.await.unwrap();
    }
}
