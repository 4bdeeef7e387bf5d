// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end integration tests for a complete field agent session.
//!
//! Each test wires the outbox and the realtime channel against a mock HTTP
//! API and a mock socket server, the same way `fieldsync serve` does.

use std::sync::Arc;
use std::time::Duration;

use fieldsync_auth::AuthenticatedClient;
use fieldsync_core::{CredentialEvent, NewRequest, OutboxEvent};
use fieldsync_outbox::{BackgroundSyncTrigger, ConnectivityMonitor, RequestOutbox};
use fieldsync_realtime::{OrderStore, RealtimeChannel};
use fieldsync_test_utils::{MockSocketServer, TestHarness};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOPIC: &str = "realtime:public:orders";
const WAIT: Duration = Duration::from_secs(5);

struct Agent {
    harness: TestHarness,
    connectivity: Arc<ConnectivityMonitor>,
    outbox: Arc<RequestOutbox>,
    channel: RealtimeChannel,
    cancel: CancellationToken,
}

async fn start_agent(api: &MockServer, socket: &MockSocketServer, online: bool) -> Agent {
    let harness = TestHarness::builder()
        .with_credential("access-1", "refresh-1")
        .with_base_url(api.uri())
        .with_realtime_url(socket.url())
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
    let cancel = CancellationToken::new();
    outbox.spawn_consumer(cancel.clone()).await.unwrap();
    outbox.spawn_connectivity_drain(cancel.clone());

    let channel = RealtimeChannel::new(
        &harness.config.realtime,
        &harness.config.api,
        harness.credentials.clone(),
        Arc::new(OrderStore::new()),
    );

    Agent {
        harness,
        connectivity,
        outbox,
        channel,
        cancel,
    }
}

async fn wait_delivered(events: &mut tokio::sync::broadcast::Receiver<OutboxEvent>) -> u16 {
    tokio::time::timeout(WAIT, async {
        loop {
            if let OutboxEvent::Delivered { status, .. } = events.recv().await.unwrap() {
                return status;
            }
        }
    })
    .await
    .expect("delivery within timeout")
}

// ---- Test 1: orders arrive, status update survives a token refresh ----

#[tokio::test]
async fn order_feed_and_status_update_with_refresh() {
    let api = MockServer::start().await;
    let socket = MockSocketServer::start().await.unwrap();

    Mock::given(method("PATCH"))
        .and(path("/orders/5"))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&api)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/orders/5"))
        .and(header("authorization", "Bearer access-2"))
        .and(body_json(json!({"status": "PICKUP"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&api)
        .await;
    Mock::given(method("POST"))
        .and(path("/refresh-token"))
        .and(body_json(json!({"refreshToken": "refresh-1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {"accessToken": "access-2"}
        })))
        .expect(1)
        .mount(&api)
        .await;

    let agent = start_agent(&api, &socket, true).await;
    agent.channel.connect(TOPIC).await.unwrap();
    assert!(socket.wait_until(WAIT, |c| c.len() == 1).await);
    assert!(socket.connections().await[0].uri.contains("token=access-1"));

    socket
        .send_text(
            0,
            json!({
                "topic": TOPIC,
                "event": "INSERT",
                "payload": {"record": {"id": 5, "order_number": "ORD-5", "status": "ASSIGNED"}}
            })
            .to_string(),
        )
        .await;
    let mut snapshots = agent.channel.store().subscribe();
    tokio::time::timeout(WAIT, snapshots.wait_for(|orders| orders.len() == 1))
        .await
        .unwrap()
        .unwrap();

    let mut events = agent.outbox.subscribe();
    agent
        .outbox
        .enqueue(NewRequest::json("PATCH", "/orders/5", &json!({"status": "PICKUP"})))
        .await
        .unwrap();
    assert_eq!(wait_delivered(&mut events).await, 204);

    let credential = agent.harness.credentials.get().await.unwrap();
    assert_eq!(credential.access_token, "access-2");
    assert_eq!(credential.refresh_token, "refresh-1");

    // The next socket is opened with the refreshed token.
    socket.close(0, 1001).await;
    assert!(socket.wait_until(WAIT, |c| c.len() == 2).await);
    assert!(socket.connections().await[1].uri.contains("token=access-2"));

    agent.channel.disconnect().await;
    agent.cancel.cancel();
}

// ---- Test 2: work queued in a dead zone is flushed on reconnect ----

#[tokio::test]
async fn dead_zone_updates_flush_in_order_when_back_online() {
    let api = MockServer::start().await;
    let socket = MockSocketServer::start().await.unwrap();
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200))
        .expect(3)
        .mount(&api)
        .await;

    let agent = start_agent(&api, &socket, false).await;
    let mut events = agent.outbox.subscribe();
    for status in ["PICKUP", "EN_ROUTE", "DELIVERED"] {
        agent
            .outbox
            .enqueue(NewRequest::json("PATCH", "/orders/9", &json!({"status": status})))
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(agent.outbox.pending_count().await.unwrap(), 3);

    agent.connectivity.set_online(true);
    for _ in 0..3 {
        assert_eq!(wait_delivered(&mut events).await, 200);
    }
    assert_eq!(agent.outbox.pending_count().await.unwrap(), 0);

    let bodies: Vec<serde_json::Value> = api
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();
    assert_eq!(
        bodies,
        vec![
            json!({"status": "PICKUP"}),
            json!({"status": "EN_ROUTE"}),
            json!({"status": "DELIVERED"}),
        ]
    );
    agent.cancel.cancel();
}

// ---- Test 3: failed deliveries stay queued until the background pass ----

#[tokio::test]
async fn failed_delivery_is_retried_by_background_sync() {
    let api = MockServer::start().await;
    let socket = MockSocketServer::start().await.unwrap();
    Mock::given(method("POST"))
        .and(path("/proof-of-delivery"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&api)
        .await;
    Mock::given(method("POST"))
        .and(path("/proof-of-delivery"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&api)
        .await;

    let agent = start_agent(&api, &socket, true).await;
    let mut events = agent.outbox.subscribe();
    let id = agent
        .outbox
        .enqueue(NewRequest::json("POST", "/proof-of-delivery", &json!({"order": 5})))
        .await
        .unwrap();

    let failed = tokio::time::timeout(WAIT, async {
        loop {
            if let OutboxEvent::Failed { attempts, .. } = events.recv().await.unwrap() {
                return attempts;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(failed, 1);
    assert_eq!(agent.outbox.list().await.unwrap()[0].id, id);

    let trigger = BackgroundSyncTrigger::new(
        Arc::clone(&agent.outbox),
        Arc::clone(&agent.connectivity),
        &agent.harness.config.sync,
    );
    let summary = trigger.run_once().await.unwrap();
    assert_eq!(summary.delivered, 1);
    assert_eq!(agent.outbox.pending_count().await.unwrap(), 0);
    agent.cancel.cancel();
}

// ---- Test 4: logout is broadcast and leaves nothing behind ----

#[tokio::test]
async fn logout_clears_credentials_and_notifies() {
    let api = MockServer::start().await;
    let socket = MockSocketServer::start().await.unwrap();
    let agent = start_agent(&api, &socket, true).await;
    let mut changes = agent.harness.credentials.subscribe();

    agent.harness.credentials.clear().await.unwrap();

    assert_eq!(changes.recv().await.unwrap(), CredentialEvent::Cleared);
    assert!(agent.harness.credentials.get().await.is_none());

    // Without a token the socket falls back to the anonymous key.
    agent.channel.connect(TOPIC).await.unwrap();
    assert!(socket.wait_until(WAIT, |c| c.len() == 1).await);
    assert!(socket.connections().await[0].uri.contains("token=test-anon-key"));

    agent.channel.disconnect().await;
    agent.cancel.cancel();
}
