// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Decoding of inbound realtime frames into order changes.
//!
//! Two change shapes arrive on the wire. The classic shape names the
//! operation in `event` and carries `payload.record` / `payload.old_record`.
//! The wrapped shape uses `event: "postgres_changes"` and nests the
//! operation under `payload.data` as `eventType` (or `type`) with
//! `new`/`old` (or `record`/`old_record`).

use std::sync::Arc;

use fieldsync_core::{FieldsyncError, Order, OrderChange, OrderKey, SocketEvent};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::store::OrderStore;

/// Routes decoded changes into an [`OrderStore`] and mirrors every frame
/// on the socket event stream.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    store: Arc<OrderStore>,
    events: broadcast::Sender<SocketEvent>,
}

impl MessageRouter {
    pub fn new(store: Arc<OrderStore>, events: broadcast::Sender<SocketEvent>) -> Self {
        Self { store, events }
    }

    pub fn store(&self) -> &Arc<OrderStore> {
        &self.store
    }

    /// Route one text frame. Never fails: decode errors become
    /// [`SocketEvent::Error`] and the raw text is always re-emitted as
    /// [`SocketEvent::Message`].
    pub fn route(&self, text: &str) {
        match decode(text) {
            Ok(Some(change)) => {
                self.store.apply(change);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "dropping malformed realtime frame");
                let _ = self.events.send(SocketEvent::Error(e.to_string()));
            }
        }
        let _ = self.events.send(SocketEvent::Message(text.to_owned()));
    }
}

/// Decode a frame into the order change it carries, if any.
pub fn decode(text: &str) -> Result<Option<OrderChange>, FieldsyncError> {
    let frame: Value = serde_json::from_str(text)
        .map_err(|e| FieldsyncError::Protocol(format!("frame is not JSON: {e}")))?;
    let event = frame
        .get("event")
        .and_then(Value::as_str)
        .ok_or_else(|| FieldsyncError::Protocol("frame has no `event`".into()))?;
    let payload = frame.get("payload").unwrap_or(&Value::Null);

    match event {
        "phx_reply" => {
            debug!(
                topic = frame.get("topic").and_then(serde_json::Value::as_str).unwrap_or_default(),
                status = payload.get("status").and_then(serde_json::Value::as_str).unwrap_or_default(),
                "channel reply"
            );
            Ok(None)
        }
        "INSERT" | "UPDATE" | "DELETE" => {
            change_from(event, payload.get("record"), payload.get("old_record")).map(Some)
        }
        "postgres_changes" => decode_wrapped(payload).map(Some),
        "presence_state" | "presence_diff" | "system" | "ping" | "phx_close" => {
            trace!(event, "ignoring control frame");
            Ok(None)
        }
        other => {
            trace!(event = other, "ignoring unknown frame");
            Ok(None)
        }
    }
}

fn decode_wrapped(payload: &Value) -> Result<OrderChange, FieldsyncError> {
    let data = payload.get("data").unwrap_or(payload);
    let field = |names: &[&str]| -> Option<&Value> {
        names
            .iter()
            .find_map(|name| data.get(*name).or_else(|| payload.get(*name)))
            .filter(|v| !v.is_null())
    };

    let kind = field(&["eventType", "type"])
        .and_then(Value::as_str)
        .ok_or_else(|| FieldsyncError::Protocol("postgres_changes frame has no eventType".into()))?;
    change_from(kind, field(&["new", "record"]), field(&["old", "old_record"]))
}

fn change_from(
    kind: &str,
    new: Option<&Value>,
    old: Option<&Value>,
) -> Result<OrderChange, FieldsyncError> {
    match kind {
        "INSERT" => Ok(OrderChange::Insert(order_from(kind, new)?)),
        "UPDATE" => Ok(OrderChange::Update(order_from(kind, new)?)),
        "DELETE" => {
            let old = old.ok_or_else(|| missing(kind, "old record"))?;
            let key: OrderKey = serde_json::from_value(old.clone())
                .map_err(|e| FieldsyncError::Protocol(format!("bad DELETE key: {e}")))?;
            Ok(OrderChange::Delete { id: key.id })
        }
        other => Err(FieldsyncError::Protocol(format!(
            "unknown change type `{other}`"
        ))),
    }
}

fn order_from(kind: &str, record: Option<&Value>) -> Result<Order, FieldsyncError> {
    let record = record.ok_or_else(|| missing(kind, "record"))?;
    serde_json::from_value(record.clone())
        .map_err(|e| FieldsyncError::Protocol(format!("bad {kind} record: {e}")))
}

fn missing(kind: &str, what: &str) -> FieldsyncError {
    FieldsyncError::Protocol(format!("{kind} frame without {what}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn router() -> (MessageRouter, broadcast::Receiver<SocketEvent>) {
        let (tx, rx) = broadcast::channel(32);
        (MessageRouter::new(Arc::new(OrderStore::new()), tx), rx)
    }

    fn insert_frame(id: u64, status: &str) -> String {
        json!({
            "topic": "realtime:public:orders",
            "event": "INSERT",
            "payload": {"record": {"id": id, "order_number": format!("ORD-{id}"), "status": status}},
            "ref": null,
        })
        .to_string()
    }

    fn ids(router: &MessageRouter) -> Vec<String> {
        router.store().snapshot().into_iter().map(|o| o.id).collect()
    }

    #[test]
    fn classic_insert_update_delete() {
        let (router, _rx) = router();
        router.route(&insert_frame(1, "NEW"));
        router.route(&insert_frame(2, "NEW"));
        assert_eq!(ids(&router), ["2", "1"]);

        router.route(
            &json!({"event": "UPDATE", "payload": {"record": {"id": "1", "status": "PICKUP"}}})
                .to_string(),
        );
        let snapshot = router.store().snapshot();
        assert_eq!(snapshot[1].status.as_deref(), Some("PICKUP"));

        router.route(
            &json!({"event": "DELETE", "payload": {"old_record": {"id": 2}}}).to_string(),
        );
        assert_eq!(ids(&router), ["1"]);
    }

    #[test]
    fn delete_of_unknown_id_is_noop() {
        let (router, _rx) = router();
        router.route(&insert_frame(7, "NEW"));
        router.route(
            &json!({"event": "DELETE", "payload": {"old_record": {"id": "42"}}}).to_string(),
        );
        assert_eq!(ids(&router), ["7"]);
    }

    #[test]
    fn wrapped_shape_is_decoded() {
        let frame = json!({
            "event": "postgres_changes",
            "payload": {"data": {"eventType": "INSERT", "new": {"id": 42, "status": "NEW"}}},
        });
        let expected = Order {
            status: Some("NEW".into()),
            ..Order::with_id("42")
        };
        assert_eq!(
            decode(&frame.to_string()).unwrap(),
            Some(OrderChange::Insert(expected))
        );

        let delete = json!({
            "event": "postgres_changes",
            "payload": {"data": {"type": "DELETE", "old_record": {"id": 42}}},
        });
        assert_eq!(
            decode(&delete.to_string()).unwrap(),
            Some(OrderChange::Delete { id: "42".into() })
        );
    }

    #[test]
    fn wrapped_fields_fall_back_to_payload() {
        let frame = json!({
            "event": "postgres_changes",
            "payload": {"data": {"eventType": "UPDATE"}, "new": {"id": "9"}},
        });
        assert_eq!(
            decode(&frame.to_string()).unwrap(),
            Some(OrderChange::Update(Order::with_id("9")))
        );
    }

    #[test]
    fn numeric_agent_id_reaches_the_store() {
        let (router, mut rx) = router();
        router.route(
            &json!({"event": "INSERT", "payload": {"record": {"id": 1, "assigned_agent_id": 17}}})
                .to_string(),
        );
        router.route(
            &json!({
                "event": "postgres_changes",
                "payload": {"data": {"eventType": "UPDATE", "new": {"id": 1, "assigned_agent_id": 18}}},
            })
            .to_string(),
        );

        let snapshot = router.store().snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].assigned_agent_id.as_deref(), Some("18"));
        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event, SocketEvent::Error(_)), "{event:?}");
        }
    }

    #[test]
    fn row_with_both_timestamp_columns_is_applied() {
        let (router, _rx) = router();
        router.route(
            &json!({
                "event": "INSERT",
                "payload": {"record": {
                    "id": 4,
                    "last_updated": "2026-03-01T08:00:00Z",
                    "updated_at": "2026-03-01T08:00:05Z",
                }},
            })
            .to_string(),
        );

        let snapshot = router.store().snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].last_updated.as_deref(), Some("2026-03-01T08:00:00Z"));
    }

    #[test]
    fn control_and_unknown_frames_are_ignored() {
        for event in ["phx_reply", "presence_state", "presence_diff", "system", "ping", "phx_close", "custom"] {
            let frame = json!({"topic": "t", "event": event, "payload": {"status": "ok"}});
            assert_eq!(decode(&frame.to_string()).unwrap(), None, "{event}");
        }
    }

    #[test]
    fn malformed_frame_emits_error_then_message() {
        let (router, mut rx) = router();
        router.route("{not json");

        assert!(matches!(rx.try_recv().unwrap(), SocketEvent::Error(_)));
        assert_eq!(
            rx.try_recv().unwrap(),
            SocketEvent::Message("{not json".into())
        );

        router.route(&insert_frame(3, "NEW"));
        assert_eq!(ids(&router), ["3"]);
    }

    #[test]
    #[tracing_test::traced_test]
    fn malformed_frame_is_logged() {
        let (router, _rx) = router();
        router.route("[]");
        assert!(logs_contain("dropping malformed realtime frame"));
    }

    #[test]
    fn shape_errors_are_reported() {
        assert!(decode(r#"{"payload":{}}"#).is_err());
        assert!(decode(r#"{"event":"INSERT","payload":{}}"#).is_err());
        assert!(decode(r#"{"event":"DELETE","payload":{"old_record":{"name":"x"}}}"#).is_err());
        assert!(decode(r#"{"event":"postgres_changes","payload":{"data":{}}}"#).is_err());
    }

    #[test]
    fn every_frame_is_mirrored() {
        let (router, mut rx) = router();
        let reply = r#"{"event":"phx_reply","payload":{"status":"ok"}}"#;
        router.route(reply);
        assert_eq!(rx.try_recv().unwrap(), SocketEvent::Message(reply.into()));
    }
}
