// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outgoing frames and the connection URL for the realtime socket.

use fieldsync_core::FieldsyncError;
use reqwest::Url;
use serde_json::json;

/// Protocol version advertised in the connection URL.
pub const PROTOCOL_VSN: &str = "1.0.0";

pub const JOIN_REF: &str = "1";
pub const SUBSCRIBE_REF: &str = "2";

/// Topic used for socket-level heartbeats.
const HEARTBEAT_TOPIC: &str = "phoenix";

/// Connection URL carrying the API key and, if present, the access token.
pub fn connect_url(
    base: &str,
    api_key: &str,
    token: Option<&str>,
) -> Result<Url, FieldsyncError> {
    let mut url = Url::parse(base)
        .map_err(|e| FieldsyncError::Config(format!("invalid realtime url `{base}`: {e}")))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("apikey", api_key);
        if let Some(token) = token {
            query.append_pair("token", token);
        }
        query.append_pair("vsn", PROTOCOL_VSN);
    }
    Ok(url)
}

pub fn join_frame(topic: &str) -> String {
    json!({
        "topic": topic,
        "event": "phx_join",
        "payload": {},
        "ref": JOIN_REF,
    })
    .to_string()
}

/// Subscription to every change on `schema.table`.
pub fn subscribe_frame(topic: &str, schema: &str, table: &str) -> String {
    json!({
        "topic": topic,
        "event": "postgres_changes",
        "payload": {
            "event": "*",
            "schema": schema,
            "table": table,
        },
        "ref": SUBSCRIBE_REF,
    })
    .to_string()
}

pub fn heartbeat_frame(seq: u64) -> String {
    json!({
        "topic": HEARTBEAT_TOPIC,
        "event": "heartbeat",
        "payload": {},
        "ref": format!("hb-{seq}"),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn url_carries_key_token_and_version() {
        let url = connect_url("wss://rt.example.com/socket", "key", Some("tok en")).unwrap();
        assert_eq!(
            url.as_str(),
            "wss://rt.example.com/socket?apikey=key&token=tok+en&vsn=1.0.0"
        );
    }

    #[test]
    fn url_without_token() {
        let url = connect_url("ws://127.0.0.1:4000", "key", None).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("apikey".to_string(), "key".to_string()),
                ("vsn".to_string(), PROTOCOL_VSN.to_string()),
            ]
        );
    }

    #[test]
    fn bad_url_is_a_config_error() {
        assert!(matches!(
            connect_url("not a url", "key", None),
            Err(FieldsyncError::Config(_))
        ));
    }

    #[test]
    fn subscribe_frame_shape() {
        let frame: Value = serde_json::from_str(&subscribe_frame("t", "public", "orders")).unwrap();
        assert_eq!(frame["event"], "postgres_changes");
        assert_eq!(frame["payload"]["event"], "*");
        assert_eq!(frame["payload"]["table"], "orders");
        assert_eq!(frame["ref"], SUBSCRIBE_REF);
    }
}
