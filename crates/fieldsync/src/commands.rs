// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One-shot subcommands: `enqueue`, `drain`, `login`, `logout`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fieldsync_config::model::FieldsyncConfig;
use fieldsync_core::{Credential, FieldsyncError, NewRequest};
use fieldsync_outbox::ConnectivityMonitor;

use crate::app::AppContext;

/// Persist a request in the outbox. Delivery happens on the next drain.
pub async fn run_enqueue(
    config: FieldsyncConfig,
    method: String,
    url: String,
    body: Option<String>,
    content_type: String,
) -> Result<(), FieldsyncError> {
    let app = AppContext::open(config).await?;
    let outbox = app.outbox(Arc::new(ConnectivityMonitor::new(false)))?;

    let id = outbox.enqueue(build_request(method, url, body, content_type)).await?;
    println!("queued request #{id}");
    app.close().await
}

fn build_request(
    method: String,
    url: String,
    body: Option<String>,
    content_type: String,
) -> NewRequest {
    let request = NewRequest::new(method, url);
    match body {
        Some(body) => request.with_body(body, content_type),
        None => request,
    }
}

/// Deliver every queued request once, in insertion order.
pub async fn run_drain(config: FieldsyncConfig) -> Result<(), FieldsyncError> {
    let app = AppContext::open(config).await?;
    let outbox = app.outbox(Arc::new(ConnectivityMonitor::new(true)))?;

    let summary = outbox.drain_all().await?;
    let remaining = outbox.pending_count().await?;
    println!(
        "delivered {}, failed {}, storage errors {}, remaining {remaining}",
        summary.delivered, summary.failed, summary.errors
    );
    app.close().await
}

/// Store a token pair, prompting for anything not given on the command line.
pub async fn run_login(
    config: FieldsyncConfig,
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
) -> Result<(), FieldsyncError> {
    let access_token = match access_token {
        Some(token) => token,
        None => prompt_token("Access token: ")?,
    };
    let refresh_token = match refresh_token {
        Some(token) => token,
        None => prompt_token("Refresh token: ")?,
    };
    let credential = Credential::new(access_token, refresh_token)?.with_expiries(expires_at, None);

    let app = AppContext::open(config).await?;
    app.credentials.save(credential).await?;
    println!("credentials stored");
    app.close().await
}

pub async fn run_logout(config: FieldsyncConfig) -> Result<(), FieldsyncError> {
    let app = AppContext::open(config).await?;
    app.credentials.clear().await?;
    println!("credentials cleared");
    app.close().await
}

fn prompt_token(label: &str) -> Result<String, FieldsyncError> {
    eprint!("{label}");
    let token = rpassword::read_password()
        .map_err(|e| FieldsyncError::Auth(format!("failed to read token: {e}")))?;
    let token = token.trim().to_string();
    if token.is_empty() {
        return Err(FieldsyncError::Auth("empty token not allowed".to_string()));
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_without_body_has_no_content_type() {
        let request = build_request("get".into(), "/ping".into(), None, "application/json".into());
        assert_eq!(request.method, "GET");
        assert_eq!(request.body_text, None);
        assert_eq!(request.content_type, None);
    }

    #[test]
    fn request_with_body_keeps_content_type() {
        let request = build_request(
            "POST".into(),
            "/orders/5".into(),
            Some(r#"{"status":"PICKUP"}"#.into()),
            "application/json".into(),
        );
        assert_eq!(request.body_text.as_deref(), Some(r#"{"status":"PICKUP"}"#));
        assert_eq!(request.content_type.as_deref(), Some("application/json"));
    }
}
