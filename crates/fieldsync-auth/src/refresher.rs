// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded, single-flight token refresh.
//!
//! A 401 on a request that carried a bearer may trigger a refresh. All
//! refreshes run under one mutex; the first caller through performs the
//! network call and every caller that queued behind it sees a stored token
//! different from the one it failed with, and reuses it without another call.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use fieldsync_config::model::ApiConfig;
use fieldsync_core::{Credential, FieldsyncError};
use fieldsync_vault::CredentialStore;
use reqwest::header::AUTHORIZATION;
use reqwest::{Request, StatusCode, Url};
use serde::{Deserialize, Deserializer};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::injector::{bearer, bearer_token, AuthHeaderInjector};

/// A response that may be recoverable by refreshing the access token.
#[derive(Debug)]
pub struct FailedResponse<'a> {
    /// The request as it was sent, including its `Authorization` header.
    pub request: &'a Request,
    pub status: StatusCode,
    /// How many responses were already chained through this logical request.
    pub prior_responses: usize,
}

#[derive(Debug, Deserialize)]
struct RefreshEnvelope {
    #[serde(default)]
    success: bool,
    data: Option<RefreshData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshData {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default, deserialize_with = "flexible_timestamp")]
    expires_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "flexible_timestamp")]
    refresh_expires_at: Option<DateTime<Utc>>,
}

/// Accept RFC 3339 strings as well as epoch seconds or milliseconds.
fn flexible_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    let parsed = match Option::<Raw>::deserialize(deserializer)? {
        None => None,
        Some(Raw::Text(text)) => DateTime::parse_from_rfc3339(&text)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Some(Raw::Number(n)) if n > 10_000_000_000 => Utc.timestamp_millis_opt(n).single(),
        Some(Raw::Number(n)) => Utc.timestamp_opt(n, 0).single(),
    };
    Ok(parsed)
}

/// Refreshes the session on 401 and rebuilds the failed request.
#[derive(Debug)]
pub struct TokenRefresher {
    credentials: Arc<CredentialStore>,
    injector: Arc<AuthHeaderInjector>,
    http: reqwest::Client,
    refresh_url: Url,
    max_chain: usize,
    lock: Mutex<()>,
}

impl TokenRefresher {
    pub fn new(
        credentials: Arc<CredentialStore>,
        injector: Arc<AuthHeaderInjector>,
        http: reqwest::Client,
        api: &ApiConfig,
    ) -> Result<Self, FieldsyncError> {
        let raw = format!(
            "{}/{}",
            api.base_url.trim_end_matches('/'),
            api.refresh_path.trim_start_matches('/')
        );
        let refresh_url = Url::parse(&raw)
            .map_err(|e| FieldsyncError::Config(format!("invalid refresh url `{raw}`: {e}")))?;
        Ok(Self {
            credentials,
            injector,
            http,
            refresh_url,
            max_chain: api.max_refresh_chain,
            lock: Mutex::new(()),
        })
    }

    /// A retriable copy of the failed request with a fresh bearer, or `None`
    /// when the failure is not recoverable by refreshing.
    pub async fn authenticate(&self, failed: &FailedResponse<'_>) -> Option<Request> {
        if failed.status != StatusCode::UNAUTHORIZED || failed.prior_responses > self.max_chain {
            return None;
        }
        if !failed.request.headers().contains_key(AUTHORIZATION) {
            return None;
        }
        if self.injector.is_auth_endpoint(failed.request.url()) {
            return None;
        }
        let used = bearer_token(failed.request.headers()).unwrap_or_default().to_string();

        let _guard = self.lock.lock().await;

        let stored = self.credentials.get().await?;
        if let Some(current) = stored.usable_access_token() {
            if current != used {
                debug!("access token already refreshed by another caller");
                return rebuild(failed.request, current);
            }
        }

        if stored.refresh_token.trim().is_empty() {
            return None;
        }

        let refreshed = match self.refresh(&stored).await {
            Ok(credential) => credential,
            Err(e) => {
                warn!(error = %e, "token refresh failed");
                return None;
            }
        };
        if let Err(e) = self.credentials.save(refreshed.clone()).await {
            warn!(error = %e, "failed to persist refreshed credentials");
            return None;
        }
        info!("access token refreshed");
        rebuild(failed.request, &refreshed.access_token)
    }

    async fn refresh(&self, stored: &Credential) -> Result<Credential, FieldsyncError> {
        let response = self
            .http
            .post(self.refresh_url.clone())
            .headers(self.injector.anonymous_headers())
            .json(&serde_json::json!({ "refreshToken": stored.refresh_token }))
            .send()
            .await
            .map_err(|e| FieldsyncError::http("refresh request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FieldsyncError::Auth(format!("refresh endpoint returned {status}")));
        }

        let envelope: RefreshEnvelope = response
            .json()
            .await
            .map_err(|e| FieldsyncError::http("failed to parse refresh response", e))?;
        let data = match envelope {
            RefreshEnvelope {
                success: true,
                data: Some(data),
            } => data,
            _ => return Err(FieldsyncError::Auth("refresh was rejected".to_string())),
        };

        // Servers that do not rotate the refresh token keep the old one valid.
        let refresh_token = data
            .refresh_token
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| stored.refresh_token.clone());
        let refresh_expiry = data.refresh_expires_at.or(stored.refresh_expiry);

        Ok(Credential::new(data.access_token, refresh_token)?
            .with_expiries(data.expires_at, refresh_expiry))
    }
}

fn rebuild(request: &Request, token: &str) -> Option<Request> {
    let mut retry = request.try_clone()?;
    let value = bearer(token).ok()?;
    retry.headers_mut().insert(AUTHORIZATION, value);
    Some(retry)
}
