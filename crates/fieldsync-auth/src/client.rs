// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client that authenticates every call and recovers from expired tokens.

use std::sync::Arc;
use std::time::Duration;

use fieldsync_config::model::ApiConfig;
use fieldsync_core::FieldsyncError;
use fieldsync_vault::CredentialStore;
use reqwest::{Request, Response, StatusCode, Url};
use tracing::debug;

use crate::injector::AuthHeaderInjector;
use crate::refresher::{FailedResponse, TokenRefresher};

/// Decorate, send, and on 401 retry with a refreshed token until the
/// refresher declines.
#[derive(Debug, Clone)]
pub struct AuthenticatedClient {
    http: reqwest::Client,
    injector: Arc<AuthHeaderInjector>,
    refresher: Arc<TokenRefresher>,
    base_url: String,
}

impl AuthenticatedClient {
    /// Build the client stack over `credentials` with a per-request timeout.
    pub fn new(
        credentials: Arc<CredentialStore>,
        api: &ApiConfig,
        timeout: Duration,
    ) -> Result<Self, FieldsyncError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FieldsyncError::http("failed to build HTTP client", e))?;
        let injector = Arc::new(AuthHeaderInjector::new(Arc::clone(&credentials), api)?);
        let refresher = Arc::new(TokenRefresher::new(
            credentials,
            Arc::clone(&injector),
            http.clone(),
            api,
        )?);
        Ok(Self {
            http,
            injector,
            refresher,
            base_url: api.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn injector(&self) -> &Arc<AuthHeaderInjector> {
        &self.injector
    }

    /// Absolute URLs pass through; relative ones are appended to the API base.
    pub fn resolve_url(&self, raw: &str) -> Result<Url, FieldsyncError> {
        let joined;
        let candidate = if raw.contains("://") {
            raw
        } else {
            joined = format!("{}/{}", self.base_url, raw.trim_start_matches('/'));
            &joined
        };
        Url::parse(candidate)
            .map_err(|e| FieldsyncError::Config(format!("invalid request url `{raw}`: {e}")))
    }

    /// Send `request`, refreshing the session on 401 where possible.
    ///
    /// Non-2xx responses are returned, not turned into errors; only transport
    /// failures produce `Err`.
    pub async fn execute(&self, request: Request) -> Result<Response, FieldsyncError> {
        let mut request = self.injector.decorate(request).await?;
        let mut prior_responses = 0;

        loop {
            let retained = request.try_clone();
            let response = self
                .http
                .execute(request)
                .await
                .map_err(|e| FieldsyncError::http("HTTP request failed", e))?;

            let status = response.status();
            if status != StatusCode::UNAUTHORIZED {
                return Ok(response);
            }
            // Streaming bodies cannot be replayed.
            let Some(sent) = retained else {
                return Ok(response);
            };

            let failed = FailedResponse {
                request: &sent,
                status,
                prior_responses,
            };
            match self.refresher.authenticate(&failed).await {
                Some(retry) => {
                    debug!(url = %sent.url(), prior_responses, "retrying with refreshed token");
                    request = retry;
                    prior_responses += 1;
                }
                None => return Ok(response),
            }
        }
    }
}
