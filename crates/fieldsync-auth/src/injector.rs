// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-request header decoration.
//!
//! Every request gets the project API key. Authentication endpoints always
//! carry the anonymous key as bearer; everything else carries the stored
//! access token, or the anonymous key when no usable token exists so the call
//! still reaches the server's 401 path instead of failing locally.

use std::sync::Arc;

use fieldsync_config::model::ApiConfig;
use fieldsync_core::FieldsyncError;
use fieldsync_vault::CredentialStore;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Request, Url};

/// Header carrying the project API key.
pub const API_KEY_HEADER: &str = "apikey";

/// Read-only decorator over the credential store.
#[derive(Debug)]
pub struct AuthHeaderInjector {
    credentials: Arc<CredentialStore>,
    api_key: HeaderValue,
    anon_bearer: HeaderValue,
    auth_paths: Vec<String>,
}

impl AuthHeaderInjector {
    pub fn new(credentials: Arc<CredentialStore>, api: &ApiConfig) -> Result<Self, FieldsyncError> {
        let mut api_key = header_value(&api.api_key, "api key")?;
        api_key.set_sensitive(true);
        Ok(Self {
            credentials,
            api_key,
            anon_bearer: bearer(&api.anon_key)?,
            auth_paths: api.auth_paths.clone(),
        })
    }

    /// True for login/refresh style endpoints, matched by path suffix.
    pub fn is_auth_endpoint(&self, url: &Url) -> bool {
        let path = url.path().trim_end_matches('/');
        self.auth_paths
            .iter()
            .any(|auth| path.ends_with(auth.trim_end_matches('/')))
    }

    /// Attach `apikey` and `Authorization` headers, replacing existing ones.
    pub async fn decorate(&self, mut request: Request) -> Result<Request, FieldsyncError> {
        let authorization = if self.is_auth_endpoint(request.url()) {
            self.anon_bearer.clone()
        } else {
            match self.credentials.access_token().await {
                Some(token) => bearer(&token)?,
                None => self.anon_bearer.clone(),
            }
        };
        self.apply(request.headers_mut(), authorization);
        Ok(request)
    }

    /// Headers for a request to an authentication endpoint.
    pub fn anonymous_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        self.apply(&mut headers, self.anon_bearer.clone());
        headers
    }

    fn apply(&self, headers: &mut HeaderMap, authorization: HeaderValue) {
        headers.insert(API_KEY_HEADER, self.api_key.clone());
        headers.insert(AUTHORIZATION, authorization);
    }
}

/// `Bearer <token>` as a sensitive header value.
pub fn bearer(token: &str) -> Result<HeaderValue, FieldsyncError> {
    let mut value = header_value(&format!("Bearer {token}"), "bearer token")?;
    value.set_sensitive(true);
    Ok(value)
}

/// The token inside an `Authorization: Bearer ..` header, if present.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

fn header_value(value: &str, what: &str) -> Result<HeaderValue, FieldsyncError> {
    HeaderValue::from_str(value)
        .map_err(|e| FieldsyncError::Config(format!("invalid {what} header value: {e}")))
}
