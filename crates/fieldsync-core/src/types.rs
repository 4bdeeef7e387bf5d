// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared across the credential, outbox, and realtime crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::FieldsyncError;

// --- Credentials ---

/// An access/refresh token pair with optional expiries.
///
/// Both tokens always travel together: a credential without a refresh token
/// cannot be constructed through [`Credential::new`], and the store persists
/// and clears the pair as one row.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub access_expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub refresh_expiry: Option<DateTime<Utc>>,
}

impl Credential {
    /// Build a credential pair without expiry information.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Result<Self, FieldsyncError> {
        let credential = Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            access_expiry: None,
            refresh_expiry: None,
        };
        credential.validate()?;
        Ok(credential)
    }

    pub fn with_expiries(
        mut self,
        access_expiry: Option<DateTime<Utc>>,
        refresh_expiry: Option<DateTime<Utc>>,
    ) -> Self {
        self.access_expiry = access_expiry;
        self.refresh_expiry = refresh_expiry;
        self
    }

    /// Reject credentials whose refresh token is blank.
    pub fn validate(&self) -> Result<(), FieldsyncError> {
        if self.refresh_token.trim().is_empty() {
            return Err(FieldsyncError::Auth(
                "an access token is only valid alongside a refresh token".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the access token if it is present and non-blank.
    pub fn usable_access_token(&self) -> Option<&str> {
        let token = self.access_token.trim();
        if token.is_empty() { None } else { Some(token) }
    }

    /// True when an access expiry is known and lies at or before `now`.
    pub fn is_access_expired(&self, now: DateTime<Utc>) -> bool {
        self.access_expiry.is_some_and(|expiry| expiry <= now)
    }

    /// True when a refresh expiry is known and lies at or before `now`.
    pub fn is_refresh_expired(&self, now: DateTime<Utc>) -> bool {
        self.refresh_expiry.is_some_and(|expiry| expiry <= now)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("access_expiry", &self.access_expiry)
            .field("refresh_expiry", &self.refresh_expiry)
            .finish()
    }
}

/// Change notification published by the credential store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialEvent {
    /// A new credential pair was persisted (login or refresh).
    Saved(Credential),
    /// Credentials were removed. Consumers treat this as logout.
    Cleared,
}

// --- Outbox ---

/// A mutating HTTP call waiting to be persisted in the outbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRequest {
    pub method: String,
    pub url: String,
    pub body_text: Option<String>,
    pub content_type: Option<String>,
}

impl NewRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            url: url.into(),
            body_text: None,
            content_type: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    /// A request carrying a JSON body with `application/json` content type.
    pub fn json(method: impl Into<String>, url: impl Into<String>, body: &serde_json::Value) -> Self {
        Self::new(method, url).with_body(body.to_string(), "application/json")
    }

    pub fn with_body(mut self, body: impl Into<String>, content_type: impl Into<String>) -> Self {
        self.body_text = Some(body.into());
        self.content_type = Some(content_type.into());
        self
    }
}

/// A persisted outbox row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedRequest {
    pub id: i64,
    pub method: String,
    pub url: String,
    pub body_text: Option<String>,
    pub content_type: Option<String>,
    pub attempts: i64,
    pub created_at: String,
}

/// Outcome notifications for UI feedback on queued requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboxEvent {
    /// The request was persisted and offered to the drain pipe.
    Enqueued { id: i64 },
    /// The request executed successfully and its row was removed.
    Delivered { id: i64, status: u16 },
    /// Execution failed; the row stays queued with the new attempt count.
    Failed { id: i64, attempts: i64, error: String },
}

// --- Realtime ---

/// Lifecycle of a realtime socket.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed { code: u16, reason: String },
    Failed { error: String },
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Closed and failed sockets may re-enter `Connecting` through a scheduled reconnect.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed { .. } | Self::Failed { .. })
    }
}

/// Events emitted by the realtime channel for control and observability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Open,
    Message(String),
    Closed { code: u16, reason: String },
    Error(String),
}
