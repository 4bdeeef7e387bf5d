// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Fieldsync resilience core.

use thiserror::Error;

/// The primary error type shared by every Fieldsync crate.
#[derive(Debug, Error)]
pub enum FieldsyncError {
    /// Configuration errors (invalid TOML, missing required fields, bad values).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, migrations).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Credential vault errors (key derivation, sealing, corrupted rows).
    #[error("vault error: {0}")]
    Vault(String),

    /// HTTP transport errors (connection refused, body read failure, bad URL).
    #[error("http error: {message}")]
    Http {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Authentication errors (invalid credential, refresh rejected).
    #[error("auth error: {0}")]
    Auth(String),

    /// Realtime channel errors (handshake failure, socket closed, send failure).
    #[error("channel error: {message}")]
    Channel {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Malformed realtime protocol frames.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl FieldsyncError {
    /// Wrap any error as an HTTP transport failure.
    pub fn http<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Http {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Wrap any error as a realtime channel failure.
    pub fn channel<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Channel {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}
