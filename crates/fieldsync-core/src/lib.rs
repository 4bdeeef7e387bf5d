// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Fieldsync resilience layer.
//!
//! This crate provides the error type and the domain types that flow between
//! the credential store, the request outbox, and the realtime order feed.

pub mod error;
pub mod order;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::FieldsyncError;
pub use order::{Coordinates, Order, OrderChange, OrderKey};
pub use types::{
    ConnectionState, Credential, CredentialEvent, NewRequest, OutboxEvent, QueuedRequest,
    SocketEvent,
};
