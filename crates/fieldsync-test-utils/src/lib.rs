// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Fieldsync integration tests.
//!
//! Provides a temp-database harness with an unlocked credential store and a
//! recording WebSocket server, so channel and outbox tests run without
//! external services.
//!
//! # Components
//!
//! - [`TestHarness`] - temp SQLite database, credential store, and config
//! - [`MockSocketServer`] - WebSocket server that records frames and close codes

pub mod harness;
pub mod mock_socket;

pub use harness::TestHarness;
pub use mock_socket::{MockSocketServer, RecordedConnection};
