// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for Fieldsync.
//!
//! Provides WAL-mode SQLite storage with embedded migrations and a
//! single-writer concurrency model via `tokio-rusqlite`. The outbox table
//! holds queued HTTP requests; the credential tables are owned by
//! `fieldsync-vault` but created here so one migration history covers both.

pub mod database;
pub mod migrations;
pub mod queries;

pub use database::Database;
