// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Authentication plumbing for outbound HTTP calls.
//!
//! - [`AuthHeaderInjector`] decorates requests with the API key and a bearer.
//! - [`TokenRefresher`] turns a 401 into at most one refresh call, shared by
//!   every request that failed with the same token.
//! - [`AuthenticatedClient`] chains the two around a `reqwest::Client`.

pub mod client;
pub mod injector;
pub mod refresher;

pub use client::AuthenticatedClient;
pub use injector::AuthHeaderInjector;
pub use refresher::{FailedResponse, TokenRefresher};
