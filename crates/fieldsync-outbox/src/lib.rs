// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable delivery of mutating HTTP calls across connectivity gaps.
//!
//! Requests are persisted before anything else happens. Three paths drain
//! them: a consumer loop fed by a bounded pipe, a subscriber that drains on
//! every offline to online transition, and a periodic background trigger that
//! also recovers rows left behind by a previous process.

pub mod background;
pub mod connectivity;
pub mod outbox;

pub use background::BackgroundSyncTrigger;
pub use connectivity::{spawn_probe, ConnectivityMonitor, ReachabilityProbe, TcpProbe};
pub use outbox::{DrainOutcome, DrainSummary, RequestOutbox};
