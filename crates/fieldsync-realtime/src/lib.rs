// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Realtime order feed for Fieldsync.
//!
//! A [`RealtimeChannel`] keeps one WebSocket open to the change feed and
//! reconnects on its own after closures. Inbound frames pass through the
//! [`MessageRouter`] into the [`OrderStore`], which publishes snapshots of the
//! current orders.

pub mod channel;
pub mod protocol;
pub mod reconnect;
pub mod router;
pub mod store;

pub use channel::RealtimeChannel;
pub use reconnect::{ReconnectPolicy, ReconnectScheduler};
pub use router::MessageRouter;
pub use store::OrderStore;
