// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reconnection timing and the single pending reconnection slot.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use fieldsync_config::model::RealtimeConfig;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::debug;

/// How long to wait before reconnection attempt `n` (0-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Same delay before every attempt.
    Fixed { delay: Duration },
    /// `initial * 2^attempt`, capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

impl ReconnectPolicy {
    pub fn from_config(config: &RealtimeConfig) -> Self {
        let delay = Duration::from_millis(config.reconnect_delay_ms);
        match config.reconnect_policy.as_str() {
            "exponential" => Self::Exponential {
                initial: delay,
                max: Duration::from_millis(config.max_reconnect_delay_ms),
            },
            _ => Self::Fixed { delay },
        }
    }

    pub fn next_delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed { delay } => delay,
            Self::Exponential { initial, max } => {
                let factor = 2u32.saturating_pow(attempt.min(31));
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

#[derive(Default)]
struct Slot {
    generation: u64,
    pending: Option<JoinHandle<()>>,
}

/// Holds at most one pending reconnection task.
///
/// Scheduling replaces (aborts) whatever was pending. A task that fires
/// vacates the slot before running, so the work it starts may schedule again.
#[derive(Default)]
pub struct ReconnectScheduler {
    slot: Arc<Mutex<Slot>>,
}

impl std::fmt::Debug for ReconnectScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectScheduler")
            .field("pending", &self.is_pending())
            .finish()
    }
}

impl ReconnectScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay`, replacing any previously scheduled task.
    pub fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) {
        let mut slot = lock(&self.slot);
        if let Some(previous) = slot.pending.take() {
            previous.abort();
        }
        slot.generation += 1;
        let generation = slot.generation;
        let shared = Arc::clone(&self.slot);

        slot.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut slot = lock(&shared);
                if slot.generation != generation {
                    return;
                }
                slot.pending = None;
            }
            debug!(?delay, "reconnect timer fired");
            task.await;
        }));
        debug!(?delay, "reconnect scheduled");
    }

    /// Drop the pending task, if any. Returns whether one was pending.
    pub fn cancel(&self) -> bool {
        let mut slot = lock(&self.slot);
        slot.generation += 1;
        match slot.pending.take() {
            Some(handle) => {
                handle.abort();
                debug!("pending reconnect cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.slot).pending.is_some()
    }
}

impl Drop for ReconnectScheduler {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.slot).pending.take() {
            handle.abort();
        }
    }
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
