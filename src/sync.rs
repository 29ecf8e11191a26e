//! Cross-task coordination primitives.
//!
//! Two objects gate the whole engine:
//! - `TradeLock`: exclusive lock held from the first order of a trade cycle
//!   until the last fill confirms. The printer and asset-diff loops take it
//!   briefly for consistent snapshots; the supervisor takes it during reset
//!   so no cycle is torn mid-flight.
//! - `ResetSignal`: set-once latch any component may trip to request a full
//!   state resync. Setters coalesce; only the supervisor clears it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify, OwnedMutexGuard};

/// Guard representing an in-flight trade cycle (or a reset in progress).
pub type TradeGuard = OwnedMutexGuard<()>;

/// Exclusive, non-reentrant lock shared across task boundaries.
///
/// Acquisition hands out an owned guard so the trader can stash it in its
/// own state and release it from a different call stack once the cycle
/// drains.
#[derive(Clone, Default)]
pub struct TradeLock {
    inner: Arc<Mutex<()>>,
}

impl TradeLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking acquisition. `None` means a cycle (or reset) is in flight.
    pub fn try_acquire(&self) -> Option<TradeGuard> {
        self.inner.clone().try_lock_owned().ok()
    }

    /// Blocking acquisition; queues behind any in-flight trade cycle.
    pub async fn acquire(&self) -> TradeGuard {
        self.inner.clone().lock_owned().await
    }

    pub fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

/// Set-once reset latch. Multiple setters coalesce into a single reset.
#[derive(Default)]
pub struct ResetSignal {
    tripped: AtomicBool,
    notify: Notify,
}

impl ResetSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the latch. Idempotent until the supervisor clears it.
    pub fn set(&self) {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_set(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    /// Cleared only by the supervisor once the reset path has run.
    pub fn clear(&self) {
        self.tripped.store(false, Ordering::SeqCst);
    }

    /// Wait until the latch is set. Returns immediately if already set.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.tripped.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}
