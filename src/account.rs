//! Account position tracking.
//!
//! Positions are rebuilt wholesale from every `GetAccountPositions`
//! snapshot; the venue reports zero-or-positive amounts and we keep only
//! the strictly positive ones.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;
use tracing::info;

use crate::exchange::protocol::{self, PositionEntry};
use crate::exchange::Transport;

pub struct AccountTracker {
    transport: Arc<dyn Transport>,
    oms_id: i64,
    account_id: i64,
    positions: RwLock<HashMap<i64, f64>>,
}

impl AccountTracker {
    pub fn new(transport: Arc<dyn Transport>, oms_id: i64, account_id: i64) -> Self {
        Self {
            transport,
            oms_id,
            account_id,
            positions: RwLock::new(HashMap::new()),
        }
    }

    /// Ask the venue for a fresh position snapshot; the reply comes back
    /// through the router.
    pub async fn request_refresh(&self) -> Result<()> {
        self.transport
            .send(protocol::get_account_positions(self.oms_id, self.account_id))
            .await
    }

    pub fn apply_snapshot(&self, entries: &[PositionEntry]) {
        let mut positions = self.positions.write();
        positions.clear();
        for entry in entries {
            if entry.amount > 0.0 {
                positions.insert(entry.product_id, entry.amount);
            }
        }
        info!(positions = ?*positions, "account positions updated");
    }

    pub fn snapshot(&self) -> HashMap<i64, f64> {
        self.positions.read().clone()
    }
}

/// Log every net change between two position snapshots.
pub fn log_position_changes(previous: &HashMap<i64, f64>, current: &HashMap<i64, f64>) {
    for (product_id, amount) in current {
        let before = previous.get(product_id).copied().unwrap_or(0.0);
        if amount != &before {
            info!(
                product_id,
                change = amount - before,
                "net position change"
            );
        }
    }
    for (product_id, before) in previous {
        if !current.contains_key(product_id) {
            info!(product_id, change = -before, "net position change");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn send(&self, _frame: String) -> Result<()> {
            Ok(())
        }
    }

    fn entry(product_id: i64, amount: f64) -> PositionEntry {
        PositionEntry {
            product_id,
            amount,
            product_symbol: None,
        }
    }

    #[test]
    fn snapshot_keeps_positive_amounts_only() {
        let tracker = AccountTracker::new(Arc::new(NullTransport), 1, 7);
        tracker.apply_snapshot(&[entry(1, 0.5), entry(80, 0.0), entry(82, -1.0)]);

        let positions = tracker.snapshot();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions.get(&1), Some(&0.5));
    }

    #[test]
    fn snapshot_is_rebuilt_not_merged() {
        let tracker = AccountTracker::new(Arc::new(NullTransport), 1, 7);
        tracker.apply_snapshot(&[entry(1, 0.5), entry(80, 120.0)]);
        tracker.apply_snapshot(&[entry(80, 90.0)]);

        let positions = tracker.snapshot();
        assert_eq!(positions.get(&1), None);
        assert_eq!(positions.get(&80), Some(&90.0));
    }
}
