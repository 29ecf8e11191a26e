//! Trade-cycle execution.
//!
//! One cycle = three market orders covering the triangle. The trade lock is
//! taken when the cycle opens and handed back only when every leg reports
//! fully executed, so nothing else (new cycles, resets, snapshot loops) can
//! interleave with an in-flight cycle. Fills are reconciled against the
//! top-of-book expectations the sizing used; a full-size fill at a
//! materially worse price means our book no longer matches the venue, and
//! the trader latches itself shut until the supervisor resyncs.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::exchange::protocol::{self, OrderStateEvent, OrderTradeEvent};
use crate::exchange::Transport;
use crate::sync::{ResetSignal, TradeGuard, TradeLock};
use crate::triangle::{round_quantity, Order, OrderSide, TriangleArb, DEFAULT_QUANTITY_DECIMALS};

/// Relative price deviation beyond which a fill counts as mispriced.
pub const VALUE_DIFF_THRESHOLD: f64 = 0.001;

/// Quantity ratio above which a mispriced fill is a full-size fill, i.e. a
/// desynced book rather than someone shaving the level first.
pub const FULL_FILL_RATIO: f64 = 0.99;

#[derive(Debug, Clone)]
pub struct TraderConfig {
    pub oms_id: i64,
    pub account_id: i64,
    pub cash_available: f64,
    pub min_trade_value: f64,
    /// Emit each leg only after the previous leg fully executes, instead of
    /// all three at once.
    pub sequential_emission: bool,
    /// Log sized orders instead of submitting them.
    pub dry_run: bool,
    pub quantity_decimals: HashMap<i64, u32>,
}

#[derive(Default)]
struct CycleState {
    /// Expected order per outstanding ClientOrderId.
    records: HashMap<i64, Order>,
    /// Legs that have not yet fully executed.
    outstanding: HashSet<i64>,
    /// Sequential mode: legs minted but not yet submitted.
    queued: VecDeque<(i64, String)>,
    next_id: i64,
    permalock: bool,
    guard: Option<TradeGuard>,
}

pub struct TriangleTrader {
    transport: Arc<dyn Transport>,
    triangle: Arc<dyn TriangleArb>,
    trade_lock: TradeLock,
    reset: Arc<ResetSignal>,
    config: TraderConfig,
    state: Mutex<CycleState>,
}

impl TriangleTrader {
    pub fn new(
        transport: Arc<dyn Transport>,
        triangle: Arc<dyn TriangleArb>,
        trade_lock: TradeLock,
        reset: Arc<ResetSignal>,
        config: TraderConfig,
    ) -> Self {
        Self {
            transport,
            triangle,
            trade_lock,
            reset,
            config,
            state: Mutex::new(CycleState::default()),
        }
    }

    pub fn is_permalocked(&self) -> bool {
        self.state.lock().permalock
    }

    /// Poll the triangle against the current book and open a cycle if the
    /// expected net profit clears the configured floor. No-op while a cycle
    /// is in flight or the trader is latched.
    pub async fn recheck(&self) -> Result<()> {
        if self.state.lock().permalock {
            return Ok(());
        }
        if self.trade_lock.is_locked() {
            return Ok(());
        }

        let cash = self.config.cash_available;
        let floor = self.config.min_trade_value;
        let orders = if self
            .triangle
            .forward_net(cash)
            .is_some_and(|net| net > floor)
        {
            self.triangle.forward_orders(cash)
        } else if self
            .triangle
            .backward_net(cash)
            .is_some_and(|net| net > floor)
        {
            self.triangle.backward_orders(cash)
        } else {
            None
        };
        let Some(orders) = orders else {
            return Ok(());
        };

        if self.config.dry_run {
            for order in &orders {
                info!(?order, "dry-run: would submit order");
            }
            return Ok(());
        }

        let Some(guard) = self.trade_lock.try_acquire() else {
            return Ok(());
        };
        info!("🎯 Opportunity detected; opening trade cycle");

        let to_send = {
            let mut state = self.state.lock();
            state.guard = Some(guard);

            let mut frames = Vec::with_capacity(orders.len());
            for order in orders {
                state.next_id += 1;
                let client_order_id = state.next_id;
                let decimals = self
                    .config
                    .quantity_decimals
                    .get(&order.instrument_id)
                    .copied()
                    .unwrap_or(DEFAULT_QUANTITY_DECIMALS);
                let quantity = round_quantity(order.quantity, decimals);
                let recorded = Order { quantity, ..order };
                state.records.insert(client_order_id, recorded);
                state.outstanding.insert(client_order_id);
                frames.push((
                    client_order_id,
                    protocol::send_order(
                        self.config.oms_id,
                        self.config.account_id,
                        client_order_id,
                        &recorded,
                        quantity,
                    ),
                ));
            }

            if self.config.sequential_emission {
                let first = frames.remove(0);
                state.queued = frames.into_iter().collect();
                vec![first]
            } else {
                frames
            }
        };

        for (client_order_id, frame) in to_send {
            debug!(client_order_id, "submitting order");
            if let Err(e) = self.transport.send(frame).await {
                warn!(client_order_id, "order submission failed; abandoning cycle");
                self.abandon_cycle();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Reconcile one fill against the expectation recorded at emission.
    pub fn on_fill(&self, fill: &OrderTradeEvent) {
        let mut state = self.state.lock();
        let Some(expected) = state.records.get(&fill.client_order_id) else {
            warn!(
                client_order_id = fill.client_order_id,
                "fill for unknown order"
            );
            return;
        };

        // >1 means we got less value than the book promised: overpaid on a
        // buy, undersold on a sell.
        let price_ratio = match expected.side {
            OrderSide::Buy => fill.price / expected.expected_price,
            OrderSide::Sell => expected.expected_price / fill.price,
        };
        let quantity_ratio = fill.quantity / expected.quantity;

        if price_ratio > 1.0 + VALUE_DIFF_THRESHOLD {
            if quantity_ratio > FULL_FILL_RATIO {
                warn!(
                    client_order_id = fill.client_order_id,
                    price_ratio,
                    quantity_ratio,
                    "🛑 Full-size fill at a mispriced level; latching until reset"
                );
                state.permalock = true;
                drop(state);
                self.reset.set();
            } else {
                warn!(
                    client_order_id = fill.client_order_id,
                    price_ratio, quantity_ratio, "partial fill with slippage"
                );
            }
        } else {
            debug!(
                client_order_id = fill.client_order_id,
                quantity = fill.quantity,
                price = fill.price,
                "fill within expectations"
            );
        }
    }

    /// Track order lifecycle; the cycle drains on `FullyExecuted` legs and
    /// the lock is handed back once the last one lands.
    pub async fn on_state_change(&self, event: &OrderStateEvent) -> Result<()> {
        match event.order_state.as_str() {
            "FullyExecuted" => {
                let next = {
                    let mut state = self.state.lock();
                    if !state.outstanding.remove(&event.client_order_id) {
                        debug!(
                            client_order_id = event.client_order_id,
                            "state change for unknown order"
                        );
                        return Ok(());
                    }
                    if state.outstanding.is_empty() {
                        info!("Trade cycle complete; releasing trade lock");
                        state.records.clear();
                        state.queued.clear();
                        state.guard = None;
                        None
                    } else {
                        state.queued.pop_front()
                    }
                };
                if let Some((client_order_id, frame)) = next {
                    debug!(client_order_id, "submitting next leg");
                    if let Err(e) = self.transport.send(frame).await {
                        warn!(client_order_id, "leg submission failed; abandoning cycle");
                        self.abandon_cycle();
                        return Err(e);
                    }
                }
            }
            "Rejected" => {
                warn!(
                    client_order_id = event.client_order_id,
                    "order rejected; requesting reset"
                );
                self.reset.set();
            }
            other => {
                debug!(
                    client_order_id = event.client_order_id,
                    state = other,
                    "order state change"
                );
            }
        }
        Ok(())
    }

    /// Supervisor reset: unlatch and forget any partial cycle. ClientOrderIds
    /// keep incrementing so ids are never reused against the venue.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.permalock = false;
        state.records.clear();
        state.outstanding.clear();
        state.queued.clear();
        state.guard = None;
    }

    fn abandon_cycle(&self) {
        let mut state = self.state.lock();
        state.records.clear();
        state.outstanding.clear();
        state.queued.clear();
        state.guard = None;
    }
}
