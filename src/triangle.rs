//! Triangle evaluation: gross round-trip value, expected net profit, and
//! liquidity-bounded order sizing across the three legs.
//!
//! Leg convention for the BTC/CAD cycle:
//! - leg1: base/cash   (BTC/CAD)
//! - leg2: base/bridge (BTC/USDT)
//! - leg3: bridge/cash (USDT/CAD)
//!
//! The forward traversal is buy-sell-sell: buy base with cash on leg1, sell
//! base for bridge on leg2, sell bridge for cash on leg3. Backward reverses
//! the loop (buy-buy-sell). Every trade skims the taker fee, so quantities
//! are propagated between legs through `s = 1 - fee` and the round trip is
//! weighted by `s^3`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::orderbook::MultiBook;

/// Decimal places used when no per-instrument override is configured.
pub const DEFAULT_QUANTITY_DECIMALS: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Wire encoding: 0 = buy, 1 = sell.
    pub fn wire_code(self) -> u8 {
        match self {
            OrderSide::Buy => 0,
            OrderSide::Sell => 1,
        }
    }
}

/// Order intent produced by the evaluator and consumed by the trader.
/// Quantities are carried unrounded; the trader rounds at emission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Order {
    pub instrument_id: i64,
    pub side: OrderSide,
    pub quantity: f64,
    /// Wire order type; always 1 (market).
    pub order_type: u8,
    pub time_in_force: u8,
    /// Top-of-book price the sizing assumed; fills are reconciled against it.
    pub expected_price: f64,
}

impl Order {
    pub fn market(instrument_id: i64, side: OrderSide, quantity: f64, expected_price: f64) -> Self {
        Self {
            instrument_id,
            side,
            quantity,
            order_type: 1,
            time_in_force: 1,
            expected_price,
        }
    }
}

/// Round to a fixed number of decimal places.
pub fn round_quantity(quantity: f64, decimals: u32) -> f64 {
    let scale = 10f64.powi(decimals as i32);
    (quantity * scale).round() / scale
}

/// Instrument ids spanning the closed currency cycle.
#[derive(Debug, Clone, Copy)]
pub struct TriangleLegs {
    pub leg1: i64,
    pub leg2: i64,
    pub leg3: i64,
}

/// A directional triangle evaluator over live top-of-book state.
///
/// All methods answer `None` for "no opportunity": an empty side, a
/// non-positive throughput, or a leg that rounds below its minimum tick.
/// Evaluation never mutates the book.
pub trait TriangleArb: Send + Sync {
    /// Gross fee-adjusted round-trip multiplier on cash; >1 is profitable
    /// before liquidity constraints.
    fn forward(&self) -> Option<f64>;
    fn backward(&self) -> Option<f64>;

    /// Expected net cash profit: `(multiplier - 1) * throughput(cash)`.
    fn forward_net(&self, cash: f64) -> Option<f64>;
    fn backward_net(&self, cash: f64) -> Option<f64>;

    /// The order triple sized to the bottleneck throughput.
    fn forward_orders(&self, cash: f64) -> Option<[Order; 3]>;
    fn backward_orders(&self, cash: f64) -> Option<[Order; 3]>;
}

/// Buy-sell-sell triangle over L1 quotes.
pub struct TriangleBss {
    book: Arc<RwLock<MultiBook>>,
    legs: TriangleLegs,
    /// `s = 1 - fee`, the per-leg value retained after the taker fee.
    single_leg: f64,
    /// `s^3`, the full round-trip fee weight.
    round_trip: f64,
    quantity_decimals: HashMap<i64, u32>,
}

impl TriangleBss {
    pub fn new(
        book: Arc<RwLock<MultiBook>>,
        legs: TriangleLegs,
        fee: f64,
        quantity_decimals: HashMap<i64, u32>,
    ) -> Self {
        let single_leg = 1.0 - fee;
        Self {
            book,
            legs,
            single_leg,
            round_trip: single_leg.powi(3),
            quantity_decimals,
        }
    }

    fn decimals_for(&self, instrument_id: i64) -> u32 {
        self.quantity_decimals
            .get(&instrument_id)
            .copied()
            .unwrap_or(DEFAULT_QUANTITY_DECIMALS)
    }

    /// `(price, quantity)` tops for the forward traversal:
    /// leg1 ask, leg2 bid, leg3 bid.
    fn forward_tops(&self) -> Option<[(f64, f64); 3]> {
        let book = self.book.read();
        Some([
            book.top_ask(self.legs.leg1)?,
            book.top_bid(self.legs.leg2)?,
            book.top_bid(self.legs.leg3)?,
        ])
    }

    /// Tops for the backward traversal: leg3 ask, leg2 ask, leg1 bid.
    fn backward_tops(&self) -> Option<[(f64, f64); 3]> {
        let book = self.book.read();
        Some([
            book.top_ask(self.legs.leg3)?,
            book.top_ask(self.legs.leg2)?,
            book.top_bid(self.legs.leg1)?,
        ])
    }

    /// Largest cash amount that can flow through all three legs without any
    /// leg exceeding its top-of-book size. Each leg's available size is
    /// converted into leg1's cash currency, back-propagating the fee skim.
    pub fn forward_throughput(&self, cash: f64) -> Option<f64> {
        let [(ask1, ask1_qty), (bid2, bid2_qty), (_bid3, bid3_qty)] = self.forward_tops()?;
        let s = self.single_leg;

        let t1 = ask1_qty * ask1;
        let t2 = bid2_qty * ask1 / s;
        let t3 = bid3_qty * ask1 / (bid2 * s * s);
        Some(cash.min(t1).min(t2).min(t3))
    }

    pub fn backward_throughput(&self, cash: f64) -> Option<f64> {
        let [(ask3, ask3_qty), (ask2, ask2_qty), (_bid1, bid1_qty)] = self.backward_tops()?;
        let s = self.single_leg;

        let t1 = ask3_qty * ask3;
        let t2 = ask2_qty * ask2 * ask3 / s;
        let t3 = bid1_qty * ask3 * ask2 / (s * s);
        Some(cash.min(t1).min(t2).min(t3))
    }

    /// `None` when any leg would round below its minimum tick.
    fn check_ticks(&self, orders: &[Order; 3]) -> bool {
        orders
            .iter()
            .all(|order| round_quantity(order.quantity, self.decimals_for(order.instrument_id)) > 0.0)
    }
}

impl TriangleArb for TriangleBss {
    fn forward(&self) -> Option<f64> {
        let [(ask1, _), (bid2, _), (bid3, _)] = self.forward_tops()?;
        Some(bid2 * bid3 / ask1 * self.round_trip)
    }

    fn backward(&self) -> Option<f64> {
        let [(ask3, _), (ask2, _), (bid1, _)] = self.backward_tops()?;
        Some(bid1 / ask3 / ask2 * self.round_trip)
    }

    fn forward_net(&self, cash: f64) -> Option<f64> {
        let throughput = self.forward_throughput(cash)?;
        Some((self.forward()? - 1.0) * throughput)
    }

    fn backward_net(&self, cash: f64) -> Option<f64> {
        let throughput = self.backward_throughput(cash)?;
        Some((self.backward()? - 1.0) * throughput)
    }

    fn forward_orders(&self, cash: f64) -> Option<[Order; 3]> {
        let throughput = self.forward_throughput(cash)?;
        if throughput <= 0.0 {
            return None;
        }
        let [(ask1, _), (bid2, _), (bid3, _)] = self.forward_tops()?;
        let s = self.single_leg;

        // The fee is skimmed from each leg's proceeds, so the quantity
        // delivered to the next leg shrinks by `s` per hop.
        let qty1 = throughput / ask1;
        let qty2 = qty1 * s;
        let qty3 = qty2 * bid2 * s;

        let orders = [
            Order::market(self.legs.leg1, OrderSide::Buy, qty1, ask1),
            Order::market(self.legs.leg2, OrderSide::Sell, qty2, bid2),
            Order::market(self.legs.leg3, OrderSide::Sell, qty3, bid3),
        ];
        self.check_ticks(&orders).then_some(orders)
    }

    fn backward_orders(&self, cash: f64) -> Option<[Order; 3]> {
        let throughput = self.backward_throughput(cash)?;
        if throughput <= 0.0 {
            return None;
        }
        let [(ask3, _), (ask2, _), (bid1, _)] = self.backward_tops()?;
        let s = self.single_leg;

        let qty1 = throughput / ask3;
        let qty2 = qty1 / ask2 * s;
        let qty3 = qty2 * s;

        let orders = [
            Order::market(self.legs.leg3, OrderSide::Buy, qty1, ask3),
            Order::market(self.legs.leg2, OrderSide::Buy, qty2, ask2),
            Order::market(self.legs.leg1, OrderSide::Sell, qty3, bid1),
        ];
        self.check_ticks(&orders).then_some(orders)
    }
}

/// Buy-buy-sell triangle: the same cycle traversed with the opposite
/// orientation, so its forward direction is the BSS backward and vice
/// versa. Only the per-leg sides and the fee propagation direction differ.
pub struct TriangleBbs {
    inner: TriangleBss,
}

impl TriangleBbs {
    pub fn new(
        book: Arc<RwLock<MultiBook>>,
        legs: TriangleLegs,
        fee: f64,
        quantity_decimals: HashMap<i64, u32>,
    ) -> Self {
        Self {
            inner: TriangleBss::new(book, legs, fee, quantity_decimals),
        }
    }
}

impl TriangleArb for TriangleBbs {
    fn forward(&self) -> Option<f64> {
        self.inner.backward()
    }

    fn backward(&self) -> Option<f64> {
        self.inner.forward()
    }

    fn forward_net(&self, cash: f64) -> Option<f64> {
        self.inner.backward_net(cash)
    }

    fn backward_net(&self, cash: f64) -> Option<f64> {
        self.inner.forward_net(cash)
    }

    fn forward_orders(&self, cash: f64) -> Option<[Order; 3]> {
        self.inner.backward_orders(cash)
    }

    fn backward_orders(&self, cash: f64) -> Option<[Order; 3]> {
        self.inner.forward_orders(cash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::{L2Action, L2Update, Side};

    const BTCCAD: i64 = 1;
    const USDTCAD: i64 = 80;
    const BTCUSDT: i64 = 82;

    const LEGS: TriangleLegs = TriangleLegs {
        leg1: BTCCAD,
        leg2: BTCUSDT,
        leg3: USDTCAD,
    };

    fn set_level(book: &mut MultiBook, instrument_id: i64, side: Side, price: f64, quantity: f64) {
        book.apply(&L2Update {
            action: L2Action::New,
            side,
            price,
            quantity,
            instrument_id,
            timestamp_ms: 0,
        });
    }

    /// No-arbitrage book from a live capture.
    fn orderbook_1() -> Arc<RwLock<MultiBook>> {
        let mut book = MultiBook::new(&[BTCCAD, BTCUSDT, USDTCAD], 5);
        set_level(&mut book, BTCCAD, Side::Ask, 68971.67, 0.044);
        set_level(&mut book, BTCCAD, Side::Bid, 68910.0, 0.15759);
        set_level(&mut book, BTCUSDT, Side::Ask, 57049.62, 0.053027);
        set_level(&mut book, BTCUSDT, Side::Bid, 56538.5, 0.15759);
        set_level(&mut book, USDTCAD, Side::Ask, 1.2343, 1234.16);
        set_level(&mut book, USDTCAD, Side::Bid, 1.2166, 34.96);
        Arc::new(RwLock::new(book))
    }

    /// Same book with the USDT/CAD bid lifted enough to open the forward
    /// cycle.
    fn orderbook_2() -> Arc<RwLock<MultiBook>> {
        let book = orderbook_1();
        {
            let mut book = book.write();
            set_level(&mut book, USDTCAD, Side::Ask, 1.4, 1234.16);
            book.apply(&L2Update {
                action: L2Action::Delete,
                side: Side::Ask,
                price: 1.2343,
                quantity: 0.0,
                instrument_id: USDTCAD,
                timestamp_ms: 0,
            });
            set_level(&mut book, USDTCAD, Side::Bid, 1.3, 34.96);
            book.apply(&L2Update {
                action: L2Action::Delete,
                side: Side::Bid,
                price: 1.2166,
                quantity: 0.0,
                instrument_id: USDTCAD,
                timestamp_ms: 0,
            });
        }
        book
    }

    /// Deeper-liquidity book where the BTC/USDT bid is the constraint.
    fn orderbook_3() -> Arc<RwLock<MultiBook>> {
        let mut book = MultiBook::new(&[BTCCAD, BTCUSDT, USDTCAD], 5);
        set_level(&mut book, BTCCAD, Side::Ask, 61401.15, 1.243);
        set_level(&mut book, BTCCAD, Side::Bid, 61390.0, 0.8);
        set_level(&mut book, BTCUSDT, Side::Ask, 50810.0, 0.3);
        set_level(&mut book, BTCUSDT, Side::Bid, 50700.33, 0.0492);
        set_level(&mut book, USDTCAD, Side::Ask, 1.24, 9000.0);
        set_level(&mut book, USDTCAD, Side::Bid, 1.23, 6958.44);
        Arc::new(RwLock::new(book))
    }

    fn triangle(book: Arc<RwLock<MultiBook>>) -> TriangleBss {
        TriangleBss::new(book, LEGS, 0.002, HashMap::new())
    }

    fn assert_close(actual: f64, expected: f64, tolerance: f64) {
        assert!(
            (actual - expected).abs() < tolerance,
            "{actual} differs from {expected} by more than {tolerance}"
        );
    }

    #[test]
    fn orderbook_1_round_trip_values() {
        let triangle = triangle(orderbook_1());
        assert_close(triangle.forward().unwrap(), 0.9913179648, 1e-8);
        assert_close(triangle.backward().unwrap(), 0.9727480946, 1e-8);
    }

    #[test]
    fn orderbook_2_round_trip_values() {
        let triangle = triangle(orderbook_2());
        assert_close(triangle.forward().unwrap(), 1.0592744980, 1e-8);
        assert_close(triangle.backward().unwrap(), 0.8576164094, 1e-8);
    }

    #[test]
    fn orderbook_1_net_profit() {
        let triangle = triangle(orderbook_1());
        assert_close(triangle.forward_net(10_000.0).unwrap(), -0.3717563059, 1e-5);
        assert_close(triangle.backward_net(10_000.0).unwrap(), -41.513473, 1e-5);
    }

    #[test]
    fn orderbook_2_net_profit() {
        let triangle = triangle(orderbook_2());
        assert_close(triangle.forward_net(10_000.0).unwrap(), 2.538076366, 1e-5);
        assert_close(triangle.backward_net(10_000.0).unwrap(), -246.013785, 1e-5);
    }

    #[test]
    fn net_profit_matches_multiplier_times_throughput() {
        let triangle = triangle(orderbook_2());
        for cash in [0.0, 30.0, 10_000.0] {
            let expected =
                (triangle.forward().unwrap() - 1.0) * triangle.forward_throughput(cash).unwrap();
            assert_eq!(triangle.forward_net(cash).unwrap(), expected);

            let expected =
                (triangle.backward().unwrap() - 1.0) * triangle.backward_throughput(cash).unwrap();
            assert_eq!(triangle.backward_net(cash).unwrap(), expected);
        }
    }

    #[test]
    fn forward_orders_bounded_by_third_leg() {
        let triangle = triangle(orderbook_2());
        let [order1, order2, order3] = triangle.forward_orders(10_000.0).unwrap();

        assert_eq!(order1.instrument_id, BTCCAD);
        assert_eq!(order1.side, OrderSide::Buy);
        assert_close(order1.quantity, 0.0006208205, 1e-9);
        assert_eq!(order1.expected_price, 68971.67);

        assert_eq!(order2.instrument_id, BTCUSDT);
        assert_eq!(order2.side, OrderSide::Sell);
        assert_close(order2.quantity, 0.0006195789, 1e-9);
        assert_eq!(order2.expected_price, 56538.5);

        // The USDT/CAD bid is the constraint, so the last leg consumes it
        // exactly.
        assert_eq!(order3.instrument_id, USDTCAD);
        assert_eq!(order3.side, OrderSide::Sell);
        assert_close(order3.quantity, 34.96, 1e-9);
        assert_eq!(order3.expected_price, 1.3);
    }

    #[test]
    fn forward_orders_bounded_by_cash() {
        let triangle = triangle(orderbook_2());
        let [order1, order2, order3] = triangle.forward_orders(30.0).unwrap();
        assert_close(order1.quantity, 0.0004349612, 1e-9);
        assert_close(order2.quantity, 0.0004340913, 1e-9);
        assert_close(order3.quantity, 24.49378, 1e-4);
    }

    #[test]
    fn forward_orders_bounded_by_second_leg() {
        let triangle = triangle(orderbook_3());
        let [order1, order2, order3] = triangle.forward_orders(10_000.0).unwrap();
        assert_close(order1.quantity, 0.04929860, 1e-7);
        assert_close(order2.quantity, 0.0492, 1e-7);
        assert_close(order3.quantity, 2489.467, 1e-2);
    }

    #[test]
    fn fee_skim_propagates_between_legs() {
        let triangle = triangle(orderbook_2());
        let s = 0.998;
        let [order1, order2, order3] = triangle.forward_orders(10_000.0).unwrap();
        assert_close(order2.quantity, order1.quantity * s, 1e-12);
        assert_close(order3.quantity, order2.quantity * order2.expected_price * s, 1e-9);

        let [order1, order2, order3] = triangle.backward_orders(10_000.0).unwrap();
        assert_close(order2.quantity, order1.quantity / order2.expected_price * s, 1e-12);
        assert_close(order3.quantity, order2.quantity * s, 1e-12);
    }

    #[test]
    fn levels_below_the_top_do_not_change_the_value() {
        let book = orderbook_2();
        let triangle = triangle(book.clone());
        let forward = triangle.forward().unwrap();
        let backward = triangle.backward().unwrap();

        {
            let mut book = book.write();
            set_level(&mut book, BTCCAD, Side::Ask, 69000.0, 5.0);
            set_level(&mut book, BTCCAD, Side::Bid, 68000.0, 5.0);
            set_level(&mut book, BTCUSDT, Side::Bid, 56000.0, 5.0);
            set_level(&mut book, USDTCAD, Side::Ask, 1.5, 5000.0);
        }
        assert_eq!(triangle.forward().unwrap(), forward);
        assert_eq!(triangle.backward().unwrap(), backward);
    }

    #[test]
    fn empty_side_yields_no_opportunity() {
        let book = orderbook_2();
        {
            let mut book = book.write();
            book.apply(&L2Update {
                action: L2Action::Delete,
                side: Side::Bid,
                price: 1.3,
                quantity: 0.0,
                instrument_id: USDTCAD,
                timestamp_ms: 0,
            });
        }
        let triangle = triangle(book);
        assert_eq!(triangle.forward(), None);
        assert_eq!(triangle.forward_net(10_000.0), None);
        assert_eq!(triangle.forward_orders(10_000.0), None);
        // Backward only reads the USDT/CAD ask; it still evaluates.
        assert!(triangle.backward().is_some());
    }

    #[test]
    fn zero_cash_yields_zero_net_and_no_orders() {
        let triangle = triangle(orderbook_2());
        assert_eq!(triangle.forward_throughput(0.0), Some(0.0));
        assert_eq!(triangle.forward_net(0.0), Some(0.0));
        assert_eq!(triangle.forward_orders(0.0), None);
        assert_eq!(triangle.backward_orders(0.0), None);
    }

    #[test]
    fn sub_tick_quantities_yield_no_orders() {
        let book = orderbook_2();
        let mut decimals = HashMap::new();
        decimals.insert(BTCCAD, 6);
        decimals.insert(BTCUSDT, 6);
        decimals.insert(USDTCAD, 2);
        let triangle = TriangleBss::new(book, LEGS, 0.002, decimals);

        // 0.004 CAD of throughput rounds every leg to zero.
        assert!(triangle.forward_orders(0.004).is_none());
        assert!(triangle.forward_orders(10_000.0).is_some());
    }

    #[test]
    fn bbs_variant_mirrors_the_traversal() {
        let book = orderbook_2();
        let bss = TriangleBss::new(book.clone(), LEGS, 0.002, HashMap::new());
        let bbs = TriangleBbs::new(book, LEGS, 0.002, HashMap::new());

        assert_eq!(bbs.forward(), bss.backward());
        assert_eq!(bbs.backward(), bss.forward());
        assert_eq!(bbs.forward_net(10_000.0), bss.backward_net(10_000.0));
        assert_eq!(bbs.forward_orders(10_000.0), bss.backward_orders(10_000.0));
    }

    #[test]
    fn rounding_is_per_instrument() {
        assert_eq!(round_quantity(0.0006208205, 6), 0.000621);
        assert_eq!(round_quantity(24.49378, 2), 24.49);
        assert_eq!(round_quantity(0.0000004, 6), 0.0);
    }
}
