//! tribot - real-time triangular arbitrage engine for NDAX.
//!
//! The engine watches the BTC/CAD, BTC/USDT and USDT/CAD books, evaluates
//! both traversals of the currency cycle on every book change, and fires
//! three liquidity-bounded market orders when a round trip clears fees plus
//! the configured profit floor.
//!
//! Layout:
//! - [`orderbook`]: depth-capped L2 ladders per instrument
//! - [`triangle`]: round-trip valuation and order sizing
//! - [`trader`]: trade-cycle execution and fill reconciliation
//! - [`router`]: inbound frame dispatch
//! - [`account`]: position snapshots and diffs
//! - [`exchange`]: wire protocol, signing, and the WebSocket session
//! - [`app`]: task supervision and the reset path

pub mod account;
pub mod app;
pub mod config;
pub mod error;
pub mod exchange;
pub mod orderbook;
pub mod router;
pub mod sync;
pub mod trader;
pub mod triangle;
