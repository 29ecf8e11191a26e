//! Inbound message routing.
//!
//! Classifies venue frames and hands them to the book, the account tracker,
//! or the trader. The feed is the ground truth: anything we cannot parse
//! means our local state can no longer be trusted, so the router requests a
//! reset and drops the message rather than propagating parse errors.

use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::account::AccountTracker;
use crate::error::FatalError;
use crate::exchange::protocol::{
    self, Frame, OrderStateEvent, OrderTradeEvent, PositionEntry, SubscribeAccountEventsReply,
};
use crate::orderbook::MultiBook;
use crate::sync::ResetSignal;
use crate::trader::TriangleTrader;

/// Account-channel events we receive but have no handling for.
const ACCOUNT_EVENTS: [&str; 6] = [
    "AccountPositionEvent",
    "CancelAllOrdersRejectEvent",
    "CancelOrderRejectEvent",
    "CancelReplaceOrderRejectEvent",
    "MarketStatusUpdate",
    "PendingDepositUpdate",
];

pub struct Router {
    book: Arc<RwLock<MultiBook>>,
    account: Arc<AccountTracker>,
    trader: Arc<TriangleTrader>,
    reset: Arc<ResetSignal>,
}

impl Router {
    pub fn new(
        book: Arc<RwLock<MultiBook>>,
        account: Arc<AccountTracker>,
        trader: Arc<TriangleTrader>,
        reset: Arc<ResetSignal>,
    ) -> Self {
        Self {
            book,
            account,
            trader,
            reset,
        }
    }

    pub async fn route(&self, raw: &str) -> Result<()> {
        let frame = match Frame::parse(raw) {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, raw, "unparseable frame; requesting reset");
                self.reset.set();
                return Ok(());
            }
        };

        match frame.n.as_str() {
            // The subscription reply is the initial snapshot; later events
            // are deltas. Application is identical either way.
            "SubscribeLevel2" | "Level2UpdateEvent" => {
                let updates = match protocol::parse_l2_updates(&frame.o) {
                    Ok(updates) => updates,
                    Err(e) => {
                        error!(error = %e, operation = %frame.n, "bad level2 payload; requesting reset");
                        self.reset.set();
                        return Ok(());
                    }
                };
                if frame.n == "SubscribeLevel2" {
                    info!(levels = updates.len(), "level2 snapshot received");
                }
                {
                    let mut book = self.book.write();
                    for update in &updates {
                        book.apply(update);
                    }
                }
                self.trader.recheck().await?;
            }
            "GetAccountPositions" => match frame.payload::<Vec<PositionEntry>>() {
                Ok(entries) => self.account.apply_snapshot(&entries),
                Err(e) => {
                    error!(error = %e, "bad positions payload; requesting reset");
                    self.reset.set();
                }
            },
            "OrderTradeEvent" => match frame.payload::<OrderTradeEvent>() {
                Ok(fill) => self.trader.on_fill(&fill),
                Err(e) => {
                    error!(error = %e, "bad trade event payload; requesting reset");
                    self.reset.set();
                }
            },
            "OrderStateEvent" => match frame.payload::<OrderStateEvent>() {
                Ok(event) => self.trader.on_state_change(&event).await?,
                Err(e) => {
                    error!(error = %e, "bad state event payload; requesting reset");
                    self.reset.set();
                }
            },
            "SubscribeAccountEvents" => match frame.payload::<SubscribeAccountEventsReply>() {
                Ok(reply) if reply.subscribed => info!("✅ Account events subscribed"),
                Ok(_) => return Err(FatalError::SubscriptionRefused.into()),
                Err(e) => {
                    error!(error = %e, "bad subscription reply; requesting reset");
                    self.reset.set();
                }
            },
            "SendOrder" => info!(payload = %frame.o, "SendOrder reply"),
            "NewOrderRejectEvent" => warn!(payload = %frame.o, "order rejected by the venue"),
            "DepositTicketUpdateEvent" => info!(payload = %frame.o, "deposit ticket update"),
            operation if ACCOUNT_EVENTS.contains(&operation) => {
                warn!(operation, "unhandled account event; continuing");
            }
            operation => {
                error!(operation, "unhandled operation; continuing");
                debug!(raw, "unhandled frame body");
            }
        }
        Ok(())
    }
}
