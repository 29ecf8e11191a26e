//! AlphaPoint-style wire protocol.
//!
//! Every frame is `{m, i, n, o}`: message type, correlation nonce, operation
//! name, and a JSON-encoded *string* payload. Yes, payloads are
//! double-encoded; that is the venue's format, not ours.

use anyhow::{bail, Context, Result};
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::orderbook::{L2Action, L2Update, Side};
use crate::triangle::Order;

/// Wire message types carried in `m`.
pub mod msg_type {
    pub const REQUEST: u8 = 0;
    pub const REPLY: u8 = 1;
    pub const SUBSCRIBE: u8 = 2;
    pub const EVENT: u8 = 3;
    pub const UNSUB: u8 = 4;
    pub const ERROR: u8 = 5;
}

/// A parsed inbound frame. `o` stays encoded until a handler asks for it.
#[derive(Debug, Clone, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub m: u8,
    #[serde(default)]
    pub i: u64,
    pub n: String,
    #[serde(default)]
    pub o: String,
}

impl Frame {
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("malformed frame")
    }

    /// Decode the payload string into a concrete payload type.
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.o).with_context(|| format!("{} payload", self.n))
    }
}

fn frame(message_type: u8, operation: &str, payload: Value) -> String {
    let i: u64 = rand::thread_rng().gen_range(1..10_000);
    json!({
        "m": message_type,
        "i": i,
        "n": operation,
        "o": payload.to_string(),
    })
    .to_string()
}

pub fn request(operation: &str, payload: Value) -> String {
    frame(msg_type::REQUEST, operation, payload)
}

pub fn subscribe_level2(oms_id: i64, instrument_id: i64, depth: usize) -> String {
    request(
        "SubscribeLevel2",
        json!({"OMSId": oms_id, "InstrumentId": instrument_id, "Depth": depth}),
    )
}

pub fn subscribe_account_events(oms_id: i64, account_id: i64) -> String {
    request(
        "SubscribeAccountEvents",
        json!({"OMSId": oms_id, "AccountId": account_id}),
    )
}

pub fn get_account_positions(oms_id: i64, account_id: i64) -> String {
    request(
        "GetAccountPositions",
        json!({"OMSId": oms_id, "AccountId": account_id}),
    )
}

/// Market order submission. `quantity` is the already-rounded size.
pub fn send_order(
    oms_id: i64,
    account_id: i64,
    client_order_id: i64,
    order: &Order,
    quantity: f64,
) -> String {
    request(
        "SendOrder",
        json!({
            "InstrumentId": order.instrument_id,
            "OMSId": oms_id,
            "AccountId": account_id,
            "TimeInForce": order.time_in_force,
            "ClientOrderId": client_order_id,
            "OrderIdOCO": 0,
            "UseDisplayQuantity": false,
            "Side": order.side.wire_code(),
            "Quantity": quantity,
            "OrderType": order.order_type,
            "PegPriceType": 1,
        }),
    )
}

/// Level2 payloads are arrays of 10-element arrays:
/// `[MDUpdateId, AccountId, ActionDateTime, ActionType, LastTradePrice,
///   OrderId, Price, ProductPairCode, Quantity, Side]`.
#[derive(Debug, Clone, Copy, Deserialize)]
struct RawL2Update(u64, i64, i64, u8, f64, i64, f64, i64, f64, u8);

impl TryFrom<RawL2Update> for L2Update {
    type Error = anyhow::Error;

    fn try_from(raw: RawL2Update) -> Result<Self> {
        let action = match raw.3 {
            0 => L2Action::New,
            1 => L2Action::Update,
            2 => L2Action::Delete,
            other => bail!("unknown level2 action type {other}"),
        };
        let side = match raw.9 {
            0 => Side::Bid,
            1 => Side::Ask,
            other => bail!("unknown level2 side {other}"),
        };
        Ok(L2Update {
            action,
            side,
            price: raw.6,
            quantity: raw.8,
            instrument_id: raw.7,
            timestamp_ms: raw.2,
        })
    }
}

pub fn parse_l2_updates(payload: &str) -> Result<Vec<L2Update>> {
    let raw: Vec<RawL2Update> = serde_json::from_str(payload).context("level2 payload")?;
    raw.into_iter().map(L2Update::try_from).collect()
}

/// One executed trade against one of our orders.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrderTradeEvent {
    pub client_order_id: i64,
    pub instrument_id: i64,
    pub price: f64,
    pub quantity: f64,
}

/// Order lifecycle notification; `order_state` is the venue's string
/// ("Working", "FullyExecuted", "Rejected", ...).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrderStateEvent {
    pub client_order_id: i64,
    pub order_state: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PositionEntry {
    pub product_id: i64,
    pub amount: f64,
    #[serde(default)]
    pub product_symbol: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubscribeAccountEventsReply {
    pub subscribed: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthReply {
    pub authenticated: bool,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default, rename = "Requires2FA")]
    pub requires_2fa: bool,
    #[serde(default, rename = "errormsg")]
    pub error_message: Option<String>,
}
