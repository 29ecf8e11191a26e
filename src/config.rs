//! Application configuration.
//!
//! Everything is loaded from the environment (with a `.env` file picked up
//! when present) and falls back to the production defaults for the
//! BTC/CAD - BTC/USDT - USDT/CAD triangle.

use std::collections::HashMap;
use std::str::FromStr;

use anyhow::{Context, Result};
use tracing::warn;

use crate::exchange::Credentials;
use crate::triangle::TriangleLegs;

pub const DEFAULT_WS_URL: &str = "wss://api.ndax.io";

pub const BTCCAD_ID: i64 = 1;
pub const USDTCAD_ID: i64 = 80;
pub const BTCUSDT_ID: i64 = 82;

#[derive(Debug, Clone)]
pub struct Config {
    pub ws_url: String,
    pub credentials: Credentials,
    pub account_id: i64,
    pub oms_id: i64,
    pub legs: TriangleLegs,
    /// Level2 subscription depth and the local ladder cap.
    pub depth: usize,
    /// Taker fee per leg.
    pub fee: f64,
    /// Cash committed to any single cycle, in leg1's quote currency.
    pub cash_available: f64,
    /// Minimum expected net profit before a cycle is worth opening.
    pub min_trade_value: f64,
    pub auto_reset_minutes: u64,
    /// 0 disables the periodic book printer.
    pub book_print_minutes: f64,
    pub asset_diff_minutes: u64,
    pub quantity_decimals: HashMap<i64, u32>,
    pub mfa_code: Option<String>,
    pub sequential_emission: bool,
    pub dry_run: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let credentials = Credentials {
            user_id: std::env::var("NDAX_USER_ID").context("NDAX_USER_ID is required")?,
            api_key: std::env::var("NDAX_API_KEY").context("NDAX_API_KEY is required")?,
            secret: std::env::var("NDAX_SECRET").context("NDAX_SECRET is required")?,
        };
        let account_id = std::env::var("NDAX_ACCOUNT_ID")
            .context("NDAX_ACCOUNT_ID is required")?
            .parse()
            .context("NDAX_ACCOUNT_ID must be an integer")?;

        let legs = TriangleLegs {
            leg1: env_or("TRIBOT_LEG1_INSTRUMENT", BTCCAD_ID),
            leg2: env_or("TRIBOT_LEG2_INSTRUMENT", BTCUSDT_ID),
            leg3: env_or("TRIBOT_LEG3_INSTRUMENT", USDTCAD_ID),
        };

        // 6 decimals on the BTC pairs, 2 on USDT/CAD, unless overridden.
        let mut quantity_decimals =
            HashMap::from([(legs.leg1, 6), (legs.leg2, 6), (legs.leg3, 2)]);
        if let Ok(overrides) = std::env::var("TRIBOT_QUANTITY_DECIMALS") {
            quantity_decimals.extend(parse_decimal_overrides(&overrides));
        }

        Ok(Self {
            ws_url: std::env::var("NDAX_WS_URL").unwrap_or_else(|_| DEFAULT_WS_URL.to_string()),
            credentials,
            account_id,
            oms_id: env_or("NDAX_OMS_ID", 1),
            legs,
            depth: env_or("TRIBOT_DEPTH", 10),
            fee: env_or("TRIBOT_FEE", 0.002),
            cash_available: env_or("TRIBOT_CASH_AVAILABLE", 50.0),
            min_trade_value: env_or("TRIBOT_MIN_TRADE_VALUE", 0.1),
            auto_reset_minutes: env_or("TRIBOT_AUTO_RESET_MINUTES", 30),
            book_print_minutes: env_or("TRIBOT_BOOK_PRINT_MINUTES", 0.5),
            asset_diff_minutes: env_or("TRIBOT_ASSET_DIFF_MINUTES", 30),
            quantity_decimals,
            mfa_code: std::env::var("NDAX_2FA_CODE").ok(),
            sequential_emission: env_flag("TRIBOT_SEQUENTIAL_EMISSION"),
            dry_run: env_flag("TRIBOT_DRY_RUN"),
        })
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(value) => match value.parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(key, value = %value, "unparseable value; using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
        .unwrap_or(false)
}

/// Parse `"1:6,80:2"`-style per-instrument decimal overrides.
fn parse_decimal_overrides(raw: &str) -> HashMap<i64, u32> {
    let mut overrides = HashMap::new();
    for pair in raw.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        match pair.split_once(':') {
            Some((id, decimals)) => match (id.trim().parse(), decimals.trim().parse()) {
                (Ok(id), Ok(decimals)) => {
                    overrides.insert(id, decimals);
                }
                _ => warn!(pair, "ignoring malformed decimal override"),
            },
            None => warn!(pair, "ignoring malformed decimal override"),
        }
    }
    overrides
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_overrides_parse() {
        let overrides = parse_decimal_overrides("1:6, 80:2,82:6");
        assert_eq!(overrides.get(&1), Some(&6));
        assert_eq!(overrides.get(&80), Some(&2));
        assert_eq!(overrides.get(&82), Some(&6));
    }

    #[test]
    fn malformed_overrides_are_skipped() {
        let overrides = parse_decimal_overrides("1:6,nonsense,80:x,:,");
        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides.get(&1), Some(&6));
    }
}
