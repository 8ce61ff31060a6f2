//! Canonical event shapes normalized by the three stateless feeds (spec
//! §2.3, §9 "duck-typed payload normalization").

use crate::outlier::span::TradeSide;
use crate::symbol::{Market, Symbol, Venue};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub ts: i64,
    pub symbol: Symbol,
    pub market: Market,
    pub exchange: Venue,
    pub price: f64,
    pub qty: f64,
    pub side: TradeSide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidationSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Liquidation {
    pub ts: i64,
    pub symbol: Symbol,
    pub market: Market,
    pub exchange: Venue,
    pub side: LiquidationSide,
    pub price: f64,
    pub qty: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OiFundingTick {
    pub ts: i64,
    pub symbol: Symbol,
    pub market: Market,
    pub exchange: Venue,
    pub open_interest: Option<f64>,
    pub funding_rate: Option<f64>,
}

/// Pull `(price, size)` from a duck-typed field pair: `p`/`price` and
/// `q`/`qty`/`size`, each a JSON string or number. Returns `None` if either
/// is missing or unparsable, matching §9's "canonical pair or nothing".
pub fn parse_price_qty(v: &serde_json::Value) -> Option<(f64, f64)> {
    let price = first_numeric(v, &["p", "price"])?;
    let qty = first_numeric(v, &["q", "qty", "size", "amount", "sz"])?;
    Some((price, qty))
}

pub fn first_numeric(v: &serde_json::Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        if let Some(field) = v.get(*key) {
            if let Some(n) = as_f64(field) {
                return Some(n);
            }
        }
    }
    None
}

pub fn as_f64(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_string_and_numeric_fields() {
        let v = json!({"p": "100.5", "q": "2.0"});
        assert_eq!(parse_price_qty(&v), Some((100.5, 2.0)));

        let v2 = json!({"price": 100.5, "size": 2.0});
        assert_eq!(parse_price_qty(&v2), Some((100.5, 2.0)));
    }

    #[test]
    fn missing_field_yields_none() {
        let v = json!({"p": "100.5"});
        assert_eq!(parse_price_qty(&v), None);
    }
}
