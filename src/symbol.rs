//! Exchange-neutral symbol representation and venue wire-format translation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper-cased, ASCII, exchange-neutral symbol (e.g. `AAABUSDT`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Venue A uses the canonical form unchanged for both spot and perp.
    pub fn to_venue_a(&self) -> String {
        self.0.clone()
    }

    /// Venue B perp inserts `_` before the quote asset (e.g. `AAAB_USDT`).
    /// We don't know the quote asset boundary a priori, so we strip the
    /// common `USDT`/`USDC`/`USD` suffixes the configured symbol set uses.
    pub fn to_venue_b_perp(&self) -> String {
        for quote in ["USDT", "USDC", "USD"] {
            if let Some(base) = self.0.strip_suffix(quote) {
                if !base.is_empty() {
                    return format!("{base}_{quote}");
                }
            }
        }
        self.0.clone()
    }

    /// Venue B spot REST form is the canonical, unseparated form.
    pub fn to_venue_b_spot(&self) -> String {
        self.0.clone()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which market this book/record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Market {
    Spot,
    Perp,
}

impl Market {
    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Spot => "Spot",
            Market::Perp => "Perp",
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which of the two configured venues a book/record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Venue {
    A,
    B,
}

impl Venue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::A => "A",
            Venue::B => "B",
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which side of the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Bid => "Bid",
            Side::Ask => "Ask",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn venue_b_perp_inserts_underscore_before_quote() {
        let sym = Symbol::new("aaabusdt");
        assert_eq!(sym.as_str(), "AAABUSDT");
        assert_eq!(sym.to_venue_b_perp(), "AAAB_USDT");
    }

    #[test]
    fn venue_a_and_spot_keep_canonical_form() {
        let sym = Symbol::new("whitewhaleusdt");
        assert_eq!(sym.to_venue_a(), "WHITEWHALEUSDT");
        assert_eq!(sym.to_venue_b_spot(), "WHITEWHALEUSDT");
    }
}
