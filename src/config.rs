//! Configuration loaded once at startup from environment variables.

use crate::symbol::Symbol;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub symbols: Vec<Symbol>,
    pub depth: usize,
    pub base_mm_notional: f64,
    pub large_move_notional: f64,
    pub large_move_window_bps: f64,
    pub large_move_notional_floor: f64,
    pub size_bins: Vec<f64>,
    pub distance_bins_bps: Vec<f64>,
    pub log_interval_ms: u64,
    pub metrics_interval_ms: u64,
    pub data_dir: String,
    pub base_path: String,
    pub live_monitoring: bool,
    pub host: String,
    pub port: u16,

    // Venue connection endpoints. Venues are referred to generically as "A"
    // and "B" throughout; without a real operator-supplied endpoint per
    // venue there is nothing for a feed adapter to dial.
    pub venue_a_ws_url: String,
    pub venue_a_rest_url: String,
    pub venue_b_ws_url: String,
    pub venue_b_rest_url: String,
}

const DEFAULT_SIZE_BINS: &str = "500,1000,2500,5000,10000,25000,50000";
const DEFAULT_DISTANCE_BINS_BPS: &str = "5,10,25,50,100,200";

impl Config {
    pub fn from_env() -> Self {
        let symbols = env::var("SYMBOLS")
            .unwrap_or_else(|_| "WHITEWHALEUSDT".to_string())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Symbol::new)
            .collect();

        Self {
            symbols,
            depth: parse_env("DEPTH", 50),
            base_mm_notional: parse_env("BASE_MM_NOTIONAL", 30_000.0),
            large_move_notional: parse_env("LARGE_MOVE_NOTIONAL", 30_000.0),
            large_move_window_bps: parse_env("LARGE_MOVE_WINDOW_BPS", 200.0),
            large_move_notional_floor: parse_env("LARGE_MOVE_NOTIONAL_FLOOR", 2_000.0),
            size_bins: parse_bins("SIZE_BINS", DEFAULT_SIZE_BINS),
            distance_bins_bps: parse_bins("DISTANCE_BINS_BPS", DEFAULT_DISTANCE_BINS_BPS),
            log_interval_ms: parse_env("LOG_INTERVAL_MS", 5_000),
            metrics_interval_ms: parse_env("METRICS_INTERVAL_MS", 1_000),
            data_dir: env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            base_path: env::var("BASE_PATH").unwrap_or_default(),
            live_monitoring: env::var("LIVE_MONITORING")
                .map(|v| v != "false")
                .unwrap_or(true),
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_env("PORT", 3000),

            venue_a_ws_url: env::var("VENUE_A_WS_URL")
                .unwrap_or_else(|_| "wss://stream.venue-a.example/v5/public".to_string()),
            venue_a_rest_url: env::var("VENUE_A_REST_URL")
                .unwrap_or_else(|_| "https://api.venue-a.example".to_string()),
            venue_b_ws_url: env::var("VENUE_B_WS_URL")
                .unwrap_or_else(|_| "wss://stream.venue-b.example/ws".to_string()),
            venue_b_rest_url: env::var("VENUE_B_REST_URL")
                .unwrap_or_else(|_| "https://api.venue-b.example".to_string()),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_bins(key: &str, default: &str) -> Vec<f64> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    let mut bins: Vec<f64> = raw
        .split(',')
        .filter_map(|s| s.trim().parse::<f64>().ok())
        .collect();

    if bins.is_empty() {
        tracing::warn!(key, "failed to parse bin list, using default");
        bins = default
            .split(',')
            .filter_map(|s| s.trim().parse::<f64>().ok())
            .collect();
    }

    bins.sort_by(|a, b| a.partial_cmp(b).unwrap());
    bins
}

/// Minimal `.env` loader: `KEY=VALUE` lines, `#`/blank lines ignored,
/// surrounding single/double quotes stripped, real environment always wins.
pub mod dotenv {
    use std::env;
    use std::fs;
    use std::path::Path;

    pub fn load<P: AsRef<Path>>(path: P) {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return,
        };

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() || env::var(key).is_ok() {
                continue;
            }
            let value = strip_quotes(value.trim());
            env::set_var(key, value);
        }
    }

    fn strip_quotes(value: &str) -> &str {
        let bytes = value.as_bytes();
        if bytes.len() >= 2 {
            let first = bytes[0];
            let last = bytes[bytes.len() - 1];
            if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
                return &value[1..value.len() - 1];
            }
        }
        value
    }

    #[cfg(test)]
    mod tests {
        use super::strip_quotes;

        #[test]
        fn strips_matching_quotes_only() {
            assert_eq!(strip_quotes("\"abc\""), "abc");
            assert_eq!(strip_quotes("'abc'"), "abc");
            assert_eq!(strip_quotes("abc"), "abc");
            assert_eq!(strip_quotes("\"abc'"), "\"abc'");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bins_sorts_ascending() {
        let bins = parse_bins("DISTANCE_BINS_BPS_TEST_UNSET", "200,5,50,10,25,100");
        assert_eq!(bins, vec![5.0, 10.0, 25.0, 50.0, 100.0, 200.0]);
    }
}
