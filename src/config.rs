use chrono::NaiveDate;
use rayon::ThreadPoolBuilder;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

static RAYON_INIT: OnceLock<()> = OnceLock::new();

// ──────────────────────────────────────────────────────────────────────────────
// Catalogue
// ──────────────────────────────────────────────────────────────────────────────

/// Company name → ticker symbol. Order is the order shown in every selector.
pub const STOCKS: &[(&str, &str)] = &[
    ("Google", "GOOGL"),
    ("Microsoft", "MSFT"),
    ("Amazon", "AMZN"),
    ("Apple", "AAPL"),
    ("Palantir", "PLTR"),
];

/// First day of the historical window (inclusive).
pub const START_DATE: &str = "2015-01-01";

pub const DAYS_PER_YEAR: i64 = 365;
pub const MIN_HORIZON_YEARS: u8 = 1;
pub const MAX_HORIZON_YEARS: u8 = 4;

pub fn symbol_for(name: &str) -> Option<&'static str> {
    STOCKS
        .iter()
        .find(|(company, _)| company.eq_ignore_ascii_case(name.trim()))
        .map(|(_, symbol)| *symbol)
}

pub fn default_start_date() -> NaiveDate {
    NaiveDate::parse_from_str(START_DATE, "%Y-%m-%d").unwrap_or_default()
}

// ──────────────────────────────────────────────────────────────────────────────
// Model Defaults
// ──────────────────────────────────────────────────────────────────────────────

pub const N_CHANGEPOINTS: usize = 25;
/// Share of the history in which trend changepoints may be placed.
pub const CHANGEPOINT_RANGE: f64 = 0.8;
pub const CHANGEPOINT_PRIOR_SCALE: f64 = 0.05;
pub const SEASONALITY_PRIOR_SCALE: f64 = 10.0;
/// Prior scale for the base growth rate and offset.
pub const TREND_PRIOR_SCALE: f64 = 5.0;
pub const YEARLY_FOURIER_ORDER: usize = 10;
pub const WEEKLY_FOURIER_ORDER: usize = 3;
pub const YEARLY_PERIOD_DAYS: f64 = 365.25;
pub const WEEKLY_PERIOD_DAYS: f64 = 7.0;
/// Yearly seasonality needs at least two years of history.
pub const YEARLY_MIN_SPAN_DAYS: i64 = 730;
pub const WEEKLY_MIN_SPAN_DAYS: i64 = 14;
pub const INTERVAL_WIDTH: f64 = 0.8;
pub const UNCERTAINTY_SAMPLES: usize = 300;
pub const UNCERTAINTY_SEED: u64 = 0x5eed_cafe;
/// Refinement passes re-estimating the noise scale between solves.
pub const FIT_PASSES: usize = 3;

// ──────────────────────────────────────────────────────────────────────────────
// Runtime Knobs
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataSourceKind {
    Yahoo,
    Mock,
}

impl DataSourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Yahoo => "yahoo",
            Self::Mock => "mock",
        }
    }
}

pub fn configured_data_source() -> DataSourceKind {
    let source = std::env::var("STOCKCAST_DATA_SOURCE")
        .unwrap_or_else(|_| "yahoo".to_string())
        .trim()
        .to_ascii_lowercase();

    match source.as_str() {
        "yahoo" | "yfinance" => DataSourceKind::Yahoo,
        "mock" => DataSourceKind::Mock,
        other => {
            warn!(
                "Unknown STOCKCAST_DATA_SOURCE={} ; defaulting to yahoo. Allowed values: yahoo | mock",
                other
            );
            DataSourceKind::Yahoo
        }
    }
}

/// Attempts per Yahoo request. A single attempt unless `STOCKCAST_FETCH_ATTEMPTS` opts into retries.
pub fn fetch_attempts() -> usize {
    parse_fetch_attempts(std::env::var("STOCKCAST_FETCH_ATTEMPTS").ok().as_deref())
}

fn parse_fetch_attempts(raw: Option<&str>) -> usize {
    raw.and_then(|v| v.trim().parse::<usize>().ok())
        .map(|v| v.clamp(1, 8))
        .unwrap_or(1)
}

pub fn http_timeout() -> Duration {
    let secs = std::env::var("STOCKCAST_HTTP_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|v| v.clamp(5, 300))
        .unwrap_or(30);
    Duration::from_secs(secs)
}

pub fn cache_ttl_secs() -> u64 {
    std::env::var("STOCKCAST_CACHE_TTL_SECS")
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(3600)
}

pub fn cache_max_entries() -> usize {
    std::env::var("STOCKCAST_CACHE_MAX_ENTRIES")
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .map(|v| v.clamp(1, 256))
        .unwrap_or(32)
}

pub fn init_cpu_parallelism() {
    RAYON_INIT.get_or_init(|| {
        let num_threads = num_cpus::get().max(1);
        match ThreadPoolBuilder::new().num_threads(num_threads).build_global() {
            Ok(_) => info!(
                "Initialized Rayon thread pool with {} threads (all logical CPU cores)",
                num_threads
            ),
            Err(e) => warn!(
                "Rayon thread pool already initialized or unavailable ({}). Using existing configuration.",
                e
            ),
        }
    });
}
