use crate::config::{self, DataSourceKind};
use anyhow::{Context, Result};
use chrono::{Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use rand::prelude::*;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

/// One daily bar for one ticker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adj_close: f64,
    pub volume: u64,
    pub ticker: String,
}

/// Daily bars for every requested ticker, concatenated in request order.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PriceTable {
    pub records: Vec<PriceRecord>,
}

impl PriceTable {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Groups rows by ticker, keys in alphabetical order.
    pub fn group_by_ticker(&self) -> BTreeMap<String, Vec<PriceRecord>> {
        let mut groups: BTreeMap<String, Vec<PriceRecord>> = BTreeMap::new();
        for record in &self.records {
            groups
                .entry(record.ticker.clone())
                .or_default()
                .push(record.clone());
        }
        groups
    }

    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let first = self.records.iter().map(|r| r.date).min()?;
        let last = self.records.iter().map(|r| r.date).max()?;
        Some((first, last))
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Sources
// ──────────────────────────────────────────────────────────────────────────────

/// A remote (or simulated) provider of daily OHLCV bars.
pub trait MarketDataSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Daily bars for `symbol` between `start` and `end`, both inclusive.
    fn fetch_daily(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> impl Future<Output = Result<Vec<PriceRecord>>> + Send;
}

/// Runtime-selected source used by the binary.
pub enum DataSource {
    Yahoo(YahooSource),
    Mock(MockSource),
}

impl DataSource {
    pub fn from_kind(kind: DataSourceKind) -> Result<Self> {
        Ok(match kind {
            DataSourceKind::Yahoo => Self::Yahoo(YahooSource::new()?),
            DataSourceKind::Mock => Self::Mock(MockSource::new()),
        })
    }
}

impl MarketDataSource for DataSource {
    fn name(&self) -> &'static str {
        match self {
            Self::Yahoo(s) => s.name(),
            Self::Mock(s) => s.name(),
        }
    }

    async fn fetch_daily(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceRecord>> {
        match self {
            Self::Yahoo(s) => s.fetch_daily(symbol, start, end).await,
            Self::Mock(s) => s.fetch_daily(symbol, start, end).await,
        }
    }
}

/// Fetches the combined daily history for `tickers` over `[start, end]`.
///
/// Tickers are fetched one after another in request order; the first failure
/// aborts the whole retrieval.
pub async fn fetch_history<S: MarketDataSource>(
    source: &S,
    tickers: &[String],
    start: NaiveDate,
    end: NaiveDate,
) -> Result<PriceTable> {
    if tickers.is_empty() {
        anyhow::bail!("at least one ticker is required");
    }
    if start > end {
        anyhow::bail!("invalid date range: start {} is after end {}", start, end);
    }

    let mut table = PriceTable::default();
    let mut seen: Vec<String> = Vec::with_capacity(tickers.len());

    for raw_symbol in tickers {
        let symbol = raw_symbol.trim().to_uppercase();
        if symbol.is_empty() {
            anyhow::bail!(
                "historical fetch failed: symbol=<empty>, source={}",
                source.name()
            );
        }
        if seen.contains(&symbol) {
            continue;
        }

        info!("Fetching {} ({} → {}) from {}", symbol, start, end, source.name());
        let records = source
            .fetch_daily(&symbol, start, end)
            .await
            .with_context(|| format!("fetch failed for {} (source={})", symbol, source.name()))?;

        let before = records.len();
        let mut rows: Vec<PriceRecord> = records
            .into_iter()
            .filter(|r| r.date >= start && r.date <= end)
            .map(|mut r| {
                r.ticker = symbol.clone();
                r
            })
            .collect();
        rows.sort_by_key(|r| r.date);

        if rows.len() < before {
            debug!("Dropped {} out-of-range rows for {}", before - rows.len(), symbol);
        }
        if rows.is_empty() {
            warn!("{} returned no rows for {}", source.name(), symbol);
        }

        table.records.extend(rows);
        seen.push(symbol);
    }

    Ok(table)
}

// ──────────────────────────────────────────────────────────────────────────────
// Yahoo Finance
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct YahooChartResponse {
    chart: YahooChart,
}

#[derive(Deserialize, Debug)]
struct YahooChart {
    result: Option<Vec<YahooResult>>,
    error: Option<YahooChartError>,
}

#[derive(Deserialize, Debug)]
struct YahooChartError {
    code: String,
    description: String,
}

#[derive(Deserialize, Debug)]
struct YahooResult {
    meta: YahooMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: YahooIndicators,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct YahooMeta {
    exchange_timezone_name: Option<String>,
}

#[derive(Deserialize, Debug)]
struct YahooIndicators {
    quote: Vec<YahooQuote>,
    #[serde(default)]
    adjclose: Vec<YahooAdjClose>,
}

#[derive(Deserialize, Debug)]
struct YahooQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Deserialize, Debug)]
struct YahooAdjClose {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

pub struct YahooSource {
    client: reqwest::Client,
    attempts: usize,
    retry_pause: std::time::Duration,
}

impl YahooSource {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0")
            .timeout(config::http_timeout())
            .build()?;
        Ok(Self {
            client,
            attempts: config::fetch_attempts(),
            retry_pause: std::time::Duration::from_secs(2),
        })
    }

    async fn fetch_chart(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<YahooChartResponse> {
        let period1 = Utc.from_utc_datetime(&start.and_time(chrono::NaiveTime::MIN)).timestamp();
        let period2 = Utc
            .from_utc_datetime(&(end + Duration::days(1)).and_time(chrono::NaiveTime::MIN))
            .timestamp();
        let url = format!(
            "https://query1.finance.yahoo.com/v8/finance/chart/{}?period1={}&period2={}&interval=1d&events=history&includeAdjustedClose=true",
            symbol, period1, period2
        );

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.client.get(&url).send().await {
                Ok(resp) => match resp.json::<YahooChartResponse>().await {
                    Ok(chart) => return Ok(chart),
                    Err(e) => {
                        if attempts >= self.attempts {
                            return Err(e.into());
                        }
                        warn!("Failed to parse JSON for {} (attempt {}/{}): {}", symbol, attempts, self.attempts, e);
                    }
                },
                Err(e) => {
                    if attempts >= self.attempts {
                        return Err(e.into());
                    }
                    warn!("Failed to fetch data for {} (attempt {}/{}): {}", symbol, attempts, self.attempts, e);
                }
            }

            tokio::time::sleep(self.retry_pause).await;
        }
    }
}

impl MarketDataSource for YahooSource {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    async fn fetch_daily(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceRecord>> {
        let chart = self.fetch_chart(symbol, start, end).await?;
        parse_chart(symbol, chart)
    }
}

fn parse_chart(symbol: &str, response: YahooChartResponse) -> Result<Vec<PriceRecord>> {
    if let Some(err) = response.chart.error {
        anyhow::bail!("Yahoo chart error for {}: {} ({})", symbol, err.description, err.code);
    }

    let Some(result) = response.chart.result.and_then(|r| r.into_iter().next()) else {
        return Ok(Vec::new());
    };

    let tz: Tz = result
        .meta
        .exchange_timezone_name
        .as_deref()
        .and_then(|name| name.parse().ok())
        .unwrap_or(chrono_tz::America::New_York);

    let Some(quote) = result.indicators.quote.first() else {
        return Ok(Vec::new());
    };
    let adjclose = result.indicators.adjclose.first().map(|a| a.adjclose.as_slice());

    let field = |values: &[Option<f64>], i: usize| values.get(i).copied().flatten();

    let mut history = Vec::with_capacity(result.timestamp.len());
    for (i, &timestamp) in result.timestamp.iter().enumerate() {
        let Some(date) = tz.timestamp_opt(timestamp, 0).single().map(|dt| dt.date_naive()) else {
            continue;
        };
        if let (Some(open), Some(high), Some(low), Some(close), Some(volume)) = (
            field(&quote.open, i),
            field(&quote.high, i),
            field(&quote.low, i),
            field(&quote.close, i),
            field(&quote.volume, i),
        ) {
            let adj_close = adjclose.and_then(|a| field(a, i)).unwrap_or(close);
            history.push(PriceRecord {
                date,
                open,
                high,
                low,
                close,
                adj_close,
                volume: volume.max(0.0).round() as u64,
                ticker: symbol.to_uppercase(),
            });
        }
    }

    Ok(history)
}

// ──────────────────────────────────────────────────────────────────────────────
// Mock
// ──────────────────────────────────────────────────────────────────────────────

/// Deterministic weekday random walk per symbol. Counts every fetch.
#[derive(Default)]
pub struct MockSource {
    calls: AtomicUsize,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MarketDataSource for MockSource {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn fetch_daily(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(mock_series(symbol, start, end))
    }
}

fn symbol_seed(symbol: &str) -> u64 {
    symbol
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| (h ^ b as u64).wrapping_mul(0x0100_0000_01b3))
}

pub fn mock_series(symbol: &str, start: NaiveDate, end: NaiveDate) -> Vec<PriceRecord> {
    let seed = symbol_seed(symbol);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut current_price: f64 = 50.0 + (seed % 200) as f64;
    let mut history = Vec::new();

    let mut date = start;
    while date <= end {
        if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            let volatility = 0.02; // 2% daily volatility
            let change_pct: f64 = rng.gen_range(-volatility..volatility) + 0.0004;
            let open = current_price;
            let close = open * (1.0 + change_pct);
            let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.01));
            let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.01));
            let volume = rng.gen_range(1_000_000..10_000_000);

            history.push(PriceRecord {
                date,
                open,
                high,
                low,
                close,
                adj_close: close,
                volume,
                ticker: symbol.to_uppercase(),
            });
            current_price = close;
        }
        date += Duration::days(1);
    }

    history
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    const CHART_FIXTURE: &str = r#"{
        "chart": {
            "result": [{
                "meta": { "symbol": "AAPL", "exchangeTimezoneName": "America/New_York" },
                "timestamp": [1704205800, 1704292200, 1704378600],
                "indicators": {
                    "quote": [{
                        "open":   [187.15, 184.22, null],
                        "high":   [188.44, 185.88, 183.09],
                        "low":    [183.89, 183.43, 180.88],
                        "close":  [185.64, 184.25, 181.91],
                        "volume": [82488700, 58414500, 71983600]
                    }],
                    "adjclose": [{ "adjclose": [184.73, 183.35, 181.02] }]
                }
            }],
            "error": null
        }
    }"#;

    #[test]
    fn test_parse_chart_skips_incomplete_rows() {
        let response: YahooChartResponse = serde_json::from_str(CHART_FIXTURE).unwrap();
        let rows = parse_chart("aapl", response).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, d(2024, 1, 2));
        assert_eq!(rows[1].date, d(2024, 1, 3));
        assert_eq!(rows[0].ticker, "AAPL");
        assert_eq!(rows[0].volume, 82_488_700);
        assert!((rows[1].adj_close - 183.35).abs() < 1e-9);
    }

    #[test]
    fn test_parse_chart_reports_source_error() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        let response: YahooChartResponse = serde_json::from_str(body).unwrap();
        let err = parse_chart("ZZZZ", response).unwrap_err();
        assert!(err.to_string().contains("symbol may be delisted"));
    }

    #[test]
    fn test_parse_chart_without_adjclose_falls_back_to_close() {
        let body = r#"{"chart":{"result":[{"meta":{},"timestamp":[1704205800],
            "indicators":{"quote":[{"open":[1.0],"high":[2.0],"low":[0.5],"close":[1.5],"volume":[10]}]}}],"error":null}}"#;
        let response: YahooChartResponse = serde_json::from_str(body).unwrap();
        let rows = parse_chart("X", response).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].adj_close, 1.5);
    }

    #[test]
    fn test_mock_series_skips_weekends() {
        let rows = mock_series("AAPL", d(2024, 1, 1), d(2024, 1, 14));
        assert_eq!(rows.len(), 10);
        assert!(rows.iter().all(|r| !matches!(r.date.weekday(), Weekday::Sat | Weekday::Sun)));
        assert!(rows.iter().all(|r| r.close > 0.0 && r.high >= r.low));
    }

    #[tokio::test]
    async fn test_fetch_history_bounds_and_tags() {
        let source = MockSource::new();
        let start = d(2023, 1, 1);
        let end = d(2024, 6, 30);
        let tickers: Vec<String> = ["MSFT", "AAPL"].iter().map(|s| s.to_string()).collect();

        let table = fetch_history(&source, &tickers, start, end).await.unwrap();

        assert!(!table.is_empty());
        assert_eq!(source.calls(), 2);
        let (first, last) = table.date_range().unwrap();
        assert!(first >= start);
        assert!(last <= end);
        assert!(table.records.iter().all(|r| tickers.contains(&r.ticker)));
        // request order is preserved in the combined table
        assert_eq!(table.records[0].ticker, "MSFT");
        assert_eq!(table.records.last().unwrap().ticker, "AAPL");
    }

    #[tokio::test]
    async fn test_fetch_history_is_repeatable() {
        let source = MockSource::new();
        let tickers = vec!["PLTR".to_string(), "AMZN".to_string()];
        let a = fetch_history(&source, &tickers, d(2022, 3, 1), d(2023, 3, 1)).await.unwrap();
        let b = fetch_history(&source, &tickers, d(2022, 3, 1), d(2023, 3, 1)).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_fetch_history_rejects_empty_input() {
        let source = MockSource::new();
        assert!(fetch_history(&source, &[], d(2024, 1, 1), d(2024, 2, 1)).await.is_err());
        assert!(fetch_history(&source, &["  ".to_string()], d(2024, 1, 1), d(2024, 2, 1)).await.is_err());
        assert_eq!(source.calls(), 0);
    }

    /// Fails for PLTR; otherwise pads the window by ten days and mislabels every row.
    #[derive(Default)]
    struct FlakySource {
        requested: std::sync::Mutex<Vec<String>>,
    }

    impl MarketDataSource for FlakySource {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn fetch_daily(
            &self,
            symbol: &str,
            start: NaiveDate,
            end: NaiveDate,
        ) -> Result<Vec<PriceRecord>> {
            self.requested.lock().unwrap().push(symbol.to_string());
            if symbol == "PLTR" {
                anyhow::bail!("boom");
            }
            let mut rows = mock_series(symbol, start - Duration::days(10), end + Duration::days(10));
            for row in &mut rows {
                row.ticker = "junk".to_string();
            }
            Ok(rows)
        }
    }

    #[tokio::test]
    async fn test_fetch_history_clips_window_and_retags_rows() {
        let source = FlakySource::default();
        let start = d(2024, 1, 10);
        let end = d(2024, 2, 9);

        let table = fetch_history(&source, &[" aapl ".to_string()], start, end).await.unwrap();

        assert_eq!(*source.requested.lock().unwrap(), vec!["AAPL"]);
        let (first, last) = table.date_range().unwrap();
        assert!(first >= start && last <= end);
        assert_eq!(table.len(), mock_series("AAPL", start, end).len());
        assert!(table.records.iter().all(|r| r.ticker == "AAPL"));
    }

    #[tokio::test]
    async fn test_fetch_history_failure_aborts_retrieval() {
        let source = FlakySource::default();
        let tickers: Vec<String> = ["AAPL", "PLTR", "MSFT"].iter().map(|s| s.to_string()).collect();

        let err = fetch_history(&source, &tickers, d(2024, 1, 10), d(2024, 2, 9))
            .await
            .unwrap_err();

        let message = format!("{:#}", err);
        assert!(message.contains("fetch failed for PLTR (source=flaky)"));
        assert!(message.contains("boom"));
        // nothing after the failing ticker is requested
        assert_eq!(*source.requested.lock().unwrap(), vec!["AAPL", "PLTR"]);
    }

    #[tokio::test]
    async fn test_fetch_history_fetches_repeated_symbol_once() {
        let source = MockSource::new();
        let tickers: Vec<String> = ["AAPL", "aapl"].iter().map(|s| s.to_string()).collect();
        let table = fetch_history(&source, &tickers, d(2024, 1, 1), d(2024, 2, 1)).await.unwrap();
        assert_eq!(source.calls(), 1);
        assert_eq!(table.len(), mock_series("AAPL", d(2024, 1, 1), d(2024, 2, 1)).len());
    }

    #[test]
    fn test_group_by_ticker_is_alphabetical() {
        let mut table = PriceTable::default();
        table.records.extend(mock_series("MSFT", d(2024, 1, 1), d(2024, 1, 10)));
        table.records.extend(mock_series("AAPL", d(2024, 1, 1), d(2024, 1, 10)));
        let groups = table.group_by_ticker();
        let keys: Vec<&String> = groups.keys().collect();
        assert_eq!(keys, vec!["AAPL", "MSFT"]);
        assert_eq!(groups["AAPL"].len() + groups["MSFT"].len(), table.len());
    }
}
