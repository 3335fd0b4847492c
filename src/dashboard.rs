//! Front-end independent view model.
//!
//! A [`Selection`] (page, stocks, horizon, display mode) is rendered into an
//! ordered list of [`Block`]s. The TUI, GUI and web UI only draw blocks.

use crate::cache::{CachePolicy, CacheStats, CacheTiming, ForecastKey, HistoryKey, ResultCache};
use crate::config;
use crate::data::{self, DataSource, MarketDataSource, PriceRecord, PriceTable};
use crate::forecast::{self, ForecastBatch, Horizon};
use crate::model::{Components, ForecastRecord, ModelSettings};
use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::info;

pub const NO_STOCKS_WARNING: &str = "Please select at least one stock.";
pub const NO_DATA_TEXT: &str = "No stock data available.";
pub const LOADING_DONE_TEXT: &str = "Loading data... done!";

// ──────────────────────────────────────────────────────────────────────────────
// Selection
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Page {
    #[default]
    #[serde(rename = "Historical Data")]
    HistoricalData,
    #[serde(rename = "Forecast")]
    Forecast,
}

impl Page {
    pub const ALL: [Page; 2] = [Page::HistoricalData, Page::Forecast];

    pub fn label(self) -> &'static str {
        match self {
            Page::HistoricalData => "Historical Data",
            Page::Forecast => "Forecast",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Page::HistoricalData => "Historical Stock Data",
            Page::Forecast => "Stock Price Forecast",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayMode {
    #[default]
    #[serde(rename = "Forecast Plot")]
    ForecastPlot,
    #[serde(rename = "Forecast Components")]
    ForecastComponents,
    #[serde(rename = "Forecast Table")]
    ForecastTable,
    #[serde(rename = "Forecast Data")]
    ForecastData,
}

impl DisplayMode {
    pub const ALL: [DisplayMode; 4] = [
        DisplayMode::ForecastPlot,
        DisplayMode::ForecastComponents,
        DisplayMode::ForecastTable,
        DisplayMode::ForecastData,
    ];

    pub fn label(self) -> &'static str {
        match self {
            DisplayMode::ForecastPlot => "Forecast Plot",
            DisplayMode::ForecastComponents => "Forecast Components",
            DisplayMode::ForecastTable => "Forecast Table",
            DisplayMode::ForecastData => "Forecast Data",
        }
    }
}

/// Everything the user picked in the sidebar.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    #[serde(default)]
    pub page: Page,
    /// Company names from the catalogue, in selection order.
    #[serde(default)]
    pub stocks: Vec<String>,
    #[serde(default)]
    pub horizon: Horizon,
    #[serde(default)]
    pub display: DisplayMode,
}

impl Selection {
    /// Adds or removes a company; new picks go to the end.
    pub fn toggle_stock(&mut self, name: &str) {
        if let Some(pos) = self.stocks.iter().position(|s| s == name) {
            self.stocks.remove(pos);
        } else {
            self.stocks.push(name.to_string());
        }
    }

    pub fn is_selected(&self, name: &str) -> bool {
        self.stocks.iter().any(|s| s == name)
    }

    /// Maps selected company names to ticker symbols, keeping the first of any repeats.
    pub fn symbols(&self) -> Result<Vec<String>> {
        let mut symbols: Vec<String> = Vec::with_capacity(self.stocks.len());
        for name in &self.stocks {
            let symbol = config::symbol_for(name)
                .ok_or_else(|| anyhow::anyhow!("unknown company: {:?}", name))?;
            if !symbols.iter().any(|s| s == symbol) {
                symbols.push(symbol.to_string());
            }
        }
        Ok(symbols)
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// View
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize)]
pub struct Series {
    pub name: String,
    pub x: Vec<NaiveDate>,
    pub y: Vec<f64>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Block {
    Title { text: String },
    Subheader { text: String },
    Text { text: String },
    Warning { text: String },
    PriceTable { ticker: String, rows: Vec<PriceRecord> },
    ForecastTable { ticker: String, rows: Vec<ForecastRecord> },
    LineChart { title: String, series: Vec<Series>, range_slider: bool },
    Components { ticker: String, components: Components },
}

impl Block {
    fn title(text: impl Into<String>) -> Self {
        Block::Title { text: text.into() }
    }

    fn subheader(text: impl Into<String>) -> Self {
        Block::Subheader { text: text.into() }
    }

    fn text(text: impl Into<String>) -> Self {
        Block::Text { text: text.into() }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct View {
    pub blocks: Vec<Block>,
}

impl View {
    /// Plain text of every text-like block, in order.
    #[cfg(test)]
    pub fn texts(&self) -> Vec<&str> {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                Block::Title { text }
                | Block::Subheader { text }
                | Block::Text { text }
                | Block::Warning { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn push(&mut self, block: Block) {
        self.blocks.push(block);
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Dashboard
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct DashboardConfig {
    pub start: NaiveDate,
    /// Fixed end of the history window; `None` means today (local time).
    pub end: Option<NaiveDate>,
    pub cache: CachePolicy,
    pub settings: ModelSettings,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            start: config::default_start_date(),
            end: None,
            cache: CachePolicy {
                enabled: true,
                ttl: Duration::from_secs(config::cache_ttl_secs()),
                max_entries: config::cache_max_entries(),
            },
            settings: ModelSettings::default(),
        }
    }
}

pub struct Dashboard<S = DataSource> {
    source: S,
    config: DashboardConfig,
    history_cache: Mutex<ResultCache<HistoryKey, PriceTable>>,
    forecast_cache: Mutex<ResultCache<ForecastKey, ForecastBatch>>,
}

impl<S: MarketDataSource> Dashboard<S> {
    pub fn new(source: S, config: DashboardConfig) -> Self {
        let policy = config.cache;
        Self {
            source,
            config,
            history_cache: Mutex::new(ResultCache::new(policy)),
            forecast_cache: Mutex::new(ResultCache::new(policy)),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn end_date(&self) -> NaiveDate {
        self.config.end.unwrap_or_else(|| Local::now().date_naive())
    }

    pub async fn clear_cache(&self) {
        self.history_cache.lock().await.clear();
        self.forecast_cache.lock().await.clear();
        info!("Cleared history and forecast caches");
    }

    pub async fn cache_stats(&self) -> (CacheStats, CacheStats) {
        let history = self.history_cache.lock().await.stats();
        let forecast = self.forecast_cache.lock().await.stats();
        (history, forecast)
    }

    /// Entry counts of both caches, or `None` while a render holds a lock.
    pub fn try_cache_sizes(&self) -> Option<(usize, usize)> {
        let history = self.history_cache.try_lock().ok()?.len();
        let forecast = self.forecast_cache.try_lock().ok()?.len();
        Some((history, forecast))
    }

    /// Request key for `tickers` over the configured window, with the end date fixed now.
    pub fn history_key(&self, tickers: &[String]) -> HistoryKey {
        HistoryKey {
            tickers: tickers.to_vec(),
            start: self.config.start,
            end: self.end_date(),
        }
    }

    /// Cached retrieval of the combined history identified by `key`.
    pub async fn load_history(&self, key: &HistoryKey) -> Result<Arc<PriceTable>> {
        if let Some(hit) = self.history_cache.lock().await.get(key) {
            return Ok(hit);
        }

        let table = Arc::new(data::fetch_history(&self.source, &key.tickers, key.start, key.end).await?);
        if let Some((first, last)) = table.date_range() {
            info!("Loaded {} rows for {} ({} to {})", table.len(), key.tickers.join(","), first, last);
        }
        self.history_cache.lock().await.insert(key.clone(), table.clone());
        Ok(table)
    }

    /// Cached forecast of `table` (identified by `history`) over `horizon`.
    pub async fn load_forecast(
        &self,
        history: HistoryKey,
        table: Arc<PriceTable>,
        horizon: Horizon,
    ) -> Result<Arc<ForecastBatch>> {
        let key = ForecastKey { history, horizon };
        if let Some(hit) = self.forecast_cache.lock().await.get(&key) {
            return Ok(hit);
        }

        let settings = self.config.settings.clone();
        let batch = tokio::task::spawn_blocking(move || {
            forecast::predict_forecast(&table, horizon, &settings)
        })
        .await
        .context("forecast task panicked")??;

        let batch = Arc::new(batch);
        self.forecast_cache.lock().await.insert(key, batch.clone());
        Ok(batch)
    }

    /// Runs the pipeline for `selection` and lays out the resulting view.
    pub async fn render(&self, selection: &Selection) -> Result<View> {
        let mut view = View::default();
        view.push(Block::title(selection.page.title()));

        if selection.stocks.is_empty() {
            view.push(Block::Warning {
                text: NO_STOCKS_WARNING.to_string(),
            });
            return Ok(view);
        }
        let history = self.history_key(&selection.symbols()?);

        match selection.page {
            Page::HistoricalData => {
                let started = Instant::now();
                let table = self.load_history(&history).await?;
                let without_cache = started.elapsed();

                view.push(Block::text(LOADING_DONE_TEXT));

                let started = Instant::now();
                self.load_history(&history).await?;
                let timing = CacheTiming {
                    without_cache,
                    with_cache: started.elapsed(),
                };
                push_timing(&mut view, &timing);
                push_history(&mut view, &table);
            }
            Page::Forecast => {
                let table = self.load_history(&history).await?;
                view.push(Block::text(LOADING_DONE_TEXT));

                let started = Instant::now();
                self.load_forecast(history.clone(), table.clone(), selection.horizon)
                    .await?;
                let without_cache = started.elapsed();

                let started = Instant::now();
                let batch = self
                    .load_forecast(history, table, selection.horizon)
                    .await?;
                let timing = CacheTiming {
                    without_cache,
                    with_cache: started.elapsed(),
                };
                push_timing(&mut view, &timing);
                push_forecast(&mut view, &batch, selection);
            }
        }

        Ok(view)
    }
}

fn push_timing(view: &mut View, timing: &CacheTiming) {
    for line in timing.lines() {
        view.push(Block::text(line));
    }
}

fn push_history(view: &mut View, table: &PriceTable) {
    if table.is_empty() {
        view.push(Block::text(NO_DATA_TEXT));
        return;
    }
    for (ticker, rows) in table.group_by_ticker() {
        view.push(Block::subheader(format!("Raw data for {}", ticker)));
        view.push(Block::PriceTable { ticker, rows });
    }
}

fn push_forecast(view: &mut View, batch: &ForecastBatch, selection: &Selection) {
    view.push(Block::subheader("Forecast data"));

    match selection.display {
        DisplayMode::ForecastPlot => {
            view.push(Block::text(format!(
                "Forecast plot for {} years",
                selection.horizon.years()
            )));
            let series = batch
                .forecasts
                .iter()
                .map(|(ticker, rows)| Series {
                    name: ticker.clone(),
                    x: rows.iter().map(|r| r.ds).collect(),
                    y: rows.iter().map(|r| r.yhat).collect(),
                })
                .collect();
            view.push(Block::LineChart {
                title: "Forecast".to_string(),
                series,
                range_slider: true,
            });
            view.push(Block::text("Accuracy:"));
            for (ticker, accuracy) in &batch.accuracies {
                view.push(Block::text(format!("{}: {:.2}%", ticker, accuracy)));
            }
        }
        DisplayMode::ForecastComponents => {
            for (ticker, model) in &batch.models {
                let Some(rows) = batch.forecasts.get(ticker) else {
                    continue;
                };
                view.push(Block::text(format!("Forecast components - {}", ticker)));
                view.push(Block::Components {
                    ticker: ticker.clone(),
                    components: model.components(rows),
                });
            }
        }
        DisplayMode::ForecastTable => {
            for (ticker, rows) in &batch.forecasts {
                view.push(Block::text(format!("Forecast table for {}", ticker)));
                view.push(Block::ForecastTable {
                    ticker: ticker.clone(),
                    rows: rows.clone(),
                });
            }
        }
        DisplayMode::ForecastData => {
            for ticker in batch.tickers() {
                view.push(Block::text(format!("Forecast data for {}", ticker)));
                view.push(Block::ForecastTable {
                    ticker: ticker.clone(),
                    rows: batch.future_rows(ticker),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MockSource;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn test_config(enabled: bool) -> DashboardConfig {
        DashboardConfig {
            start: d(2022, 1, 1),
            end: Some(d(2023, 6, 30)),
            cache: CachePolicy {
                enabled,
                ttl: Duration::from_secs(600),
                max_entries: 8,
            },
            settings: ModelSettings {
                uncertainty_samples: 30,
                ..ModelSettings::default()
            },
        }
    }

    fn dashboard() -> Dashboard<MockSource> {
        Dashboard::new(MockSource::new(), test_config(true))
    }

    fn selection(page: Page, stocks: &[&str], display: DisplayMode) -> Selection {
        Selection {
            page,
            stocks: stocks.iter().map(|s| s.to_string()).collect(),
            horizon: Horizon::from_years(1).unwrap(),
            display,
        }
    }

    #[tokio::test]
    async fn test_zero_stocks_warns_without_fetching() {
        let dash = dashboard();
        for page in Page::ALL {
            let view = dash
                .render(&selection(page, &[], DisplayMode::ForecastPlot))
                .await
                .unwrap();
            assert_eq!(view.blocks.len(), 2);
            assert_eq!(view.texts(), vec![page.title(), NO_STOCKS_WARNING]);
        }
        assert_eq!(dash.source().calls(), 0);
    }

    #[tokio::test]
    async fn test_historical_page_groups_alphabetically() {
        let dash = dashboard();
        let view = dash
            .render(&selection(Page::HistoricalData, &["Microsoft", "Apple"], DisplayMode::default()))
            .await
            .unwrap();

        let texts = view.texts();
        assert_eq!(texts[0], "Historical Stock Data");
        assert_eq!(texts[1], LOADING_DONE_TEXT);
        assert!(texts[2].starts_with("Execution time without cache: "));
        assert!(texts[3].starts_with("Execution time with cache: "));
        assert!(texts[4].starts_with("Percentage difference: "));
        assert_eq!(texts[5], "Raw data for AAPL");
        assert_eq!(texts[6], "Raw data for MSFT");

        let tables: Vec<&str> = view
            .blocks
            .iter()
            .filter_map(|b| match b {
                Block::PriceTable { ticker, rows } => {
                    assert!(rows.iter().all(|r| &r.ticker == ticker));
                    Some(ticker.as_str())
                }
                _ => None,
            })
            .collect();
        assert_eq!(tables, vec!["AAPL", "MSFT"]);
    }

    #[tokio::test]
    async fn test_repeated_request_is_served_from_cache() {
        let dash = dashboard();
        let sel = selection(Page::HistoricalData, &["Apple"], DisplayMode::default());
        dash.render(&sel).await.unwrap();
        assert_eq!(dash.source().calls(), 1);
        dash.render(&sel).await.unwrap();
        assert_eq!(dash.source().calls(), 1);

        dash.clear_cache().await;
        dash.render(&sel).await.unwrap();
        assert_eq!(dash.source().calls(), 2);
    }

    #[tokio::test]
    async fn test_disabled_cache_refetches() {
        let dash = Dashboard::new(MockSource::new(), test_config(false));
        let sel = selection(Page::HistoricalData, &["Apple"], DisplayMode::default());
        dash.render(&sel).await.unwrap();
        assert_eq!(dash.source().calls(), 2);
    }

    #[tokio::test]
    async fn test_forecast_plot_has_one_series_per_ticker() {
        let dash = dashboard();
        let view = dash
            .render(&selection(Page::Forecast, &["Apple"], DisplayMode::ForecastPlot))
            .await
            .unwrap();

        let texts = view.texts();
        assert_eq!(texts[0], "Stock Price Forecast");
        assert!(texts.contains(&"Forecast data"));
        assert!(texts.contains(&"Forecast plot for 1 years"));
        assert!(texts.contains(&"Accuracy:"));
        assert!(texts.iter().any(|t| t.starts_with("AAPL: ") && t.ends_with('%')));

        let charts: Vec<&Vec<Series>> = view
            .blocks
            .iter()
            .filter_map(|b| match b {
                Block::LineChart { series, range_slider, .. } => {
                    assert!(*range_slider);
                    Some(series)
                }
                _ => None,
            })
            .collect();
        assert_eq!(charts.len(), 1);
        assert_eq!(charts[0].len(), 1);
        assert_eq!(charts[0][0].name, "AAPL");
        assert_eq!(charts[0][0].x.len(), charts[0][0].y.len());
    }

    #[tokio::test]
    async fn test_forecast_data_shows_future_rows_only() {
        let dash = dashboard();
        let view = dash
            .render(&selection(Page::Forecast, &["Google"], DisplayMode::ForecastData))
            .await
            .unwrap();

        assert!(view.texts().contains(&"Forecast data for GOOGL"));
        let rows = view
            .blocks
            .iter()
            .find_map(|b| match b {
                Block::ForecastTable { rows, .. } => Some(rows),
                _ => None,
            })
            .unwrap();
        assert_eq!(rows.len(), 365);
        assert!(rows.iter().all(|r| r.ds > d(2023, 6, 30)));
    }

    #[tokio::test]
    async fn test_forecast_components_and_table_modes() {
        let dash = dashboard();
        let components = dash
            .render(&selection(Page::Forecast, &["Amazon"], DisplayMode::ForecastComponents))
            .await
            .unwrap();
        assert!(components.texts().contains(&"Forecast components - AMZN"));
        assert!(components.blocks.iter().any(|b| matches!(b, Block::Components { .. })));

        let table = dash
            .render(&selection(Page::Forecast, &["Amazon"], DisplayMode::ForecastTable))
            .await
            .unwrap();
        assert!(table.texts().contains(&"Forecast table for AMZN"));
        // Same history and horizon: the forecast comes from the cache.
        assert_eq!(dash.source().calls(), 1);
        assert_eq!(dash.cache_stats().await.1.entries, 1);
    }

    #[tokio::test]
    async fn test_unknown_company_is_rejected() {
        let dash = dashboard();
        let err = dash
            .render(&selection(Page::HistoricalData, &["Initech"], DisplayMode::default()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Initech"));
        assert_eq!(dash.source().calls(), 0);
    }

    #[test]
    fn test_repeated_company_maps_to_one_symbol() {
        let sel = selection(Page::HistoricalData, &["Apple", "Microsoft", "apple"], DisplayMode::default());
        assert_eq!(sel.symbols().unwrap(), vec!["AAPL", "MSFT"]);
    }

    #[tokio::test]
    async fn test_forecast_is_cached_under_the_rendered_history_window() {
        let dash = Dashboard::new(
            MockSource::new(),
            DashboardConfig {
                start: d(2024, 1, 1),
                end: None,
                ..test_config(true)
            },
        );
        let sel = selection(Page::Forecast, &["Palantir"], DisplayMode::ForecastTable);
        dash.render(&sel).await.unwrap();

        let history = dash.history_key(&sel.symbols().unwrap());
        assert!(dash.history_cache.lock().await.get(&history).is_some());
        let key = ForecastKey {
            history,
            horizon: sel.horizon,
        };
        assert!(dash.forecast_cache.lock().await.get(&key).is_some());
    }

    #[test]
    fn test_selection_json_uses_labels() {
        let json = r#"{"page":"Forecast","stocks":["Apple"],"horizon":2,"display":"Forecast Table"}"#;
        let sel: Selection = serde_json::from_str(json).unwrap();
        assert_eq!(sel.page, Page::Forecast);
        assert_eq!(sel.display, DisplayMode::ForecastTable);
        assert_eq!(sel.horizon.years(), 2);
        assert_eq!(sel.symbols().unwrap(), vec!["AAPL"]);
    }
}
