use crate::config::{DAYS_PER_YEAR, MAX_HORIZON_YEARS, MIN_HORIZON_YEARS};
use crate::data::PriceTable;
use crate::model::{self, FittedModel, ForecastRecord, ModelSettings};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Forecast horizon in whole years (1–4).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Horizon {
    years: u8,
}

impl Horizon {
    pub fn from_years(years: u8) -> Result<Self> {
        if !(MIN_HORIZON_YEARS..=MAX_HORIZON_YEARS).contains(&years) {
            anyhow::bail!(
                "horizon must be between {} and {} years, got {}",
                MIN_HORIZON_YEARS,
                MAX_HORIZON_YEARS,
                years
            );
        }
        Ok(Self { years })
    }

    pub fn years(self) -> u8 {
        self.years
    }

    pub fn days(self) -> i64 {
        horizon_days(self.years)
    }
}

impl Default for Horizon {
    fn default() -> Self {
        Self { years: MIN_HORIZON_YEARS }
    }
}

impl TryFrom<u8> for Horizon {
    type Error = anyhow::Error;

    fn try_from(years: u8) -> Result<Self> {
        Self::from_years(years)
    }
}

impl From<Horizon> for u8 {
    fn from(h: Horizon) -> u8 {
        h.years
    }
}

/// Whole years to calendar days, 365 days per year.
pub fn horizon_days(years: u8) -> i64 {
    years as i64 * DAYS_PER_YEAR
}

/// Per-ticker outputs of one forecast run, keyed alphabetically.
#[derive(Clone, Debug, Default)]
pub struct ForecastBatch {
    pub forecasts: BTreeMap<String, Vec<ForecastRecord>>,
    pub models: BTreeMap<String, FittedModel>,
    pub accuracies: BTreeMap<String, f64>,
}

impl ForecastBatch {
    pub fn tickers(&self) -> impl Iterator<Item = &String> {
        self.forecasts.keys()
    }

    /// Rows strictly after the ticker's last observation.
    pub fn future_rows(&self, ticker: &str) -> Vec<ForecastRecord> {
        let (Some(forecast), Some(model)) = (self.forecasts.get(ticker), self.models.get(ticker)) else {
            return Vec::new();
        };
        let last = model.last_date();
        forecast.iter().filter(|r| r.ds > last).cloned().collect()
    }
}

/// Mean absolute percentage deviation of `predicted` from `actual`, × 100.
///
/// Fails when any actual value is zero.
pub fn in_sample_accuracy(predicted: &[f64], actual: &[(NaiveDate, f64)]) -> Result<f64> {
    if predicted.len() != actual.len() || actual.is_empty() {
        anyhow::bail!(
            "prediction/actual length mismatch: {} vs {}",
            predicted.len(),
            actual.len()
        );
    }
    if let Some((date, _)) = actual.iter().find(|(_, y)| *y == 0.0) {
        anyhow::bail!("accuracy undefined: zero close price on {}", date);
    }

    let total: f64 = predicted
        .iter()
        .zip(actual)
        .map(|(yhat, (_, y))| (yhat - y).abs() / y)
        .sum();
    Ok(total / actual.len() as f64 * 100.0)
}

/// Fits one model per ticker on `(date, close)` and forecasts `horizon` ahead.
///
/// Tickers are processed one at a time; the first failure aborts the batch.
pub fn predict_forecast(
    table: &PriceTable,
    horizon: Horizon,
    settings: &ModelSettings,
) -> Result<ForecastBatch> {
    let mut batch = ForecastBatch::default();

    for (ticker, rows) in table.group_by_ticker() {
        let train: Vec<(NaiveDate, f64)> = rows.iter().map(|r| (r.date, r.close)).collect();

        let model = model::fit(&train, settings)
            .with_context(|| format!("forecast failed for {}", ticker))?;

        let accuracy = in_sample_accuracy(&model.fitted_values(), model.history())
            .with_context(|| format!("forecast failed for {}", ticker))?;

        let future = model.make_future_dates(horizon.days());
        let forecast = model.predict(&future);

        info!(
            "{}: fitted {} rows (yearly={}, weekly={}, {} changepoints, noise {:.4}), forecast {} days ahead, accuracy {:.2}%",
            ticker,
            train.len(),
            model.has_yearly(),
            model.has_weekly(),
            model.changepoint_dates().len(),
            model.noise_scale(),
            horizon.days(),
            accuracy
        );

        batch.accuracies.insert(ticker.clone(), accuracy);
        batch.forecasts.insert(ticker.clone(), forecast);
        batch.models.insert(ticker, model);
    }

    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{mock_series, PriceRecord};
    use chrono::Duration;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn fast_settings() -> ModelSettings {
        ModelSettings {
            uncertainty_samples: 50,
            ..ModelSettings::default()
        }
    }

    #[test]
    fn test_horizon_days() {
        assert_eq!(horizon_days(1), 365);
        assert_eq!(horizon_days(3), 1095);
        assert_eq!(Horizon::from_years(4).unwrap().days(), 1460);
        assert!(Horizon::from_years(0).is_err());
        assert!(Horizon::from_years(5).is_err());
    }

    #[test]
    fn test_horizon_serde_validates() {
        let h: Horizon = serde_json::from_str("2").unwrap();
        assert_eq!(h.years(), 2);
        assert!(serde_json::from_str::<Horizon>("7").is_err());
        assert_eq!(serde_json::to_string(&h).unwrap(), "2");
    }

    #[test]
    fn test_accuracy_is_mean_absolute_percentage() {
        let actual = vec![(d(2024, 1, 1), 100.0), (d(2024, 1, 2), 200.0)];
        let acc = in_sample_accuracy(&[110.0, 190.0], &actual).unwrap();
        assert!((acc - 7.5).abs() < 1e-12);
    }

    #[test]
    fn test_accuracy_rejects_zero_close() {
        let actual = vec![(d(2024, 1, 1), 100.0), (d(2024, 1, 2), 0.0)];
        let err = in_sample_accuracy(&[100.0, 1.0], &actual).unwrap_err();
        assert!(err.to_string().contains("2024-01-02"));
    }

    #[test]
    fn test_single_ticker_one_year_scenario() {
        let table = PriceTable {
            records: mock_series("AAPL", d(2021, 1, 1), d(2023, 6, 30)),
        };
        let horizon = Horizon::from_years(1).unwrap();
        let batch = predict_forecast(&table, horizon, &fast_settings()).unwrap();

        assert_eq!(batch.forecasts.len(), 1);
        assert_eq!(batch.models.len(), 1);
        assert_eq!(batch.accuracies.len(), 1);

        let forecast = &batch.forecasts["AAPL"];
        let (first, last) = table.date_range().unwrap();
        assert_eq!(forecast.first().unwrap().ds, first);
        assert_eq!(forecast.last().unwrap().ds, last + Duration::days(365));
        assert_eq!(forecast.len(), table.len() + 365);
        assert_eq!(batch.future_rows("AAPL").len(), 365);

        let acc = batch.accuracies["AAPL"];
        assert!(acc.is_finite() && acc >= 0.0, "accuracy {}", acc);
    }

    #[test]
    fn test_batch_is_keyed_by_ticker() {
        let mut records = mock_series("MSFT", d(2023, 1, 1), d(2023, 12, 31));
        records.extend(mock_series("GOOGL", d(2023, 1, 1), d(2023, 12, 31)));
        let table = PriceTable { records };

        let batch = predict_forecast(&table, Horizon::from_years(2).unwrap(), &fast_settings()).unwrap();
        let keys: Vec<&String> = batch.tickers().collect();
        assert_eq!(keys, vec!["GOOGL", "MSFT"]);
        assert_eq!(batch.accuracies.keys().collect::<Vec<_>>(), keys);
        assert_eq!(batch.models.keys().collect::<Vec<_>>(), keys);
    }

    #[test]
    fn test_failing_ticker_aborts_batch() {
        let mut records = mock_series("MSFT", d(2023, 1, 1), d(2023, 3, 31));
        records.push(PriceRecord {
            date: d(2023, 1, 3),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            adj_close: 1.0,
            volume: 1,
            ticker: "PLTR".to_string(),
        });
        let table = PriceTable { records };

        let err = predict_forecast(&table, Horizon::default(), &fast_settings()).unwrap_err();
        assert!(format!("{:#}", err).contains("PLTR"));
    }

    #[test]
    fn test_empty_table_yields_empty_batch() {
        let batch = predict_forecast(&PriceTable::default(), Horizon::default(), &fast_settings()).unwrap();
        assert!(batch.forecasts.is_empty());
    }
}
