//! Additive time-series regression: piecewise-linear trend plus Fourier
//! seasonalities, with simulated uncertainty intervals.
//!
//! `y(t) = trend(t) + yearly(t) + weekly(t) + noise`
//!
//! The trend is `m + k·t + Σ δ_j·(t − s_j)₊` over time scaled to `[0, 1]`
//! across the history. Coefficients are fitted by penalised least squares on
//! the absmax-scaled series; the penalties play the role of priors on each
//! coefficient group.

use crate::config::{
    CHANGEPOINT_PRIOR_SCALE, CHANGEPOINT_RANGE, FIT_PASSES, INTERVAL_WIDTH, N_CHANGEPOINTS,
    SEASONALITY_PRIOR_SCALE, TREND_PRIOR_SCALE, UNCERTAINTY_SAMPLES, UNCERTAINTY_SEED,
    WEEKLY_FOURIER_ORDER, WEEKLY_MIN_SPAN_DAYS, WEEKLY_PERIOD_DAYS, YEARLY_FOURIER_ORDER,
    YEARLY_MIN_SPAN_DAYS, YEARLY_PERIOD_DAYS,
};
use crate::linalg::{cholesky_solve, percentile_sorted, SymMatrix};
use anyhow::Result;
use chrono::{Datelike, Duration, NaiveDate};
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Exp1, Normal, Poisson};
use rayon::prelude::*;
use serde::Serialize;
use std::f64::consts::PI;
use tracing::debug;

/// Days from 0001-01-01 (CE) to 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;
/// Relative ridge floor keeping rank-deficient seasonal blocks solvable.
const RIDGE_FLOOR: f64 = 1e-8;

#[derive(Clone, Debug)]
pub struct ModelSettings {
    pub n_changepoints: usize,
    pub changepoint_range: f64,
    pub changepoint_prior_scale: f64,
    pub seasonality_prior_scale: f64,
    pub trend_prior_scale: f64,
    pub yearly_order: usize,
    pub weekly_order: usize,
    pub interval_width: f64,
    pub uncertainty_samples: usize,
    pub seed: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            n_changepoints: N_CHANGEPOINTS,
            changepoint_range: CHANGEPOINT_RANGE,
            changepoint_prior_scale: CHANGEPOINT_PRIOR_SCALE,
            seasonality_prior_scale: SEASONALITY_PRIOR_SCALE,
            trend_prior_scale: TREND_PRIOR_SCALE,
            yearly_order: YEARLY_FOURIER_ORDER,
            weekly_order: WEEKLY_FOURIER_ORDER,
            interval_width: INTERVAL_WIDTH,
            uncertainty_samples: UNCERTAINTY_SAMPLES,
            seed: UNCERTAINTY_SEED,
        }
    }
}

/// One predicted row. All values are in price units.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ForecastRecord {
    pub ds: NaiveDate,
    pub trend: f64,
    pub trend_lower: f64,
    pub trend_upper: f64,
    pub yearly: f64,
    pub weekly: f64,
    pub yhat_lower: f64,
    pub yhat: f64,
    pub yhat_upper: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct TrendPoint {
    pub ds: NaiveDate,
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct WeekdayPoint {
    pub day: String,
    pub value: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct YearlyPoint {
    pub ds: NaiveDate,
    pub value: f64,
}

/// Component curves of a fitted model, one entry per enabled term.
#[derive(Clone, Debug, Serialize)]
pub struct Components {
    pub trend: Vec<TrendPoint>,
    pub weekly: Option<Vec<WeekdayPoint>>,
    pub yearly: Option<Vec<YearlyPoint>>,
}

#[derive(Clone, Debug)]
struct Seasonality {
    period_days: f64,
    order: usize,
    beta: Vec<f64>,
}

impl Seasonality {
    fn value(&self, x_days: f64) -> f64 {
        let mut total = 0.0;
        for k in 0..self.order {
            let angle = 2.0 * PI * (k + 1) as f64 * x_days / self.period_days;
            total += self.beta[2 * k] * angle.sin() + self.beta[2 * k + 1] * angle.cos();
        }
        total
    }
}

/// Column layout of the design matrix.
struct Layout {
    changepoints: Vec<f64>,
    yearly_order: usize,
    weekly_order: usize,
}

impl Layout {
    fn width(&self) -> usize {
        2 + self.changepoints.len() + 2 * self.yearly_order + 2 * self.weekly_order
    }

    fn fill(&self, t: f64, x_days: f64, row: &mut Vec<f64>) {
        row.clear();
        row.push(1.0);
        row.push(t);
        row.extend(self.changepoints.iter().map(|s| (t - s).max(0.0)));
        push_fourier(row, x_days, YEARLY_PERIOD_DAYS, self.yearly_order);
        push_fourier(row, x_days, WEEKLY_PERIOD_DAYS, self.weekly_order);
    }

    fn prior_scales(&self, settings: &ModelSettings) -> Vec<f64> {
        let mut scales = vec![settings.trend_prior_scale; 2];
        scales.extend(std::iter::repeat(settings.changepoint_prior_scale).take(self.changepoints.len()));
        scales.extend(
            std::iter::repeat(settings.seasonality_prior_scale)
                .take(2 * (self.yearly_order + self.weekly_order)),
        );
        scales
    }
}

fn push_fourier(row: &mut Vec<f64>, x_days: f64, period: f64, order: usize) {
    for k in 1..=order {
        let angle = 2.0 * PI * k as f64 * x_days / period;
        row.push(angle.sin());
        row.push(angle.cos());
    }
}

fn quantile_band(
    paths: &[Vec<f64>],
    i: usize,
    lower_q: f64,
    upper_q: f64,
    buf: &mut Vec<f64>,
) -> Option<(f64, f64)> {
    if paths.is_empty() {
        return None;
    }
    buf.clear();
    buf.extend(paths.iter().map(|p| p[i]));
    buf.sort_by(f64::total_cmp);
    Some((percentile_sorted(buf, lower_q), percentile_sorted(buf, upper_q)))
}

fn epoch_days(date: NaiveDate) -> f64 {
    (date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE) as f64
}

/// A model fitted to one daily series.
#[derive(Clone, Debug)]
pub struct FittedModel {
    settings: ModelSettings,
    history: Vec<(NaiveDate, f64)>,
    start: NaiveDate,
    span_days: f64,
    y_scale: f64,
    k: f64,
    m: f64,
    changepoints: Vec<f64>,
    deltas: Vec<f64>,
    yearly: Option<Seasonality>,
    weekly: Option<Seasonality>,
    sigma: f64,
}

/// Fits the additive model to `(date, value)` observations.
///
/// Non-finite values are dropped and duplicate dates keep their first value.
/// Fails with fewer than two usable observations.
pub fn fit(observations: &[(NaiveDate, f64)], settings: &ModelSettings) -> Result<FittedModel> {
    let mut history: Vec<(NaiveDate, f64)> = observations
        .iter()
        .copied()
        .filter(|(_, y)| y.is_finite())
        .collect();
    history.sort_by_key(|(d, _)| *d);
    history.dedup_by_key(|(d, _)| *d);

    let n = history.len();
    if n < 2 {
        anyhow::bail!("need at least 2 observations to fit, got {}", n);
    }

    let start = history[0].0;
    let span = (history[n - 1].0 - start).num_days();
    if span <= 0 {
        anyhow::bail!("observations span zero days");
    }
    let span_days = span as f64;

    let mut y_scale = history.iter().map(|(_, y)| y.abs()).fold(0.0, f64::max);
    if y_scale == 0.0 {
        y_scale = 1.0;
    }

    let ts: Vec<f64> = history
        .iter()
        .map(|(d, _)| (*d - start).num_days() as f64 / span_days)
        .collect();
    let ys: Vec<f64> = history.iter().map(|(_, y)| y / y_scale).collect();

    // Changepoints sit on observed times spread over the leading share of history
    let hist_size = ((n as f64) * settings.changepoint_range).floor() as usize;
    let n_cp = settings.n_changepoints.min(hist_size.saturating_sub(1));
    let changepoints: Vec<f64> = (1..=n_cp)
        .map(|j| {
            let idx = (j as f64 * (hist_size - 1) as f64 / n_cp as f64).round() as usize;
            ts[idx.min(n - 1)]
        })
        .collect();

    let layout = Layout {
        changepoints,
        yearly_order: if span >= YEARLY_MIN_SPAN_DAYS { settings.yearly_order } else { 0 },
        weekly_order: if span >= WEEKLY_MIN_SPAN_DAYS { settings.weekly_order } else { 0 },
    };
    let p = layout.width();

    let mut design = Vec::with_capacity(n * p);
    let mut xtx = SymMatrix::zeros(p);
    let mut xty = vec![0.0; p];
    let mut row = Vec::with_capacity(p);
    for (i, (date, _)) in history.iter().enumerate() {
        layout.fill(ts[i], epoch_days(*date), &mut row);
        xtx.add_outer(&row);
        for (acc, x) in xty.iter_mut().zip(&row) {
            *acc += x * ys[i];
        }
        design.extend_from_slice(&row);
    }
    xtx.symmetrize();

    let diag_mean = (0..p).map(|i| xtx.get(i, i)).sum::<f64>() / p as f64;
    let prior_scales = layout.prior_scales(settings);

    let mut sigma2 = 0.05_f64.powi(2);
    let mut beta = vec![0.0; p];
    for pass in 0..FIT_PASSES.max(1) {
        let penalties: Vec<f64> = prior_scales
            .iter()
            .map(|tau| (sigma2 / (tau * tau)).max(RIDGE_FLOOR * diag_mean))
            .collect();
        let mut system = xtx.clone();
        system.add_diagonal(&penalties);
        beta = cholesky_solve(&system, &xty)?;

        let sse: f64 = design
            .chunks_exact(p)
            .zip(&ys)
            .map(|(x, y)| {
                let fitted: f64 = x.iter().zip(&beta).map(|(a, b)| a * b).sum();
                (y - fitted).powi(2)
            })
            .sum();
        sigma2 = (sse / n as f64).max(1e-12);
        debug!("fit pass {}: sigma={:.6} (scaled)", pass + 1, sigma2.sqrt());
    }

    let n_cp = layout.changepoints.len();
    let mut offset = 2 + n_cp;
    let mut take_season = |order: usize, period_days: f64| {
        if order == 0 {
            return None;
        }
        let season = Seasonality {
            period_days,
            order,
            beta: beta[offset..offset + 2 * order].to_vec(),
        };
        offset += 2 * order;
        Some(season)
    };
    let yearly = take_season(layout.yearly_order, YEARLY_PERIOD_DAYS);
    let weekly = take_season(layout.weekly_order, WEEKLY_PERIOD_DAYS);

    Ok(FittedModel {
        settings: settings.clone(),
        start,
        span_days,
        y_scale,
        m: beta[0],
        k: beta[1],
        deltas: beta[2..2 + n_cp].to_vec(),
        changepoints: layout.changepoints,
        yearly,
        weekly,
        sigma: sigma2.sqrt(),
        history,
    })
}

impl FittedModel {
    pub fn history(&self) -> &[(NaiveDate, f64)] {
        &self.history
    }

    pub fn last_date(&self) -> NaiveDate {
        self.history.last().map(|(d, _)| *d).unwrap_or(self.start)
    }

    pub fn has_yearly(&self) -> bool {
        self.yearly.is_some()
    }

    pub fn has_weekly(&self) -> bool {
        self.weekly.is_some()
    }

    pub fn changepoint_dates(&self) -> Vec<NaiveDate> {
        self.changepoints
            .iter()
            .map(|t| self.start + Duration::days((t * self.span_days).round() as i64))
            .collect()
    }

    /// Noise standard deviation in price units.
    pub fn noise_scale(&self) -> f64 {
        self.sigma * self.y_scale
    }

    fn scaled_t(&self, date: NaiveDate) -> f64 {
        (date - self.start).num_days() as f64 / self.span_days
    }

    fn trend_scaled(&self, t: f64) -> f64 {
        let bends: f64 = self
            .changepoints
            .iter()
            .zip(&self.deltas)
            .map(|(s, d)| d * (t - s).max(0.0))
            .sum();
        self.m + self.k * t + bends
    }

    fn seasonal_parts(&self, date: NaiveDate) -> (f64, f64) {
        let x = epoch_days(date);
        let yearly = self.yearly.as_ref().map_or(0.0, |s| s.value(x) * self.y_scale);
        let weekly = self.weekly.as_ref().map_or(0.0, |s| s.value(x) * self.y_scale);
        (yearly, weekly)
    }

    /// Point prediction without uncertainty.
    pub fn predict_point(&self, date: NaiveDate) -> f64 {
        let (yearly, weekly) = self.seasonal_parts(date);
        self.trend_scaled(self.scaled_t(date)) * self.y_scale + yearly + weekly
    }

    /// In-sample predictions aligned with `history()`.
    pub fn fitted_values(&self) -> Vec<f64> {
        self.history.iter().map(|(d, _)| self.predict_point(*d)).collect()
    }

    /// History dates followed by `periods` consecutive calendar days.
    pub fn make_future_dates(&self, periods: i64) -> Vec<NaiveDate> {
        let last = self.last_date();
        self.history
            .iter()
            .map(|(d, _)| *d)
            .chain((1..=periods.max(0)).map(|i| last + Duration::days(i)))
            .collect()
    }

    /// Predicts every date with trend/yhat intervals from simulated paths.
    pub fn predict(&self, dates: &[NaiveDate]) -> Vec<ForecastRecord> {
        let ts: Vec<f64> = dates.iter().map(|d| self.scaled_t(*d)).collect();
        let base_trend: Vec<f64> = ts.iter().map(|t| self.trend_scaled(*t)).collect();
        let seasonal: Vec<(f64, f64)> = dates.iter().map(|d| self.seasonal_parts(*d)).collect();
        let t_max = ts.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let (trend_paths, yhat_paths): (Vec<Vec<f64>>, Vec<Vec<f64>>) = (0..self.settings.uncertainty_samples)
            .into_par_iter()
            .map(|s| {
                let mut rng = StdRng::seed_from_u64(self.settings.seed.wrapping_add(s as u64));
                let changes = self.sample_future_changes(t_max, &mut rng);
                let noise = Normal::new(0.0, self.sigma).ok();

                let mut trend_path = Vec::with_capacity(ts.len());
                let mut yhat_path = Vec::with_capacity(ts.len());
                for (i, t) in ts.iter().enumerate() {
                    let shift: f64 = changes.iter().map(|(c, d)| d * (t - c).max(0.0)).sum();
                    let trend = base_trend[i] + shift;
                    let eps = noise.as_ref().map_or(0.0, |n| n.sample(&mut rng));
                    trend_path.push(trend * self.y_scale);
                    yhat_path.push((trend + eps) * self.y_scale + seasonal[i].0 + seasonal[i].1);
                }
                (trend_path, yhat_path)
            })
            .unzip();

        let lower_q = (1.0 - self.settings.interval_width) / 2.0;
        let upper_q = (1.0 + self.settings.interval_width) / 2.0;
        let mut buf = Vec::with_capacity(trend_paths.len());

        let mut out = Vec::with_capacity(dates.len());
        for (i, ds) in dates.iter().enumerate() {
            let trend = base_trend[i] * self.y_scale;
            let (yearly, weekly) = seasonal[i];
            let yhat = trend + yearly + weekly;
            let (trend_lower, trend_upper) =
                quantile_band(&trend_paths, i, lower_q, upper_q, &mut buf).unwrap_or((trend, trend));
            let (yhat_lower, yhat_upper) =
                quantile_band(&yhat_paths, i, lower_q, upper_q, &mut buf).unwrap_or((yhat, yhat));
            out.push(ForecastRecord {
                ds: *ds,
                trend,
                trend_lower,
                trend_upper,
                yearly,
                weekly,
                yhat_lower,
                yhat,
                yhat_upper,
            });
        }
        out
    }

    /// Future trend changes: Poisson arrivals at the historical changepoint
    /// rate, Laplace magnitudes scaled by the mean fitted change.
    fn sample_future_changes(&self, t_max: f64, rng: &mut StdRng) -> Vec<(f64, f64)> {
        if t_max <= 1.0 || self.changepoints.is_empty() {
            return Vec::new();
        }
        let rate = self.changepoints.len() as f64 * (t_max - 1.0);
        let count = match Poisson::new(rate) {
            Ok(p) => p.sample(rng) as usize,
            Err(_) => 0,
        };
        let scale = self.deltas.iter().map(|d| d.abs()).sum::<f64>() / self.deltas.len() as f64 + 1e-8;

        (0..count)
            .map(|_| {
                let at = rng.gen_range(1.0..t_max);
                let magnitude: f64 = Exp1.sample(rng);
                let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
                (at, sign * magnitude * scale)
            })
            .collect()
    }

    /// Trend with bounds over `forecast`, plus one weekly cycle (Sunday first)
    /// and one reference year of the seasonal terms.
    pub fn components(&self, forecast: &[ForecastRecord]) -> Components {
        let trend = forecast
            .iter()
            .map(|r| TrendPoint {
                ds: r.ds,
                value: r.trend,
                lower: r.trend_lower,
                upper: r.trend_upper,
            })
            .collect();

        // 2017-01-01 is a Sunday and 2017 is not a leap year
        let reference = NaiveDate::from_ymd_opt(2017, 1, 1).unwrap_or(self.start);

        let weekly = self.weekly.as_ref().map(|season| {
            (0..7)
                .map(|i| {
                    let day = reference + Duration::days(i);
                    WeekdayPoint {
                        day: day.format("%A").to_string(),
                        value: season.value(epoch_days(day)) * self.y_scale,
                    }
                })
                .collect()
        });

        let yearly = self.yearly.as_ref().map(|season| {
            (0..365)
                .map(|i| {
                    let day = reference + Duration::days(i);
                    YearlyPoint {
                        ds: day,
                        value: season.value(epoch_days(day)) * self.y_scale,
                    }
                })
                .collect()
        });

        Components { trend, weekly, yearly }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    fn daily(start: NaiveDate, days: i64, f: impl Fn(i64, NaiveDate) -> f64) -> Vec<(NaiveDate, f64)> {
        (0..days)
            .map(|i| {
                let d = start + Duration::days(i);
                (d, f(i, d))
            })
            .collect()
    }

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 1, 2).unwrap()
    }

    #[test]
    fn test_fit_recovers_linear_trend() {
        let obs = daily(start(), 200, |i, _| 10.0 + 0.5 * i as f64);
        let model = fit(&obs, &ModelSettings::default()).unwrap();

        let fitted = model.fitted_values();
        let max_err = fitted
            .iter()
            .zip(&obs)
            .map(|(f, (_, y))| (f - y).abs())
            .fold(0.0, f64::max);
        assert!(max_err < 1.0, "max in-sample error {}", max_err);

        let ahead = model.predict_point(start() + Duration::days(229));
        assert!((ahead - 124.5).abs() < 3.0, "extrapolated {}", ahead);
    }

    #[test]
    fn test_weekly_component_captures_monday_bump() {
        let obs = daily(start(), 140, |_, d| if d.weekday() == Weekday::Mon { 54.0 } else { 50.0 });
        let model = fit(&obs, &ModelSettings::default()).unwrap();
        assert!(model.has_weekly());
        assert!(!model.has_yearly());

        let forecast = model.predict(&model.make_future_dates(0));
        let components = model.components(&forecast);
        let weekly = components.weekly.unwrap();
        assert_eq!(weekly.len(), 7);
        assert_eq!(weekly[0].day, "Sunday");
        let monday = weekly.iter().find(|p| p.day == "Monday").unwrap().value;
        let wednesday = weekly.iter().find(|p| p.day == "Wednesday").unwrap().value;
        assert!(monday > wednesday + 1.0, "monday {} wednesday {}", monday, wednesday);
        assert!(components.yearly.is_none());
    }

    #[test]
    fn test_fit_requires_two_observations() {
        let one = vec![(start(), 10.0)];
        assert!(fit(&one, &ModelSettings::default()).is_err());

        let same_day = vec![(start(), 10.0), (start(), 11.0)];
        assert!(fit(&same_day, &ModelSettings::default()).is_err());

        let with_nan = vec![(start(), 10.0), (start() + Duration::days(1), f64::NAN)];
        assert!(fit(&with_nan, &ModelSettings::default()).is_err());
    }

    #[test]
    fn test_future_dates_extend_history() {
        let obs = daily(start(), 30, |i, _| 20.0 + i as f64 * 0.1);
        let model = fit(&obs, &ModelSettings::default()).unwrap();
        let dates = model.make_future_dates(365);
        assert_eq!(dates.len(), 30 + 365);
        assert_eq!(dates[0], start());
        assert_eq!(*dates.last().unwrap(), model.last_date() + Duration::days(365));
    }

    #[test]
    fn test_prediction_intervals_are_ordered_and_deterministic() {
        let obs = daily(start(), 800, |i, d| {
            100.0 + 0.05 * i as f64 + 3.0 * (d.ordinal() as f64 / 365.0 * 2.0 * PI).sin()
                + if i % 3 == 0 { 0.7 } else { -0.35 }
        });
        let model = fit(&obs, &ModelSettings::default()).unwrap();
        assert!(model.has_yearly());

        let dates = model.make_future_dates(120);
        let a = model.predict(&dates);
        let b = model.predict(&dates);
        assert_eq!(a, b);

        for r in &a {
            assert!(r.yhat_lower <= r.yhat_upper);
            assert!(r.trend_lower <= r.trend + 1e-9 && r.trend <= r.trend_upper + 1e-9);
            assert!((r.yhat - (r.trend + r.yearly + r.weekly)).abs() < 1e-9);
        }
        // history rows carry no trend uncertainty
        let first = &a[0];
        assert_eq!(first.trend_lower, first.trend_upper);
        assert!(model.noise_scale() > 0.0);
        assert!(!model.changepoint_dates().is_empty());
    }
}
