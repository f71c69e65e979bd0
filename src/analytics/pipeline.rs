use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{SerializeMap, SerializeSeq, SerializeStruct};
use serde::{Serialize, Serializer};
use std::time::Instant;

use super::cache::{AdfRun, AnalysisKey, StationarityCache};
use super::correlation::rolling_correlation;
use super::regression::{rolling_regression, RegressionWindow};
use super::resample::{AlignedRow, DataGap, Resampler};
use super::spread::{spread_rows, SpreadRow};
use super::stationarity::adf_test;
use super::{RegressionType, Timeframe, MIN_WINDOW};
use crate::config::AnalysisSettings;
use crate::db::{Tick, TickStore};
use crate::error::HubError;

// ── Request ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    pub instrument1: String,
    pub instrument2: String,
    pub timeframe: Timeframe,
    pub window: usize,
    pub regression_type: RegressionType,
    pub run_stationarity_test: bool,
}

impl AnalysisRequest {
    pub fn key(&self) -> AnalysisKey {
        AnalysisKey {
            instrument1: self.instrument1.clone(),
            instrument2: self.instrument2.clone(),
            timeframe: self.timeframe,
            window: self.window,
            regression_type: self.regression_type,
        }
    }

    /// Checks that need no data access.
    pub fn validate_shape(&self, settings: &AnalysisSettings) -> Result<(), HubError> {
        if self.instrument1.trim().is_empty() || self.instrument2.trim().is_empty() {
            return Err(HubError::InvalidRequest(
                "both s1 and s2 must be provided".to_string(),
            ));
        }
        if self.instrument1 == self.instrument2 {
            return Err(HubError::InvalidRequest(format!(
                "s1 and s2 must be different instruments (got {} twice)",
                self.instrument1
            )));
        }
        if self.window < MIN_WINDOW {
            return Err(HubError::InvalidRequest(format!(
                "window must be at least {MIN_WINDOW} (got {})",
                self.window
            )));
        }
        if self.window > settings.max_window {
            return Err(HubError::InvalidRequest(format!(
                "window must be at most {} (got {})",
                settings.max_window, self.window
            )));
        }
        Ok(())
    }

    pub fn validate_known(&self, known: &[String]) -> Result<(), HubError> {
        for sym in [&self.instrument1, &self.instrument2] {
            if !known.iter().any(|k| k == sym) {
                return Err(HubError::InvalidRequest(format!("unknown instrument: {sym}")));
            }
        }
        Ok(())
    }
}

// ── Output rows ──────────────────────────────────────────────────────────

/// One aligned bucket with every derived series.  Undefined values stay
/// `None` through serialization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChartRow {
    pub bucket_start: i64,
    pub price1: f64,
    pub volume1: f64,
    pub price2: f64,
    pub volume2: f64,
    pub spread: Option<f64>,
    pub zscore: Option<f64>,
    pub mean: Option<f64>,
    pub rolling_corr: Option<f64>,
}

impl From<&AlignedRow> for ChartRow {
    fn from(row: &AlignedRow) -> Self {
        Self {
            bucket_start: row.bucket_start,
            price1: row.price1,
            volume1: row.volume1,
            price2: row.price2,
            volume2: row.volume2,
            spread: None,
            zscore: None,
            mean: None,
            rolling_corr: None,
        }
    }
}

/// RFC 3339 UTC rendering of a bucket start.
pub fn bucket_timestamp(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| ms.to_string())
}

/// Derived series for one pair, before any stationarity test.
#[derive(Debug, Clone, Default)]
pub struct PairAnalytics {
    pub rows: Vec<ChartRow>,
    pub latest_regression: Option<RegressionWindow>,
    pub latest_spread: Option<SpreadRow>,
    /// Every defined spread value, oldest first.
    pub spread_series: Vec<f64>,
    pub gaps: Vec<DataGap>,
}

/// Resample, regress and derive every rolling series for one request.
pub fn compute_pair(
    req: &AnalysisRequest,
    settings: &AnalysisSettings,
    ticks1: &[Tick],
    ticks2: &[Tick],
) -> PairAnalytics {
    let resampler = Resampler::new(req.timeframe, settings.max_fill_forward);
    let aligned = resampler.align_pair(
        (req.instrument1.as_str(), ticks1),
        (req.instrument2.as_str(), ticks2),
    );

    let regressions = rolling_regression(&aligned.rows, req.window, req.regression_type);
    let spreads = spread_rows(&aligned.rows, &regressions, req.window);
    let correlations = rolling_correlation(&aligned.rows, req.window);

    let mut rows: Vec<ChartRow> = aligned.rows.iter().map(ChartRow::from).collect();
    for s in &spreads {
        if let Some(row) = rows.get_mut(s.index) {
            row.spread = s.spread;
            row.zscore = s.zscore;
            row.mean = s.rolling_mean;
        }
    }
    for c in &correlations {
        if let Some(row) = rows.get_mut(c.index) {
            row.rolling_corr = c.rolling_corr;
        }
    }

    PairAnalytics {
        rows,
        latest_regression: regressions.last().copied(),
        latest_spread: spreads.last().copied(),
        spread_series: spreads.iter().filter_map(|s| s.spread).collect(),
        gaps: aligned.gaps,
    }
}

// ── Metrics ──────────────────────────────────────────────────────────────

const NOT_AVAILABLE: &str = "N/A";

fn fmt4(v: Option<f64>) -> String {
    match v {
        Some(v) if v.is_finite() => format!("{v:.4}"),
        _ => NOT_AVAILABLE.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub latest_spread: String,
    pub z_latest: Option<f64>,
    pub hedge_ratio: String,
    pub hedge_points: usize,
    pub adf_p_value: String,
    pub data_points: usize,
    pub adf_is_stationary: Option<bool>,
    pub adf_computed_at: Option<String>,
    /// Fill-forward overruns that truncated or shortened the aligned series.
    pub data_gaps: usize,
}

impl MetricsSnapshot {
    pub fn new(analytics: &PairAnalytics, adf: Option<&AdfRun>) -> Self {
        let latest_spread = analytics.latest_spread.and_then(|s| s.spread);
        let z_latest = analytics.latest_spread.and_then(|s| s.zscore);
        let hedge_ratio = analytics
            .latest_regression
            .and_then(|r| r.fit)
            .map(|f| f.hedge_ratio);
        let result = adf.and_then(|run| run.result().map(|r| (run, r)));

        Self {
            latest_spread: fmt4(latest_spread),
            z_latest,
            hedge_ratio: fmt4(hedge_ratio),
            hedge_points: analytics.latest_regression.map_or(0, |r| r.sample_count),
            adf_p_value: fmt4(result.map(|(_, r)| r.p_value)),
            data_points: analytics.rows.len(),
            adf_is_stationary: result.map(|(_, r)| r.is_stationary()),
            adf_computed_at: result
                .map(|(run, _)| run.computed_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
            data_gaps: analytics.gaps.len(),
        }
    }
}

// ── Report ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub instrument1: String,
    pub instrument2: String,
    pub timeframe: Timeframe,
    pub rows: Vec<ChartRow>,
    pub metrics: MetricsSnapshot,
}

impl AnalysisReport {
    pub fn volume_column(symbol: &str) -> String {
        format!("{symbol}_volume")
    }
}

struct ChartRowView<'a> {
    s1: &'a str,
    s2: &'a str,
    v1: &'a str,
    v2: &'a str,
    row: &'a ChartRow,
}

impl Serialize for ChartRowView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(9))?;
        map.serialize_entry("timestamp", &bucket_timestamp(self.row.bucket_start))?;
        map.serialize_entry(self.s1, &self.row.price1)?;
        map.serialize_entry(self.v1, &self.row.volume1)?;
        map.serialize_entry(self.s2, &self.row.price2)?;
        map.serialize_entry(self.v2, &self.row.volume2)?;
        map.serialize_entry("spread", &self.row.spread)?;
        map.serialize_entry("zscore", &self.row.zscore)?;
        map.serialize_entry("mean", &self.row.mean)?;
        map.serialize_entry("rolling_corr", &self.row.rolling_corr)?;
        map.end()
    }
}

struct ChartData<'a>(&'a AnalysisReport);

impl Serialize for ChartData<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let report = self.0;
        let v1 = AnalysisReport::volume_column(&report.instrument1);
        let v2 = AnalysisReport::volume_column(&report.instrument2);
        let mut seq = serializer.serialize_seq(Some(report.rows.len()))?;
        for row in &report.rows {
            seq.serialize_element(&ChartRowView {
                s1: &report.instrument1,
                s2: &report.instrument2,
                v1: &v1,
                v2: &v2,
                row,
            })?;
        }
        seq.end()
    }
}

impl Serialize for AnalysisReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut st = serializer.serialize_struct("AnalysisReport", 2)?;
        st.serialize_field("chart_data", &ChartData(self))?;
        st.serialize_field("metrics", &self.metrics)?;
        st.end()
    }
}

// ── Orchestration ────────────────────────────────────────────────────────

/// Full `/analyze` flow: validate, load a consistent snapshot of both
/// instruments, derive every series and attach the stationarity result.
pub async fn analyze(
    store: &TickStore,
    cache: &StationarityCache,
    settings: &AnalysisSettings,
    req: &AnalysisRequest,
) -> Result<AnalysisReport, HubError> {
    req.validate_shape(settings)?;
    req.validate_known(&store.symbols()?)?;

    let (ticks1, ticks2) = store.load_pair(&req.instrument1, &req.instrument2, settings.tick_limit)?;
    let analytics = compute_pair(req, settings, &ticks1, &ticks2);
    let key = req.key();

    let adf = if req.run_stationarity_test {
        let series = analytics.spread_series.clone();
        let lag_cap = settings.adf_max_lag;
        let started = Instant::now();
        let run = cache
            .run_or_join(&key, move || adf_test(&series, lag_cap))
            .await?;
        match &run.outcome {
            Ok(r) => tracing::info!(
                "adf {key}: stat={:.4} p={:.4} lag={} n={} in {:?}",
                r.statistic,
                r.p_value,
                r.used_lag,
                r.sample_count,
                started.elapsed()
            ),
            Err(refusal) => tracing::info!("adf {key}: not computed ({refusal})"),
        }
        Some(run)
    } else {
        cache.cached(&key)
    };

    let metrics = MetricsSnapshot::new(&analytics, adf.as_ref());
    Ok(AnalysisReport {
        instrument1: req.instrument1.clone(),
        instrument2: req.instrument2.clone(),
        timeframe: req.timeframe,
        rows: analytics.rows,
        metrics,
    })
}
