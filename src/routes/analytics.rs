use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::analytics::pipeline::{self, AnalysisReport, AnalysisRequest};
use crate::error::HubError;
use crate::ohlc_csv;
use crate::state::AppState;

// ── Query params ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AnalyzeQuery {
    #[serde(default)]
    s1: String,
    #[serde(default)]
    s2: String,
    #[serde(default = "default_timeframe")]
    timeframe: String,
    #[serde(default = "default_window")]
    window: usize,
    #[serde(default = "default_regression_type")]
    regression_type: String,
    #[serde(default)]
    run_adf: bool,
}

fn default_timeframe() -> String {
    "1T".to_string()
}

fn default_window() -> usize {
    20
}

fn default_regression_type() -> String {
    "OLS_I".to_string()
}

impl AnalyzeQuery {
    fn into_request(self) -> Result<AnalysisRequest, HubError> {
        Ok(AnalysisRequest {
            instrument1: self.s1.trim().to_string(),
            instrument2: self.s2.trim().to_string(),
            timeframe: self.timeframe.parse()?,
            window: self.window,
            regression_type: self.regression_type.parse()?,
            run_stationarity_test: self.run_adf,
        })
    }
}

fn query_params(
    q: Result<Query<AnalyzeQuery>, QueryRejection>,
) -> Result<AnalysisRequest, HubError> {
    let Query(q) = q.map_err(|e| HubError::InvalidRequest(e.body_text()))?;
    q.into_request()
}

// ── Route definitions ────────────────────────────────────────────────────

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/symbols", get(symbols))
        .route("/analyze", get(analyze))
        .route("/export_csv", get(export_csv))
}

// ── Handlers ─────────────────────────────────────────────────────────────

async fn symbols(State(state): State<Arc<AppState>>) -> Result<Json<Value>, HubError> {
    let symbols = state.store.symbols()?;
    Ok(Json(json!({ "symbols": symbols })))
}

async fn run_analysis(state: &AppState, req: &AnalysisRequest) -> Result<AnalysisReport, HubError> {
    pipeline::analyze(&state.store, &state.adf_cache, &state.settings, req).await
}

async fn analyze(
    State(state): State<Arc<AppState>>,
    q: Result<Query<AnalyzeQuery>, QueryRejection>,
) -> Result<Json<AnalysisReport>, HubError> {
    let req = query_params(q)?;
    Ok(Json(run_analysis(&state, &req).await?))
}

/// GET /export_csv: same parameters as `/analyze`; the stationarity test is
/// never triggered from here.
async fn export_csv(
    State(state): State<Arc<AppState>>,
    q: Result<Query<AnalyzeQuery>, QueryRejection>,
) -> Result<impl IntoResponse, HubError> {
    let mut req = query_params(q)?;
    req.run_stationarity_test = false;

    let report = run_analysis(&state, &req).await?;
    let body = ohlc_csv::write_report_csv(&report)?;
    let filename = ohlc_csv::export_filename(&req.instrument1, &req.instrument2, req.timeframe);

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    ))
}
