use axum::extract::{Multipart, State};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::HubError;
use crate::ohlc_csv;
use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/upload_ohlc", post(upload_ohlc))
}

fn malformed(e: impl std::fmt::Display) -> HubError {
    HubError::MalformedUpload(format!("invalid multipart body: {e}"))
}

/// POST /upload_ohlc: multipart `file` (required) and `symbol` (optional).
async fn upload_ohlc(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<Value>, HubError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut symbol: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let name = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(malformed)?;
                file = Some((name, bytes.to_vec()));
            }
            Some("symbol") => {
                symbol = Some(field.text().await.map_err(malformed)?);
            }
            _ => {}
        }
    }

    let (filename, bytes) =
        file.ok_or_else(|| HubError::MalformedUpload("missing multipart field: file".to_string()))?;
    if !filename.to_ascii_lowercase().ends_with(".csv") {
        return Err(HubError::MalformedUpload(format!(
            "only .csv files are accepted (got {filename:?})"
        )));
    }

    let ticks = ohlc_csv::parse_upload(&bytes, symbol.as_deref()).map_err(|e| {
        tracing::warn!("upload {filename} rejected: {e}");
        e
    })?;
    let inserted = state.store.append(&ticks)?;

    let mut symbols: Vec<&str> = ticks.iter().map(|t| t.symbol.as_str()).collect();
    symbols.sort_unstable();
    symbols.dedup();
    tracing::info!("upload {filename}: {inserted} ticks for {}", symbols.join(","));

    Ok(Json(json!({
        "message": format!(
            "Imported {inserted} rows from {filename} for {}",
            symbols.join(", ")
        ),
    })))
}
