//! CSV import into the tick store and CSV export of chart rows.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use rustc_hash::FxHashMap;

use crate::analytics::pipeline::{bucket_timestamp, AnalysisReport, ChartRow};
use crate::analytics::Timeframe;
use crate::db::Tick;
use crate::error::HubError;

const TIMESTAMP_COLUMNS: &[&str] = &["timestamp", "time", "ts", "date", "datetime"];
const PRICE_COLUMNS: &[&str] = &["price", "close"];
const VOLUME_COLUMNS: &[&str] = &["volume", "qty", "quantity"];
const SYMBOL_COLUMNS: &[&str] = &["symbol", "instrument", "ticker"];
/// Columns of an export or an OHLC file that carry no tick data.
const IGNORED_COLUMNS: &[&str] = &["spread", "zscore", "mean", "rolling_corr", "open", "high", "low"];

/// Numeric timestamps at or above this are taken as epoch milliseconds.
const EPOCH_MS_THRESHOLD: f64 = 1e11;

/// How each data row maps onto ticks.
#[derive(Debug)]
enum Layout {
    /// One tick per row.
    Long {
        ts: usize,
        price: usize,
        volume: Option<usize>,
        symbol: Option<usize>,
    },
    /// One column group per instrument: `<SYM>` / `<SYM>_volume`.
    Wide {
        ts: usize,
        legs: Vec<WideLeg>,
    },
}

#[derive(Debug)]
struct WideLeg {
    symbol: String,
    price: usize,
    volume: Option<usize>,
}

fn find_column(headers: &StringRecord, names: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
}

fn strip_suffix_ci<'a>(header: &'a str, suffix: &str) -> Option<&'a str> {
    let cut = header.len().checked_sub(suffix.len())?;
    let (head, tail) = (header.get(..cut)?, header.get(cut..)?);
    (tail.eq_ignore_ascii_case(suffix) && !head.is_empty()).then_some(head)
}

fn detect_layout(headers: &StringRecord, has_default_symbol: bool) -> Result<Layout, HubError> {
    let ts = find_column(headers, TIMESTAMP_COLUMNS).ok_or_else(|| {
        HubError::MalformedUpload(format!(
            "missing timestamp column (expected one of: {})",
            TIMESTAMP_COLUMNS.join(", ")
        ))
    })?;

    if let Some(price) = find_column(headers, PRICE_COLUMNS) {
        let symbol = find_column(headers, SYMBOL_COLUMNS);
        if symbol.is_none() && !has_default_symbol {
            return Err(HubError::MalformedUpload(
                "file has no symbol column and no symbol was supplied with the upload".to_string(),
            ));
        }
        return Ok(Layout::Long {
            ts,
            price,
            volume: find_column(headers, VOLUME_COLUMNS),
            symbol,
        });
    }

    let mut legs: Vec<WideLeg> = Vec::new();
    let mut volumes: FxHashMap<String, usize> = FxHashMap::default();
    for (i, h) in headers.iter().enumerate() {
        if i == ts || h.is_empty() || IGNORED_COLUMNS.iter().any(|n| h.eq_ignore_ascii_case(n)) {
            continue;
        }
        if let Some(sym) = strip_suffix_ci(h, "_volume") {
            volumes.insert(sym.to_string(), i);
            continue;
        }
        let sym = strip_suffix_ci(h, "_price")
            .or_else(|| strip_suffix_ci(h, "_close"))
            .unwrap_or(h);
        if legs.iter().any(|l| l.symbol == sym) {
            return Err(HubError::MalformedUpload(format!(
                "duplicate price column for {sym}"
            )));
        }
        legs.push(WideLeg {
            symbol: sym.to_string(),
            price: i,
            volume: None,
        });
    }
    for leg in &mut legs {
        leg.volume = volumes.get(&leg.symbol).copied();
    }

    if legs.is_empty() {
        return Err(HubError::MalformedUpload(
            "no price column found (expected price/close, or <SYMBOL> columns)".to_string(),
        ));
    }
    Ok(Layout::Wide { ts, legs })
}

/// Parse a timestamp cell: RFC 3339, naive date-times (taken as UTC), dates,
/// or epoch seconds / milliseconds.
pub fn parse_timestamp_ms(raw: &str) -> Option<i64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }

    let datetime_formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y/%m/%d %H:%M:%S",
    ];
    for fmt in &datetime_formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.and_utc().timestamp_millis());
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp_millis());
    }

    let epoch: f64 = s.parse().ok()?;
    if !epoch.is_finite() || epoch < 0.0 {
        return None;
    }
    let ms = if epoch >= EPOCH_MS_THRESHOLD {
        epoch
    } else {
        epoch * 1000.0
    };
    (ms <= i64::MAX as f64).then(|| ms.round() as i64)
}

fn parse_price(cell: &str) -> Result<f64, String> {
    let v: f64 = cell
        .trim()
        .parse()
        .map_err(|_| format!("invalid price {cell:?}"))?;
    if !v.is_finite() || v <= 0.0 {
        return Err(format!("price must be a positive number (got {cell:?})"));
    }
    Ok(v)
}

fn parse_volume(cell: Option<&str>) -> Result<f64, String> {
    let Some(cell) = cell.map(str::trim).filter(|c| !c.is_empty()) else {
        return Ok(0.0);
    };
    let v: f64 = cell.parse().map_err(|_| format!("invalid volume {cell:?}"))?;
    if !v.is_finite() || v < 0.0 {
        return Err(format!("volume must be a non-negative number (got {cell:?})"));
    }
    Ok(v)
}

fn row_ticks(
    layout: &Layout,
    record: &StringRecord,
    default_symbol: Option<&str>,
) -> Result<Vec<Tick>, String> {
    let cell = |i: usize| record.get(i).unwrap_or("");
    let ts_col = match layout {
        Layout::Long { ts, .. } | Layout::Wide { ts, .. } => *ts,
    };
    let ts_ms = parse_timestamp_ms(cell(ts_col))
        .ok_or_else(|| format!("invalid timestamp {:?}", cell(ts_col)))?;

    match layout {
        Layout::Long {
            price,
            volume,
            symbol,
            ..
        } => {
            let symbol = match symbol {
                Some(i) => cell(*i).trim(),
                None => default_symbol.unwrap_or(""),
            };
            if symbol.is_empty() {
                return Err("empty symbol".to_string());
            }
            Ok(vec![Tick {
                symbol: symbol.to_string(),
                ts_ms,
                price: parse_price(cell(*price))?,
                qty: parse_volume(volume.map(|i| cell(i)))?,
            }])
        }
        Layout::Wide { legs, .. } => legs
            .iter()
            .filter(|leg| !cell(leg.price).trim().is_empty())
            .map(|leg| {
                Ok(Tick {
                    symbol: leg.symbol.clone(),
                    ts_ms,
                    price: parse_price(cell(leg.price)).map_err(|e| format!("{}: {e}", leg.symbol))?,
                    qty: parse_volume(leg.volume.map(|i| cell(i)))
                        .map_err(|e| format!("{}: {e}", leg.symbol))?,
                })
            })
            .collect(),
    }
}

/// Parse an uploaded file into ticks.  Any bad row rejects the whole file.
///
/// `default_symbol` names the instrument for long-layout files that carry
/// no symbol column.
pub fn parse_upload(bytes: &[u8], default_symbol: Option<&str>) -> Result<Vec<Tick>, HubError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| HubError::MalformedUpload(format!("file is not valid UTF-8: {e}")))?;
    let default_symbol = default_symbol.map(str::trim).filter(|s| !s.is_empty());

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| HubError::MalformedUpload(format!("unreadable header row: {e}")))?
        .clone();
    let layout = detect_layout(&headers, default_symbol.is_some())?;

    let mut ticks = Vec::new();
    let mut last_ts: FxHashMap<String, i64> = FxHashMap::default();
    for (idx, record) in reader.records().enumerate() {
        let line = idx + 2;
        let record = record.map_err(|e| HubError::MalformedUpload(format!("row {line}: {e}")))?;
        if record.iter().all(|c| c.is_empty()) {
            continue;
        }
        let row = row_ticks(&layout, &record, default_symbol)
            .map_err(|e| HubError::MalformedUpload(format!("row {line}: {e}")))?;

        for tick in row {
            if let Some(prev) = last_ts.get(&tick.symbol) {
                if tick.ts_ms < *prev {
                    return Err(HubError::MalformedUpload(format!(
                        "row {line}: timestamps for {} are out of order",
                        tick.symbol
                    )));
                }
            }
            last_ts.insert(tick.symbol.clone(), tick.ts_ms);
            ticks.push(tick);
        }
    }

    if ticks.is_empty() {
        return Err(HubError::MalformedUpload("file contains no data rows".to_string()));
    }
    Ok(ticks)
}

// ── Export ───────────────────────────────────────────────────────────────

pub fn export_filename(s1: &str, s2: &str, timeframe: Timeframe) -> String {
    format!("analytics_export_{s1}{s2}{timeframe}.csv")
}

fn opt_cell(v: Option<f64>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

fn row_record(row: &ChartRow) -> [String; 9] {
    [
        bucket_timestamp(row.bucket_start),
        row.price1.to_string(),
        row.volume1.to_string(),
        row.price2.to_string(),
        row.volume2.to_string(),
        opt_cell(row.spread),
        opt_cell(row.zscore),
        opt_cell(row.mean),
        opt_cell(row.rolling_corr),
    ]
}

/// Chart rows as CSV, in the same layout the importer accepts as wide.
pub fn write_report_csv(report: &AnalysisReport) -> Result<String, HubError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    let v1 = AnalysisReport::volume_column(&report.instrument1);
    let v2 = AnalysisReport::volume_column(&report.instrument2);
    writer.write_record([
        "timestamp",
        report.instrument1.as_str(),
        v1.as_str(),
        report.instrument2.as_str(),
        v2.as_str(),
        "spread",
        "zscore",
        "mean",
        "rolling_corr",
    ])?;
    for row in &report.rows {
        writer.write_record(row_record(row))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| HubError::Internal(format!("csv flush: {e}")))?;
    String::from_utf8(bytes).map_err(|e| HubError::Internal(format!("csv encoding: {e}")))
}
