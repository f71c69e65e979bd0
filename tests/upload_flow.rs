use pairs_hub::analytics::cache::StationarityCache;
use pairs_hub::analytics::pipeline::{analyze, AnalysisReport, AnalysisRequest, ChartRow};
use pairs_hub::analytics::{RegressionType, Timeframe};
use pairs_hub::config::AnalysisSettings;
use pairs_hub::db::TickStore;
use pairs_hub::error::HubError;
use pairs_hub::ohlc_csv::{parse_upload, write_report_csv};

fn long_csv(symbol: &str, rows: usize, base: f64) -> String {
    long_csv_skipping(symbol, rows, base, &[])
}

/// Minute bars with the listed minutes left out.
fn long_csv_skipping(symbol: &str, rows: usize, base: f64, skip: &[usize]) -> String {
    let mut body = String::from("timestamp,symbol,price,volume\n");
    for i in (0..rows).filter(|i| !skip.contains(i)) {
        let price = base + (i as f64 * 0.3).sin() + i as f64 * 0.05;
        body.push_str(&format!("{},{symbol},{price},1.5\n", 1_704_067_200 + i as i64 * 60));
    }
    body
}

fn request() -> AnalysisRequest {
    AnalysisRequest {
        instrument1: "AAA".to_string(),
        instrument2: "BBB".to_string(),
        timeframe: Timeframe::OneMinute,
        window: 10,
        regression_type: RegressionType::WithIntercept,
        run_stationarity_test: false,
    }
}

#[test]
fn rejected_upload_leaves_store_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let store = TickStore::open(&dir.path().join("ticks.db"), 1).unwrap();
    store
        .append(&parse_upload(long_csv("AAA", 10, 100.0).as_bytes(), None).unwrap())
        .unwrap();
    assert_eq!(store.count().unwrap(), 10);

    let mut body = long_csv("BBB", 10, 50.0);
    body.push_str("1704067200,BBB,51.0,1.0\n");
    let err = parse_upload(body.as_bytes(), None).unwrap_err();
    assert!(matches!(err, HubError::MalformedUpload(_)));
    assert!(err.detail().contains("out of order"));

    assert_eq!(store.count().unwrap(), 10);
    assert_eq!(store.symbols().unwrap(), vec!["AAA".to_string()]);
}

fn same(a: Option<f64>, b: Option<f64>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => (a - b).abs() <= 1e-9 * a.abs().max(1.0),
        _ => false,
    }
}

fn assert_rows_match(orig: &[ChartRow], again: &[ChartRow]) {
    assert_eq!(orig.len(), again.len());
    for (i, (a, b)) in orig.iter().zip(again).enumerate() {
        assert_eq!(a.bucket_start, b.bucket_start, "row {i}");
        assert_eq!(a.price1, b.price1, "row {i}");
        assert_eq!(a.volume1, b.volume1, "row {i}");
        assert_eq!(a.price2, b.price2, "row {i}");
        assert_eq!(a.volume2, b.volume2, "row {i}");
        assert!(same(a.spread, b.spread), "row {i} spread: {:?} vs {:?}", a.spread, b.spread);
        assert!(same(a.zscore, b.zscore), "row {i} zscore: {:?} vs {:?}", a.zscore, b.zscore);
        assert!(same(a.mean, b.mean), "row {i} mean: {:?} vs {:?}", a.mean, b.mean);
        assert!(
            same(a.rolling_corr, b.rolling_corr),
            "row {i} rolling_corr: {:?} vs {:?}",
            a.rolling_corr,
            b.rolling_corr
        );
    }
}

/// Derived cells of the export read back as the values they were written from.
fn assert_export_cells(report: &AnalysisReport, exported: &str) {
    let mut reader = csv::ReaderBuilder::new().from_reader(exported.as_bytes());
    let headers = reader.headers().unwrap().clone();
    assert_eq!(
        headers.iter().collect::<Vec<_>>(),
        ["timestamp", "AAA", "AAA_volume", "BBB", "BBB_volume", "spread", "zscore", "mean", "rolling_corr"]
    );

    let cell = |raw: &str| (!raw.is_empty()).then(|| raw.parse::<f64>().unwrap());
    let records: Vec<_> = reader.records().map(Result::unwrap).collect();
    assert_eq!(records.len(), report.rows.len());
    for (row, rec) in report.rows.iter().zip(&records) {
        assert_eq!(cell(&rec[5]), row.spread);
        assert_eq!(cell(&rec[6]), row.zscore);
        assert_eq!(cell(&rec[7]), row.mean);
        assert_eq!(cell(&rec[8]), row.rolling_corr);
    }
}

#[tokio::test]
async fn exported_pair_reimports_into_fresh_store_with_identical_analysis() {
    let settings = AnalysisSettings::default();
    let dir = tempfile::tempdir().unwrap();

    let store = TickStore::open(&dir.path().join("ticks.db"), 2).unwrap();
    let aaa = parse_upload(long_csv("AAA", 60, 100.0).as_bytes(), None).unwrap();
    let bbb_skip = [7, 8, 21, 22, 23, 40];
    let bbb = parse_upload(long_csv_skipping("BBB", 60, 50.0, &bbb_skip).as_bytes(), None).unwrap();
    assert_eq!(store.append(&aaa).unwrap(), 60);
    assert_eq!(store.append(&bbb).unwrap(), 60 - bbb_skip.len());

    let report = analyze(&store, &StationarityCache::new(), &settings, &request())
        .await
        .unwrap();
    assert_eq!(report.rows.len(), 60);
    assert_eq!(report.rows[7].volume2, 0.0);
    assert_eq!(report.rows[7].price2, report.rows[6].price2);
    assert!(report.rows[..9].iter().all(|r| r.spread.is_none()));
    assert!(report.rows.iter().any(|r| r.zscore.is_some()));
    assert!(report.rows.iter().any(|r| r.rolling_corr.is_some()));

    let exported = write_report_csv(&report).unwrap();
    assert_export_cells(&report, &exported);

    let fresh = TickStore::open(&dir.path().join("reimported.db"), 2).unwrap();
    let ticks = parse_upload(exported.as_bytes(), None).unwrap();
    assert_eq!(ticks.len(), 120);
    assert_eq!(fresh.append(&ticks).unwrap(), 120);
    assert_eq!(fresh.symbols().unwrap(), vec!["AAA".to_string(), "BBB".to_string()]);

    let again = analyze(&fresh, &StationarityCache::new(), &settings, &request())
        .await
        .unwrap();
    assert_rows_match(&report.rows, &again.rows);
    assert_eq!(again.metrics.data_points, report.metrics.data_points);
    assert_eq!(again.metrics.hedge_ratio, report.metrics.hedge_ratio);
    assert_eq!(again.metrics.latest_spread, report.metrics.latest_spread);
}
