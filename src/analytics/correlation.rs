use serde::Serialize;

use super::resample::AlignedRow;
use super::RollingPair;

/// Pearson correlation of the trailing window ending at `index`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CorrelationRow {
    pub index: usize,
    pub bucket_start: i64,
    /// `None` when either leg is flat in-window.
    pub rolling_corr: Option<f64>,
}

/// Rolling Pearson correlation from sums of `x, y, x², y², xy`.
#[derive(Debug, Clone)]
pub struct RollingCorrelation {
    pair: RollingPair,
}

impl RollingCorrelation {
    pub fn new(window: usize) -> Self {
        Self {
            pair: RollingPair::new(window),
        }
    }

    /// `None` until the window is full; `Some(None)` for a flat leg.
    pub fn update(&mut self, x: f64, y: f64) -> Option<Option<f64>> {
        self.pair.push(x, y);
        if !self.pair.full() {
            return None;
        }
        let m = self.pair.moments();
        if m.x_degenerate() || m.y_degenerate() {
            return Some(None);
        }
        let r = m.sxy / (m.sxx.sqrt() * m.syy.sqrt());
        Some(r.is_finite().then(|| r.clamp(-1.0, 1.0)))
    }
}

pub fn rolling_correlation(rows: &[AlignedRow], window: usize) -> Vec<CorrelationRow> {
    let mut corr = RollingCorrelation::new(window);
    rows.iter()
        .enumerate()
        .filter_map(|(index, row)| {
            corr.update(row.price1, row.price2).map(|rolling_corr| CorrelationRow {
                index,
                bucket_start: row.bucket_start,
                rolling_corr,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(p1: &[f64], p2: &[f64]) -> Vec<AlignedRow> {
        p1.iter()
            .zip(p2)
            .enumerate()
            .map(|(i, (a, b))| AlignedRow {
                bucket_start: i as i64,
                price1: *a,
                volume1: 0.0,
                price2: *b,
                volume2: 0.0,
            })
            .collect()
    }

    #[test]
    fn correlation_is_symmetric() {
        let a: Vec<f64> = (0..50).map(|i| 100.0 + (i as f64 * 0.37).sin() * 4.0).collect();
        let b: Vec<f64> = (0..50).map(|i| 20.0 + (i as f64 * 0.11).cos() + i as f64 * 0.05).collect();
        let ab = rolling_correlation(&rows(&a, &b), 7);
        let ba = rolling_correlation(&rows(&b, &a), 7);
        assert_eq!(ab.len(), 44);
        for (x, y) in ab.iter().zip(&ba) {
            let (x, y) = (x.rolling_corr.unwrap(), y.rolling_corr.unwrap());
            assert!((x - y).abs() < 1e-12);
            assert!((-1.0..=1.0).contains(&x));
        }
    }

    #[test]
    fn perfectly_linear_legs_correlate_at_plus_minus_one() {
        let a: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let up: Vec<f64> = a.iter().map(|v| 2.0 * v + 1.0).collect();
        let down: Vec<f64> = a.iter().map(|v| 50.0 - v).collect();

        for row in rolling_correlation(&rows(&a, &up), 4) {
            assert!((row.rolling_corr.unwrap() - 1.0).abs() < 1e-12);
        }
        for row in rolling_correlation(&rows(&a, &down), 4) {
            assert!((row.rolling_corr.unwrap() + 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn flat_leg_is_undefined_and_short_input_is_empty() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let flat = [9.0; 4];
        let out = rolling_correlation(&rows(&a, &flat), 3);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|r| r.rolling_corr.is_none()));

        assert!(rolling_correlation(&rows(&a[..2], &flat[..2]), 3).is_empty());
    }
}
