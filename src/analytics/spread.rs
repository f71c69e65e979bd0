use serde::Serialize;

use super::regression::RegressionWindow;
use super::resample::AlignedRow;
use super::RollingSeries;

/// Spread and its rolling z-score at one aligned row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpreadRow {
    /// Index into the aligned rows.
    pub index: usize,
    pub bucket_start: i64,
    pub spread: Option<f64>,
    pub rolling_mean: Option<f64>,
    pub rolling_std: Option<f64>,
    pub zscore: Option<f64>,
}

/// Rolling mean / sample std / z-score of a spread stream.
#[derive(Debug, Clone)]
pub struct ZScore {
    series: RollingSeries,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ZScoreOutput {
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub zscore: Option<f64>,
}

impl ZScore {
    pub fn new(window: usize) -> Self {
        Self {
            series: RollingSeries::new(window),
        }
    }

    pub fn update(&mut self, spread: Option<f64>) -> ZScoreOutput {
        self.series.push(spread);
        let Some(stats) = self.series.stats() else {
            return ZScoreOutput::default();
        };
        let zscore = match (spread, stats.std) {
            (Some(s), Some(std)) => Some((s - stats.mean) / std).filter(|z| z.is_finite()),
            _ => None,
        };
        ZScoreOutput {
            mean: Some(stats.mean),
            std: stats.std,
            zscore,
        }
    }
}

/// Spread rows for every aligned row that has a regression window.
///
/// The rolling statistics use the same window as the regression, so the
/// first z-score appears `window` spread rows in.
pub fn spread_rows(
    rows: &[AlignedRow],
    regressions: &[RegressionWindow],
    window: usize,
) -> Vec<SpreadRow> {
    let mut z = ZScore::new(window);
    regressions
        .iter()
        .filter_map(|reg| {
            let row = rows.get(reg.index)?;
            let spread = reg.fit.map(|fit| fit.spread(row.price1, row.price2));
            let out = z.update(spread);
            Some(SpreadRow {
                index: reg.index,
                bucket_start: row.bucket_start,
                spread,
                rolling_mean: out.mean,
                rolling_std: out.std,
                zscore: out.zscore,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::regression::rolling_regression;
    use crate::analytics::RegressionType;

    fn flat_rows_with_spike(n: usize, spike_at: usize) -> Vec<AlignedRow> {
        (0..n)
            .map(|i| AlignedRow {
                bucket_start: i as i64 * 60_000,
                price1: if i == spike_at { 110.0 } else { 100.0 },
                volume1: 1.0,
                price2: 100.0,
                volume2: 1.0,
            })
            .collect()
    }

    #[test]
    fn zscore_of_window_mean_is_zero() {
        let mut z = ZScore::new(5);
        let mut last = ZScoreOutput::default();
        for s in [1.0, 3.0, 5.0, 7.0, 4.0] {
            last = z.update(Some(s));
        }
        assert!((last.mean.unwrap() - 4.0).abs() < 1e-12);
        assert!(last.std.unwrap() > 0.0);
        assert!(last.zscore.unwrap().abs() < 1e-12);
    }

    #[test]
    fn constant_spread_has_undefined_zscore() {
        let mut z = ZScore::new(3);
        let mut last = ZScoreOutput::default();
        for _ in 0..5 {
            last = z.update(Some(2.5));
        }
        assert_eq!(last.mean, Some(2.5));
        assert_eq!(last.std, None);
        assert_eq!(last.zscore, None);
    }

    #[test]
    fn undefined_spread_poisons_its_window_only() {
        let mut z = ZScore::new(3);
        z.update(Some(1.0));
        z.update(Some(2.0));
        let out = z.update(None);
        assert_eq!(out, ZScoreOutput::default());
        z.update(Some(4.0));
        z.update(Some(5.0));
        let out = z.update(Some(7.0));
        assert!(out.zscore.is_some());
    }

    #[test]
    fn spike_lifts_zscore_above_two_then_decays() {
        let w = 10;
        let spike = 30;
        let rows = flat_rows_with_spike(60, spike);
        let regs = rolling_regression(&rows, w, RegressionType::NoIntercept);
        let spreads = spread_rows(&rows, &regs, w);
        assert_eq!(spreads.len(), 60 - w + 1);

        let at = |i: usize| spreads.iter().find(|s| s.index == i).unwrap();

        // Flat before the spike: spread identically zero, z-score undefined.
        assert_eq!(at(spike - 1).spread, Some(0.0));
        assert_eq!(at(spike - 1).zscore, None);

        let z_spike = at(spike).zscore.unwrap();
        assert!(z_spike > 2.0, "z at spike = {z_spike}");

        for i in spike + 1..spike + w {
            let z = at(i).zscore.unwrap();
            assert!(z.abs() < z_spike, "z at {i} = {z}");
        }

        // Once the spike has left both windows the spread is flat again.
        for s in spreads.iter().filter(|s| s.index >= spike + 2 * w) {
            assert_eq!(s.zscore, None);
            assert!(s.spread.unwrap().abs() < 1e-9);
        }
    }

    #[test]
    fn undefined_fit_propagates_to_spread_and_zscore() {
        let rows: Vec<AlignedRow> = (0..8)
            .map(|i| AlignedRow {
                bucket_start: i,
                price1: 10.0 + i as f64,
                volume1: 0.0,
                price2: 5.0,
                volume2: 0.0,
            })
            .collect();
        let regs = rolling_regression(&rows, 3, RegressionType::WithIntercept);
        let spreads = spread_rows(&rows, &regs, 3);
        assert_eq!(spreads.len(), 6);
        assert!(spreads.iter().all(|s| s.spread.is_none() && s.zscore.is_none()));
    }
}
