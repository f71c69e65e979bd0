//! Augmented Dickey-Fuller test with a constant term.
//!
//! The auxiliary regression is
//! `Δy_t = α + γ·y_{t-1} + Σ_{i=1..p} β_i·Δy_{t-i} + ε_t`; the statistic is the
//! t-value of `γ`.  The lag order `p` is chosen by AIC over a common sample,
//! bounded by the Schwert rule, half the sample, and an optional cap.  The
//! p-value uses MacKinnon's (1994) response surface for one variable.

use serde::Serialize;
use statrs::distribution::{ContinuousCDF, Normal};
use std::fmt;

/// Fewest spread observations the test will run on.
pub const MIN_OBSERVATIONS: usize = 10;
/// p-value below which the spread is reported as stationary.
pub const SIGNIFICANCE: f64 = 0.05;

const PIVOT_REL: f64 = 1e-10;
const SSR_FLOOR: f64 = 1e-300;

// MacKinnon (1994) constant-only surface, N = 1.
const TAU_MAX: f64 = 2.74;
const TAU_MIN: f64 = -18.83;
const TAU_STAR: f64 = -1.61;
const TAU_SMALL_P: [f64; 3] = [2.1659, 1.4412, 0.038269];
const TAU_LARGE_P: [f64; 4] = [1.7339, 0.93202, -0.12745, -0.010368];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AdfOutcome {
    pub statistic: f64,
    pub p_value: f64,
    pub used_lag: usize,
    /// Observations in the final regression.
    pub nobs: usize,
    /// Length of the tested series.
    pub sample_count: usize,
}

impl AdfOutcome {
    pub fn is_stationary(&self) -> bool {
        self.p_value < SIGNIFICANCE
    }
}

/// Why the test did not produce a statistic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdfRefusal {
    InsufficientData { have: usize, need: usize },
    Degenerate(&'static str),
}

impl fmt::Display for AdfRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientData { have, need } => {
                write!(f, "insufficient data: {have} observations, need {need}")
            }
            Self::Degenerate(why) => write!(f, "degenerate series: {why}"),
        }
    }
}

/// Largest lag order considered for a series of length `n`.
pub fn max_lag(n: usize, cap: Option<usize>) -> usize {
    let schwert = (12.0 * (n as f64 / 100.0).powf(0.25)).ceil() as usize;
    let sample_bound = (n / 2).saturating_sub(2);
    let lag = schwert.min(sample_bound);
    cap.map_or(lag, |c| lag.min(c))
}

pub fn adf_test(series: &[f64], lag_cap: Option<usize>) -> Result<AdfOutcome, AdfRefusal> {
    let n = series.len();
    if n < MIN_OBSERVATIONS {
        return Err(AdfRefusal::InsufficientData {
            have: n,
            need: MIN_OBSERVATIONS,
        });
    }
    if series.iter().any(|v| !v.is_finite()) {
        return Err(AdfRefusal::Degenerate("non-finite value in series"));
    }

    let diff: Vec<f64> = series.windows(2).map(|w| w[1] - w[0]).collect();
    let maxlag = max_lag(n, lag_cap);

    // AIC search on the sample shared by every candidate lag.
    let mut best: Option<(usize, f64)> = None;
    for lag in 0..=maxlag {
        let (x, y) = design(series, &diff, lag, maxlag);
        let Some(fit) = ols(&x, &y) else { continue };
        let aic = fit.aic();
        if best.map_or(true, |(_, b)| aic < b) {
            best = Some((lag, aic));
        }
    }
    let Some((used_lag, _)) = best else {
        return Err(AdfRefusal::Degenerate("singular regression for every lag order"));
    };

    let (x, y) = design(series, &diff, used_lag, used_lag);
    let fit = ols(&x, &y).ok_or(AdfRefusal::Degenerate("singular final regression"))?;
    let statistic = fit
        .t_value(0)
        .ok_or(AdfRefusal::Degenerate("no residual degrees of freedom"))?;
    if !statistic.is_finite() {
        return Err(AdfRefusal::Degenerate("non-finite test statistic"));
    }

    Ok(AdfOutcome {
        statistic,
        p_value: mackinnon_p_value(statistic),
        used_lag,
        nobs: y.len(),
        sample_count: n,
    })
}

/// Rows for `Δy_t` on `[y_{t-1}, Δy_{t-1}..Δy_{t-lag}, 1]`, starting at
/// difference index `trim` so all candidate lags share one sample.
/// The level column is centered on its sample mean; the constant absorbs
/// the offset.
fn design(series: &[f64], diff: &[f64], lag: usize, trim: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
    let rows = diff.len().saturating_sub(trim);
    let level_mean = if rows > 0 {
        series[trim..diff.len()].iter().sum::<f64>() / rows as f64
    } else {
        0.0
    };
    let mut x = Vec::with_capacity(rows);
    let mut y = Vec::with_capacity(rows);
    for j in trim..diff.len() {
        let mut row = Vec::with_capacity(lag + 2);
        row.push(series[j] - level_mean);
        row.extend((1..=lag).map(|i| diff[j - i]));
        row.push(1.0);
        x.push(row);
        y.push(diff[j]);
    }
    (x, y)
}

struct OlsFit {
    beta: Vec<f64>,
    ssr: f64,
    xtx_inv_diag: Vec<f64>,
    nobs: usize,
}

impl OlsFit {
    fn aic(&self) -> f64 {
        let n = self.nobs as f64;
        let llf = -0.5 * n * ((2.0 * std::f64::consts::PI).ln() + (self.ssr / n).ln() + 1.0);
        -2.0 * llf + 2.0 * self.beta.len() as f64
    }

    fn t_value(&self, i: usize) -> Option<f64> {
        let df = self.nobs.checked_sub(self.beta.len()).filter(|d| *d > 0)?;
        let sigma2 = self.ssr / df as f64;
        let se = (sigma2 * self.xtx_inv_diag[i]).sqrt();
        (se > 0.0).then(|| self.beta[i] / se)
    }
}

/// Least squares via the normal equations on unit-norm columns; `None` for
/// rank-deficient or perfectly fitting designs.
fn ols(x: &[Vec<f64>], y: &[f64]) -> Option<OlsFit> {
    let k = x.first()?.len();
    if x.len() <= k {
        return None;
    }

    let mut xtx = vec![vec![0.0; k]; k];
    let mut xty = vec![0.0; k];
    for (row, &yi) in x.iter().zip(y) {
        for a in 0..k {
            xty[a] += row[a] * yi;
            for b in a..k {
                xtx[a][b] += row[a] * row[b];
            }
        }
    }
    for a in 0..k {
        for b in 0..a {
            xtx[a][b] = xtx[b][a];
        }
    }

    // Equilibrate so the pivot tolerance compares like with like.
    let norms: Vec<f64> = (0..k).map(|a| xtx[a][a].sqrt()).collect();
    if norms.iter().any(|n| !(*n > 0.0) || !n.is_finite()) {
        return None;
    }
    for a in 0..k {
        xty[a] /= norms[a];
        for b in 0..k {
            xtx[a][b] /= norms[a] * norms[b];
        }
    }

    let inv = invert(xtx)?;
    let beta: Vec<f64> = inv
        .iter()
        .zip(&norms)
        .map(|(r, n)| r.iter().zip(&xty).map(|(a, b)| a * b).sum::<f64>() / n)
        .collect();

    let ssr: f64 = x
        .iter()
        .zip(y)
        .map(|(row, &yi)| {
            let fitted: f64 = row.iter().zip(&beta).map(|(a, b)| a * b).sum();
            (yi - fitted).powi(2)
        })
        .sum();
    if !(ssr > SSR_FLOOR) || !ssr.is_finite() {
        return None;
    }

    Some(OlsFit {
        xtx_inv_diag: (0..k).map(|i| inv[i][i] / (norms[i] * norms[i])).collect(),
        beta,
        ssr,
        nobs: x.len(),
    })
}

/// Gauss-Jordan inverse with partial pivoting.
fn invert(mut a: Vec<Vec<f64>>) -> Option<Vec<Vec<f64>>> {
    let k = a.len();
    let scale = (0..k).map(|i| a[i][i].abs()).fold(0.0, f64::max);
    if !(scale > 0.0) {
        return None;
    }
    let mut inv: Vec<Vec<f64>> = (0..k)
        .map(|i| (0..k).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();

    for col in 0..k {
        let pivot_row = (col..k).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot_row][col].abs() <= PIVOT_REL * scale {
            return None;
        }
        a.swap(col, pivot_row);
        inv.swap(col, pivot_row);

        let p = a[col][col];
        for c in 0..k {
            a[col][c] /= p;
            inv[col][c] /= p;
        }
        let pivot_a = a[col].clone();
        let pivot_inv = inv[col].clone();
        for r in 0..k {
            if r == col {
                continue;
            }
            let f = a[r][col];
            if f == 0.0 {
                continue;
            }
            for c in 0..k {
                a[r][c] -= f * pivot_a[c];
                inv[r][c] -= f * pivot_inv[c];
            }
        }
    }
    Some(inv)
}

/// Approximate p-value of a Dickey-Fuller statistic (constant, one series).
pub fn mackinnon_p_value(statistic: f64) -> f64 {
    if statistic > TAU_MAX {
        return 1.0;
    }
    if statistic < TAU_MIN {
        return 0.0;
    }
    let coef: &[f64] = if statistic <= TAU_STAR {
        &TAU_SMALL_P
    } else {
        &TAU_LARGE_P
    };
    let z = coef.iter().rev().fold(0.0, |acc, c| acc * statistic + c);
    Normal::new(0.0, 1.0).map_or(f64::NAN, |n| n.cdf(z))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lcg(seed: &mut u64) -> f64 {
        *seed = seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((*seed >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
    }

    #[test]
    fn refuses_short_series() {
        let err = adf_test(&[1.0, 2.0, 1.5, 1.7, 1.2, 1.9, 1.4, 1.6, 1.1], None).unwrap_err();
        assert_eq!(err, AdfRefusal::InsufficientData { have: 9, need: 10 });
    }

    #[test]
    fn constant_series_is_degenerate() {
        let err = adf_test(&[3.0; 40], None).unwrap_err();
        assert!(matches!(err, AdfRefusal::Degenerate(_)));
    }

    #[test]
    fn mean_reverting_series_is_stationary() {
        let mut seed = 7;
        let mut x = vec![0.0];
        for _ in 1..200 {
            let prev = *x.last().unwrap();
            x.push(0.3 * prev + lcg(&mut seed));
        }
        let out = adf_test(&x, None).unwrap();
        assert!(out.statistic < -5.0, "stat = {}", out.statistic);
        assert!(out.p_value < 0.01);
        assert!(out.is_stationary());
        assert_eq!(out.sample_count, 200);
        assert_eq!(out.nobs, 199 - out.used_lag);
    }

    #[test]
    fn statistic_ignores_offset_of_series() {
        let mut seed = 19;
        let mut base = vec![0.0];
        for _ in 1..200 {
            let prev = *base.last().unwrap();
            base.push(0.3 * prev + lcg(&mut seed));
        }
        let small: Vec<f64> = base.iter().map(|v| 0.01 * v).collect();
        let reference = adf_test(&small, None).unwrap();
        assert!(reference.is_stationary());

        for level in [10.0, 100.0, 1_000.0, 50_000.0] {
            let shifted: Vec<f64> = small.iter().map(|v| level + v).collect();
            let out = adf_test(&shifted, None).unwrap();
            assert_eq!(out.used_lag, reference.used_lag, "level {level}");
            assert!(
                (out.statistic - reference.statistic).abs() < 1e-6 * reference.statistic.abs(),
                "level {level}: {} vs {}",
                out.statistic,
                reference.statistic
            );
        }
    }

    #[test]
    fn explosive_series_is_not_stationary() {
        let mut seed = 11;
        let x: Vec<f64> = (0..120)
            .map(|t| 100.0 * 1.02_f64.powi(t) + 0.5 * lcg(&mut seed))
            .collect();
        let out = adf_test(&x, Some(0)).unwrap();
        assert_eq!(out.used_lag, 0);
        assert!(out.statistic > 0.0);
        assert!(out.p_value > 0.9);
        assert!(!out.is_stationary());
    }

    #[test]
    fn lag_search_respects_bounds() {
        assert_eq!(max_lag(10, None), 3);
        assert_eq!(max_lag(100, None), 12);
        assert_eq!(max_lag(100, Some(4)), 4);

        let mut seed = 3;
        let x: Vec<f64> = (0..80).map(|_| lcg(&mut seed)).collect();
        let out = adf_test(&x, Some(2)).unwrap();
        assert!(out.used_lag <= 2);
    }

    #[test]
    fn mackinnon_surface_matches_reference_points() {
        // 5% critical value for the constant-only case is about -2.86.
        assert!((mackinnon_p_value(-2.86) - 0.05).abs() < 0.003);
        assert_eq!(mackinnon_p_value(3.0), 1.0);
        assert_eq!(mackinnon_p_value(-20.0), 0.0);

        let mut prev = 0.0;
        for i in -60..=25 {
            let p = mackinnon_p_value(i as f64 * 0.1);
            assert!(p >= prev - 1e-9, "p-value not monotone at {}", i as f64 * 0.1);
            prev = p;
        }
    }
}
