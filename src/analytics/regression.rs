use serde::Serialize;

use super::resample::AlignedRow;
use super::{RegressionType, RollingPair};

/// Σx² below which a through-origin fit is undefined.
const RAW_SS_EPSILON: f64 = 1e-12;

/// Hedge coefficients for one window.  `intercept` is 0 in ratio mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HedgeFit {
    pub hedge_ratio: f64,
    pub intercept: f64,
}

impl HedgeFit {
    /// Residual of price1 against the fitted price2 leg.
    pub fn spread(&self, price1: f64, price2: f64) -> f64 {
        price1 - (self.intercept + self.hedge_ratio * price2)
    }
}

/// Result for the trailing window ending at aligned row `index`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegressionWindow {
    pub index: usize,
    /// `None` when the regressor is degenerate in-window.
    pub fit: Option<HedgeFit>,
    pub sample_count: usize,
}

/// Incremental hedge-ratio regression of y (instrument 1) on x (instrument 2).
#[derive(Debug, Clone)]
pub struct RollingRegression {
    pair: RollingPair,
    mode: RegressionType,
}

impl RollingRegression {
    pub fn new(window: usize, mode: RegressionType) -> Self {
        Self {
            pair: RollingPair::new(window),
            mode,
        }
    }

    /// Feed one aligned observation; returns the window fit once the window
    /// is full (`Some(None)` for a degenerate window).
    pub fn update(&mut self, x: f64, y: f64) -> Option<Option<HedgeFit>> {
        self.pair.push(x, y);
        if !self.pair.full() {
            return None;
        }
        let m = self.pair.moments();
        let fit = match self.mode {
            RegressionType::NoIntercept => (m.raw_xx > RAW_SS_EPSILON).then(|| HedgeFit {
                hedge_ratio: m.raw_xy / m.raw_xx,
                intercept: 0.0,
            }),
            RegressionType::WithIntercept => (!m.x_degenerate()).then(|| {
                let slope = m.sxy / m.sxx;
                HedgeFit {
                    hedge_ratio: slope,
                    intercept: m.mean_y - slope * m.mean_x,
                }
            }),
        };
        Some(fit)
    }

    pub fn sample_count(&self) -> usize {
        self.pair.len()
    }
}

/// Rolling hedge ratios over aligned rows: one entry per index `i ≥ window-1`.
pub fn rolling_regression(
    rows: &[AlignedRow],
    window: usize,
    mode: RegressionType,
) -> Vec<RegressionWindow> {
    let mut reg = RollingRegression::new(window, mode);
    rows.iter()
        .enumerate()
        .filter_map(|(index, row)| {
            reg.update(row.price2, row.price1).map(|fit| RegressionWindow {
                index,
                fit,
                sample_count: reg.sample_count(),
            })
        })
        .collect()
}
