pub mod cache;
pub mod correlation;
pub mod pipeline;
pub mod regression;
pub mod resample;
pub mod spread;
pub mod stationarity;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::HubError;

/// Smallest accepted rolling window.
pub const MIN_WINDOW: usize = 3;

/// Relative variance below which a windowed series counts as constant.
const DEGENERATE_REL: f64 = 1e-20;
/// Relative variance below which incremental sums are re-checked exactly.
const RECHECK_REL: f64 = 1e-8;

// ── Request enums ────────────────────────────────────────────────────────

/// Bar width accepted by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1S")]
    OneSecond,
    #[serde(rename = "1T")]
    OneMinute,
    #[serde(rename = "5T")]
    FiveMinutes,
}

impl Timeframe {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneSecond => "1S",
            Self::OneMinute => "1T",
            Self::FiveMinutes => "5T",
        }
    }

    pub fn seconds(self) -> i64 {
        match self {
            Self::OneSecond => 1,
            Self::OneMinute => 60,
            Self::FiveMinutes => 300,
        }
    }

    pub fn millis(self) -> i64 {
        self.seconds() * 1000
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = HubError;

    /// Accepts `1S`, `1T`, `5T` (case-insensitive); a trailing description
    /// such as `"1T (1 minute)"` is ignored.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let token = raw.split_whitespace().next().unwrap_or("").to_ascii_uppercase();
        match token.as_str() {
            "1S" => Ok(Self::OneSecond),
            "1T" => Ok(Self::OneMinute),
            "5T" => Ok(Self::FiveMinutes),
            _ => Err(HubError::InvalidRequest(format!(
                "unsupported timeframe: {raw:?} (expected 1S, 1T or 5T)"
            ))),
        }
    }
}

/// Hedge-ratio regression mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegressionType {
    /// OLS of price1 on price2 with a constant term.
    #[serde(rename = "OLS_I")]
    WithIntercept,
    /// Least squares through the origin (price ratio).
    #[serde(rename = "OLS_NOI")]
    NoIntercept,
}

impl RegressionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WithIntercept => "OLS_I",
            Self::NoIntercept => "OLS_NOI",
        }
    }
}

impl fmt::Display for RegressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegressionType {
    type Err = HubError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "OLS_I" => Ok(Self::WithIntercept),
            "OLS_NOI" => Ok(Self::NoIntercept),
            _ => Err(HubError::InvalidRequest(format!(
                "unsupported regression_type: {raw:?} (expected OLS_I or OLS_NOI)"
            ))),
        }
    }
}

// ── Rolling windows ──────────────────────────────────────────────────────

/// Fixed-capacity ring buffer; `push` hands back the evicted value once full.
#[derive(Debug, Clone)]
pub struct RingBuf<T> {
    buf: Vec<T>,
    pos: usize,
    len: usize,
    cap: usize,
}

impl<T: Copy + Default> RingBuf<T> {
    pub fn new(capacity: usize) -> Self {
        let cap = capacity.max(1);
        Self {
            buf: vec![T::default(); cap],
            pos: 0,
            len: 0,
            cap,
        }
    }

    pub fn push(&mut self, val: T) -> Option<T> {
        let evicted = if self.len == self.cap {
            Some(self.buf[self.pos])
        } else {
            self.len += 1;
            None
        };
        self.buf[self.pos] = val;
        self.pos = (self.pos + 1) % self.cap;
        evicted
    }

    pub fn full(&self) -> bool {
        self.len == self.cap
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Iterate over values in insertion order (oldest first).
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        let start = if self.len < self.cap { 0 } else { self.pos };
        (0..self.len).map(move |i| self.buf[(start + i) % self.cap])
    }
}

/// Centered second moments of a window of `(x, y)` pairs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairMoments {
    pub n: f64,
    pub mean_x: f64,
    pub mean_y: f64,
    /// Σ(x − x̄)²
    pub sxx: f64,
    /// Σ(y − ȳ)²
    pub syy: f64,
    /// Σ(x − x̄)(y − ȳ)
    pub sxy: f64,
    /// Σx² about the origin.
    pub raw_xx: f64,
    /// Σxy about the origin.
    pub raw_xy: f64,
}

impl PairMoments {
    fn needs_recheck(&self) -> bool {
        near_zero(self.sxx, self.n, self.mean_x, RECHECK_REL)
            || near_zero(self.syy, self.n, self.mean_y, RECHECK_REL)
    }

    pub fn x_degenerate(&self) -> bool {
        near_zero(self.sxx, self.n, self.mean_x, DEGENERATE_REL)
    }

    pub fn y_degenerate(&self) -> bool {
        near_zero(self.syy, self.n, self.mean_y, DEGENERATE_REL)
    }
}

fn near_zero(centered_ss: f64, n: f64, mean: f64, rel: f64) -> bool {
    n <= 0.0 || centered_ss / n <= rel * (mean * mean + 1.0)
}

/// Rolling sums of `x, y, x², y², xy` over a trailing window.
///
/// Sums are kept on values shifted by the first observation, updated in O(1)
/// per push and re-summed exactly every `window` evictions.  When a centered
/// moment gets close to zero the moments are recomputed from the buffer so
/// round-off residue never masquerades as variance.
#[derive(Debug, Clone)]
pub struct RollingPair {
    ring: RingBuf<(f64, f64)>,
    shift: Option<(f64, f64)>,
    sx: f64,
    sy: f64,
    sxx: f64,
    syy: f64,
    sxy: f64,
    evictions: usize,
}

impl RollingPair {
    pub fn new(window: usize) -> Self {
        Self {
            ring: RingBuf::new(window),
            shift: None,
            sx: 0.0,
            sy: 0.0,
            sxx: 0.0,
            syy: 0.0,
            sxy: 0.0,
            evictions: 0,
        }
    }

    pub fn push(&mut self, x: f64, y: f64) {
        let (kx, ky) = *self.shift.get_or_insert((x, y));
        if let Some((ox, oy)) = self.ring.push((x, y)) {
            let (dx, dy) = (ox - kx, oy - ky);
            self.sx -= dx;
            self.sy -= dy;
            self.sxx -= dx * dx;
            self.syy -= dy * dy;
            self.sxy -= dx * dy;
            self.evictions += 1;
        }
        let (dx, dy) = (x - kx, y - ky);
        self.sx += dx;
        self.sy += dy;
        self.sxx += dx * dx;
        self.syy += dy * dy;
        self.sxy += dx * dy;

        if self.evictions > 0 && self.evictions % self.ring.capacity() == 0 {
            self.resum();
        }
    }

    pub fn full(&self) -> bool {
        self.ring.full()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    fn resum(&mut self) {
        let (kx, ky) = self.shift.unwrap_or((0.0, 0.0));
        self.sx = 0.0;
        self.sy = 0.0;
        self.sxx = 0.0;
        self.syy = 0.0;
        self.sxy = 0.0;
        for (x, y) in self.ring.iter() {
            let (dx, dy) = (x - kx, y - ky);
            self.sx += dx;
            self.sy += dy;
            self.sxx += dx * dx;
            self.syy += dy * dy;
            self.sxy += dx * dy;
        }
    }

    pub fn moments(&self) -> PairMoments {
        let m = self.incremental_moments();
        if m.needs_recheck() {
            self.exact_moments()
        } else {
            m
        }
    }

    fn incremental_moments(&self) -> PairMoments {
        let n = self.ring.len() as f64;
        let (kx, ky) = self.shift.unwrap_or((0.0, 0.0));
        if n == 0.0 {
            return PairMoments {
                n,
                mean_x: 0.0,
                mean_y: 0.0,
                sxx: 0.0,
                syy: 0.0,
                sxy: 0.0,
                raw_xx: 0.0,
                raw_xy: 0.0,
            };
        }
        PairMoments {
            n,
            mean_x: kx + self.sx / n,
            mean_y: ky + self.sy / n,
            sxx: (self.sxx - self.sx * self.sx / n).max(0.0),
            syy: (self.syy - self.sy * self.sy / n).max(0.0),
            sxy: self.sxy - self.sx * self.sy / n,
            raw_xx: self.sxx + 2.0 * kx * self.sx + n * kx * kx,
            raw_xy: self.sxy + kx * self.sy + ky * self.sx + n * kx * ky,
        }
    }

    /// Two-pass moments straight from the buffer.
    fn exact_moments(&self) -> PairMoments {
        let n = self.ring.len() as f64;
        if n == 0.0 {
            return self.incremental_moments();
        }
        let (mut sum_x, mut sum_y) = (0.0, 0.0);
        for (x, y) in self.ring.iter() {
            sum_x += x;
            sum_y += y;
        }
        let (mean_x, mean_y) = (sum_x / n, sum_y / n);
        let (mut sxx, mut syy, mut sxy, mut raw_xx, mut raw_xy) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for (x, y) in self.ring.iter() {
            let (dx, dy) = (x - mean_x, y - mean_y);
            sxx += dx * dx;
            syy += dy * dy;
            sxy += dx * dy;
            raw_xx += x * x;
            raw_xy += x * y;
        }
        PairMoments {
            n,
            mean_x,
            mean_y,
            sxx,
            syy,
            sxy,
            raw_xx,
            raw_xy,
        }
    }
}

/// Mean and sample standard deviation of a full window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub mean: f64,
    /// `None` when the window is constant.
    pub std: Option<f64>,
}

/// Rolling mean / sample std over a series that may contain undefined values.
///
/// Stats exist only while the window is full and every value in it is
/// defined.
#[derive(Debug, Clone)]
pub struct RollingSeries {
    ring: RingBuf<Option<f64>>,
    missing: usize,
    shift: Option<f64>,
    sum: f64,
    sum_sq: f64,
    evictions: usize,
}

impl RollingSeries {
    pub fn new(window: usize) -> Self {
        Self {
            ring: RingBuf::new(window),
            missing: 0,
            shift: None,
            sum: 0.0,
            sum_sq: 0.0,
            evictions: 0,
        }
    }

    pub fn push(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.shift.get_or_insert(v);
        }
        let k = self.shift.unwrap_or(0.0);

        match self.ring.push(value) {
            Some(Some(old)) => {
                self.sum -= old - k;
                self.sum_sq -= (old - k) * (old - k);
                self.evictions += 1;
            }
            Some(None) => {
                self.missing -= 1;
                self.evictions += 1;
            }
            None => {}
        }
        match value {
            Some(v) => {
                self.sum += v - k;
                self.sum_sq += (v - k) * (v - k);
            }
            None => self.missing += 1,
        }

        if self.evictions > 0 && self.evictions % self.ring.capacity() == 0 {
            self.resum();
        }
    }

    fn resum(&mut self) {
        let k = self.shift.unwrap_or(0.0);
        self.sum = 0.0;
        self.sum_sq = 0.0;
        for v in self.ring.iter().flatten() {
            self.sum += v - k;
            self.sum_sq += (v - k) * (v - k);
        }
    }

    pub fn stats(&self) -> Option<WindowStats> {
        if !self.ring.full() || self.missing > 0 {
            return None;
        }
        let n = self.ring.len() as f64;
        let k = self.shift.unwrap_or(0.0);
        let mut mean = k + self.sum / n;
        let mut ss = (self.sum_sq - self.sum * self.sum / n).max(0.0);

        if near_zero(ss, n, mean, RECHECK_REL) {
            mean = self.ring.iter().flatten().sum::<f64>() / n;
            ss = self.ring.iter().flatten().map(|v| (v - mean) * (v - mean)).sum();
        }

        let std = if near_zero(ss, n, mean, DEGENERATE_REL) {
            None
        } else {
            Some((ss / (n - 1.0)).sqrt())
        };
        Some(WindowStats { mean, std })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buf_evicts_oldest_and_iterates_in_order() {
        let mut ring: RingBuf<f64> = RingBuf::new(3);
        assert_eq!(ring.push(1.0), None);
        assert_eq!(ring.push(2.0), None);
        assert_eq!(ring.push(3.0), None);
        assert!(ring.full());
        assert_eq!(ring.push(4.0), Some(1.0));
        assert_eq!(ring.iter().collect::<Vec<_>>(), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn rolling_pair_matches_direct_moments_after_many_evictions() {
        let mut pair = RollingPair::new(5);
        let xs: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64 * 0.7).sin() * 3.0).collect();
        let ys: Vec<f64> = (0..40).map(|i| 50.0 + (i as f64 * 0.3).cos() * 2.0).collect();
        for (x, y) in xs.iter().zip(&ys) {
            pair.push(*x, *y);
        }

        let wx = &xs[35..];
        let wy = &ys[35..];
        let mx = wx.iter().sum::<f64>() / 5.0;
        let my = wy.iter().sum::<f64>() / 5.0;
        let sxy: f64 = wx.iter().zip(wy).map(|(x, y)| (x - mx) * (y - my)).sum();
        let raw_xx: f64 = wx.iter().map(|x| x * x).sum();

        let m = pair.moments();
        assert!((m.mean_x - mx).abs() < 1e-9);
        assert!((m.mean_y - my).abs() < 1e-9);
        assert!((m.sxy - sxy).abs() < 1e-9);
        assert!((m.raw_xx - raw_xx).abs() < 1e-6);
    }

    #[test]
    fn rolling_pair_flags_constant_regressor() {
        let mut pair = RollingPair::new(4);
        for y in [1.0, 2.0, 3.0, 4.0, 5.0] {
            pair.push(42.0, y);
        }
        let m = pair.moments();
        assert!(m.x_degenerate());
        assert!(!m.y_degenerate());
    }

    #[test]
    fn rolling_series_requires_full_window_without_gaps() {
        let mut s = RollingSeries::new(3);
        s.push(Some(1.0));
        s.push(Some(2.0));
        assert!(s.stats().is_none());
        s.push(Some(3.0));
        let st = s.stats().unwrap();
        assert!((st.mean - 2.0).abs() < 1e-12);
        assert!((st.std.unwrap() - 1.0).abs() < 1e-12);

        s.push(None);
        assert!(s.stats().is_none());
        s.push(Some(5.0));
        s.push(Some(6.0));
        assert!(s.stats().is_none());
        s.push(Some(7.0));
        let st = s.stats().unwrap();
        assert!((st.mean - 6.0).abs() < 1e-12);
    }

    #[test]
    fn rolling_series_reports_constant_window_as_undefined_std() {
        let mut s = RollingSeries::new(3);
        for v in [0.1, 0.7, -3.3, 0.1, 0.1, 0.1] {
            s.push(Some(v));
        }
        let st = s.stats().unwrap();
        assert!((st.mean - 0.1).abs() < 1e-12);
        assert_eq!(st.std, None);
    }

    #[test]
    fn timeframe_and_regression_parse() {
        assert_eq!("1T".parse::<Timeframe>().unwrap(), Timeframe::OneMinute);
        assert_eq!("5t".parse::<Timeframe>().unwrap(), Timeframe::FiveMinutes);
        assert_eq!("1S (tick)".parse::<Timeframe>().unwrap(), Timeframe::OneSecond);
        assert!("15T".parse::<Timeframe>().is_err());
        assert_eq!(Timeframe::FiveMinutes.millis(), 300_000);

        assert_eq!("OLS_I".parse::<RegressionType>().unwrap(), RegressionType::WithIntercept);
        assert_eq!("ols_noi".parse::<RegressionType>().unwrap(), RegressionType::NoIntercept);
        assert!(matches!(
            "KALMAN".parse::<RegressionType>(),
            Err(HubError::InvalidRequest(_))
        ));
    }
}
