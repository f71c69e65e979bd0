use serde::Serialize;

use super::Timeframe;
use crate::db::Tick;

/// One timeframe bucket of an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bar {
    /// Bucket open time, UTC ms, aligned to the timeframe.
    pub bucket_start: i64,
    /// Last tick price in the bucket (or carried forward).
    pub close: f64,
    /// Zero for a bucket whose close was carried forward.
    pub volume: f64,
}

/// Run of empty buckets too long to carry forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataGap {
    pub symbol: String,
    /// Last bucket before the gap.
    pub last_bucket: i64,
    /// First bucket after the gap, or `None` when the series went stale at
    /// its tail.
    pub resumes_at: Option<i64>,
    pub empty_buckets: i64,
}

/// Both instruments' bars joined on `bucket_start`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AlignedRow {
    pub bucket_start: i64,
    pub price1: f64,
    pub volume1: f64,
    pub price2: f64,
    pub volume2: f64,
}

#[derive(Debug, Clone, Default)]
pub struct AlignedBars {
    pub rows: Vec<AlignedRow>,
    pub gaps: Vec<DataGap>,
}

/// Turns raw ticks into contiguous, fill-forwarded bar series.
#[derive(Debug, Clone, Copy)]
pub struct Resampler {
    step_ms: i64,
    max_fill_forward: usize,
}

impl Resampler {
    pub fn new(timeframe: Timeframe, max_fill_forward: usize) -> Self {
        Self {
            step_ms: timeframe.millis(),
            max_fill_forward,
        }
    }

    pub fn bucket_of(&self, ts_ms: i64) -> i64 {
        ts_ms.div_euclid(self.step_ms) * self.step_ms
    }

    /// Bars for one instrument.  Ticks may arrive unsorted; equal timestamps
    /// keep their arrival order so the later print sets the close.
    ///
    /// A run of empty buckets longer than `max_fill_forward` cuts the series:
    /// everything before the gap is dropped and the gap is reported.
    pub fn bars(&self, symbol: &str, ticks: &[Tick]) -> (Vec<Bar>, Vec<DataGap>) {
        let mut sorted: Vec<&Tick> = ticks.iter().collect();
        sorted.sort_by_key(|t| t.ts_ms);

        let mut bars: Vec<Bar> = Vec::new();
        let mut gaps = Vec::new();

        for t in sorted {
            let bucket = self.bucket_of(t.ts_ms);
            match bars.last_mut() {
                Some(last) if last.bucket_start == bucket => {
                    last.close = t.price;
                    last.volume += t.qty;
                    continue;
                }
                _ => {}
            }

            if let Some(prev) = bars.last().copied() {
                let empty = (bucket - prev.bucket_start) / self.step_ms - 1;
                if empty > self.max_fill_forward as i64 {
                    gaps.push(DataGap {
                        symbol: symbol.to_string(),
                        last_bucket: prev.bucket_start,
                        resumes_at: Some(bucket),
                        empty_buckets: empty,
                    });
                    bars.clear();
                } else {
                    self.fill(&mut bars, prev, empty);
                }
            }

            bars.push(Bar {
                bucket_start: bucket,
                close: t.price,
                volume: t.qty,
            });
        }

        (bars, gaps)
    }

    /// Carry the last close forward up to `end`, within the fill-forward bound.
    fn extend_to(&self, symbol: &str, bars: &mut Vec<Bar>, end: i64) -> Option<DataGap> {
        let last = bars.last().copied()?;
        let empty = (end - last.bucket_start) / self.step_ms;
        if empty <= 0 {
            return None;
        }
        let allowed = empty.min(self.max_fill_forward as i64);
        self.fill(bars, last, allowed);
        (empty > allowed).then(|| DataGap {
            symbol: symbol.to_string(),
            last_bucket: last.bucket_start,
            resumes_at: None,
            empty_buckets: empty,
        })
    }

    fn fill(&self, bars: &mut Vec<Bar>, from: Bar, count: i64) {
        for k in 1..=count {
            bars.push(Bar {
                bucket_start: from.bucket_start + k * self.step_ms,
                close: from.close,
                volume: 0.0,
            });
        }
    }

    /// Resample both instruments, extend each to the later of their last
    /// buckets and inner-join on `bucket_start`.
    ///
    /// An instrument without ticks yields no rows at all.
    pub fn align_pair(
        &self,
        (s1, ticks1): (&str, &[Tick]),
        (s2, ticks2): (&str, &[Tick]),
    ) -> AlignedBars {
        let (mut bars1, mut gaps) = self.bars(s1, ticks1);
        let (mut bars2, gaps2) = self.bars(s2, ticks2);
        gaps.extend(gaps2);

        let (Some(end1), Some(end2)) = (bars1.last(), bars2.last()) else {
            return AlignedBars {
                rows: Vec::new(),
                gaps,
            };
        };
        let end = end1.bucket_start.max(end2.bucket_start);
        gaps.extend(self.extend_to(s1, &mut bars1, end));
        gaps.extend(self.extend_to(s2, &mut bars2, end));

        for gap in &gaps {
            match gap.resumes_at {
                Some(resume) => tracing::warn!(
                    "data gap in {}: {} empty buckets between {} and {resume}, series truncated",
                    gap.symbol,
                    gap.empty_buckets,
                    gap.last_bucket
                ),
                None => tracing::warn!(
                    "{} stale for {} buckets after {}, alignment ends early",
                    gap.symbol,
                    gap.empty_buckets,
                    gap.last_bucket
                ),
            }
        }

        AlignedBars {
            rows: join_bars(&bars1, &bars2),
            gaps,
        }
    }
}

/// Inner join of two strictly increasing bar series.
pub fn join_bars(bars1: &[Bar], bars2: &[Bar]) -> Vec<AlignedRow> {
    let mut rows = Vec::with_capacity(bars1.len().min(bars2.len()));
    let (mut i, mut j) = (0, 0);
    while i < bars1.len() && j < bars2.len() {
        let (a, b) = (&bars1[i], &bars2[j]);
        match a.bucket_start.cmp(&b.bucket_start) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                rows.push(AlignedRow {
                    bucket_start: a.bucket_start,
                    price1: a.close,
                    volume1: a.volume,
                    price2: b.close,
                    volume2: b.volume,
                });
                i += 1;
                j += 1;
            }
        }
    }
    rows
}
