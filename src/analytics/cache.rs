//! Last-known stationarity result per analysis tuple.
//!
//! The outer map lock is held only long enough to find or create a slot; the
//! test itself runs under the slot's async mutex, so different tuples never
//! contend and one tuple never runs the test twice for overlapping triggers.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Mutex as AsyncMutex;

use super::stationarity::{AdfOutcome, AdfRefusal};
use super::{RegressionType, Timeframe};
use crate::error::HubError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnalysisKey {
    pub instrument1: String,
    pub instrument2: String,
    pub timeframe: Timeframe,
    pub window: usize,
    pub regression_type: RegressionType,
}

impl std::fmt::Display for AnalysisKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} {} w={} {}",
            self.instrument1, self.instrument2, self.timeframe, self.window, self.regression_type
        )
    }
}

/// One completed stationarity test (or refusal) for a tuple.
#[derive(Debug, Clone, PartialEq)]
pub struct AdfRun {
    pub computed_at: DateTime<Utc>,
    pub outcome: Result<AdfOutcome, AdfRefusal>,
}

impl AdfRun {
    pub fn result(&self) -> Option<&AdfOutcome> {
        self.outcome.as_ref().ok()
    }
}

#[derive(Default)]
struct Slot {
    /// Bumped after each run is stored; read without the lock.
    completed: AtomicU64,
    /// Held for the duration of a run.
    compute: AsyncMutex<()>,
    /// Last stored run; readable while a new run is in flight.
    latest: Mutex<Option<AdfRun>>,
}

impl Slot {
    fn latest(&self) -> Option<AdfRun> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store(&self, run: AdfRun) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(run);
    }
}

#[derive(Default)]
pub struct StationarityCache {
    slots: Mutex<FxHashMap<AnalysisKey, Arc<Slot>>>,
    runs: AtomicU64,
}

impl StationarityCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &AnalysisKey) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    fn existing_slot(&self, key: &AnalysisKey) -> Option<Arc<Slot>> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(key).cloned()
    }

    /// Cached result for `key`, if the test has ever run for it.  Never waits
    /// on a run in progress.
    pub fn cached(&self, key: &AnalysisKey) -> Option<AdfRun> {
        self.existing_slot(key)?.latest()
    }

    /// Run the test for `key`, or hand back the run that completed while this
    /// caller was waiting for the slot.
    ///
    /// `compute` runs on the blocking pool.
    pub async fn run_or_join<F>(&self, key: &AnalysisKey, compute: F) -> Result<AdfRun, HubError>
    where
        F: FnOnce() -> Result<AdfOutcome, AdfRefusal> + Send + 'static,
    {
        let slot = self.slot(key);
        let seen = slot.completed.load(Ordering::Acquire);
        let _guard = slot.compute.lock().await;

        if slot.completed.load(Ordering::Acquire) != seen {
            if let Some(run) = slot.latest() {
                tracing::debug!("stationarity test for {key} joined a concurrent run");
                return Ok(run);
            }
        }

        let outcome = tokio::task::spawn_blocking(compute)
            .await
            .map_err(|e| HubError::Internal(format!("stationarity task failed: {e}")))?;
        self.runs.fetch_add(1, Ordering::Relaxed);

        let run = AdfRun {
            computed_at: Utc::now(),
            outcome,
        };
        slot.store(run.clone());
        slot.completed.fetch_add(1, Ordering::Release);
        Ok(run)
    }

    /// Number of tests actually executed.
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }
}
