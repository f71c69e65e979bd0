use std::sync::Arc;

use crate::analytics::cache::StationarityCache;
use crate::config::{AnalysisSettings, HubConfig};
use crate::db::TickStore;
use crate::error::HubError;

/// Shared application state, passed to all route handlers via `axum::extract::State`.
pub struct AppState {
    pub config: HubConfig,
    pub settings: AnalysisSettings,
    pub store: TickStore,
    /// Last-known ADF result per analysis tuple.
    pub adf_cache: StationarityCache,
}

impl AppState {
    pub fn new(config: HubConfig) -> Result<Arc<Self>, HubError> {
        let store = TickStore::open(&config.tick_db, config.db_pool_size)?;
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: HubConfig, store: TickStore) -> Arc<Self> {
        Arc::new(Self {
            settings: config.analysis_settings(),
            config,
            store,
            adf_cache: StationarityCache::new(),
        })
    }
}
