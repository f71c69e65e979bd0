pub mod analytics;
pub mod upload;

use axum::Router;
use std::sync::Arc;

use crate::state::AppState;

/// Assemble the API router.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(analytics::routes())
        .merge(upload::routes())
}
