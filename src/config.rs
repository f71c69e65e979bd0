use std::env;
use std::path::PathBuf;

/// Hub configuration derived from environment variables.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub bind: String,
    pub port: u16,

    // ── Tick store ─────────────────────────────────────────────────
    pub tick_db: PathBuf,
    pub db_pool_size: u32,
    /// Newest ticks loaded per instrument for one analysis.
    pub tick_limit: u32,

    // ── Engine ─────────────────────────────────────────────────────
    /// Consecutive empty buckets carried forward before a series is cut.
    pub max_fill_forward: usize,
    pub max_window: usize,
    pub adf_max_lag: Option<usize>,

    // ── HTTP surface ───────────────────────────────────────────────
    /// Allowed browser origin.  `None` ⇒ permissive CORS.
    pub cors_origin: Option<String>,
    /// Built dashboard assets served at `/`.
    pub static_dir: Option<PathBuf>,
    pub upload_limit_bytes: usize,
}

/// Engine knobs that do not depend on the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisSettings {
    pub tick_limit: u32,
    pub max_fill_forward: usize,
    pub max_window: usize,
    pub adf_max_lag: Option<usize>,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            tick_limit: 5000,
            max_fill_forward: 10,
            max_window: 5000,
            adf_max_lag: None,
        }
    }
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_str(name: &str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

fn env_u16(name: &str, default: u16) -> u16 {
    env_opt(name).and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    env_opt(name).and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env_opt(name).and_then(|s| s.parse().ok()).unwrap_or(default)
}

impl HubConfig {
    pub fn from_env() -> Self {
        let defaults = AnalysisSettings::default();

        Self {
            bind: env_str("PAIRS_HUB_BIND", "127.0.0.1"),
            port: env_u16("PAIRS_HUB_PORT", 8000),
            tick_db: PathBuf::from(env_str("PAIRS_HUB_TICK_DB", "tick_data.db")),
            db_pool_size: env_u32("PAIRS_HUB_DB_POOL_SIZE", 4).max(1),
            tick_limit: env_u32("PAIRS_HUB_TICK_LIMIT", defaults.tick_limit).max(1),
            max_fill_forward: env_usize("PAIRS_HUB_MAX_FILL_FORWARD", defaults.max_fill_forward),
            max_window: env_usize("PAIRS_HUB_MAX_WINDOW", defaults.max_window).max(3),
            adf_max_lag: env_opt("PAIRS_HUB_ADF_MAX_LAG").and_then(|s| s.parse().ok()),
            cors_origin: env_opt("PAIRS_HUB_CORS_ORIGIN"),
            static_dir: env_opt("PAIRS_HUB_STATIC_DIR").map(PathBuf::from),
            upload_limit_bytes: env_usize("PAIRS_HUB_UPLOAD_LIMIT_BYTES", 16 * 1024 * 1024),
        }
    }

    pub fn analysis_settings(&self) -> AnalysisSettings {
        AnalysisSettings {
            tick_limit: self.tick_limit,
            max_fill_forward: self.max_fill_forward,
            max_window: self.max_window,
            adf_max_lag: self.adf_max_lag,
        }
    }
}
