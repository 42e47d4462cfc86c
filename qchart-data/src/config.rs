use crate::error::DataError;
use std::path::PathBuf;
use tracing::info;
use url::Url;

/// Default Qortal core HTTP API root.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:12391";

/// Records requested per trade page. A page shorter than this is the
/// exhaustion signal for full/incremental fetches.
pub const DEFAULT_PAGE_LIMIT: usize = 100;

/// Addresses resolved per name-lookup batch.
pub const DEFAULT_NAME_BATCH_SIZE: usize = 25;

/// Cached trades older than this across every pair raise the stale warning.
pub const DEFAULT_STALE_AFTER_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// Pipeline configuration.
///
/// Built from defaults via [`PipelineConfig::default`], or from the
/// environment via [`PipelineConfig::from_env`]:
///
/// | Variable               | Default                  |
/// |------------------------|--------------------------|
/// | `QCHART_API_URL`       | `http://127.0.0.1:12391` |
/// | `QCHART_CACHE_PATH`    | `qchart-trades.json`     |
/// | `QCHART_PAGE_LIMIT`    | `100`                    |
/// | `QCHART_NAME_BATCH`    | `25`                     |
/// | `QCHART_STALE_DAYS`    | `7`                      |
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Base URL of the remote trade source and name service.
    pub api_url: Url,
    /// Durable slot for the versioned trade cache.
    pub cache_path: PathBuf,
    /// Trade records requested per page.
    pub page_limit: usize,
    /// Addresses per concurrent name-lookup batch.
    pub name_batch_size: usize,
    /// Age threshold for the cache stale warning, in milliseconds.
    pub stale_after_ms: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            api_url: Url::parse(DEFAULT_API_URL).expect("default api url is valid"),
            cache_path: PathBuf::from("qchart-trades.json"),
            page_limit: DEFAULT_PAGE_LIMIT,
            name_batch_size: DEFAULT_NAME_BATCH_SIZE,
            stale_after_ms: DEFAULT_STALE_AFTER_MS,
        }
    }
}

impl PipelineConfig {
    /// Construct from the environment, falling back to defaults per variable.
    pub fn from_env() -> Result<Self, DataError> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("QCHART_API_URL") {
            config.api_url = Url::parse(&raw)?;
            info!(api_url = %config.api_url, "api url override");
        }

        if let Ok(raw) = std::env::var("QCHART_CACHE_PATH") {
            config.cache_path = PathBuf::from(raw);
            info!(cache_path = %config.cache_path.display(), "cache path override");
        }

        config.page_limit = std::env::var("QCHART_PAGE_LIMIT")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|limit| *limit > 0)
            .unwrap_or(DEFAULT_PAGE_LIMIT);

        config.name_batch_size = std::env::var("QCHART_NAME_BATCH")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_NAME_BATCH_SIZE);

        config.stale_after_ms = std::env::var("QCHART_STALE_DAYS")
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|days| *days > 0)
            .map(|days| days * 24 * 60 * 60 * 1000)
            .unwrap_or(DEFAULT_STALE_AFTER_MS);

        Ok(config)
    }
}
