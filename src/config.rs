//! Configuration module for the visioncop service.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::path::PathBuf;

use crate::features::EmbeddingModel;

/// Default number of results returned by a search.
pub const DEFAULT_TOP_K: usize = 5;
/// Default upper bound for a requested `top_k`.
pub const DEFAULT_MAX_TOP_K: usize = 50;
/// Default request body limit (20 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root data directory (images and index snapshot live below it)
    pub data_dir: PathBuf,
    /// HTTP API port
    pub http_port: u16,
    /// Prometheus metrics HTTP port
    pub metrics_port: u16,
    /// Bind address (supports IPv4, IPv6, or dual-stack)
    pub bind_address: String,
    /// Keep the index in memory only (opt-in via EPHEMERAL_INDEX)
    pub ephemeral_index: bool,
    /// Feature extractor used for indexing and search
    pub embedding_model: EmbeddingModel,
    /// Default number of search results
    pub search_top_k: usize,
    /// Upper clamp for a requested top_k
    pub max_top_k: usize,
    /// Request body limit in bytes
    pub max_upload_bytes: usize,
    /// Allow cross-origin requests from any origin
    pub cors_permissive: bool,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `DATA_DIR` - Data root (default: data)
    /// - `HTTP_PORT` - API listen port (default: 8000)
    /// - `METRICS_PORT` - Prometheus metrics port (default: 9090)
    /// - `BIND_ADDRESS` - Bind address (default: auto-detect [::] or 0.0.0.0)
    /// - `EPHEMERAL_INDEX` - Do not persist the index (default: false)
    /// - `EMBEDDING_MODEL` - color-histogram | spatial-color (default: color-histogram)
    /// - `SEARCH_TOP_K` - Default result count (default: 5)
    /// - `MAX_TOP_K` - Result count ceiling (default: 50)
    /// - `MAX_UPLOAD_BYTES` - Request body limit (default: 20 MiB)
    /// - `CORS_PERMISSIVE` - Allow any origin (default: true)
    /// - `RUST_LOG` - Log level (default: info)
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_dir = env::var("DATA_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("data"));

        let http_port = parse_or("HTTP_PORT", 8000);
        let metrics_port = parse_or("METRICS_PORT", 9090);

        let ephemeral_index = flag_or("EPHEMERAL_INDEX", false);
        let cors_permissive = flag_or("CORS_PERMISSIVE", true);

        let embedding_model = match env::var("EMBEDDING_MODEL") {
            Ok(v) if !v.trim().is_empty() => v
                .parse()
                .map_err(|_| ConfigError::Invalid("EMBEDDING_MODEL", v))?,
            _ => EmbeddingModel::default(),
        };

        let max_top_k = parse_or("MAX_TOP_K", DEFAULT_MAX_TOP_K).max(1);
        let search_top_k = parse_or("SEARCH_TOP_K", DEFAULT_TOP_K).clamp(1, max_top_k);
        let max_upload_bytes = parse_or("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES);

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        // Try dual-stack (::) first, fall back to IPv4-only (0.0.0.0) if needed
        let bind_address = env::var("BIND_ADDRESS").unwrap_or_else(|_| "auto".to_string());

        Ok(Config {
            data_dir,
            http_port,
            metrics_port,
            bind_address,
            ephemeral_index,
            embedding_model,
            search_top_k,
            max_top_k,
            max_upload_bytes,
            cors_permissive,
            log_level,
        })
    }

    /// Directory holding stored image files.
    pub fn images_dir(&self) -> PathBuf {
        self.data_dir.join("images")
    }

    /// Path of the persisted index snapshot.
    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join("index").join("embeddings.json")
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn flag_or(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| {
            let v = v.trim().to_lowercase();
            v == "true" || v == "1"
        })
        .unwrap_or(default)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}
