//! HTTP JSON API.

mod handlers;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::engine::VisionEngine;

pub use handlers::{
    HealthResponse, ImageListResponse, IndexResponse, SearchParams, SearchResponse, UploadResponse,
};

/// Router options not owned by the engine.
#[derive(Debug, Clone)]
pub struct RouterOptions {
    pub max_upload_bytes: usize,
    pub cors_permissive: bool,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            max_upload_bytes: crate::config::DEFAULT_MAX_UPLOAD_BYTES,
            cors_permissive: true,
        }
    }
}

/// Build the API router.
pub fn router(engine: Arc<VisionEngine>, options: &RouterOptions) -> Router {
    let mut router = Router::new()
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .route("/upload", post(handlers::upload))
        .route("/index", post(handlers::index))
        .route("/search", post(handlers::search))
        .route("/verify/:filename", post(handlers::verify))
        .route("/images", get(handlers::list_images))
        .route("/images/:filename", get(handlers::get_image))
        .route("/images/:filename/metadata", get(handlers::get_metadata))
        .layer(DefaultBodyLimit::max(options.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(engine);

    if options.cors_permissive {
        router = router.layer(CorsLayer::permissive());
    }

    router
}
