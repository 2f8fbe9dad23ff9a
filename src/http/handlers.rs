//! Route handlers for the image API.

use std::sync::Arc;

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::engine::{ImageMetadata, StatusReport, VerificationReport, VisionEngine};
use crate::error::ServiceError;
use crate::index::{ImageSummary, SearchHit};

type AppState = State<Arc<VisionEngine>>;

/// Name of the multipart part carrying the image.
const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
    pub filename: String,
}

pub type IndexResponse = UploadResponse;

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub success: bool,
    pub query_image: String,
    pub results: Vec<SearchHit>,
    /// Bare filenames in result order
    pub similar_images: Vec<String>,
    pub took_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct ImageListResponse {
    pub images: Vec<ImageSummary>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub total_images: usize,
    pub index: String,
}

/// The `file` part of a multipart upload.
struct FilePart {
    file_name: Option<String>,
    bytes: Vec<u8>,
}

fn multipart_error(err: MultipartError) -> ServiceError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServiceError::PayloadTooLarge(err.body_text())
    } else {
        ServiceError::InvalidRequest(err.body_text())
    }
}

async fn read_file_part(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<FilePart, ServiceError> {
    let mut multipart = multipart.map_err(|e| ServiceError::InvalidRequest(e.body_text()))?;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let bytes = field.bytes().await.map_err(multipart_error)?;
        if bytes.is_empty() {
            return Err(ServiceError::InvalidRequest("uploaded file is empty".into()));
        }
        return Ok(FilePart {
            file_name,
            bytes: bytes.to_vec(),
        });
    }

    Err(ServiceError::InvalidRequest(format!(
        "missing multipart field `{}`",
        FILE_FIELD
    )))
}

pub async fn health(State(engine): AppState) -> impl IntoResponse {
    let index = engine.index();
    let (code, status) = if index.is_ready() {
        (StatusCode::OK, "serving")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not_serving")
    };

    let body = HealthResponse {
        status,
        total_images: index.len().await,
        index: index.location(),
    };
    (code, Json(body))
}

pub async fn status(State(engine): AppState) -> Json<StatusReport> {
    Json(engine.status().await)
}

#[instrument(skip_all)]
pub async fn upload(
    State(engine): AppState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ServiceError> {
    let part = read_file_part(multipart).await?;
    let original = part.file_name.unwrap_or_else(|| "upload".to_string());

    let outcome = engine.upload(&original, part.bytes).await?;

    Ok(Json(UploadResponse {
        success: true,
        message: format!("Image {} uploaded and indexed successfully", original),
        filename: outcome.filename,
    }))
}

#[instrument(skip_all)]
pub async fn index(
    State(engine): AppState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<IndexResponse>, ServiceError> {
    let part = read_file_part(multipart).await?;
    let name = part
        .file_name
        .ok_or_else(|| ServiceError::InvalidRequest("file part has no filename".into()))?;

    let outcome = engine.index_named(&name, part.bytes).await?;

    Ok(Json(IndexResponse {
        success: true,
        message: format!("Image {} indexed successfully", outcome.filename),
        filename: outcome.filename,
    }))
}

#[instrument(skip_all)]
pub async fn search(
    State(engine): AppState,
    params: Result<Query<SearchParams>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<SearchResponse>, ServiceError> {
    let Query(params) = params.map_err(|e| ServiceError::InvalidRequest(e.body_text()))?;
    let part = read_file_part(multipart).await?;
    let query_image = part.file_name.unwrap_or_else(|| "query".to_string());

    let outcome = engine.search(part.bytes, params.top_k).await?;
    let similar_images = outcome.hits.iter().map(|h| h.filename.clone()).collect();

    info!(query_image = %query_image, hits = outcome.hits.len(), "Search served");

    Ok(Json(SearchResponse {
        success: true,
        query_image,
        results: outcome.hits,
        similar_images,
        took_ms: outcome.took_ms,
    }))
}

#[instrument(skip_all)]
pub async fn verify(
    State(engine): AppState,
    Path(filename): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<VerificationReport>, ServiceError> {
    let part = read_file_part(multipart).await?;
    Ok(Json(engine.verify(part.bytes, &filename).await?))
}

pub async fn list_images(State(engine): AppState) -> Json<ImageListResponse> {
    Json(ImageListResponse {
        images: engine.list().await,
    })
}

pub async fn get_image(
    State(engine): AppState,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let (bytes, content_type) = engine.image(&filename).await?;
    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}

pub async fn get_metadata(
    State(engine): AppState,
    Path(filename): Path<String>,
) -> Result<Json<ImageMetadata>, ServiceError> {
    Ok(Json(engine.metadata(&filename).await?))
}
