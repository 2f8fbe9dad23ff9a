//! Filesystem store for uploaded image files.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ServiceError;

/// Directory-backed store. All names are sanitised before touching the disk.
#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the image directory if it does not exist.
    pub async fn ensure_dir(&self) -> Result<(), ServiceError> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Path a sanitised `name` is stored at.
    pub fn path(&self, name: &str) -> Result<PathBuf, ServiceError> {
        Ok(self.root.join(sanitize_filename(name)?))
    }

    /// Write `bytes` under `name`, overwriting any existing file.
    pub async fn save(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, ServiceError> {
        let path = self.path(name)?;
        self.ensure_dir().await?;
        tokio::fs::write(&path, bytes).await?;
        debug!(path = %path.display(), size = bytes.len(), "Image stored");
        Ok(path)
    }

    pub async fn read(&self, name: &str) -> Result<Vec<u8>, ServiceError> {
        let path = self.path(name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ServiceError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Like `read`, but a missing file is `None`.
    pub async fn read_if_exists(&self, name: &str) -> Result<Option<Vec<u8>>, ServiceError> {
        match self.read(name).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(ServiceError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Delete a stored file. A missing file is not an error.
    pub async fn remove(&self, name: &str) -> Result<(), ServiceError> {
        let path = self.path(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Tried to remove missing image");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Reduce a client-supplied filename to a safe single path component.
pub fn sanitize_filename(name: &str) -> Result<String, ServiceError> {
    let base = name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim();

    if base.is_empty() || base == "." || base == ".." {
        return Err(ServiceError::InvalidRequest(format!(
            "invalid filename: {:?}",
            name
        )));
    }
    if base.starts_with('.') {
        return Err(ServiceError::InvalidRequest(format!(
            "hidden filenames are not allowed: {:?}",
            name
        )));
    }
    if base.chars().any(char::is_control) {
        return Err(ServiceError::InvalidRequest(format!(
            "filename contains control characters: {:?}",
            name
        )));
    }

    Ok(base.to_string())
}

/// Lower-cased extension of `name`, if it has one.
fn extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(str::to_lowercase)
}

/// Collision-free storage name keeping the original extension.
pub fn unique_filename(original: &str) -> String {
    match extension(original) {
        Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
        None => Uuid::new_v4().to_string(),
    }
}

/// MIME type inferred from the filename extension.
pub fn content_type(name: &str) -> &'static str {
    match extension(name).as_deref() {
        Some(ext) => image::ImageFormat::from_extension(ext)
            .map(|f| f.to_mime_type())
            .unwrap_or("application/octet-stream"),
        None => "application/octet-stream",
    }
}
