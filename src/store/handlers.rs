use axum::body::Body;
use axum::extract::multipart::Field;
use axum::extract::{Multipart, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use super::{FileEntry, StoreError, StoreState, STAGING_DIR};
use crate::protocol::validate_file_name;

static STAGED: AtomicU64 = AtomicU64::new(0);

#[derive(Deserialize)]
pub struct FolderQuery {
    pub id: String,
}

#[derive(Deserialize)]
pub struct FileQuery {
    pub id: String,
    pub filename: String,
}

/// `POST /files/upload` with multipart parts `file` and `id`.
///
/// The file part is streamed into a staging file under the storage root and
/// moved into `<root>/<id>/<millis>_<name>` once the folder id is known, so
/// the part order does not matter and nothing is held in memory.
pub async fn upload(State(state): State<StoreState>, mut multipart: Multipart) -> Result<String, StoreError> {
    let mut id = None;
    let mut upload: Option<StagedUpload> = None;

    let result = async {
        while let Some(field) = multipart.next_field().await.map_err(upload_failed)? {
            let field_name = field.name().map(str::to_owned);
            match field_name.as_deref() {
                Some("id") => id = Some(field.text().await.map_err(upload_failed)?),
                Some("file") => {
                    if let Some(previous) = upload.take() {
                        previous.discard().await;
                    }
                    let staged = StagedUpload::new(&state.root, field.file_name().unwrap_or_default());
                    upload.insert(staged).fill(field).await?;
                }
                other => debug!(field = ?other, "ignoring multipart field"),
            }
        }
        Ok::<_, StoreError>(())
    }
    .await;

    if let Err(e) = result {
        if let Some(staged) = upload {
            staged.discard().await;
        }
        return Err(e);
    }

    let staged = match upload {
        Some(staged) if staged.size > 0 => staged,
        other => {
            if let Some(staged) = other {
                staged.discard().await;
            }
            return Err(StoreError::BadRequest("Upload failed: File is empty.".into()));
        }
    };

    match store_upload(&state, id.as_deref(), &staged).await {
        Ok(stored) => {
            info!(path = %stored.display(), size = staged.size, "file uploaded");
            Ok(format!("File uploaded successfully: {}", stored.display()))
        }
        Err(e) => {
            staged.discard().await;
            Err(e)
        }
    }
}

async fn store_upload(state: &StoreState, id: Option<&str>, staged: &StagedUpload) -> Result<PathBuf, StoreError> {
    let id = id.ok_or_else(|| StoreError::BadRequest("Upload failed: Folder ID is missing.".into()))?;
    let folder = state.folder(id)?;
    let name = validate_file_name(&staged.name).map_err(upload_failed)?;

    tokio::fs::create_dir_all(&folder)
        .await
        .map_err(|e| StoreError::io("Upload failed: Could not create directory", e))?;

    let stored = folder.join(format!("{}_{}", unix_millis(), name));
    tokio::fs::rename(&staged.path, &stored)
        .await
        .map_err(|e| StoreError::io("Upload failed", e))?;
    Ok(stored)
}

/// A `file` part written to `<root>/.incoming/` while the request is read
struct StagedUpload {
    name: String,
    path: PathBuf,
    size: u64,
}

impl StagedUpload {
    fn new(root: &Path, name: &str) -> Self {
        let staged = format!("{}-{}", unix_millis(), STAGED.fetch_add(1, Ordering::Relaxed));
        Self {
            name: name.trim().to_string(),
            path: root.join(STAGING_DIR).join(staged),
            size: 0,
        }
    }

    /// Copy the part to disk chunk by chunk; the handle is closed on return
    async fn fill(&mut self, mut field: Field<'_>) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StoreError::io("Upload failed: Could not create directory", e))?;
        }
        let mut file = tokio::fs::File::create(&self.path)
            .await
            .map_err(|e| StoreError::io("Upload failed", e))?;

        while let Some(chunk) = field.chunk().await.map_err(upload_failed)? {
            file.write_all(&chunk)
                .await
                .map_err(|e| StoreError::io("Upload failed", e))?;
            self.size += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| StoreError::io("Upload failed", e))
    }

    async fn discard(self) {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => debug!(path = %self.path.display(), error = %e, "could not remove staged upload"),
        }
    }
}

fn upload_failed(e: impl std::fmt::Display) -> StoreError {
    StoreError::BadRequest(format!("Upload failed: {}", e))
}

/// `GET /files/list?id=`: regular files only, an unknown folder is empty
pub async fn list(
    State(state): State<StoreState>,
    Query(query): Query<FolderQuery>,
) -> Result<Json<Vec<FileEntry>>, StoreError> {
    let folder = state.folder(&query.id)?;
    let mut files = Vec::new();

    let mut dir = match tokio::fs::read_dir(&folder).await {
        Ok(dir) => dir,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Json(files)),
        Err(e) => return Err(StoreError::io("List failed", e)),
    };

    while let Some(entry) = dir
        .next_entry()
        .await
        .map_err(|e| StoreError::io("List failed", e))?
    {
        let metadata = entry
            .metadata()
            .await
            .map_err(|e| StoreError::io("List failed", e))?;
        if metadata.is_file() {
            files.push(FileEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: metadata.len(),
            });
        }
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Json(files))
}

/// `GET /files/download?id=&filename=`
pub async fn download(
    State(state): State<StoreState>,
    Query(query): Query<FileQuery>,
) -> Result<Response, StoreError> {
    let path = state.file(&query.id, &query.filename)?;
    let not_found = || StoreError::NotFound(format!("File not found: {}", query.filename));

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(not_found()),
        Err(e) => return Err(StoreError::io("Download failed", e)),
    };
    let metadata = file
        .metadata()
        .await
        .map_err(|e| StoreError::io("Download failed", e))?;
    if !metadata.is_file() {
        return Err(not_found());
    }

    let disposition = format!("attachment; filename=\"{}\"", query.filename.replace('"', "\\\""));
    let headers = [
        (CONTENT_TYPE, "application/octet-stream".to_string()),
        (CONTENT_LENGTH, metadata.len().to_string()),
        (CONTENT_DISPOSITION, disposition),
    ];

    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}

/// `DELETE /files/delete?id=&filename=`
pub async fn delete(
    State(state): State<StoreState>,
    Query(query): Query<FileQuery>,
) -> Result<String, StoreError> {
    let path = state.file(&query.id, &query.filename)?;

    match tokio::fs::remove_file(&path).await {
        Ok(()) => {
            info!(path = %path.display(), "file deleted");
            Ok(format!("File deleted successfully: {}", query.filename))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            Err(StoreError::NotFound(format!("File not found: {}", query.filename)))
        }
        Err(e) => Err(StoreError::io(format!("Failed to delete file: {}", query.filename), e)),
    }
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}
