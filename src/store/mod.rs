//! REST file store over `<root>/<folder id>/<file name>`.
//!
//! Shares its directory tree with the serial receiver. Uploads are stored as
//! `<millis>_<uploaded name>` so repeated uploads never collide; the serial
//! receiver writes bare names.

mod handlers;

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::http::header::ACCESS_CONTROL_ALLOW_ORIGIN;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{middleware, Router};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::{validate_folder_id, StoreSettings};
use crate::protocol::validate_file_name;

const MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

/// Uploads in flight live here until their folder id is known
const STAGING_DIR: &str = ".incoming";

/// One row of `GET /files/list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::Io {
            context: context.into(),
            source,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            StoreError::BadRequest(_) => StatusCode::BAD_REQUEST,
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "file store request failed");
        }
        (status, self.to_string()).into_response()
    }
}

#[derive(Clone)]
pub struct StoreState {
    root: Arc<PathBuf>,
}

impl StoreState {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }

    fn folder(&self, id: &str) -> Result<PathBuf, StoreError> {
        let id = validate_folder_id(id).map_err(|e| StoreError::BadRequest(e.to_string()))?;
        if id == STAGING_DIR {
            return Err(StoreError::BadRequest(format!("Folder ID {:?} is reserved.", id)));
        }
        Ok(self.root.join(id))
    }

    fn file(&self, id: &str, filename: &str) -> Result<PathBuf, StoreError> {
        let folder = self.folder(id)?;
        let name = validate_file_name(filename).map_err(|e| StoreError::BadRequest(e.to_string()))?;
        Ok(folder.join(name))
    }
}

/// Build the `/files/*` router
pub fn router(state: StoreState) -> Router {
    Router::new()
        .route("/files/upload", post(handlers::upload))
        .route("/files/list", get(handlers::list))
        .route("/files/download", get(handlers::download))
        .route("/files/delete", delete(handlers::delete))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(middleware::map_response(allow_any_origin))
        .with_state(state)
}

async fn allow_any_origin(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

/// Bind the store's listening socket on all interfaces
pub async fn bind(settings: &StoreSettings) -> Result<TcpListener> {
    let addr = format!("0.0.0.0:{}", settings.listen_port);
    TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind file store on {}", addr))
}

/// Serve the store until `shutdown` resolves
pub async fn run_file_store<F>(listener: TcpListener, settings: &StoreSettings, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::fs::create_dir_all(settings.root())
        .await
        .with_context(|| format!("Failed to create storage root {}", settings.root().display()))?;

    info!(
        addr = %listener.local_addr()?,
        root = %settings.root().display(),
        "file store listening"
    );

    axum::serve(listener, router(StoreState::new(settings.root())))
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
