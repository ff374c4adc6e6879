//! Pull files from another filerelay store into the local storage root.
//!
//! Talks to the same `/files/list` and `/files/download` routes the store
//! serves, so any instance (local or behind a tunnel) can be a source.

use reqwest::{Client, Response, StatusCode, Url};
use std::path::Path;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::FetchSession;
use crate::protocol::validate_file_name;
use crate::store::FileEntry;
use crate::transfer::ReceivedFile;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid server URL {0:?}")]
    InvalidUrl(String),

    #[error("Server returned: {0}")]
    Status(StatusCode),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unsafe file name {0:?}")]
    UnsafeFileName(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        FetchError::Io {
            context: context.into(),
            source,
        }
    }
}

/// What one fetch run pulled down, and what it had to skip
#[derive(Debug, Default)]
pub struct FetchReport {
    pub downloaded: Vec<ReceivedFile>,
    pub failed: Vec<(String, FetchError)>,
}

/// HTTP client bound to one remote store
pub struct RemoteStore {
    client: Client,
    base: Url,
}

impl RemoteStore {
    pub fn new(server: &str) -> Result<Self, FetchError> {
        let base = parse_server_url(server)?;
        let client = Client::builder().build()?;
        Ok(Self { client, base })
    }

    /// `GET /files/list?id=<folder>`
    pub async fn list(&self, folder: &str) -> Result<Vec<FileEntry>, FetchError> {
        let response = self
            .client
            .get(self.endpoint("/files/list"))
            .query(&[("id", folder)])
            .send()
            .await?;
        let response = require_ok(response)?;
        Ok(response.json().await?)
    }

    /// Download `<folder>/<name>` into `dest_dir/<name>`, replacing any
    /// existing file. A failed copy removes the partial file.
    pub async fn download(&self, folder: &str, name: &str, dest_dir: &Path) -> Result<ReceivedFile, FetchError> {
        let name = validate_file_name(name).map_err(|_| FetchError::UnsafeFileName(name.to_string()))?;

        let response = self
            .client
            .get(self.endpoint("/files/download"))
            .query(&[("id", folder), ("filename", name)])
            .send()
            .await?;
        let response = require_ok(response)?;

        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| FetchError::io("Could not create directory", e))?;

        let path = dest_dir.join(name);
        match copy_body(response, &path).await {
            Ok(size) => Ok(ReceivedFile {
                name: name.to_string(),
                path,
                size,
            }),
            Err(e) => {
                if let Err(remove) = tokio::fs::remove_file(&path).await {
                    debug!(path = %path.display(), error = %remove, "could not remove partial download");
                }
                Err(e)
            }
        }
    }

    fn endpoint(&self, route: &str) -> Url {
        let mut url = self.base.clone();
        let path = format!("{}{}", self.base.path().trim_end_matches('/'), route);
        url.set_path(&path);
        url
    }
}

/// Run one fetch: the named file, or everything the source folder lists
pub async fn fetch(session: &FetchSession) -> Result<FetchReport, FetchError> {
    let remote = RemoteStore::new(&session.server)?;

    let names = match &session.file {
        Some(name) => vec![name.clone()],
        None => {
            let entries = remote.list(&session.source).await?;
            info!(source = %session.source, files = entries.len(), "remote folder listed");
            entries.into_iter().map(|entry| entry.name).collect()
        }
    };

    let dest = session.target_dir();
    let mut report = FetchReport::default();
    for name in names {
        match remote.download(&session.source, &name, &dest).await {
            Ok(file) => {
                info!(file = %file.name, size = file.size, "file downloaded");
                report.downloaded.push(file);
            }
            Err(e) => {
                warn!(file = %name, error = %e, "download failed");
                report.failed.push((name, e));
            }
        }
    }

    Ok(report)
}

/// Accept absolute `http`/`https` URLs with a host
pub fn parse_server_url(server: &str) -> Result<Url, FetchError> {
    let invalid = || FetchError::InvalidUrl(server.to_string());

    let url = Url::parse(server.trim()).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(invalid());
    }
    Ok(url)
}

fn require_ok(response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    if status != StatusCode::OK {
        return Err(FetchError::Status(status));
    }
    Ok(response)
}

async fn copy_body(mut response: Response, path: &Path) -> Result<u64, FetchError> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| FetchError::io("Could not create file", e))?;

    let mut size = 0u64;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk)
            .await
            .map_err(|e| FetchError::io("Could not write file", e))?;
        size += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| FetchError::io("Could not write file", e))?;
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{router, StoreState};
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    /// Serve `root` on an ephemeral port and return its base URL
    async fn spawn_store(root: PathBuf) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(StoreState::new(root))).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn remote_folder(files: &[(&str, &[u8])]) -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("5")).unwrap();
        for (name, data) in files {
            std::fs::write(dir.path().join("5").join(name), data).unwrap();
        }
        dir
    }

    fn session(server: &str, local: &TempDir, file: Option<&str>) -> FetchSession {
        FetchSession::new(server, "5", "9", file.map(str::to_string), local.path()).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_whole_folder() {
        let big: Vec<u8> = (0..=255u8).cycle().take(100_000).collect();
        let remote = remote_folder(&[("a.txt", b"HELLO"), ("b.bin", big.as_slice())]);
        let local = TempDir::new().unwrap();
        let server = spawn_store(remote.path().to_path_buf()).await;

        let report = fetch(&session(&server, &local, None)).await.unwrap();

        assert!(report.failed.is_empty(), "{:?}", report.failed);
        let names: Vec<_> = report.downloaded.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["a.txt", "b.bin"]);
        assert_eq!(std::fs::read(local.path().join("9").join("a.txt")).unwrap(), b"HELLO");
        assert_eq!(std::fs::read(local.path().join("9").join("b.bin")).unwrap(), big);
    }

    #[tokio::test]
    async fn test_fetch_single_file_replaces_existing() {
        let remote = remote_folder(&[("a.txt", b"HELLO"), ("other.txt", b"skip")]);
        let local = TempDir::new().unwrap();
        std::fs::create_dir_all(local.path().join("9")).unwrap();
        std::fs::write(local.path().join("9").join("a.txt"), b"older and longer contents").unwrap();
        let server = spawn_store(remote.path().to_path_buf()).await;

        let report = fetch(&session(&server, &local, Some("a.txt"))).await.unwrap();

        assert_eq!(report.downloaded.len(), 1);
        assert_eq!(report.downloaded[0].size, 5);
        assert_eq!(std::fs::read(local.path().join("9").join("a.txt")).unwrap(), b"HELLO");
        assert!(!local.path().join("9").join("other.txt").exists());
    }

    #[tokio::test]
    async fn test_missing_remote_file_is_reported() {
        let remote = remote_folder(&[]);
        let local = TempDir::new().unwrap();
        let server = spawn_store(remote.path().to_path_buf()).await;

        let report = fetch(&session(&server, &local, Some("ghost.txt"))).await.unwrap();

        assert!(report.downloaded.is_empty());
        match &report.failed[..] {
            [(name, FetchError::Status(status))] => {
                assert_eq!(name, "ghost.txt");
                assert_eq!(*status, StatusCode::NOT_FOUND);
            }
            other => panic!("expected one 404, got {:?}", other),
        }
        assert!(!local.path().join("9").join("ghost.txt").exists());
    }

    #[tokio::test]
    async fn test_empty_remote_folder() {
        let remote = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        let server = spawn_store(remote.path().to_path_buf()).await;

        let report = fetch(&session(&server, &local, None)).await.unwrap();

        assert!(report.downloaded.is_empty());
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn test_list_error_status() {
        let remote = TempDir::new().unwrap();
        let server = spawn_store(remote.path().to_path_buf()).await;

        let result = RemoteStore::new(&server).unwrap().list("..").await;

        assert!(matches!(result, Err(FetchError::Status(status)) if status == StatusCode::BAD_REQUEST));
    }

    #[tokio::test]
    async fn test_unsafe_remote_name_is_not_requested() {
        let local = TempDir::new().unwrap();
        let remote = RemoteStore::new("http://127.0.0.1:9").unwrap();

        let result = remote.download("5", "../escape.txt", local.path()).await;

        assert!(matches!(result, Err(FetchError::UnsafeFileName(_))));
        assert_eq!(std::fs::read_dir(local.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_server_url_validation() {
        for bad in ["", "   ", "not a url", "ftp://example.com", "file:///tmp"] {
            assert!(matches!(parse_server_url(bad), Err(FetchError::InvalidUrl(_))), "{bad}");
        }
        assert!(parse_server_url(" https://abc.trycloudflare.com ").is_ok());
    }

    #[test]
    fn test_endpoints_keep_base_path() {
        let root = RemoteStore::new("http://localhost:9090/").unwrap();
        assert_eq!(root.endpoint("/files/list").as_str(), "http://localhost:9090/files/list");

        let nested = RemoteStore::new("http://example.com/relay").unwrap();
        assert_eq!(nested.endpoint("/files/list").as_str(), "http://example.com/relay/files/list");
    }
}
