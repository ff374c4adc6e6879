use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::protocol::validate_file_name;

pub const DEFAULT_BAUD_RATE: u32 = 921_600;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_STORAGE_ROOT: &str = "uploads";
pub const DEFAULT_HTTP_PORT: u16 = 9090;
pub const DEFAULT_CLOUDFLARED: &str = "cloudflared";
pub const DEFAULT_TUNNEL_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

const CHUNK_SIZE: usize = 4096;
const MAX_LINE_LEN: usize = 64 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("No Folder ID provided.")]
    MissingFolderId,

    #[error("Folder ID {0:?} is not a plain directory name.")]
    UnsafeFolderId(String),
}

/// Tuning for the stream state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverConfig {
    /// Upper bound for one payload read
    pub chunk_size: usize,
    /// Longest control line accepted before giving up on the stream
    pub max_line_len: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            max_line_len: MAX_LINE_LEN,
        }
    }
}

/// How to open the serial link. Always 8 data bits, no parity, 1 stop bit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
}

impl SerialSettings {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// Everything one serial receive run needs
#[derive(Debug, Clone)]
pub struct ReceiveSession {
    pub serial: SerialSettings,
    pub folder_id: String,
    pub root: PathBuf,
}

impl ReceiveSession {
    pub fn new(serial: SerialSettings, folder_id: &str, root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let folder_id = validate_folder_id(folder_id)?;

        Ok(Self {
            serial,
            folder_id: folder_id.to_string(),
            root: root.into(),
        })
    }

    /// `<root>/<folder id>`
    pub fn target_dir(&self) -> PathBuf {
        self.root.join(&self.folder_id)
    }
}

/// Trim a folder id and make sure it names a single directory
pub fn validate_folder_id(folder_id: &str) -> Result<&str, ConfigError> {
    let trimmed = folder_id.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::MissingFolderId);
    }
    validate_file_name(trimmed).map_err(|_| ConfigError::UnsafeFolderId(trimmed.to_string()))
}

/// Everything one fetch from a remote store needs
#[derive(Debug, Clone)]
pub struct FetchSession {
    pub server: String,
    pub source: String,
    pub dest: String,
    /// Only this file; otherwise everything the source folder lists
    pub file: Option<String>,
    pub root: PathBuf,
}

impl FetchSession {
    pub fn new(
        server: impl Into<String>,
        source: &str,
        dest: &str,
        file: Option<String>,
        root: impl Into<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let source = validate_folder_id(source)?;
        let dest = validate_folder_id(dest)?;

        Ok(Self {
            server: server.into(),
            source: source.to_string(),
            dest: dest.to_string(),
            file,
            root: root.into(),
        })
    }

    /// `<root>/<dest>`
    pub fn target_dir(&self) -> PathBuf {
        self.root.join(&self.dest)
    }
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub root: PathBuf,
    pub listen_port: u16,
}

impl StoreSettings {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            listen_port: DEFAULT_HTTP_PORT,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[derive(Debug, Clone)]
pub struct TunnelSettings {
    pub binary: PathBuf,
    pub local_port: u16,
    pub startup_timeout: Duration,
}

impl TunnelSettings {
    pub fn new(local_port: u16) -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_CLOUDFLARED),
            local_port,
            startup_timeout: DEFAULT_TUNNEL_STARTUP_TIMEOUT,
        }
    }

    pub fn local_url(&self) -> String {
        format!("http://localhost:{}", self.local_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_defaults() {
        let serial = SerialSettings::new("/dev/ttyUSB0");
        assert_eq!(serial.baud_rate, 921_600);
        assert_eq!(serial.read_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_target_dir_uses_trimmed_folder_id() {
        let session = ReceiveSession::new(SerialSettings::new("COM3"), "  42 ", "uploads").unwrap();
        assert_eq!(session.folder_id, "42");
        assert_eq!(session.target_dir(), PathBuf::from("uploads").join("42"));
    }

    #[test]
    fn test_folder_id_validation() {
        assert_eq!(validate_folder_id("   "), Err(ConfigError::MissingFolderId));
        assert_eq!(
            validate_folder_id("../etc"),
            Err(ConfigError::UnsafeFolderId("../etc".to_string()))
        );
        assert_eq!(validate_folder_id("alpha"), Ok("alpha"));
    }

    #[test]
    fn test_fetch_session_validates_both_folders() {
        let session = FetchSession::new("http://h", " 5", "9 ", None, "uploads").unwrap();
        assert_eq!(session.source, "5");
        assert_eq!(session.target_dir(), PathBuf::from("uploads").join("9"));

        assert!(matches!(
            FetchSession::new("http://h", "", "9", None, "uploads"),
            Err(ConfigError::MissingFolderId)
        ));
        assert!(matches!(
            FetchSession::new("http://h", "5", "a/b", None, "uploads"),
            Err(ConfigError::UnsafeFolderId(_))
        ));
    }

    #[test]
    fn test_tunnel_local_url() {
        assert_eq!(TunnelSettings::new(9090).local_url(), "http://localhost:9090");
    }
}
