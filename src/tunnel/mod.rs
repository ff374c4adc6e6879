//! Public tunnel through an external `cloudflared` quick tunnel.

use anyhow::{Context, Result};
use regex::Regex;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::TunnelSettings;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("{0} not found; install cloudflared or point --cloudflared at it")]
    BinaryMissing(String),

    #[error("failed to start cloudflared: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("cloudflared exited before the tunnel URL became available")]
    ProcessExited,

    #[error("timed out after {0:?} waiting for the tunnel URL")]
    UrlTimeout(Duration),
}

/// Running `cloudflared` process and the public URL it announced
pub struct Tunnel {
    process: Child,
    url: String,
}

impl Tunnel {
    /// Spawn `cloudflared tunnel --url http://localhost:<port>` and wait for
    /// it to print its `trycloudflare.com` address
    #[tracing::instrument(skip_all, fields(port = settings.local_port))]
    pub async fn start(settings: &TunnelSettings) -> Result<Self, TunnelError> {
        let mut child = Command::new(&settings.binary)
            .args(["tunnel", "--url", &settings.local_url()])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                if err.kind() == std::io::ErrorKind::NotFound {
                    TunnelError::BinaryMissing(settings.binary.display().to_string())
                } else {
                    TunnelError::Spawn(err)
                }
            })?;

        // cloudflared logs to stderr, but scan both streams
        let (url_tx, mut url_rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(scan_output(stdout, url_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(scan_output(stderr, url_tx));
        }

        let url = match tokio::time::timeout(settings.startup_timeout, url_rx.recv()).await {
            Ok(Some(url)) => url,
            Ok(None) => {
                kill_quietly(&mut child).await;
                return Err(TunnelError::ProcessExited);
            }
            Err(_) => {
                kill_quietly(&mut child).await;
                return Err(TunnelError::UrlTimeout(settings.startup_timeout));
            }
        };

        info!(%url, "tunnel ready");
        Ok(Self { process: child, url })
    }

    /// Public URL forwarding to the local port
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Stop the `cloudflared` process
    pub async fn shutdown(&mut self) -> Result<()> {
        if let Err(e) = self.process.start_kill() {
            // usually means the process already exited
            warn!("Failed to signal tunnel process: {}", e);
            return Ok(());
        }

        match tokio::time::timeout(SHUTDOWN_GRACE, self.process.wait()).await {
            Ok(status) => {
                let status = status.context("Failed to wait for tunnel process")?;
                info!(%status, "tunnel process exited");
            }
            Err(_) => warn!("Tunnel process did not exit after {:?}", SHUTDOWN_GRACE),
        }
        Ok(())
    }
}

/// Pull the quick-tunnel URL out of one line of `cloudflared` output
pub fn extract_tunnel_url(line: &str) -> Option<&str> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"https://[a-zA-Z0-9.-]+\.trycloudflare\.com").ok())
        .as_ref()?;
    pattern.find(line).map(|m| m.as_str())
}

/// Log every line and report URLs; keeps draining so the pipe never fills
async fn scan_output<R>(output: R, urls: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(output).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "cloudflared", "{}", line);
        if let Some(url) = extract_tunnel_url(&line) {
            let _ = urls.send(url.to_string());
        }
    }
}

async fn kill_quietly(child: &mut Child) {
    if let Err(e) = child.kill().await {
        warn!("Failed to kill tunnel process after startup failure: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_extract_url_from_banner() {
        let line = "2024-05-01T10:00:00Z INF |  https://quiet-river-42.trycloudflare.com                 |";
        assert_eq!(
            extract_tunnel_url(line),
            Some("https://quiet-river-42.trycloudflare.com")
        );
    }

    #[test]
    fn test_extract_url_ignores_other_hosts() {
        assert_eq!(extract_tunnel_url("INF Requesting new quick Tunnel on trycloudflare.com..."), None);
        assert_eq!(extract_tunnel_url("see https://developers.cloudflare.com/docs"), None);
        assert_eq!(extract_tunnel_url("http://plain.trycloudflare.com"), None);
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let settings = TunnelSettings {
            binary: PathBuf::from("/nonexistent/filerelay-cloudflared"),
            ..TunnelSettings::new(9090)
        };

        match Tunnel::start(&settings).await {
            Err(TunnelError::BinaryMissing(name)) => assert!(name.contains("filerelay-cloudflared")),
            Err(other) => panic!("expected missing binary, got {other}"),
            Ok(_) => panic!("tunnel should not start"),
        }
    }

    #[tokio::test]
    async fn test_scan_output_reports_url() {
        let output: &[u8] = b"INF starting\nINF |  https://abc-def.trycloudflare.com  |\nINF connected\n";
        let (tx, mut rx) = mpsc::unbounded_channel();

        scan_output(output, tx).await;

        assert_eq!(rx.recv().await.as_deref(), Some("https://abc-def.trycloudflare.com"));
        assert_eq!(rx.recv().await, None);
    }
}
