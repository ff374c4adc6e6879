mod cli;
mod config;
mod console;
mod fetch;
mod protocol;
mod serial;
mod store;
mod transfer;
mod tunnel;

use anyhow::{anyhow, Context, Result};
use cli::{Cli, Commands};
use config::{FetchSession, ReceiveSession, SerialSettings, StoreSettings, TunnelSettings};
use std::process::ExitCode;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use transfer::{Outcome, StreamFileReceiver};
use tunnel::Tunnel;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Receive {
            port,
            folder,
            baud,
            timeout,
            root,
        } => {
            let serial = SerialSettings {
                baud_rate: baud,
                read_timeout: timeout,
                ..SerialSettings::new(port)
            };
            let session =
                ReceiveSession::new(serial, &folder, root).map_err(|e| anyhow!("Transfer aborted: {}", e))?;

            let outcome = receive_files(session).await?;
            if let Outcome::Completed { files } = &outcome {
                for file in files {
                    println!("  {} ({} bytes)", file.path.display(), file.size);
                }
            }
            if !outcome.is_completed() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Serve {
            listen_port,
            root,
            tunnel,
            cloudflared,
        } => {
            let settings = StoreSettings {
                listen_port,
                ..StoreSettings::new(root)
            };
            let tunnel = tunnel.then(|| TunnelSettings {
                binary: cloudflared,
                ..TunnelSettings::new(listen_port)
            });
            serve(settings, tunnel).await?;
        }
        Commands::Fetch {
            url,
            source,
            dest,
            file,
            root,
        } => {
            let session =
                FetchSession::new(url, &source, &dest, file, root).map_err(|e| anyhow!("Fetch aborted: {}", e))?;
            if !fetch_files(&session).await? {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Ports => list_ports()?,
    }

    Ok(ExitCode::SUCCESS)
}

/// `RUST_LOG` wins; otherwise `info`, or `debug` with `--verbose`.
/// User-facing status goes through the console renderer.
fn init_logging(verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_log_filter(verbose))),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn default_log_filter(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}

async fn receive_files(session: ReceiveSession) -> Result<Outcome> {
    println!("⚡ filerelay - Serial Receiver");
    println!("═══════════════════════════════════════");

    let port = serial::open(&session.serial)?;
    let target = session.target_dir();

    println!("Listening on {}", session.serial.port);
    println!("Files will be saved to folder: {}", session.folder_id);
    println!();

    // the state machine blocks on every read, so it gets its own thread
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let worker = tokio::task::spawn_blocking(move || {
        let mut receiver = StreamFileReceiver::new(events_tx);
        receiver.receive(port, &target)
    });

    console::render_events(events_rx).await;
    worker.await.context("Receiver worker failed")
}

async fn serve(settings: StoreSettings, tunnel_settings: Option<TunnelSettings>) -> Result<()> {
    println!("⚡ filerelay - File Store");
    println!("═══════════════════════════════════════");

    let listener = store::bind(&settings).await?;
    println!("Listening on: {}", listener.local_addr()?);
    println!("Serving files from: {}", settings.root().display());

    let mut tunnel = match tunnel_settings {
        Some(tunnel_settings) => match Tunnel::start(&tunnel_settings).await {
            Ok(tunnel) => {
                println!("Tunnel URL: \x1b[1;32m{}\x1b[0m", tunnel.url());
                Some(tunnel)
            }
            Err(e) => {
                warn!(error = %e, "tunnel unavailable, serving locally only");
                eprintln!("Tunnel unavailable: {}", e);
                None
            }
        },
        None => None,
    };
    println!();

    store::run_file_store(listener, &settings, shutdown_signal()).await?;

    if let Some(tunnel) = tunnel.as_mut() {
        tunnel.shutdown().await?;
    }
    Ok(())
}

/// Returns whether every requested file arrived
async fn fetch_files(session: &FetchSession) -> Result<bool> {
    println!("⚡ filerelay - Fetch");
    println!("═══════════════════════════════════════");
    println!("Source: {} (folder {})", session.server, session.source);
    println!("Files will be saved to folder: {}", session.dest);
    println!();

    let report = fetch::fetch(session)
        .await
        .with_context(|| format!("Could not fetch from {}", session.server))?;

    for file in &report.downloaded {
        println!("Downloaded: {} ({} bytes)", file.name, file.size);
    }
    for (name, e) in &report.failed {
        eprintln!("Failed to download: {} ({})", name, e);
    }
    if report.downloaded.is_empty() && report.failed.is_empty() {
        println!("No files in folder {}.", session.source);
    }

    Ok(report.failed.is_empty())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

fn list_ports() -> Result<()> {
    let ports = serial::list_ports()?;
    if ports.is_empty() {
        println!("No serial ports detected. Is your device connected?");
        return Ok(());
    }

    for port in ports {
        println!("{:<24} {}", port.name, port.description);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_filter() {
        assert_eq!(default_log_filter(false), "info");
        assert_eq!(default_log_filter(true), "debug");
    }
}
