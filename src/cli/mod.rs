use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{DEFAULT_BAUD_RATE, DEFAULT_CLOUDFLARED, DEFAULT_HTTP_PORT, DEFAULT_STORAGE_ROOT};

#[derive(Parser, Debug)]
#[command(name = "filerelay")]
#[command(about = "⚡ Personal file relay: serial receiver, REST file store and public tunnel", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Receive files streamed over a serial port
    Receive {
        /// Serial port to listen on (e.g. /dev/ttyUSB0, COM3)
        #[arg(long, short = 'p')]
        port: String,

        /// Folder ID the received files are saved under
        #[arg(long, short = 'f')]
        folder: String,

        /// Baud rate (8 data bits, no parity, 1 stop bit)
        #[arg(long, short = 'b', default_value_t = DEFAULT_BAUD_RATE)]
        baud: u32,

        /// Give up after the link has been idle this long (e.g. 5s, 500ms)
        #[arg(long, short = 't', default_value = "5s", value_parser = humantime::parse_duration)]
        timeout: Duration,

        /// Storage root shared with the file store
        #[arg(long, env = "FILERELAY_ROOT", default_value = DEFAULT_STORAGE_ROOT)]
        root: PathBuf,
    },

    /// Serve the storage root over HTTP
    Serve {
        /// Local port for the file store
        #[arg(long, short = 'l', default_value_t = DEFAULT_HTTP_PORT)]
        listen_port: u16,

        /// Storage root shared with the serial receiver
        #[arg(long, env = "FILERELAY_ROOT", default_value = DEFAULT_STORAGE_ROOT)]
        root: PathBuf,

        /// Also expose the store through a cloudflared quick tunnel
        #[arg(long)]
        tunnel: bool,

        /// Path to the cloudflared binary
        #[arg(long, default_value = DEFAULT_CLOUDFLARED)]
        cloudflared: PathBuf,
    },

    /// Download files from another file store into a local folder
    Fetch {
        /// Base URL of the remote store (e.g. https://abc.trycloudflare.com)
        #[arg(long, short = 'u')]
        url: String,

        /// Remote folder ID to download from
        #[arg(long, short = 's')]
        source: String,

        /// Local folder ID the files are saved under
        #[arg(long, short = 'd')]
        dest: String,

        /// Download only this file instead of the whole folder
        #[arg(long)]
        file: Option<String>,

        /// Local storage root
        #[arg(long, env = "FILERELAY_ROOT", default_value = DEFAULT_STORAGE_ROOT)]
        root: PathBuf,
    },

    /// List serial ports
    Ports,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receive_defaults() {
        let cli = Cli::try_parse_from(["filerelay", "receive", "--port", "COM3", "--folder", "12"]).unwrap();

        match cli.command {
            Commands::Receive { port, folder, baud, timeout, .. } => {
                assert_eq!(port, "COM3");
                assert_eq!(folder, "12");
                assert_eq!(baud, 921_600);
                assert_eq!(timeout, Duration::from_secs(5));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_receive_overrides() {
        let cli = Cli::try_parse_from([
            "filerelay", "-v", "receive", "-p", "/dev/ttyUSB0", "-f", "a", "-b", "115200", "-t", "750ms", "--root",
            "/srv/files",
        ])
        .unwrap();

        assert!(cli.verbose);
        match cli.command {
            Commands::Receive { baud, timeout, root, .. } => {
                assert_eq!(baud, 115_200);
                assert_eq!(timeout, Duration::from_millis(750));
                assert_eq!(root, PathBuf::from("/srv/files"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_serve_flags() {
        let cli = Cli::try_parse_from(["filerelay", "serve", "--tunnel", "-l", "8080"]).unwrap();

        match cli.command {
            Commands::Serve { listen_port, tunnel, cloudflared, .. } => {
                assert_eq!(listen_port, 8080);
                assert!(tunnel);
                assert_eq!(cloudflared, PathBuf::from("cloudflared"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_fetch_args() {
        let cli = Cli::try_parse_from([
            "filerelay", "fetch", "-u", "http://peer:9090", "-s", "5", "-d", "9", "--file", "a.txt",
        ])
        .unwrap();

        match cli.command {
            Commands::Fetch { url, source, dest, file, .. } => {
                assert_eq!(url, "http://peer:9090");
                assert_eq!(source, "5");
                assert_eq!(dest, "9");
                assert_eq!(file.as_deref(), Some("a.txt"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_receive_requires_port_and_folder() {
        assert!(Cli::try_parse_from(["filerelay", "receive", "--folder", "1"]).is_err());
        assert!(Cli::try_parse_from(["filerelay", "receive", "--port", "COM1"]).is_err());
    }
}
