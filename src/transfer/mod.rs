//! Serial stream file ingestion.
//!
//! A single byte stream carries newline-terminated control lines and raw
//! file payloads back to back:
//!
//! ```text
//! TRANSFER_START
//! FILE_START:<name>
//! FILE_SIZE:<n>        followed by exactly n raw bytes
//! ...
//! TRANSFER_END
//! ```
//!
//! The receiver alternates between line mode, which reads strictly one byte
//! at a time so it never consumes payload, and payload mode, which copies
//! exactly the declared number of bytes into the destination file.

mod events;
mod sink;

pub use events::{EventSink, TransferEvent};
pub use sink::{FileSink, ReceivedFile};

use std::borrow::Cow;
use std::fs;
use std::io::{self, ErrorKind, Read};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ReceiverConfig;
use crate::protocol::{validate_file_name, ControlLine, ProtocolError};

/// Why a `receive` call gave up
#[derive(Debug, Error)]
pub enum AbortReason {
    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("bad file size")]
    BadFileSize(String),

    #[error("truncated file")]
    TruncatedFile {
        name: String,
        received: u64,
        expected: u64,
    },

    #[error("missing file name")]
    MissingFileName,

    #[error("unsafe file name")]
    UnsafeFileName(String),

    #[error("control line too long")]
    LineTooLong,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl AbortReason {
    /// Extra context for logs beyond the one-line reason
    pub fn detail(&self) -> Option<String> {
        match self {
            AbortReason::BadFileSize(text) => Some(format!("size field {:?}", text)),
            AbortReason::TruncatedFile {
                name,
                received,
                expected,
            } => Some(format!("{}: received {} of {} bytes", name, received, expected)),
            AbortReason::UnsafeFileName(name) => Some(format!("file name {:?}", name)),
            AbortReason::Io(err) => Some(format!("{:?}", err.kind())),
            AbortReason::UnexpectedEof | AbortReason::MissingFileName | AbortReason::LineTooLong => None,
        }
    }
}

impl From<ProtocolError> for AbortReason {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::BadFileSize(text) => AbortReason::BadFileSize(text),
            ProtocolError::UnsafeFileName(name) => AbortReason::UnsafeFileName(name),
        }
    }
}

/// Result of one `receive` call
#[derive(Debug)]
pub enum Outcome {
    /// `TRANSFER_END` was seen with no file in flight
    Completed { files: Vec<ReceivedFile> },

    /// The session ended early. Files completed before the abort stay on
    /// disk, as does the partial file being written at the time.
    Aborted(AbortReason),
}

impl Outcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed { .. })
    }
}

enum Mode {
    Line,
    Payload(FileSink),
}

/// Reconstructs files from a framed byte stream
pub struct StreamFileReceiver<S> {
    config: ReceiverConfig,
    events: S,
}

impl<S: EventSink> StreamFileReceiver<S> {
    pub fn new(events: S) -> Self {
        Self::with_config(ReceiverConfig::default(), events)
    }

    pub fn with_config(config: ReceiverConfig, events: S) -> Self {
        Self { config, events }
    }

    /// Consume `stream` until `TRANSFER_END` or the first failure, writing
    /// files into `target_dir`.
    ///
    /// Blocks on every read. The stream is dropped before returning.
    pub fn receive<R: Read>(&mut self, stream: R, target_dir: &Path) -> Outcome {
        match self.run(stream, target_dir) {
            Ok(files) => {
                info!(files = files.len(), dir = %target_dir.display(), "transfer complete");
                self.events.emit(TransferEvent::Completed { files: files.len() });
                Outcome::Completed { files }
            }
            Err(reason) => {
                warn!(%reason, detail = ?reason.detail(), "transfer aborted");
                self.events.emit(TransferEvent::Aborted {
                    reason: reason.to_string(),
                });
                Outcome::Aborted(reason)
            }
        }
    }

    fn run<R: Read>(&mut self, mut stream: R, target_dir: &Path) -> Result<Vec<ReceivedFile>, AbortReason> {
        fs::create_dir_all(target_dir)?;

        let mut files = Vec::new();
        let mut pending_name: Option<String> = None;
        let mut line = Vec::new();
        let mut buffer = vec![0u8; self.config.chunk_size.max(1)];
        let mut mode = Mode::Line;

        loop {
            mode = match mode {
                Mode::Line => {
                    let text = self.read_line(&mut stream, &mut line)?;
                    debug!(line = %text, "control line");

                    match ControlLine::parse(&text)? {
                        ControlLine::TransferStart => {
                            self.events.emit(TransferEvent::Started);
                            Mode::Line
                        }
                        ControlLine::FileStart(name) => {
                            validate_file_name(&name)?;
                            self.events.emit(TransferEvent::FileAnnounced { name: name.clone() });
                            pending_name = Some(name);
                            Mode::Line
                        }
                        ControlLine::FileSize(size) => {
                            let name = pending_name.take().ok_or(AbortReason::MissingFileName)?;
                            let path = target_dir.join(&name);
                            let sink = FileSink::create(name, path, size)?;
                            debug!(file = %sink.name(), path = %sink.path().display(), size, "file opened");
                            self.events.emit(TransferEvent::FileOpened {
                                name: sink.name().to_string(),
                                size,
                            });

                            if sink.is_complete() {
                                files.push(self.finish_file(sink)?);
                                Mode::Line
                            } else {
                                Mode::Payload(sink)
                            }
                        }
                        ControlLine::TransferEnd => return Ok(files),
                        ControlLine::Unknown => Mode::Line,
                    }
                }
                Mode::Payload(mut sink) => {
                    let want = sink.remaining().min(buffer.len() as u64) as usize;
                    let read = match read_retrying(&mut stream, &mut buffer[..want]) {
                        Ok(n) if n > 0 => n,
                        result => {
                            if let Err(err) = result {
                                debug!(error = %err, "read failed mid-file");
                            }
                            return Err(AbortReason::TruncatedFile {
                                name: sink.name().to_string(),
                                received: sink.bytes_written(),
                                expected: sink.expected_size(),
                            });
                        }
                    };

                    sink.write_chunk(&buffer[..read])?;
                    self.events.emit(TransferEvent::Progress {
                        name: sink.name().to_string(),
                        received: sink.bytes_written(),
                        total: sink.expected_size(),
                    });

                    if sink.is_complete() {
                        files.push(self.finish_file(sink)?);
                        Mode::Line
                    } else {
                        Mode::Payload(sink)
                    }
                }
            };
        }
    }

    /// Read up to the next `\n`, one byte at a time, returning the trimmed text
    fn read_line<R: Read>(&self, stream: &mut R, line: &mut Vec<u8>) -> Result<String, AbortReason> {
        line.clear();
        let mut byte = [0u8; 1];

        loop {
            match read_retrying(stream, &mut byte) {
                Ok(0) => return Err(AbortReason::UnexpectedEof),
                Ok(_) => {}
                Err(err) if is_end_of_stream(err.kind()) => return Err(AbortReason::UnexpectedEof),
                Err(err) => return Err(AbortReason::Io(err)),
            }

            if byte[0] == b'\n' {
                return Ok(decode_line(line).trim().to_string());
            }
            if line.len() >= self.config.max_line_len {
                return Err(AbortReason::LineTooLong);
            }
            line.push(byte[0]);
        }
    }

    fn finish_file(&mut self, sink: FileSink) -> Result<ReceivedFile, AbortReason> {
        let received = sink.finalize()?;
        info!(file = %received.name, size = received.size, "file received");
        self.events.emit(TransferEvent::FileReceived {
            name: received.name.clone(),
            size: received.size,
        });
        Ok(received)
    }
}

/// UTF-8 when the bytes decode as such, otherwise one char per byte (Latin-1)
fn decode_line(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => Cow::Owned(bytes.iter().map(|&b| char::from(b)).collect()),
    }
}

fn read_retrying<R: Read>(stream: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match stream.read(buf) {
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

/// Read failures that mean the link went quiet or away
fn is_end_of_stream(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::TimedOut
            | ErrorKind::WouldBlock
            | ErrorKind::UnexpectedEof
            | ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
    )
}
