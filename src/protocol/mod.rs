use std::fmt;
use std::path::{Component, Path};
use thiserror::Error;

pub const TRANSFER_START: &str = "TRANSFER_START";
pub const TRANSFER_END: &str = "TRANSFER_END";
pub const FILE_START_PREFIX: &str = "FILE_START:";
pub const FILE_SIZE_PREFIX: &str = "FILE_SIZE:";

/// Control lines interleaved with raw payload bytes on the serial stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlLine {
    /// Opens a transfer session
    TransferStart,

    /// Names the next file
    FileStart(String),

    /// Declares the byte length of the named file; exactly this many raw
    /// bytes follow the line terminator
    FileSize(u64),

    /// Closes the transfer session
    TransferEnd,

    /// Anything else. Kept for forward compatibility (`FILE_END`, blank lines)
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("bad file size: {0:?}")]
    BadFileSize(String),

    #[error("unsafe file name: {0:?}")]
    UnsafeFileName(String),
}

impl ControlLine {
    /// Classify an already-trimmed control line
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        if line == TRANSFER_START {
            return Ok(ControlLine::TransferStart);
        }
        if line == TRANSFER_END {
            return Ok(ControlLine::TransferEnd);
        }
        if let Some(name) = line.strip_prefix(FILE_START_PREFIX) {
            return Ok(ControlLine::FileStart(name.trim().to_string()));
        }
        if let Some(size) = line.strip_prefix(FILE_SIZE_PREFIX) {
            let size = size.trim();
            return size
                .parse::<u64>()
                .map(ControlLine::FileSize)
                .map_err(|_| ProtocolError::BadFileSize(size.to_string()));
        }
        Ok(ControlLine::Unknown)
    }
}

impl fmt::Display for ControlLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlLine::TransferStart => f.write_str(TRANSFER_START),
            ControlLine::FileStart(name) => write!(f, "{}{}", FILE_START_PREFIX, name),
            ControlLine::FileSize(size) => write!(f, "{}{}", FILE_SIZE_PREFIX, size),
            ControlLine::TransferEnd => f.write_str(TRANSFER_END),
            ControlLine::Unknown => Ok(()),
        }
    }
}

/// Accept only a single plain path component.
///
/// Names arrive from the serial link and the HTTP API, both untrusted, and
/// are joined onto a storage directory.
pub fn validate_file_name(name: &str) -> Result<&str, ProtocolError> {
    let unsafe_name = || ProtocolError::UnsafeFileName(name.to_string());

    if name.is_empty() || name.contains(['/', '\\', '\0']) {
        return Err(unsafe_name());
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name),
        _ => Err(unsafe_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keywords() {
        assert_eq!(ControlLine::parse("TRANSFER_START"), Ok(ControlLine::TransferStart));
        assert_eq!(ControlLine::parse("TRANSFER_END"), Ok(ControlLine::TransferEnd));
        assert_eq!(
            ControlLine::parse("FILE_START: photo 01.jpg "),
            Ok(ControlLine::FileStart("photo 01.jpg".to_string()))
        );
        assert_eq!(ControlLine::parse("FILE_SIZE: 1024"), Ok(ControlLine::FileSize(1024)));
    }

    #[test]
    fn test_parse_bad_sizes() {
        for bad in ["FILE_SIZE:notanumber", "FILE_SIZE:-1", "FILE_SIZE:", "FILE_SIZE:1.5"] {
            assert!(
                matches!(ControlLine::parse(bad), Err(ProtocolError::BadFileSize(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_unknown_lines() {
        for line in ["", "FILE_END", "transfer_start", "HELLO", "FILE_STARTx"] {
            assert_eq!(ControlLine::parse(line), Ok(ControlLine::Unknown));
        }
    }

    #[test]
    fn test_display_is_wire_form() {
        let line = ControlLine::FileSize(5);
        assert_eq!(line.to_string(), "FILE_SIZE:5");
        assert_eq!(ControlLine::parse(&line.to_string()), Ok(line));
    }

    #[test]
    fn test_validate_file_name() {
        assert_eq!(validate_file_name("a.txt"), Ok("a.txt"));
        assert_eq!(validate_file_name("..hidden"), Ok("..hidden"));

        for bad in ["", ".", "..", "../etc/passwd", "a/b", "/abs", "dir\\x", "nul\0"] {
            assert!(validate_file_name(bad).is_err(), "{bad:?} should be rejected");
        }
    }
}
