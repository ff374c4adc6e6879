use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// A file that arrived in full, over the serial link or from a remote store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Write-only destination for one declared file.
///
/// Owned by the receiver while its payload is streaming in; dropping it
/// closes the handle and leaves whatever was written on disk.
#[derive(Debug)]
pub struct FileSink {
    name: String,
    path: PathBuf,
    file: File,
    bytes_written: u64,
    expected_size: u64,
}

impl FileSink {
    /// Create (or truncate) the destination file
    pub fn create(name: String, path: PathBuf, expected_size: u64) -> io::Result<Self> {
        let file = File::create(&path)?;

        Ok(Self {
            name,
            path,
            file,
            bytes_written: 0,
            expected_size,
        })
    }

    /// Write a chunk of payload
    pub fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data)?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn expected_size(&self) -> u64 {
        self.expected_size
    }

    /// Bytes still owed by the stream
    pub fn remaining(&self) -> u64 {
        self.expected_size.saturating_sub(self.bytes_written)
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_written >= self.expected_size
    }

    /// Flush and close the file
    pub fn finalize(mut self) -> io::Result<ReceivedFile> {
        self.file.flush()?;
        self.file.sync_all()?;

        Ok(ReceivedFile {
            name: self.name,
            path: self.path,
            size: self.bytes_written,
        })
    }
}
