//! Append-only destination file for encoded records

use crate::codec;
use crate::error::{RecorderError, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Options controlling how an existing destination is reopened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkOptions {
    /// Cut an incomplete trailing frame left by a crash before appending
    pub repair_torn_tail: bool,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            repair_torn_tail: true,
        }
    }
}

/// Owns the single append handle to a record file
///
/// `append` only buffers; `flush` pushes the buffer to the file and syncs it
/// to stable storage. After any failed write the sink is faulted and refuses
/// further appends, since the tail of the file may hold a partial frame.
#[derive(Debug)]
pub struct RecordSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    faulted: bool,
    pending: usize,
    bytes_written: u64,
}

impl RecordSink {
    /// Open `path` for appending with default options
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, SinkOptions::default())
    }

    pub fn open_with<P: AsRef<Path>>(path: P, options: SinkOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.as_os_str().is_empty() {
            return Err(RecorderError::InvalidDestination {
                path,
                reason: "path is empty".to_string(),
            });
        }
        if path.is_dir() {
            return Err(RecorderError::InvalidDestination {
                path,
                reason: "path is a directory".to_string(),
            });
        }

        let config_err = |source: io::Error| RecorderError::Config {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(config_err)?;
        }

        if options.repair_torn_tail {
            Self::repair_tail(&path)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(config_err)?;

        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
            faulted: false,
            pending: 0,
            bytes_written: 0,
        })
    }

    /// Truncate a torn trailing frame from an existing file
    ///
    /// Refuses to touch a file with a corrupt frame in the middle, as
    /// truncating there would drop records that are still readable.
    fn repair_tail(path: &Path) -> Result<()> {
        let config_err = |source: io::Error| RecorderError::Config {
            path: path.to_path_buf(),
            source,
        };
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(config_err(e)),
        };

        let report = codec::scan_reader(BufReader::new(file)).map_err(config_err)?;
        if let Some(source) = report.corruption {
            return Err(RecorderError::CorruptDestination {
                path: path.to_path_buf(),
                source,
            });
        }
        if report.torn_tail.is_some() {
            truncate_file(path, report.valid_len as u64).map_err(config_err)?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Bytes handed to `append` but not yet flushed
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Total bytes accepted by `append` since open
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Write encoded bytes at the end of the destination
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        let writer = self.writable()?;
        if let Err(e) = writer.write_all(bytes) {
            self.faulted = true;
            return Err(e.into());
        }
        self.pending += bytes.len();
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    /// Force buffered bytes to stable storage
    pub fn flush(&mut self) -> Result<()> {
        if self.writer.is_none() {
            return Ok(());
        }
        if self.faulted {
            return Err(faulted_error());
        }
        if self.pending == 0 {
            return Ok(());
        }

        let result = match self.writer.as_mut() {
            Some(writer) => writer.flush().and_then(|_| writer.get_ref().sync_data()),
            None => Ok(()),
        };
        match result {
            Ok(()) => {
                self.pending = 0;
                Ok(())
            }
            Err(e) => {
                self.faulted = true;
                Err(e.into())
            }
        }
    }

    /// Flush, then release the handle; a second call does nothing
    pub fn close(&mut self) -> Result<()> {
        if self.writer.is_none() {
            return Ok(());
        }
        let flushed = self.flush();
        // The handle is released even when the final flush failed
        self.writer = None;
        flushed
    }

    fn writable(&mut self) -> Result<&mut BufWriter<File>> {
        if self.faulted {
            return Err(faulted_error());
        }
        self.writer.as_mut().ok_or_else(|| {
            RecorderError::Io(io::Error::new(io::ErrorKind::NotConnected, "record sink is closed"))
        })
    }
}

fn faulted_error() -> RecorderError {
    RecorderError::Io(io::Error::new(
        io::ErrorKind::Other,
        "record sink faulted after a failed write",
    ))
}

/// Cut `path` down to `len` bytes and sync the result
pub fn truncate_file(path: &Path, len: u64) -> io::Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(len)?;
    file.sync_all()
}
