//! Abstract binary input/output streams.
//!
//! The reader performs its own buffering, so file streams are plain
//! unbuffered `std::fs::File` handles. `skip` falls back to
//! read-and-discard for non-seekable sources such as pipes.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{ProcessingError, Result};

/// Requirements for input streams used by
/// [`crate::read_stream::ReadBinaryStream`].
pub trait InputStream {
    /// True if the stream is unavailable or the previous read failed (not
    /// including reaching EOF). Not influenced by `tell` or `skip`.
    fn is_error(&mut self) -> bool;

    /// True if the previous read tried to go beyond the end of the
    /// stream.
    fn is_eof(&mut self) -> bool;

    fn is_good(&mut self) -> bool {
        !self.is_error() && !self.is_eof()
    }

    /// Current stream position, if supported.
    fn tell(&mut self) -> Option<u64>;

    /// Seek forward relative to the current offset. Returns true on
    /// success.
    fn skip(&mut self, bytes: u64) -> bool;

    /// Read into `buffer`, up to its size; returns the number of bytes
    /// read.
    fn read(&mut self, buffer: &mut [u8]) -> u64;
}

/// An input stream containing no bytes.
pub struct NullInputStream;

impl InputStream for NullInputStream {
    fn is_error(&mut self) -> bool {
        false
    }

    fn is_eof(&mut self) -> bool {
        true
    }

    fn tell(&mut self) -> Option<u64> {
        Some(0)
    }

    fn skip(&mut self, bytes: u64) -> bool {
        bytes == 0
    }

    fn read(&mut self, _buffer: &mut [u8]) -> u64 {
        0
    }
}

/// An unbuffered binary file input stream.
pub struct FileInputStream {
    file: File,
    error: bool,
    eof: bool,
}

impl FileInputStream {
    /// Open `path` and seek `start` bytes in.
    pub fn open(path: impl AsRef<Path>, start: u64) -> Result<Self> {
        let file = File::open(path)?;
        let mut stream = Self {
            file,
            error: false,
            eof: false,
        };
        if start > 0 && !stream.skip(start) {
            return Err(ProcessingError::Format(
                "failed to seek to start offset in input file".into(),
            ));
        }
        Ok(stream)
    }
}

impl InputStream for FileInputStream {
    fn is_error(&mut self) -> bool {
        self.error
    }

    fn is_eof(&mut self) -> bool {
        self.eof
    }

    fn tell(&mut self) -> Option<u64> {
        self.file.stream_position().ok()
    }

    fn skip(&mut self, bytes: u64) -> bool {
        if self.file.seek(SeekFrom::Current(bytes as i64)).is_ok() {
            return true;
        }
        // Non-seekable source: read and discard.
        let mut remaining = bytes;
        let mut scratch = vec![0u8; 32768];
        while remaining > 0 {
            let chunk = remaining.min(scratch.len() as u64) as usize;
            let n = self.read(&mut scratch[..chunk]);
            if n == 0 {
                return false;
            }
            remaining -= n;
        }
        true
    }

    fn read(&mut self, buffer: &mut [u8]) -> u64 {
        let mut filled = 0usize;
        while filled < buffer.len() {
            match self.file.read(&mut buffer[filled..]) {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => {
                    self.error = true;
                    break;
                }
            }
        }
        filled as u64
    }
}

/// An input stream over an in-memory byte buffer.
pub struct MemoryInputStream {
    data: Vec<u8>,
    pos: usize,
    eof: bool,
}

impl MemoryInputStream {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            pos: 0,
            eof: false,
        }
    }
}

impl InputStream for MemoryInputStream {
    fn is_error(&mut self) -> bool {
        false
    }

    fn is_eof(&mut self) -> bool {
        self.eof
    }

    fn tell(&mut self) -> Option<u64> {
        Some(self.pos as u64)
    }

    fn skip(&mut self, bytes: u64) -> bool {
        let target = self.pos.saturating_add(bytes as usize);
        if target > self.data.len() {
            return false;
        }
        self.pos = target;
        true
    }

    fn read(&mut self, buffer: &mut [u8]) -> u64 {
        let available = self.data.len() - self.pos;
        let n = buffer.len().min(available);
        buffer[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        if n < buffer.len() {
            self.eof = true;
        }
        n as u64
    }
}

/// Requirements for output streams used by
/// [`crate::write_stream::WriteBinaryStream`].
pub trait OutputStream {
    /// Write all of `buffer`. Returns false on failure.
    fn write(&mut self, buffer: &[u8]) -> bool;

    fn is_error(&mut self) -> bool;
}

/// A binary file output stream.
pub struct FileOutputStream {
    file: File,
    error: bool,
}

impl FileOutputStream {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            file: File::create(path)?,
            error: false,
        })
    }
}

impl OutputStream for FileOutputStream {
    fn write(&mut self, buffer: &[u8]) -> bool {
        if self.file.write_all(buffer).is_err() {
            self.error = true;
        }
        !self.error
    }

    fn is_error(&mut self) -> bool {
        self.error
    }
}

/// An output stream collecting bytes in memory, retrievable through a
/// shared handle.
#[derive(Clone)]
pub struct MemoryOutputStream {
    data: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
}

impl MemoryOutputStream {
    pub fn new() -> Self {
        Self {
            data: Default::default(),
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }
}

impl Default for MemoryOutputStream {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputStream for MemoryOutputStream {
    fn write(&mut self, buffer: &[u8]) -> bool {
        self.data.lock().unwrap().extend_from_slice(buffer);
        true
    }

    fn is_error(&mut self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn null_stream_reports_eof() {
        let mut s = NullInputStream;
        assert!(!s.is_error());
        assert!(s.is_eof());
        assert!(!s.is_good());
        assert!(s.skip(0));
        assert!(!s.skip(1));
        let mut buf = [0u8; 4];
        assert_eq!(s.read(&mut buf), 0);
    }

    #[test]
    fn memory_stream_reads_and_tells() {
        let mut s = MemoryInputStream::new(vec![1, 2, 3, 4, 5]);
        let mut buf = [0u8; 2];
        assert_eq!(s.read(&mut buf), 2);
        assert_eq!(buf, [1, 2]);
        assert_eq!(s.tell(), Some(2));
        assert!(s.skip(1));
        assert_eq!(s.read(&mut buf), 2);
        assert_eq!(buf, [4, 5]);
        assert!(s.is_good());
        assert_eq!(s.read(&mut buf), 0);
        assert!(s.is_eof());
    }

    #[test]
    fn file_stream_reads_with_start_offset() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0xAA, 0xBB, 0xCC, 0xDD]).unwrap();
        let mut s = FileInputStream::open(tmp.path(), 2).unwrap();
        assert_eq!(s.tell(), Some(2));
        let mut buf = [0u8; 4];
        assert_eq!(s.read(&mut buf), 2);
        assert_eq!(&buf[..2], &[0xCC, 0xDD]);
        assert!(s.is_eof());
        assert!(!s.is_error());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(FileInputStream::open("/nonexistent/tagstream-input", 0).is_err());
    }

    #[test]
    fn memory_output_collects() {
        let mut s = MemoryOutputStream::new();
        assert!(s.write(&[1, 2]));
        assert!(s.write(&[3]));
        assert_eq!(s.contents(), vec![1, 2, 3]);
    }
}
