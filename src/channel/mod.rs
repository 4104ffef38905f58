//! Buffered unidirectional file channel
//!
//! A `BufferedChannel` wraps one file opened either for reading or for
//! writing, never both, and owns a single fixed-capacity buffer:
//!
//! ```text
//! Reading: valid range is [pos, limit)
//! 0    pos     limit     capacity
//! |-----|XXXXXXX|---------|
//!
//! Writing: valid range is [0, pos)
//! 0      pos             capacity
//! |XXXXXXX|---------------|
//! ```
//!
//! Reads never return short: either the requested bytes are buffered, the
//! stream is cleanly exhausted, or an error is returned. Write channels are
//! flushed and synced on `close()`, which reports any failure, and best
//! effort on drop.

use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::error;

/// Default capacity for input channels (64 MiB); bounds the largest message
pub const DEFAULT_INPUT_BUFFER_SIZE: usize = 64 * 1024 * 1024;

/// Default capacity for per-channel output streams (4 MiB)
pub const DEFAULT_OUTPUT_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Anything a channel can sit on top of: a `File` in production, a
/// `Cursor<Vec<u8>>` in tests.
pub trait Backing: Read + Write + Seek {
    /// Push written data to stable storage before the handle is released
    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Backing for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

impl Backing for io::Cursor<Vec<u8>> {}

/// Direction a channel was opened for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
}

/// Buffered channel errors
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Failed to open '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Output file '{0}' already exists")]
    AlreadyExists(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Unexpected end of stream: needed {needed} bytes, {available} buffered")]
    UnexpectedEof { needed: usize, available: usize },

    #[error("Request for {requested} bytes exceeds buffer capacity {capacity}")]
    ExceedsCapacity { requested: usize, capacity: usize },

    #[error("Channel opened for {actual:?}, operation requires {expected:?}")]
    WrongMode { expected: Mode, actual: Mode },

    #[error("Channel already closed")]
    Closed,
}

/// Buffered, unidirectional byte stream
pub struct BufferedChannel<F: Backing = File> {
    inner: Option<F>,
    buf: Box<[u8]>,
    pos: usize,
    limit: usize,
    mode: Mode,
}

impl BufferedChannel<File> {
    /// Open an existing file for reading
    pub fn open_read<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self, ChannelError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ChannelError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(file, Mode::Read, capacity))
    }

    /// Create a new file for writing.
    ///
    /// Fails if the file already exists. On unix the file is created
    /// read-only; the open handle stays writable.
    pub fn create<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self, ChannelError> {
        let path = path.as_ref();
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o444);
        }

        let file = options.open(path).map_err(|source| {
            if source.kind() == ErrorKind::AlreadyExists {
                ChannelError::AlreadyExists(path.to_path_buf())
            } else {
                ChannelError::Open {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        Ok(Self::new(file, Mode::Write, capacity))
    }
}

impl<F: Backing> BufferedChannel<F> {
    /// Wrap an already opened backing stream
    pub fn new(inner: F, mode: Mode, capacity: usize) -> Self {
        Self {
            inner: Some(inner),
            buf: vec![0u8; capacity.max(1)].into_boxed_slice(),
            pos: 0,
            limit: 0,
            mode,
        }
    }

    /// Unread bytes currently held in the buffer (read mode)
    pub fn buffered(&self) -> &[u8] {
        match self.mode {
            Mode::Read => &self.buf[self.pos..self.limit],
            Mode::Write => &[],
        }
    }

    fn require(&self, expected: Mode) -> Result<(), ChannelError> {
        if self.inner.is_none() {
            return Err(ChannelError::Closed);
        }
        if self.mode != expected {
            return Err(ChannelError::WrongMode {
                expected,
                actual: self.mode,
            });
        }
        Ok(())
    }

    /// Ensure at least `need` unread bytes are buffered.
    ///
    /// Returns `Ok(false)` only when the source is exactly at end of stream
    /// and nothing is buffered. Running out of data with a partially filled
    /// buffer is `UnexpectedEof`.
    pub fn ensure(&mut self, need: usize) -> Result<bool, ChannelError> {
        self.require(Mode::Read)?;

        if self.limit - self.pos >= need {
            return Ok(true);
        }
        if need > self.buf.len() {
            return Err(ChannelError::ExceedsCapacity {
                requested: need,
                capacity: self.buf.len(),
            });
        }

        // compact unread bytes to the front
        if self.pos != self.limit {
            self.buf.copy_within(self.pos..self.limit, 0);
            self.limit -= self.pos;
        } else {
            self.limit = 0;
        }
        self.pos = 0;

        let inner = self.inner.as_mut().ok_or(ChannelError::Closed)?;
        while self.limit < need {
            match inner.read(&mut self.buf[self.limit..]) {
                Ok(0) => {
                    if self.limit == 0 {
                        return Ok(false);
                    }
                    return Err(ChannelError::UnexpectedEof {
                        needed: need,
                        available: self.limit,
                    });
                }
                Ok(n) => self.limit += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }

    /// Copy exactly `dst.len()` bytes out of the stream.
    ///
    /// Returns `Ok(false)` at a clean end of stream.
    pub fn read_into(&mut self, dst: &mut [u8]) -> Result<bool, ChannelError> {
        if !self.ensure(dst.len())? {
            return Ok(false);
        }
        dst.copy_from_slice(&self.buf[self.pos..self.pos + dst.len()]);
        self.pos += dst.len();
        Ok(true)
    }

    /// Read a fixed-size block, `None` at a clean end of stream
    pub fn read_array<const N: usize>(&mut self) -> Result<Option<[u8; N]>, ChannelError> {
        let mut out = [0u8; N];
        if self.read_into(&mut out)? {
            Ok(Some(out))
        } else {
            Ok(None)
        }
    }

    /// Skip exactly `n` bytes. End of stream is always an error here.
    pub fn drain(&mut self, mut n: usize) -> Result<(), ChannelError> {
        self.require(Mode::Read)?;
        while n > 0 {
            let step = n.min(self.buf.len());
            if !self.ensure(step)? {
                return Err(ChannelError::UnexpectedEof {
                    needed: n,
                    available: 0,
                });
            }
            self.pos += step;
            n -= step;
        }
        Ok(())
    }

    /// Append bytes, flushing first when the buffer cannot hold them
    pub fn write(&mut self, src: &[u8]) -> Result<(), ChannelError> {
        self.require(Mode::Write)?;

        if self.buf.len() - self.pos < src.len() {
            self.flush()?;
        }
        if src.len() > self.buf.len() {
            let inner = self.inner.as_mut().ok_or(ChannelError::Closed)?;
            inner.write_all(src)?;
            return Ok(());
        }

        self.buf[self.pos..self.pos + src.len()].copy_from_slice(src);
        self.pos += src.len();
        Ok(())
    }

    /// Append one sample in host byte order
    #[inline]
    pub fn write_i32(&mut self, value: i32) -> Result<(), ChannelError> {
        self.write(&value.to_ne_bytes())
    }

    /// Write out every buffered byte, retrying partial writes
    pub fn flush(&mut self) -> Result<(), ChannelError> {
        self.require(Mode::Write)?;
        let inner = self.inner.as_mut().ok_or(ChannelError::Closed)?;

        let mut done = 0;
        while done < self.pos {
            match inner.write(&self.buf[done..self.pos]) {
                Ok(0) => {
                    return Err(ChannelError::Io(io::Error::new(
                        ErrorKind::WriteZero,
                        "failed to write buffered data",
                    )))
                }
                Ok(n) => done += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.pos = 0;
        inner.flush()?;
        Ok(())
    }

    /// Reposition to an absolute offset.
    ///
    /// Pending writes are flushed and unread input is discarded first.
    pub fn seek(&mut self, offset: u64) -> Result<u64, ChannelError> {
        if self.mode == Mode::Write {
            self.flush()?;
        }
        self.pos = 0;
        self.limit = 0;
        let inner = self.inner.as_mut().ok_or(ChannelError::Closed)?;
        Ok(inner.seek(SeekFrom::Start(offset))?)
    }

    /// Logical stream position, counting buffered bytes
    pub fn tell(&mut self) -> Result<u64, ChannelError> {
        let inner = self.inner.as_mut().ok_or(ChannelError::Closed)?;
        let base = inner.stream_position()?;
        Ok(match self.mode {
            Mode::Read => base - (self.limit - self.pos) as u64,
            Mode::Write => base + self.pos as u64,
        })
    }

    /// Flush (write mode) and release the backing stream
    pub fn close(mut self) -> Result<(), ChannelError> {
        self.close_inner()
    }

    /// Close and hand back the backing stream
    pub fn into_inner(mut self) -> Result<F, ChannelError> {
        if self.mode == Mode::Write {
            self.flush()?;
        }
        self.pos = 0;
        self.limit = 0;
        self.inner.take().ok_or(ChannelError::Closed)
    }

    fn close_inner(&mut self) -> Result<(), ChannelError> {
        if self.inner.is_none() {
            return Ok(());
        }
        let result = if self.mode == Mode::Write {
            self.flush().and_then(|()| self.sync_inner())
        } else {
            Ok(())
        };
        self.pos = 0;
        self.limit = 0;
        self.inner = None;
        result
    }

    fn sync_inner(&mut self) -> Result<(), ChannelError> {
        let inner = self.inner.as_mut().ok_or(ChannelError::Closed)?;
        loop {
            match inner.sync() {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl<F: Backing> Drop for BufferedChannel<F> {
    fn drop(&mut self) {
        if let Err(e) = self.close_inner() {
            error!(error = %e, "Failed to flush channel on drop");
        }
    }
}

impl<F: Backing> std::fmt::Debug for BufferedChannel<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedChannel")
            .field("mode", &self.mode)
            .field("capacity", &self.buf.len())
            .field("pos", &self.pos)
            .field("limit", &self.limit)
            .field("open", &self.inner.is_some())
            .finish()
    }
}
