//! Random access byte cursor
//!
//! Every layer of the reader works on a [`ByteCursor`]: the container parser over the whole
//! file and the record framer over a defragmented stream.

use std::fmt;
use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

/// Errors raised by a [`ByteCursor`]
#[derive(Debug)]
pub enum CursorError {
    /// Io error while loading the input
    Io(std::io::Error),
    /// A read past the end of the buffer
    Eof {
        /// requested position
        pos: usize,
        /// requested length
        len: usize,
        /// buffer length
        available: usize,
    },
    /// The load was cancelled through its [`CancelToken`]
    Cancelled,
    /// The input is larger than the configured cap
    TooLarge {
        /// bytes read so far
        size: u64,
        /// configured maximum
        max: u64,
    },
}

from_err!(std::io::Error, CursorError, Io);

impl fmt::Display for CursorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CursorError::Io(e) => write!(f, "I/O error: {e}"),
            CursorError::Eof {
                pos,
                len,
                available,
            } => write!(
                f,
                "Cannot read {len} bytes at position {pos}, buffer has {available} bytes"
            ),
            CursorError::Cancelled => write!(f, "Read cancelled"),
            CursorError::TooLarge { size, max } => {
                write!(f, "Input exceeds maximum size ({size} > {max})")
            }
        }
    }
}

impl std::error::Error for CursorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CursorError::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// A cloneable flag used to abort the initial bulk read
///
/// # Examples
/// ```
/// use xlsbiff::CancelToken;
///
/// let token = CancelToken::new();
/// let observer = token.clone();
/// token.cancel();
/// assert!(observer.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a new, not cancelled, token
    pub fn new() -> Self {
        CancelToken::default()
    }

    /// Requests cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Has cancellation been requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Bulk read parameters
#[derive(Debug, Clone, Copy)]
pub struct LoadLimits {
    /// Initial buffer capacity
    pub initial: usize,
    /// Growth increment once the buffer is full
    pub grow: usize,
    /// Optional input size cap
    pub max: Option<u64>,
}

/// A byte buffer with a monotonic read position
#[derive(Debug, Clone)]
pub struct ByteCursor<B = Vec<u8>> {
    buf: B,
    pos: usize,
}

impl ByteCursor<Vec<u8>> {
    /// Reads the whole `reader` into memory
    ///
    /// The buffer starts at `limits.initial` bytes and grows by `limits.grow` bytes whenever it
    /// is full. The token is checked before every read so that a cancellation aborts the load
    /// instead of returning a truncated buffer.
    pub fn load<R: Read>(
        reader: &mut R,
        limits: LoadLimits,
        cancel: &CancelToken,
    ) -> Result<Self, CursorError> {
        let grow = limits.grow.max(512);
        let mut data = vec![0u8; limits.initial.max(512)];
        let mut filled = 0;
        loop {
            if cancel.is_cancelled() {
                debug!("bulk read cancelled after {filled} bytes");
                return Err(CursorError::Cancelled);
            }
            if filled == data.len() {
                data.resize(filled + grow, 0);
            }
            match reader.read(&mut data[filled..]) {
                Ok(0) => break,
                Ok(n) => {
                    filled += n;
                    if let Some(max) = limits.max {
                        if filled as u64 > max {
                            return Err(CursorError::TooLarge {
                                size: filled as u64,
                                max,
                            });
                        }
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(CursorError::Io(e)),
            }
        }
        data.truncate(filled);
        debug!("loaded {filled} bytes");
        Ok(ByteCursor::new(data))
    }
}

impl<B: AsRef<[u8]>> ByteCursor<B> {
    /// Wraps a buffer, position starts at 0
    pub fn new(buf: B) -> Self {
        ByteCursor { buf, pos: 0 }
    }

    /// The whole underlying buffer
    pub fn as_slice(&self) -> &[u8] {
        self.buf.as_ref()
    }

    /// Consumes the cursor, returning the buffer
    pub fn into_inner(self) -> B {
        self.buf
    }

    /// Buffer length
    pub fn len(&self) -> usize {
        self.buf.as_ref().len()
    }

    /// Is the buffer empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current read position
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left after the read position
    pub fn remaining(&self) -> usize {
        self.len().saturating_sub(self.pos)
    }

    /// Moves the read position
    ///
    /// Seeking past the end is allowed, the next read fails.
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Moves the read position, returning the previous one for a later [`Self::restore`]
    pub fn save_and_seek(&mut self, pos: usize) -> usize {
        std::mem::replace(&mut self.pos, pos)
    }

    /// Restores a position saved by [`Self::save_and_seek`]
    pub fn restore(&mut self, previous: usize) {
        self.pos = previous;
    }

    /// Reads `len` bytes at `pos`, without moving the read position
    pub fn read_at(&self, pos: usize, len: usize) -> Result<&[u8], CursorError> {
        let buf = self.buf.as_ref();
        pos.checked_add(len)
            .and_then(|end| buf.get(pos..end))
            .ok_or(CursorError::Eof {
                pos,
                len,
                available: buf.len(),
            })
    }

    /// Reads `len` bytes at the read position and advances it
    pub fn read(&mut self, len: usize) -> Result<&[u8], CursorError> {
        let pos = self.pos;
        let buf = self.buf.as_ref();
        let s = pos
            .checked_add(len)
            .and_then(|end| buf.get(pos..end))
            .ok_or(CursorError::Eof {
                pos,
                len,
                available: buf.len(),
            })?;
        self.pos += len;
        Ok(s)
    }

    /// Skips `len` bytes
    pub fn skip(&mut self, len: usize) -> Result<(), CursorError> {
        self.read(len).map(|_| ())
    }

    /// Reads a `u8` and advances
    pub fn read_u8(&mut self) -> Result<u8, CursorError> {
        Ok(self.read(1)?[0])
    }

    /// Reads a little endian `u16` and advances
    pub fn read_u16(&mut self) -> Result<u16, CursorError> {
        Ok(LittleEndian::read_u16(self.read(2)?))
    }

    /// Reads a little endian `u32` and advances
    pub fn read_u32(&mut self) -> Result<u32, CursorError> {
        Ok(LittleEndian::read_u32(self.read(4)?))
    }

    /// Reads a little endian `u16` at `pos` without moving
    pub fn u16_at(&self, pos: usize) -> Result<u16, CursorError> {
        Ok(LittleEndian::read_u16(self.read_at(pos, 2)?))
    }

    /// Reads a little endian `u32` at `pos` without moving
    pub fn u32_at(&self, pos: usize) -> Result<u32, CursorError> {
        Ok(LittleEndian::read_u32(self.read_at(pos, 4)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_and_rewinds() {
        let mut c = ByteCursor::new(&[1u8, 0, 2, 0, 0, 0, 9][..]);
        assert_eq!(c.read_u16().unwrap(), 1);
        let saved = c.save_and_seek(6);
        assert_eq!(c.read_u8().unwrap(), 9);
        c.restore(saved);
        assert_eq!(c.position(), 2);
        assert_eq!(c.read_u32().unwrap(), 2);
        assert!(matches!(
            c.read(2),
            Err(CursorError::Eof {
                pos: 6,
                len: 2,
                available: 7
            })
        ));
        assert_eq!(c.read_at(0, 3).unwrap(), &[1, 0, 2]);
        assert!(c.read_at(usize::MAX, 2).is_err());
    }

    #[test]
    fn load_grows_buffer() {
        let src: Vec<u8> = (0..5000u32).map(|i| i as u8).collect();
        let limits = LoadLimits {
            initial: 600,
            grow: 700,
            max: None,
        };
        let c = ByteCursor::load(&mut &src[..], limits, &CancelToken::new()).unwrap();
        assert_eq!(c.as_slice(), &src[..]);
    }

    #[test]
    fn load_honours_size_cap() {
        let src = vec![0u8; 4096];
        let limits = LoadLimits {
            initial: 512,
            grow: 512,
            max: Some(1000),
        };
        let r = ByteCursor::load(&mut &src[..], limits, &CancelToken::new());
        assert!(matches!(r, Err(CursorError::TooLarge { max: 1000, .. })));
    }

    /// A reader which cancels its token after the first chunk
    struct Cancelling<'a> {
        data: &'a [u8],
        token: CancelToken,
    }

    impl Read for Cancelling<'_> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.data.read(buf)?;
            self.token.cancel();
            Ok(n)
        }
    }

    #[test]
    fn load_cancelled_mid_read() {
        let src = vec![7u8; 10_000];
        let token = CancelToken::new();
        let mut r = Cancelling {
            data: &src,
            token: token.clone(),
        };
        let limits = LoadLimits {
            initial: 1024,
            grow: 1024,
            max: None,
        };
        assert!(matches!(
            ByteCursor::load(&mut r, limits, &token),
            Err(CursorError::Cancelled)
        ));
    }
}
