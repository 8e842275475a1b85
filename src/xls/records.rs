//! BIFF record framing
//!
//! A BIFF stream is a flat sequence of `(type: u16, len: u16, payload)` frames. Records longer
//! than a frame are split into a leading frame followed by CONTINUE frames; whether a record may
//! be continued is only known by its decoder, so stitching is explicit
//! ([`RecordReader::attach_continuations`]).

use std::borrow::Cow;

use log::trace;

use super::XlsError;
use crate::cursor::ByteCursor;

pub(crate) const FORMULA: u16 = 0x0006;
pub(crate) const EOF: u16 = 0x000A;
pub(crate) const PROTECT: u16 = 0x0012;
pub(crate) const PASSWORD: u16 = 0x0013;
pub(crate) const HEADER: u16 = 0x0014;
pub(crate) const FOOTER: u16 = 0x0015;
pub(crate) const NAME: u16 = 0x0018;
pub(crate) const WINDOW_PROTECT: u16 = 0x0019;
pub(crate) const DATEMODE: u16 = 0x0022;
pub(crate) const LEFT_MARGIN: u16 = 0x0026;
pub(crate) const RIGHT_MARGIN: u16 = 0x0027;
pub(crate) const TOP_MARGIN: u16 = 0x0028;
pub(crate) const BOTTOM_MARGIN: u16 = 0x0029;
pub(crate) const FILEPASS: u16 = 0x002F;
pub(crate) const CONTINUE: u16 = 0x003C;
pub(crate) const PANE: u16 = 0x0041;
pub(crate) const CODEPAGE: u16 = 0x0042;
pub(crate) const DEFCOLWIDTH: u16 = 0x0055;
pub(crate) const OBJ: u16 = 0x005D;
pub(crate) const OBJECT_PROTECT: u16 = 0x0063;
pub(crate) const COLINFO: u16 = 0x007D;
pub(crate) const WSBOOL: u16 = 0x0081;
pub(crate) const HCENTER: u16 = 0x0083;
pub(crate) const VCENTER: u16 = 0x0084;
pub(crate) const BOUNDSHEET: u16 = 0x0085;
pub(crate) const AUTOFILTER_INFO: u16 = 0x009D;
pub(crate) const AUTOFILTER: u16 = 0x009E;
pub(crate) const SETUP: u16 = 0x00A1;
pub(crate) const MULRK: u16 = 0x00BD;
pub(crate) const MULBLANK: u16 = 0x00BE;
pub(crate) const RSTRING: u16 = 0x00D6;
pub(crate) const SCENARIO_PROTECT: u16 = 0x00DD;
pub(crate) const XF: u16 = 0x00E0;
pub(crate) const MERGED_CELLS: u16 = 0x00E5;
pub(crate) const MSODRAWING: u16 = 0x00EC;
pub(crate) const SST: u16 = 0x00FC;
pub(crate) const LABELSST: u16 = 0x00FD;
pub(crate) const CONDFMT: u16 = 0x01B0;
pub(crate) const CF: u16 = 0x01B1;
pub(crate) const DVAL: u16 = 0x01B2;
pub(crate) const TXO: u16 = 0x01B6;
pub(crate) const DV: u16 = 0x01BE;
pub(crate) const DIMENSIONS: u16 = 0x0200;
pub(crate) const BLANK: u16 = 0x0201;
pub(crate) const NUMBER: u16 = 0x0203;
pub(crate) const LABEL: u16 = 0x0204;
pub(crate) const BOOLERR: u16 = 0x0205;
pub(crate) const STRING: u16 = 0x0207;
pub(crate) const ROW: u16 = 0x0208;
pub(crate) const ARRAY: u16 = 0x0221;
pub(crate) const DEFAULT_ROW_HEIGHT: u16 = 0x0225;
pub(crate) const TABLE: u16 = 0x0236;
pub(crate) const WINDOW2: u16 = 0x023E;
pub(crate) const RK: u16 = 0x027E;
pub(crate) const FORMAT: u16 = 0x041E;
pub(crate) const SHRFMLA: u16 = 0x04BC;
pub(crate) const BOF: u16 = 0x0809;

/// BOF record ids of BIFF2, BIFF3 and BIFF4
pub(crate) const OLD_BOFS: [u16; 3] = [0x0009, 0x0209, 0x0409];

/// A record frame, plus the CONTINUE frames attached to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecordFrame {
    /// Record type
    pub typ: u16,
    /// Offset of the 4-byte frame header in the stream
    pub offset: usize,
    /// Declared payload length of the leading frame
    pub len: usize,
    /// (payload offset, payload length) of each attached CONTINUE frame
    continuations: Vec<(usize, usize)>,
}

impl RecordFrame {
    /// Offset of the leading frame payload
    pub fn payload_offset(&self) -> usize {
        self.offset + 4
    }

    /// Offset of the frame following this record (and its continuations)
    pub fn end(&self) -> usize {
        match self.continuations.last() {
            Some((pos, len)) => pos + len,
            None => self.payload_offset() + self.len,
        }
    }

    /// Length of the stitched payload
    pub fn logical_len(&self) -> usize {
        self.len + self.continuations.iter().map(|c| c.1).sum::<usize>()
    }

    /// Appends `continuation`'s payload to this record
    pub fn attach(&mut self, continuation: &RecordFrame) {
        self.continuations
            .push((continuation.payload_offset(), continuation.len));
    }
}

/// Walks the frames of a defragmented BIFF stream
pub(crate) struct RecordReader<'a> {
    stream: &'a [u8],
    cursor: ByteCursor<&'a [u8]>,
}

impl<'a> RecordReader<'a> {
    pub fn new(stream: &'a [u8]) -> Self {
        RecordReader {
            stream,
            cursor: ByteCursor::new(stream),
        }
    }

    /// A reader starting at `offset` (a substream BOF)
    pub fn at(stream: &'a [u8], offset: usize) -> Self {
        let mut reader = RecordReader::new(stream);
        reader.cursor.seek(offset);
        reader
    }

    /// Moves to `pos`, returning the current position for a later [`Self::restore`]
    pub fn save_and_seek(&mut self, pos: usize) -> usize {
        self.cursor.save_and_seek(pos)
    }

    pub fn restore(&mut self, previous: usize) {
        self.cursor.restore(previous);
    }

    /// Reads the next frame header and skips its payload
    ///
    /// Returns `None` at the end of the stream. Fewer than 4 trailing bytes are padding and
    /// ignored, a payload running past the end of the stream is an error.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<RecordFrame>, XlsError> {
        let offset = self.cursor.position();
        let remaining = self.cursor.remaining();
        if remaining < 4 {
            if remaining > 0 {
                trace!("ignoring {remaining} trailing bytes at 0x{offset:x}");
            }
            return Ok(None);
        }
        let typ = self.cursor.read_u16()?;
        let len = self.cursor.read_u16()? as usize;
        if self.cursor.remaining() < len {
            return Err(XlsError::Len {
                expected: len,
                found: self.cursor.remaining(),
                typ: "record payload",
            });
        }
        self.cursor.skip(len)?;
        Ok(Some(RecordFrame {
            typ,
            offset,
            len,
            continuations: Vec::new(),
        }))
    }

    /// Reads the next frame without consuming it
    pub fn peek(&mut self) -> Result<Option<RecordFrame>, XlsError> {
        let saved = self.cursor.position();
        let frame = self.next();
        self.cursor.seek(saved);
        frame
    }

    /// Consumes every CONTINUE frame immediately following `frame` and attaches it
    ///
    /// Returns the number of attached frames.
    pub fn attach_continuations(&mut self, frame: &mut RecordFrame) -> Result<usize, XlsError> {
        let mut count = 0;
        while let Some(next) = self.peek()? {
            if next.typ != CONTINUE {
                break;
            }
            self.next()?;
            frame.attach(&next);
            count += 1;
        }
        Ok(count)
    }

    /// Skips an embedded substream whose BOF was just read
    ///
    /// BOF/EOF markers are counted rather than trusting any length, some producers close a
    /// substream early. Returns false if the stream ended before the matching EOF.
    pub fn skip_substream(&mut self) -> Result<bool, XlsError> {
        let mut depth = 1usize;
        while let Some(frame) = self.next()? {
            match frame.typ {
                BOF => depth += 1,
                EOF => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(true);
                    }
                }
                _ => (),
            }
        }
        Ok(false)
    }

    /// The stitched payload of `frame`
    ///
    /// Borrowed from the stream when nothing is attached.
    pub fn payload(&self, frame: &RecordFrame) -> Result<Cow<'a, [u8]>, XlsError> {
        let first = self.slice(frame.payload_offset(), frame.len)?;
        if frame.continuations.is_empty() {
            return Ok(Cow::Borrowed(first));
        }
        let mut buf = Vec::with_capacity(frame.logical_len());
        buf.extend_from_slice(first);
        for &(pos, len) in &frame.continuations {
            buf.extend_from_slice(self.slice(pos, len)?);
        }
        Ok(Cow::Owned(buf))
    }

    /// The stitched payload of `frame` with the offset at which each continuation starts
    pub fn payload_with_boundaries(
        &self,
        frame: &RecordFrame,
    ) -> Result<(Cow<'a, [u8]>, Vec<usize>), XlsError> {
        let mut boundaries = Vec::with_capacity(frame.continuations.len());
        let mut pos = frame.len;
        for &(_, len) in &frame.continuations {
            boundaries.push(pos);
            pos += len;
        }
        Ok((self.payload(frame)?, boundaries))
    }

    fn slice(&self, pos: usize, len: usize) -> Result<&'a [u8], XlsError> {
        let stream: &'a [u8] = self.stream;
        pos.checked_add(len)
            .and_then(|end| stream.get(pos..end))
            .ok_or(XlsError::Eof("record payload"))
    }
}
