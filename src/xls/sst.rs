//! Shared string table
//!
//! The SST record is almost always continued. Character data split by a CONTINUE frame restarts
//! with a fresh option byte, so the encoding of a single string may change from one frame to
//! the next. Header fields, rich text runs and phonetic blocks are split without any marker.

use encoding_rs::UTF_16LE;

use super::XlsError;
use crate::diagnostics::{Diagnostic, DiagnosticSink, Location};
use crate::utils::{get_u16, get_u32};

/// The deduplicated strings of a workbook, referenced by index from LABELSST cells
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedStrings {
    strings: Vec<String>,
    total: u32,
}

impl SharedStrings {
    /// String at `index`
    pub fn get(&self, index: usize) -> Option<&str> {
        self.strings.get(index).map(String::as_str)
    }

    /// Number of unique strings
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Is the table empty
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Number of string references in the workbook, as declared by the SST header
    pub fn total_count(&self) -> u32 {
        self.total
    }

    /// Iterates over the unique strings
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.strings.iter().map(String::as_str)
    }
}

/// Decoded text of one string, kept in the widest encoding seen so far
struct TextBuf {
    bytes: Vec<u8>,
    wide: bool,
}

impl TextBuf {
    fn new(chars: usize, wide: bool) -> Self {
        TextBuf {
            bytes: Vec::with_capacity(if wide { 2 * chars } else { chars }),
            wide,
        }
    }

    fn push_narrow(&mut self, bytes: &[u8]) {
        if self.wide {
            for &b in bytes {
                self.bytes.extend([b, 0]);
            }
        } else {
            self.bytes.extend_from_slice(bytes);
        }
    }

    fn push_wide(&mut self, bytes: &[u8]) {
        if !self.wide {
            self.widen();
        }
        self.bytes.extend_from_slice(bytes);
    }

    /// Re-expands the compressed characters decoded so far to UTF-16LE, in place
    fn widen(&mut self) {
        let n = self.bytes.len();
        self.bytes.resize(2 * n, 0);
        for i in (0..n).rev() {
            self.bytes[2 * i] = self.bytes[i];
            self.bytes[2 * i + 1] = 0;
        }
        self.wide = true;
    }

    fn finish(self) -> String {
        if self.wide {
            UTF_16LE
                .decode_without_bom_handling(&self.bytes)
                .0
                .into_owned()
        } else {
            self.bytes.iter().map(|&b| b as char).collect()
        }
    }
}

/// The stitched SST payload with the position of each CONTINUE boundary
struct Fragments<'a> {
    data: &'a [u8],
    boundaries: &'a [usize],
    pos: usize,
    next: usize,
}

impl Fragments<'_> {
    /// Forgets the boundaries already behind the read position
    fn pass_boundaries(&mut self) {
        while self
            .boundaries
            .get(self.next)
            .is_some_and(|&b| b <= self.pos)
        {
            self.next += 1;
        }
    }

    /// End of the current frame
    fn limit(&self) -> usize {
        self.boundaries
            .get(self.next)
            .copied()
            .unwrap_or(self.data.len())
            .min(self.data.len())
    }

    /// Is the read position at the start of a continuation frame
    fn at_boundary(&mut self) -> bool {
        // empty frames carry no option byte
        while self.boundaries.get(self.next) == Some(&self.pos)
            && self.boundaries.get(self.next + 1) == Some(&self.pos)
        {
            self.next += 1;
        }
        self.boundaries.get(self.next) == Some(&self.pos)
    }

    fn u8(&mut self) -> Option<u8> {
        let b = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn u16(&mut self) -> Option<u16> {
        let v = get_u16(self.data, self.pos)?;
        self.pos += 2;
        Some(v)
    }

    fn u32(&mut self) -> Option<u32> {
        let v = get_u32(self.data, self.pos)?;
        self.pos += 4;
        Some(v)
    }

    /// Skips `len` bytes regardless of boundaries, false if the payload is too short
    fn skip(&mut self, len: usize) -> bool {
        match self.pos.checked_add(len) {
            Some(end) if end <= self.data.len() => {
                self.pos = end;
                true
            }
            _ => {
                self.pos = self.data.len();
                false
            }
        }
    }

    /// Reads `chars` characters starting with encoding `wide`, following encoding flips
    ///
    /// Returns the text and whether all characters were available.
    fn text(&mut self, chars: usize, mut wide: bool) -> (String, bool) {
        let mut buf = TextBuf::new(chars, wide);
        let mut remaining = chars;
        // a malformed header may straddle a boundary
        while self.boundaries.get(self.next).is_some_and(|&b| b < self.pos) {
            self.next += 1;
        }
        while remaining > 0 {
            if self.at_boundary() {
                match self.data.get(self.pos) {
                    Some(flags) => wide = flags & 0x01 != 0,
                    None => break,
                }
                self.pos += 1;
                self.next += 1;
                continue;
            }
            let limit = self.limit();
            let width = if wide { 2 } else { 1 };
            let n = remaining.min(limit.saturating_sub(self.pos) / width);
            if n == 0 {
                if limit >= self.data.len() {
                    break;
                }
                // half a character before the boundary
                self.pos = limit;
                continue;
            }
            let bytes = &self.data[self.pos..self.pos + n * width];
            if wide {
                buf.push_wide(bytes);
            } else {
                buf.push_narrow(bytes);
            }
            self.pos += n * width;
            remaining -= n;
        }
        (buf.finish(), remaining == 0)
    }
}

/// Decodes a BIFF8 `XLUnicodeString` whose characters may continue in CONTINUE frames
///
/// Returns the text and whether it is complete, `None` if the header is missing.
pub(crate) fn continued_string(data: &[u8], boundaries: &[usize]) -> Option<(String, bool)> {
    let mut frags = Fragments {
        data,
        boundaries,
        pos: 0,
        next: 0,
    };
    let cch = frags.u16()?;
    let flags = frags.u8()?;
    Some(frags.text(cch as usize, flags & 0x01 != 0))
}

/// Builds the shared string table from the stitched SST payload
///
/// `boundaries` are the offsets in `data` where each CONTINUE frame starts. Strings overrunning
/// the payload are clamped and reported, the table then stops at that string.
pub(crate) fn parse_sst(
    data: &[u8],
    boundaries: &[usize],
    sink: &dyn DiagnosticSink,
    location: &Location,
) -> Result<SharedStrings, XlsError> {
    if data.len() < 8 {
        return Err(XlsError::Len {
            expected: 8,
            found: data.len(),
            typ: "sst",
        });
    }
    let total = get_u32(data, 0).unwrap_or_default();
    let unique = get_u32(data, 4).unwrap_or_default() as usize;
    let mut frags = Fragments {
        data,
        boundaries,
        pos: 8,
        next: 0,
    };
    // never trust the declared count for the allocation
    let mut strings = Vec::with_capacity(unique.min(data.len() / 3));
    for i in 0..unique {
        frags.pass_boundaries();
        let header = frags.u16().zip(frags.u8());
        let Some((cch, flags)) = header else {
            sink.warn(
                Diagnostic::warning(format!(
                    "shared string table ends after {i} of {unique} strings"
                ))
                .at(location.clone().at(frags.pos)),
            );
            break;
        };
        let runs = if flags & 0x08 != 0 { frags.u16() } else { Some(0) };
        let ext = if flags & 0x04 != 0 { frags.u32() } else { Some(0) };
        let (Some(runs), Some(ext)) = (runs, ext) else {
            sink.warn(
                Diagnostic::warning(format!("string {i} header is truncated"))
                    .at(location.clone().at(frags.pos)),
            );
            break;
        };

        let (text, complete) = frags.text(cch as usize, flags & 0x01 != 0);
        strings.push(text);
        if !complete {
            sink.warn(
                Diagnostic::warning(format!(
                    "string {i} declares {cch} characters, clamped to the shared string table"
                ))
                .at(location.clone().at(frags.pos)),
            );
            break;
        }
        if !frags.skip(4 * runs as usize + ext as usize) {
            sink.warn(
                Diagnostic::warning(format!("formatting runs of string {i} are truncated"))
                    .at(location.clone().at(frags.pos)),
            );
            break;
        }
    }
    Ok(SharedStrings { strings, total })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{Collector, NullSink};
    use rstest::rstest;

    /// Bytes of `s` in the requested encoding
    fn chars(s: &str, wide: bool) -> Vec<u8> {
        if wide {
            s.encode_utf16().flat_map(|c| c.to_le_bytes()).collect()
        } else {
            s.chars().map(|c| c as u8).collect()
        }
    }

    fn header(unique: u32) -> Vec<u8> {
        let mut v = unique.to_le_bytes().to_vec();
        v.extend(unique.to_le_bytes());
        v
    }

    fn sst(data: &[u8], boundaries: &[usize]) -> SharedStrings {
        parse_sst(data, boundaries, &NullSink, &Location::default()).unwrap()
    }

    #[rstest]
    #[case::narrow_to_narrow("abc", false, "def", false)]
    #[case::wide_to_wide("\u{3b1}\u{3b2}", true, "\u{3b3}\u{3b4}", true)]
    #[case::wide_to_narrow("\u{3b1}\u{3b2}", true, "cd", false)]
    #[case::narrow_to_wide("abc", false, "d\u{3a9}f", true)]
    fn encoding_flip_at_boundary(
        #[case] head: &str,
        #[case] head_wide: bool,
        #[case] tail: &str,
        #[case] tail_wide: bool,
    ) {
        let cch = head.chars().count() + tail.chars().count();
        let mut data = header(2);
        data.extend((cch as u16).to_le_bytes());
        data.push(head_wide as u8);
        data.extend(chars(head, head_wide));
        let boundary = data.len();
        data.push(tail_wide as u8);
        data.extend(chars(tail, tail_wide));
        data.extend([4, 0, 0]);
        data.extend(b"next");

        let s = sst(&data, &[boundary]);
        assert_eq!(s.get(0), Some(format!("{head}{tail}").as_str()));
        assert_eq!(s.get(1), Some("next"));
    }

    #[test]
    fn rich_and_extended_after_flip() {
        let mut data = header(2);
        data.extend([4, 0, 0x0C]);
        data.extend(2u16.to_le_bytes());
        data.extend(5u32.to_le_bytes());
        data.extend(b"ab");
        let boundary = data.len();
        data.push(1);
        data.extend(chars("c\u{3a9}", true));
        // the second boundary falls inside the runs, without an option byte
        let runs_boundary = data.len() + 3;
        data.extend([0x11; 8]);
        data.extend([0x22; 5]);
        data.extend([1, 0, 1]);
        data.extend(chars("\u{20ac}", true));

        let s = sst(&data, &[boundary, runs_boundary]);
        assert_eq!(s.len(), 2);
        assert_eq!(s.get(0), Some("abc\u{3a9}"));
        assert_eq!(s.get(1), Some("\u{20ac}"));
    }

    #[test]
    fn boundary_between_strings_has_no_option_byte() {
        let mut data = header(2);
        data.extend([2, 0, 0]);
        data.extend(b"hi");
        let boundary = data.len();
        data.extend([2, 0, 1]);
        data.extend(chars("\u{3b1}\u{3b2}", true));
        let s = sst(&data, &[boundary]);
        assert_eq!(s.iter().collect::<Vec<_>>(), vec!["hi", "\u{3b1}\u{3b2}"]);
    }

    #[test]
    fn widen_in_place() {
        let mut buf = TextBuf::new(4, false);
        buf.push_narrow(b"ab");
        buf.push_wide(&chars("\u{3a9}", true));
        buf.push_narrow(b"z");
        assert_eq!(buf.finish(), "ab\u{3a9}z");
    }

    #[test]
    fn overlong_string_is_clamped() {
        let mut data = header(3);
        data.extend([2, 0, 0]);
        data.extend(b"ok");
        data.extend([10, 0, 0]);
        data.extend(b"trunc");
        let collector = Collector::new();
        let s = parse_sst(&data, &[], &collector, &Location::stream("Workbook")).unwrap();
        assert_eq!(s.iter().collect::<Vec<_>>(), vec!["ok", "trunc"]);
        assert_eq!(s.total_count(), 3);
        assert!(collector.contains("clamped"));
    }

    #[test]
    fn short_header_is_an_error() {
        assert!(parse_sst(&[0; 4], &[], &NullSink, &Location::default()).is_err());
    }
}
