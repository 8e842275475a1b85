//! String structures found in BIFF records
//!
//! BIFF8 strings carry an option byte: bit 0 selects UTF-16LE characters over "compressed"
//! ones (the low byte of UTF-16 code units, i.e. Latin-1). BIFF5/7 strings are plain 8-bit
//! text in the workbook codepage.

use std::borrow::Cow;

use encoding_rs::{Encoding, UTF_16LE, WINDOWS_1252};

use super::{FormatVersion, XlsError};
use crate::utils::{read_u16, read_u32};

/// A decoded string and the number of bytes it occupied in the record
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct XlString {
    pub text: String,
    pub consumed: usize,
    /// The record ended before the declared number of characters
    pub truncated: bool,
}

/// Text decoding rules of a workbook
#[derive(Debug, Clone, Copy)]
pub(crate) struct XlsEncoding {
    version: FormatVersion,
    encoding: &'static Encoding,
}

impl XlsEncoding {
    /// Encoding for `codepage`, `None` if the codepage is unknown
    pub fn from_codepage(version: FormatVersion, codepage: u16) -> Option<XlsEncoding> {
        codepage::to_encoding(codepage).map(|encoding| XlsEncoding { version, encoding })
    }

    /// Encoding used until a CODEPAGE record is read
    pub fn default_for(version: FormatVersion) -> XlsEncoding {
        XlsEncoding {
            version,
            encoding: WINDOWS_1252,
        }
    }

    pub fn version(&self) -> FormatVersion {
        self.version
    }

    /// Decodes up to `chars` characters from the start of `data`
    ///
    /// `wide` is only meaningful for BIFF8. The text is clamped to the available bytes.
    pub fn decode(&self, data: &[u8], chars: usize, wide: bool) -> XlString {
        let width = match self.version {
            FormatVersion::Modern if wide => 2,
            _ => 1,
        };
        let available = (data.len() / width).min(chars);
        let bytes = &data[..available * width];
        let text = match (self.version, wide) {
            (FormatVersion::Modern, true) => UTF_16LE.decode_without_bom_handling(bytes).0,
            (FormatVersion::Modern, false) => {
                Cow::Owned(bytes.iter().map(|&b| b as char).collect())
            }
            (FormatVersion::Legacy, _) => self.encoding.decode_without_bom_handling(bytes).0,
        };
        XlString {
            text: text.into_owned(),
            consumed: bytes.len(),
            truncated: available < chars,
        }
    }

    /// `ShortXLUnicodeString`: 1-byte character count
    pub fn short_string(&self, data: &[u8]) -> Result<XlString, XlsError> {
        let cch = *data.first().ok_or(XlsError::Len {
            expected: 1,
            found: 0,
            typ: "short string",
        })? as usize;
        self.string_body(data, 1, cch, "short string")
    }

    /// `XLUnicodeString` (and `XLUnicodeRichExtendedString`): 2-byte character count
    ///
    /// Rich text runs and phonetic blocks are skipped and counted in `consumed`.
    pub fn unicode_string(&self, data: &[u8]) -> Result<XlString, XlsError> {
        if data.len() < 2 {
            return Err(XlsError::Len {
                expected: 2,
                found: data.len(),
                typ: "unicode string",
            });
        }
        let cch = read_u16(data) as usize;
        self.string_body(data, 2, cch, "unicode string")
    }

    /// `XLUnicodeStringNoCch`: the character count is stored elsewhere in the record
    pub fn string_no_cch(&self, data: &[u8], cch: usize) -> Result<XlString, XlsError> {
        self.string_body(data, 0, cch, "string")
    }

    fn string_body(
        &self,
        data: &[u8],
        start: usize,
        cch: usize,
        typ: &'static str,
    ) -> Result<XlString, XlsError> {
        if self.version == FormatVersion::Legacy {
            let mut s = self.decode(&data[start.min(data.len())..], cch, false);
            s.consumed += start;
            return Ok(s);
        }
        // an empty BIFF8 string may omit its option byte
        if cch == 0 && data.len() <= start {
            return Ok(XlString {
                text: String::new(),
                consumed: data.len(),
                truncated: false,
            });
        }
        let flags = *data.get(start).ok_or(XlsError::Len {
            expected: start + 1,
            found: data.len(),
            typ,
        })?;
        let mut pos = start + 1;
        let mut trailing = 0usize;
        if flags & 0x08 != 0 {
            let runs = data.get(pos..pos + 2).map(read_u16).ok_or(XlsError::Len {
                expected: pos + 2,
                found: data.len(),
                typ,
            })?;
            trailing += 4 * runs as usize;
            pos += 2;
        }
        if flags & 0x04 != 0 {
            let ext = data.get(pos..pos + 4).map(read_u32).ok_or(XlsError::Len {
                expected: pos + 4,
                found: data.len(),
                typ,
            })?;
            trailing += ext as usize;
            pos += 4;
        }
        let mut s = self.decode(&data[pos..], cch, flags & 0x01 != 0);
        s.consumed += pos;
        if !s.truncated {
            s.consumed = (s.consumed + trailing).min(data.len());
        }
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modern() -> XlsEncoding {
        XlsEncoding::default_for(FormatVersion::Modern)
    }

    #[test]
    fn compressed_and_wide() {
        let s = modern().unicode_string(&[3, 0, 0, b'a', 0xE9, b'c']).unwrap();
        assert_eq!(s.text, "a\u{e9}c");
        assert_eq!(s.consumed, 6);

        let s = modern()
            .unicode_string(&[2, 0, 1, 0xB1, 0x03, 0xB2, 0x03, 0xFF])
            .unwrap();
        assert_eq!(s.text, "\u{3b1}\u{3b2}");
        assert_eq!(s.consumed, 7);
    }

    #[test]
    fn rich_and_extended_blocks_are_consumed() {
        let mut data = vec![2, 0, 0x0C, 1, 0, 3, 0, 0, 0, b'h', b'i'];
        data.extend([0xAA; 4 + 3]);
        data.push(b'!');
        let s = modern().unicode_string(&data).unwrap();
        assert_eq!(s.text, "hi");
        assert_eq!(s.consumed, data.len() - 1);
    }

    #[test]
    fn short_string_and_clamping() {
        let s = modern().short_string(&[5, 0, b'S', b'h']).unwrap();
        assert_eq!(s.text, "Sh");
        assert!(s.truncated);
        assert!(modern().short_string(&[]).is_err());
        assert_eq!(modern().short_string(&[0]).unwrap().text, "");
    }

    #[test]
    fn legacy_uses_codepage() {
        let cyrillic = XlsEncoding::from_codepage(FormatVersion::Legacy, 1251).unwrap();
        let s = cyrillic.unicode_string(&[2, 0, 0xCF, 0xF0]).unwrap();
        assert_eq!(s.text, "\u{41f}\u{440}");
        assert_eq!(s.consumed, 4);
        let s = cyrillic.short_string(&[1, 0xE0]).unwrap();
        assert_eq!(s.text, "\u{430}");
    }
}
