//! Value cell records
//!
//! Every cell record starts with `row: u16, col: u16, xf: u16`. Multi-cell records (MULRK,
//! MULBLANK) repeat the per-cell part and end with the last column.

use super::strings::XlsEncoding;
use super::XlsError;
use crate::datatype::{Data, Label};
use crate::diagnostics::{Diagnostic, DiagnosticSink, Location};
use crate::formats::Formats;
use crate::utils::{read_f64, read_i32, read_u16, read_u32};
use crate::{Cell, CellErrorType};

/// Decodes cell records of one sheet
pub(crate) struct CellDecoder<'a> {
    pub formats: &'a Formats,
    pub encoding: XlsEncoding,
    pub is_1904: bool,
    pub strings: usize,
    pub sink: &'a dyn DiagnosticSink,
}

fn check_len(r: &[u8], expected: usize, typ: &'static str) -> Result<(), XlsError> {
    if r.len() < expected {
        Err(XlsError::Len {
            expected,
            found: r.len(),
            typ,
        })
    } else {
        Ok(())
    }
}

fn position(r: &[u8]) -> (u32, u32) {
    (read_u16(r) as u32, read_u16(&r[2..]) as u32)
}

/// Decodes an RK number
///
/// Bit 0: the value is multiplied by 100, bit 1: the 30 high bits are a signed integer,
/// otherwise they are the high bits of an `f64`.
pub(crate) fn rk_num(rk: &[u8]) -> f64 {
    let d100 = (rk[0] & 1) != 0;
    let is_int = (rk[0] & 2) != 0;

    let mut v = [0u8; 8];
    v[4..].copy_from_slice(&rk[..4]);
    v[4] &= 0xFC;
    let v = if is_int {
        (read_i32(&v[4..]) >> 2) as f64
    } else {
        read_f64(&v)
    };
    if d100 {
        v / 100.0
    } else {
        v
    }
}

impl CellDecoder<'_> {
    /// NUMBER: 8-byte float
    pub fn number(&self, r: &[u8]) -> Result<Cell<Data>, XlsError> {
        check_len(r, 14, "number")?;
        let xf = read_u16(&r[4..]);
        let v = read_f64(&r[6..]);
        Ok(Cell::new(
            position(r),
            self.formats.number(xf, v, self.is_1904),
        ))
    }

    /// RK: 4-byte packed number
    pub fn rk(&self, r: &[u8]) -> Result<Cell<Data>, XlsError> {
        check_len(r, 10, "rk")?;
        let xf = read_u16(&r[4..]);
        let v = rk_num(&r[6..10]);
        Ok(Cell::new(
            position(r),
            self.formats.number(xf, v, self.is_1904),
        ))
    }

    /// MULRK: a run of RK numbers on one row
    pub fn mul_rk(&self, r: &[u8]) -> Result<Vec<Cell<Data>>, XlsError> {
        check_len(r, 6, "mulrk")?;
        let (row, col_first) = position(r);
        let col_last = read_u16(&r[r.len() - 2..]) as u32;
        if col_last < col_first {
            return Err(XlsError::Unrecognized {
                typ: "mulrk column range",
                val: format!("{col_first}..{col_last}"),
            });
        }
        let count = (col_last - col_first + 1) as usize;
        check_len(r, 6 + 6 * count, "mulrk")?;
        Ok(r[4..4 + 6 * count]
            .chunks_exact(6)
            .zip(col_first..)
            .map(|(rk, col)| {
                let xf = read_u16(rk);
                let v = rk_num(&rk[2..]);
                Cell::new((row, col), self.formats.number(xf, v, self.is_1904))
            })
            .collect())
    }

    /// BLANK: a formatted cell without value
    pub fn blank(&self, r: &[u8]) -> Result<Cell<Data>, XlsError> {
        check_len(r, 6, "blank")?;
        Ok(Cell::new(position(r), Data::Blank))
    }

    /// MULBLANK: a run of blank cells on one row
    pub fn mul_blank(&self, r: &[u8]) -> Result<Vec<Cell<Data>>, XlsError> {
        check_len(r, 6, "mulblank")?;
        let (row, col_first) = position(r);
        let col_last = read_u16(&r[r.len() - 2..]) as u32;
        let count = (col_last + 1).saturating_sub(col_first) as usize;
        check_len(r, 6 + 2 * count, "mulblank")?;
        Ok((col_first..=col_last)
            .map(|col| Cell::new((row, col), Data::Blank))
            .collect())
    }

    /// BOOLERR: a boolean or an error value
    ///
    /// Unknown error codes become [`CellErrorType::GettingData`].
    pub fn bool_err(&self, r: &[u8], location: &Location) -> Result<Cell<Data>, XlsError> {
        check_len(r, 8, "boolerr")?;
        let pos = position(r);
        let v = match r[7] {
            0x00 => Data::Bool(r[6] != 0),
            _ => match CellErrorType::from_code(r[6]) {
                Some(e) => Data::Error(e),
                None => {
                    self.sink.warn(
                        Diagnostic::warning(format!("unrecognized error code 0x{:02X}", r[6]))
                            .at(location.clone().cell(pos.0, pos.1)),
                    );
                    Data::Error(CellErrorType::GettingData)
                }
            },
        };
        Ok(Cell::new(pos, v))
    }

    /// LABELSST: an index into the shared string table
    pub fn label_sst(&self, r: &[u8], location: &Location) -> Result<Cell<Data>, XlsError> {
        check_len(r, 10, "labelsst")?;
        let pos = position(r);
        let i = read_u32(&r[6..]) as usize;
        if i >= self.strings {
            self.sink.warn(
                Diagnostic::warning(format!(
                    "shared string {i} out of range ({} strings)",
                    self.strings
                ))
                .at(location.clone().cell(pos.0, pos.1)),
            );
        }
        Ok(Cell::new(pos, Data::Label(Label::Shared(i))))
    }

    /// LABEL and RSTRING: text stored in the cell record
    ///
    /// Formatting runs following the text of an RSTRING are ignored.
    pub fn label(&self, r: &[u8], location: &Location) -> Result<Cell<Data>, XlsError> {
        check_len(r, 8, "label")?;
        let pos = position(r);
        let s = self.encoding.unicode_string(&r[6..])?;
        if s.truncated {
            self.sink.warn(
                Diagnostic::warning("label text clamped to the record length")
                    .at(location.clone().cell(pos.0, pos.1)),
            );
        }
        Ok(Cell::new(pos, Data::Label(Label::Inline(s.text))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Collector;
    use crate::xls::FormatVersion;

    fn decoder<'a>(formats: &'a Formats, sink: &'a Collector) -> CellDecoder<'a> {
        CellDecoder {
            formats,
            encoding: XlsEncoding::default_for(FormatVersion::Modern),
            is_1904: false,
            strings: 2,
            sink,
        }
    }

    #[test]
    fn rk_variants() {
        // integer
        assert_eq!(rk_num(&((12345 << 2) | 2u32).to_le_bytes()), 12345.);
        // integer / 100
        assert_eq!(rk_num(&((12345 << 2) | 3u32).to_le_bytes()), 123.45);
        // negative integer
        assert_eq!(rk_num(&((-7i32 << 2) as u32 | 2).to_le_bytes()), -7.);
        // float high bits
        let hi = (1.5f64.to_bits() >> 32) as u32;
        assert_eq!(rk_num(&hi.to_le_bytes()), 1.5);
        assert_eq!(rk_num(&(hi | 1).to_le_bytes()), 0.015);
    }

    #[test]
    fn mul_records() {
        let formats = Formats::default();
        let sink = Collector::new();
        let d = decoder(&formats, &sink);
        let mut r = vec![3, 0, 1, 0];
        for v in [1u32, 2] {
            r.extend([0, 0]);
            r.extend(((v << 2) | 2).to_le_bytes());
        }
        r.extend([2, 0]);
        let cells = d.mul_rk(&r).unwrap();
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[1].get_position(), (3, 2));
        assert_eq!(cells[1].get_value(), &Data::Number(2.));

        let cells = d.mul_blank(&[0, 0, 4, 0, 0, 0, 0, 0, 0, 0, 6, 0]).unwrap();
        assert_eq!(
            cells.iter().map(|c| c.get_position()).collect::<Vec<_>>(),
            vec![(0, 4), (0, 5), (0, 6)]
        );
        assert!(d.mul_blank(&[0, 0, 4, 0, 0, 0, 6, 0]).is_err());
    }

    #[test]
    fn bool_err_and_labels() {
        let formats = Formats::default();
        let sink = Collector::new();
        let d = decoder(&formats, &sink);
        let loc = Location::stream("Sheet1");
        let c = d.bool_err(&[1, 0, 1, 0, 0, 0, 1, 0], &loc).unwrap();
        assert_eq!(c.get_value(), &Data::Bool(true));
        let c = d.bool_err(&[1, 0, 1, 0, 0, 0, 0x07, 1], &loc).unwrap();
        assert_eq!(c.get_value(), &Data::Error(CellErrorType::Div0));
        let c = d.bool_err(&[1, 0, 1, 0, 0, 0, 0x55, 1], &loc).unwrap();
        assert_eq!(c.get_value(), &Data::Error(CellErrorType::GettingData));
        assert!(sink.contains("0x55"));

        let c = d.label_sst(&[0, 0, 0, 0, 0, 0, 9, 0, 0, 0], &loc).unwrap();
        assert_eq!(c.get_value(), &Data::Label(Label::Shared(9)));
        assert!(sink.contains("out of range"));

        let c = d.label(&[0, 0, 0, 0, 0, 0, 2, 0, 0, b'o', b'k'], &loc).unwrap();
        assert_eq!(c.get_value(), &Data::Label(Label::Inline("ok".into())));
        assert!(d.number(&[0; 10]).is_err());
    }
}
