//! Number format classification
//!
//! Only the part of cell formatting which changes a cell's type is handled here: a number whose
//! XF points at a date or duration format becomes a [`Data::Date`].

use std::collections::BTreeMap;

use crate::datatype::{Data, ExcelDateTime, ExcelDateTimeType};

/// Cell number format types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CellFormat {
    /// General number formats, text formats and anything else
    #[default]
    Other,
    /// Date and time format. Examples: "yyyy-mm-dd", "h:mm:ss AM/PM"
    DateTime,
    /// Elapsed time format. Examples: "[h]:mm:ss", "[mm]:ss"
    TimeDelta,
}

/// Classifies a custom format string
///
/// Only the first section (before any `;`) is considered. Quoted text, escaped characters and
/// bracketed colours/conditions are ignored.
pub fn detect_custom_number_format(format: &str) -> CellFormat {
    let mut escaped = false;
    let mut is_quote = false;
    let mut brackets = 0u8;
    let mut prev = ' ';
    let mut hms = false;
    let mut ap = false;

    for s in format.chars() {
        match (s, escaped, is_quote, ap, brackets) {
            (_, true, ..) => escaped = false, // if escaped, ignore
            ('_' | '\\', ..) => escaped = true,
            ('"', _, true, _, _) => is_quote = false,
            (_, _, true, _, _) => (),
            ('"', _, _, _, _) => is_quote = true,
            (';', ..) => return CellFormat::Other, // first format only
            ('[', ..) => brackets += 1,
            (']', .., 1) if hms => return CellFormat::TimeDelta, // if closing
            (']', ..) => brackets = brackets.saturating_sub(1),
            ('a' | 'A', _, _, false, 0) => ap = true,
            ('p' | 'm' | '/' | 'P' | 'M', _, _, true, 0) => return CellFormat::DateTime,
            ('d' | 'm' | 'h' | 'y' | 's' | 'D' | 'M' | 'H' | 'Y' | 'S', _, _, false, 0) => {
                return CellFormat::DateTime
            }
            _ => {
                if hms && s.eq_ignore_ascii_case(&prev) {
                    // ok ...
                } else {
                    hms = prev == '[' && matches!(s, 'm' | 'h' | 's' | 'M' | 'H' | 'S');
                }
            }
        }
        prev = s;
    }

    CellFormat::Other
}

/// Check if code corresponds to builtin format
pub fn builtin_format_by_code(code: u16) -> CellFormat {
    match code {
        14..=22 | 45 | 47 => CellFormat::DateTime,
        46 => CellFormat::TimeDelta,
        _ => CellFormat::Other,
    }
}

/// FORMAT and XF records of a workbook, reduced to the [`CellFormat`] of each XF
#[derive(Debug, Default, Clone)]
pub struct Formats {
    custom: BTreeMap<u16, CellFormat>,
    xfs: Vec<CellFormat>,
}

impl Formats {
    /// Registers a FORMAT record
    pub fn add_format(&mut self, id: u16, format: &str) {
        self.custom.insert(id, detect_custom_number_format(format));
    }

    /// Registers the next XF record, given its number format id
    pub fn add_xf(&mut self, format_id: u16) {
        let format = self
            .custom
            .get(&format_id)
            .copied()
            .unwrap_or_else(|| builtin_format_by_code(format_id));
        self.xfs.push(format);
    }

    /// Number of XF records
    pub fn len(&self) -> usize {
        self.xfs.len()
    }

    /// Format of the XF at `index`, unknown indexes are [`CellFormat::Other`]
    pub fn xf(&self, index: u16) -> CellFormat {
        self.xfs.get(index as usize).copied().unwrap_or_default()
    }

    /// Builds the cell for a number stored with XF `index`
    pub fn number(&self, index: u16, value: f64, is_1904: bool) -> Data {
        match self.xf(index) {
            CellFormat::DateTime => Data::Date(ExcelDateTime::new(
                value,
                ExcelDateTimeType::DateTime,
                is_1904,
            )),
            CellFormat::TimeDelta => Data::Date(ExcelDateTime::new(
                value,
                ExcelDateTimeType::TimeDelta,
                is_1904,
            )),
            CellFormat::Other => Data::Number(value),
        }
    }
}

#[test]
fn test_is_date_format() {
    assert_eq!(
        detect_custom_number_format("DD/MM/YY"),
        CellFormat::DateTime
    );
    assert_eq!(
        detect_custom_number_format("H:MM:SS;@"),
        CellFormat::DateTime
    );
    assert_eq!(
        detect_custom_number_format("#,##0\\ [$\\u20bd-46D]"),
        CellFormat::Other
    );
    assert_eq!(
        detect_custom_number_format("m\"M\"d\"D\";@"),
        CellFormat::DateTime
    );
    assert_eq!(
        detect_custom_number_format("[h]:mm:ss"),
        CellFormat::TimeDelta
    );
    assert_eq!(
        detect_custom_number_format("\"Y: \"0.00\"m\";\\-\"Y: \"0.00\"m\";\"Y: \"0.00\"m\""),
        CellFormat::Other
    );
    assert_eq!(detect_custom_number_format("0.00%"), CellFormat::Other);
}

#[test]
fn xf_resolution() {
    let mut f = Formats::default();
    f.add_format(164, "yyyy-mm-dd");
    f.add_format(165, "0.000");
    f.add_xf(0);
    f.add_xf(164);
    f.add_xf(165);
    f.add_xf(14);
    f.add_xf(46);
    assert_eq!(f.xf(0), CellFormat::Other);
    assert_eq!(f.xf(1), CellFormat::DateTime);
    assert_eq!(f.xf(2), CellFormat::Other);
    assert_eq!(f.xf(3), CellFormat::DateTime);
    assert_eq!(f.xf(4), CellFormat::TimeDelta);
    assert_eq!(f.xf(99), CellFormat::Other);
    assert_eq!(f.number(0, 2.5, false), Data::Number(2.5));
    assert!(matches!(f.number(1, 2.5, true), Data::Date(d) if d.is_1904()));
}
