//! Sheet-level records which do not produce cells
//!
//! Dimensions, row and column metadata, page setup, protection, autofilter, conditional
//! formats, panes, data validations and raw drawing payloads.

use super::formula::{ArrayFormula, CellRange};
use super::strings::XlsEncoding;
use super::{FormatVersion, XlsError};
use crate::utils::{read_f64, read_u16, read_u32};

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

/// Extent declared by the DIMENSIONS record
///
/// `last_row` and `last_col` are one past the last used row and column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dimensions {
    /// First used row
    pub first_row: u32,
    /// Last used row + 1
    pub last_row: u32,
    /// First used column
    pub first_col: u32,
    /// Last used column + 1
    pub last_col: u32,
}

impl Dimensions {
    /// Is (row, col) within the declared grid, which always starts at (0, 0)
    pub fn contains(&self, row: u32, col: u32) -> bool {
        row < self.last_row && col < self.last_col
    }

    /// Does the sheet declare no cell at all
    pub fn is_empty(&self) -> bool {
        self.last_row == 0 || self.last_col == 0
    }
}

pub(crate) fn parse_dimensions(r: &[u8]) -> Result<Dimensions, XlsError> {
    let (first_row, last_row, first_col, last_col) = match r.len() {
        10 => (
            read_u16(&r[0..2]) as u32,
            read_u16(&r[2..4]) as u32,
            read_u16(&r[4..6]) as u32,
            read_u16(&r[6..8]) as u32,
        ),
        14 => (
            read_u32(&r[0..4]),
            read_u32(&r[4..8]),
            read_u16(&r[8..10]) as u32,
            read_u16(&r[10..12]) as u32,
        ),
        _ => {
            return Err(XlsError::Len {
                expected: 14,
                found: r.len(),
                typ: "dimensions",
            })
        }
    };
    Ok(Dimensions {
        first_row,
        last_row,
        first_col,
        last_col,
    })
}

/// ROW record: height and formatting of one row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowInfo {
    /// Row index
    pub row: u32,
    /// Height in twips (1/20 of a point)
    pub height: u16,
    /// The height was set by the user
    pub custom_height: bool,
    /// Row is hidden
    pub hidden: bool,
    /// Outline level
    pub outline_level: u8,
    /// Default XF for the row, when set
    pub xf: Option<u16>,
}

pub(crate) fn parse_row(r: &[u8]) -> Result<RowInfo, XlsError> {
    check_len(r, 16, "row")?;
    let flags = read_u32(&r[12..]);
    Ok(RowInfo {
        row: read_u16(r) as u32,
        height: read_u16(&r[6..]) & 0x7FFF,
        custom_height: flags & 0x40 != 0,
        hidden: flags & 0x20 != 0,
        outline_level: (flags & 0x07) as u8,
        xf: (flags & 0x80 != 0).then_some(((flags >> 16) & 0x0FFF) as u16),
    })
}

/// COLINFO record: width and formatting of a column range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// First column
    pub first_col: u32,
    /// Last column (inclusive)
    pub last_col: u32,
    /// Width in 1/256 of a character
    pub width: u16,
    /// Default XF
    pub xf: u16,
    /// Columns are hidden
    pub hidden: bool,
    /// Outline level
    pub outline_level: u8,
}

pub(crate) fn parse_col_info(r: &[u8]) -> Result<ColumnInfo, XlsError> {
    check_len(r, 10, "colinfo")?;
    let flags = read_u16(&r[8..]);
    Ok(ColumnInfo {
        first_col: read_u16(r) as u32,
        last_col: read_u16(&r[2..]) as u32,
        width: read_u16(&r[4..]),
        xf: read_u16(&r[6..]),
        hidden: flags & 0x01 != 0,
        outline_level: ((flags >> 8) & 0x07) as u8,
    })
}

/// Page margins in inches
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Margins {
    /// LEFTMARGIN record
    pub left: Option<f64>,
    /// RIGHTMARGIN record
    pub right: Option<f64>,
    /// TOPMARGIN record
    pub top: Option<f64>,
    /// BOTTOMMARGIN record
    pub bottom: Option<f64>,
    /// Header margin (SETUP)
    pub header: Option<f64>,
    /// Footer margin (SETUP)
    pub footer: Option<f64>,
}

/// Print settings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageSetup {
    /// Paper size code
    pub paper_size: u16,
    /// Scaling factor in percent
    pub scale: u16,
    /// Number of pages to fit horizontally
    pub fit_width: u16,
    /// Number of pages to fit vertically
    pub fit_height: u16,
    /// Portrait orientation
    pub portrait: bool,
    /// Scale to fit `fit_width` x `fit_height` pages instead of `scale`
    pub fit_to_page: bool,
    /// Number of copies
    pub copies: u16,
    /// Center horizontally on the page
    pub center_horizontally: bool,
    /// Center vertically on the page
    pub center_vertically: bool,
    /// Page header format string
    pub header: Option<String>,
    /// Page footer format string
    pub footer: Option<String>,
    /// Margins
    pub margins: Margins,
}

impl PageSetup {
    pub(crate) fn parse_setup(&mut self, r: &[u8]) -> Result<(), XlsError> {
        check_len(r, 34, "setup")?;
        let flags = read_u16(&r[10..]);
        // fNoPls: paper size, scale and orientation were never set
        if flags & 0x04 == 0 {
            self.paper_size = read_u16(r);
            self.scale = read_u16(&r[2..]);
            self.portrait = flags & 0x02 != 0;
            self.copies = read_u16(&r[32..]);
        }
        self.fit_width = read_u16(&r[6..]);
        self.fit_height = read_u16(&r[8..]);
        self.margins.header = Some(read_f64(&r[16..]));
        self.margins.footer = Some(read_f64(&r[24..]));
        Ok(())
    }
}

pub(crate) fn parse_margin(r: &[u8]) -> Result<f64, XlsError> {
    check_len(r, 8, "margin")?;
    Ok(read_f64(r))
}

pub(crate) fn parse_bool(r: &[u8], typ: &'static str) -> Result<bool, XlsError> {
    check_len(r, 2, typ)?;
    Ok(read_u16(r) != 0)
}

/// HEADER and FOOTER: an empty record means no text
pub(crate) fn parse_header_footer(
    r: &[u8],
    encoding: &XlsEncoding,
) -> Result<Option<String>, XlsError> {
    if r.is_empty() {
        return Ok(None);
    }
    let s = match encoding.version() {
        FormatVersion::Modern => encoding.unicode_string(r)?,
        FormatVersion::Legacy => encoding.short_string(r)?,
    };
    Ok(Some(s.text))
}

/// Sheet or workbook protection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Protection {
    /// Content is protected
    pub protected: bool,
    /// Password verifier (PASSWORD record), not the password
    pub password_hash: Option<u16>,
    /// Objects are protected
    pub objects: bool,
    /// Scenarios are protected
    pub scenarios: bool,
    /// Window arrangement is protected (workbook only)
    pub windows: bool,
}

/// Autofilter state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoFilter {
    /// Number of columns with a drop down (AUTOFILTERINFO)
    pub columns: u16,
    /// Columns with an active filter
    pub filters: Vec<AutoFilterColumn>,
}

/// An AUTOFILTER record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoFilterColumn {
    /// Column index relative to the filtered range
    pub column: u16,
    /// Raw filter flags (join, simple, top 10 ...)
    pub flags: u16,
}

pub(crate) fn parse_autofilter(r: &[u8]) -> Result<AutoFilterColumn, XlsError> {
    check_len(r, 4, "autofilter")?;
    Ok(AutoFilterColumn {
        column: read_u16(r),
        flags: read_u16(&r[2..]),
    })
}

/// A conditional format block: ranges and their rules
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionalFormat {
    /// Bounding range of all ranges
    pub bound: CellRange,
    /// Ranges the rules apply to
    pub ranges: Vec<CellRange>,
    /// CF records following the CONDFMT record
    pub rules: Vec<ConditionalRule>,
}

/// A CF record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalRule {
    /// 1: compare the cell value, 2: evaluate a formula
    pub kind: u8,
    /// Comparison operator (between, equal, greater ...)
    pub operator: u8,
    /// Raw tokens of the first formula
    pub formula1: Vec<u8>,
    /// Raw tokens of the second formula
    pub formula2: Vec<u8>,
}

fn parse_ref8_list(r: &[u8], count: usize, typ: &'static str) -> Result<Vec<CellRange>, XlsError> {
    check_len(r, 8 * count, typ)?;
    Ok(r[..8 * count]
        .chunks_exact(8)
        .map(CellRange::from_ref8)
        .collect())
}

pub(crate) fn parse_condfmt(r: &[u8]) -> Result<ConditionalFormat, XlsError> {
    check_len(r, 14, "condfmt")?;
    let count = read_u16(&r[12..]) as usize;
    Ok(ConditionalFormat {
        bound: CellRange::from_ref8(&r[4..]),
        ranges: parse_ref8_list(&r[14..], count, "condfmt ranges")?,
        rules: Vec::new(),
    })
}

/// The formulas are the last `cce1 + cce2` bytes, after a variable formatting block
pub(crate) fn parse_cf(r: &[u8]) -> Result<ConditionalRule, XlsError> {
    check_len(r, 6, "cf")?;
    let cce1 = read_u16(&r[2..]) as usize;
    let cce2 = read_u16(&r[4..]) as usize;
    check_len(r, 6 + cce1 + cce2, "cf formulas")?;
    let start = r.len() - cce1 - cce2;
    Ok(ConditionalRule {
        kind: r[0],
        operator: r[1],
        formula1: r[start..start + cce1].to_vec(),
        formula2: r[start + cce1..].to_vec(),
    })
}

/// Frozen or split panes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pane {
    /// Horizontal split position (columns when frozen)
    pub x: u16,
    /// Vertical split position (rows when frozen)
    pub y: u16,
    /// First visible row of the bottom pane
    pub top_row: u16,
    /// First visible column of the right pane
    pub left_col: u16,
    /// Active pane
    pub active: u8,
}

pub(crate) fn parse_pane(r: &[u8]) -> Result<Pane, XlsError> {
    check_len(r, 9, "pane")?;
    Ok(Pane {
        x: read_u16(r),
        y: read_u16(&r[2..]),
        top_row: read_u16(&r[4..]),
        left_col: read_u16(&r[6..]),
        active: r[8],
    })
}

/// A data validation rule (DV record)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataValidation {
    /// Allowed values: any, whole, decimal, list, date, time, text length, custom
    pub data_type: u8,
    /// Comparison operator
    pub operator: u8,
    /// Stop, warning or information
    pub error_style: u8,
    /// Blank cells are valid
    pub allow_blank: bool,
    /// Show the input message
    pub show_prompt: bool,
    /// Show the error message
    pub show_error: bool,
    /// Input message title
    pub prompt_title: String,
    /// Error message title
    pub error_title: String,
    /// Input message
    pub prompt: String,
    /// Error message
    pub error: String,
    /// Raw tokens of the first formula
    pub formula1: Vec<u8>,
    /// Raw tokens of the second formula
    pub formula2: Vec<u8>,
    /// Validated ranges
    pub ranges: Vec<CellRange>,
}

pub(crate) fn parse_dv(r: &[u8], encoding: &XlsEncoding) -> Result<DataValidation, XlsError> {
    check_len(r, 4, "dv")?;
    let flags = read_u32(r);
    let mut pos = 4;
    let mut text = || -> Result<String, XlsError> {
        let s = encoding.unicode_string(r.get(pos..).unwrap_or_default())?;
        pos += s.consumed;
        // empty strings are stored as a single NUL
        Ok(if s.text == "\0" { String::new() } else { s.text })
    };
    let prompt_title = text()?;
    let error_title = text()?;
    let prompt = text()?;
    let error = text()?;
    let mut formula = || -> Result<Vec<u8>, XlsError> {
        check_len(r, pos + 4, "dv formula")?;
        let cce = read_u16(&r[pos..]) as usize;
        check_len(r, pos + 4 + cce, "dv formula")?;
        let tokens = r[pos + 4..pos + 4 + cce].to_vec();
        pos += 4 + cce;
        Ok(tokens)
    };
    let formula1 = formula()?;
    let formula2 = formula()?;
    check_len(r, pos + 2, "dv ranges")?;
    let count = read_u16(&r[pos..]) as usize;
    let ranges = parse_ref8_list(&r[pos + 2..], count, "dv ranges")?;
    Ok(DataValidation {
        data_type: (flags & 0x0F) as u8,
        error_style: ((flags >> 4) & 0x07) as u8,
        allow_blank: flags & 0x0100 != 0,
        show_prompt: flags & 0x0004_0000 != 0,
        show_error: flags & 0x0008_0000 != 0,
        operator: ((flags >> 20) & 0x0F) as u8,
        prompt_title,
        error_title,
        prompt,
        error,
        formula1,
        formula2,
        ranges,
    })
}

/// Number of DV records announced by DVAL
pub(crate) fn parse_dval(r: &[u8]) -> Result<u32, XlsError> {
    check_len(r, 18, "dval")?;
    Ok(read_u32(&r[14..]))
}

/// Raw payload of a drawing record (MSODRAWING with its continuations, or OBJ)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drawing {
    /// Record type
    pub record: u16,
    /// Offset of the record in the workbook stream
    pub offset: usize,
    /// Stitched payload
    pub data: Vec<u8>,
}

/// Everything a sheet declares besides its cells
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetSettings {
    /// ROW records, in file order
    pub rows: Vec<RowInfo>,
    /// COLINFO records, in file order
    pub columns: Vec<ColumnInfo>,
    /// DEFCOLWIDTH, in characters
    pub default_column_width: Option<u16>,
    /// DEFAULTROWHEIGHT, in twips
    pub default_row_height: Option<u16>,
    /// Print settings
    pub page_setup: PageSetup,
    /// Sheet protection
    pub protection: Protection,
    /// Autofilter, if any
    pub autofilter: Option<AutoFilter>,
    /// Conditional formats
    pub conditional_formats: Vec<ConditionalFormat>,
    /// Merged ranges
    pub merged_cells: Vec<CellRange>,
    /// Array formulas
    pub array_formulas: Vec<ArrayFormula>,
    /// Gridlines are displayed
    pub show_grid_lines: bool,
    /// Panes are frozen
    pub frozen: bool,
    /// The sheet tab is selected
    pub selected: bool,
    /// Pane split
    pub pane: Option<Pane>,
    /// Data validations
    pub data_validations: Vec<DataValidation>,
    /// Drawing payloads
    pub drawings: Vec<Drawing>,
}

impl SheetSettings {
    pub(crate) fn parse_window2(&mut self, r: &[u8]) -> Result<(), XlsError> {
        check_len(r, 2, "window2")?;
        let flags = read_u16(r);
        self.show_grid_lines = flags & 0x0002 != 0;
        self.frozen = flags & 0x0008 != 0;
        self.selected = flags & 0x0200 != 0;
        Ok(())
    }

    pub(crate) fn parse_merged_cells(&mut self, r: &[u8]) -> Result<(), XlsError> {
        check_len(r, 2, "mergedcells")?;
        let count = read_u16(r) as usize;
        self.merged_cells
            .extend(parse_ref8_list(&r[2..], count, "mergedcells")?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimensions_biff8_and_biff5() {
        let d = parse_dimensions(&[0, 0, 0, 0, 10, 0, 0, 0, 0, 0, 5, 0, 0, 0]).unwrap();
        assert_eq!((d.last_row, d.last_col), (10, 5));
        assert!(d.contains(9, 4));
        assert!(!d.contains(10, 0));
        let d = parse_dimensions(&[1, 0, 3, 0, 0, 0, 2, 0, 0, 0]).unwrap();
        assert_eq!(d.first_row, 1);
        assert_eq!(d.last_col, 2);
        assert!(parse_dimensions(&[0; 6]).is_err());
    }

    #[test]
    fn row_and_column_info() {
        let mut r = vec![4, 0, 0, 0, 3, 0, 0x2C, 0x01, 0, 0, 0, 0];
        r.extend((0x60u32 | 0x80 | (17 << 16)).to_le_bytes());
        let row = parse_row(&r).unwrap();
        assert_eq!(row.row, 4);
        assert_eq!(row.height, 300);
        assert!(row.hidden && row.custom_height);
        assert_eq!(row.xf, Some(17));

        let c = parse_col_info(&[1, 0, 3, 0, 0, 0x10, 15, 0, 0x01, 0x02]).unwrap();
        assert_eq!((c.first_col, c.last_col, c.width), (1, 3, 0x1000));
        assert!(c.hidden);
        assert_eq!(c.outline_level, 2);
    }

    #[test]
    fn cf_formulas_are_at_the_end() {
        let mut r = vec![1, 3, 2, 0, 1, 0];
        r.extend([0; 10]);
        r.extend([0x1E, 1, 0x1E]);
        let cf = parse_cf(&r).unwrap();
        assert_eq!((cf.kind, cf.operator), (1, 3));
        assert_eq!(cf.formula1, vec![0x1E, 1]);
        assert_eq!(cf.formula2, vec![0x1E]);
    }

    #[test]
    fn data_validation() {
        let enc = XlsEncoding::default_for(FormatVersion::Modern);
        let flags: u32 = 3 | (1 << 8) | (1 << 18) | (5 << 20);
        let mut r = flags.to_le_bytes().to_vec();
        r.extend([1, 0, 0, 0]);
        r.extend([1, 0, 0, 0]);
        r.extend([4, 0, 0, b'p', b'i', b'c', b'k']);
        r.extend([1, 0, 0, 0]);
        r.extend([3, 0, 0, 0, 0x17, 1, 0]);
        r.extend([0, 0, 0, 0]);
        r.extend([1, 0, 0, 0, 9, 0, 2, 0, 2, 0]);
        let dv = parse_dv(&r, &enc).unwrap();
        assert_eq!(dv.data_type, 3);
        assert_eq!(dv.operator, 5);
        assert!(dv.allow_blank && dv.show_prompt && !dv.show_error);
        assert_eq!(dv.prompt, "pick");
        assert_eq!(dv.prompt_title, "");
        assert_eq!(dv.formula1, vec![0x17, 1, 0]);
        assert!(dv.formula2.is_empty());
        assert_eq!(
            dv.ranges,
            vec![CellRange {
                first_row: 0,
                last_row: 9,
                first_col: 2,
                last_col: 2
            }]
        );
    }

    #[test]
    fn setup_without_printer_settings() {
        let mut ps = PageSetup::default();
        let mut r = vec![9, 0, 80, 0, 1, 0, 2, 0, 3, 0, 0x06, 0, 0, 0, 0, 0];
        r.extend(0.3f64.to_le_bytes());
        r.extend(0.4f64.to_le_bytes());
        r.extend([1, 0]);
        ps.parse_setup(&r).unwrap();
        assert_eq!(ps.paper_size, 0);
        assert_eq!((ps.fit_width, ps.fit_height), (2, 3));
        assert_eq!(ps.margins.footer, Some(0.4));
    }
}
