//! Legacy binary workbooks: BIFF8 (Excel 97-2003) and BIFF5/7 (Excel 5.0/95)
//!
//! The workbook stream is read once. Globals (code page, sheets, shared strings, formats) are
//! decoded eagerly, sheets are decoded on request from the immutable stream so that several
//! sheets can be read from different threads.

mod cells;
mod formula;
mod records;
mod settings;
mod sheet;
mod sst;
mod strings;

use std::fmt;
use std::io::Read;
use std::sync::Arc;

use log::debug;
use serde::Deserialize;

pub use self::formula::{ArrayFormula, CellRange};
pub use self::settings::{
    AutoFilter, AutoFilterColumn, ColumnInfo, ConditionalFormat, ConditionalRule, DataValidation,
    Dimensions, Drawing, Margins, PageSetup, Pane, Protection, RowInfo, SheetSettings,
};
pub use self::sheet::Worksheet;
pub use self::sst::SharedStrings;

use self::records::*;
use self::sheet::SheetReader;
use self::sst::parse_sst;
use self::strings::XlsEncoding;
use crate::cfb::{Cfb, CfbError};
use crate::cursor::{CancelToken, CursorError, LoadLimits};
use crate::diagnostics::{Diagnostic, Location, LogSink, Sink};
use crate::formats::Formats;
use crate::utils::{get_u16, get_u32, read_u16};

/// An enum to handle Xls specific errors
#[derive(Debug)]
pub enum XlsError {
    /// Error while reading the raw bytes
    Cursor(CursorError),
    /// Compound file error
    Cfb(CfbError),
    /// Neither a "Workbook" nor a "Book" stream
    StreamNotFound,
    /// The workbook is encrypted (FILEPASS record)
    PasswordProtected,
    /// The workbook BOF declares an unsupported BIFF version
    UnrecognizedBiffVersion(u16),
    /// The first substream is not the workbook globals, holds the substream type found
    ExpectedGlobals(u16),
    /// Invalid length
    Len {
        /// expected length
        expected: usize,
        /// found length
        found: usize,
        /// structure type
        typ: &'static str,
    },
    /// No worksheet with that name
    WorksheetNotFound(String),
    /// No sheet at that index
    SheetIndex(usize),
    /// Unrecognized value
    Unrecognized {
        /// value type
        typ: &'static str,
        /// value found
        val: String,
    },
    /// End of stream while reading
    Eof(&'static str),
}

from_err!(CursorError, XlsError, Cursor);

impl From<CfbError> for XlsError {
    fn from(e: CfbError) -> XlsError {
        match e {
            CfbError::Cursor(e) => XlsError::Cursor(e),
            e => XlsError::Cfb(e),
        }
    }
}

impl fmt::Display for XlsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XlsError::Cursor(e) => write!(f, "{e}"),
            XlsError::Cfb(e) => write!(f, "{e}"),
            XlsError::StreamNotFound => write!(f, "Cannot find 'Workbook' or 'Book' stream"),
            XlsError::PasswordProtected => write!(f, "Workbook is password protected"),
            XlsError::UnrecognizedBiffVersion(v) => {
                write!(f, "Unsupported BIFF version {v:#06x}")
            }
            XlsError::ExpectedGlobals(t) => {
                write!(f, "Expecting workbook globals, found substream type {t:#06x}")
            }
            XlsError::Len {
                expected,
                found,
                typ,
            } => write!(
                f,
                "Invalid {typ} length, expected {expected}, found {found}"
            ),
            XlsError::WorksheetNotFound(name) => write!(f, "Worksheet '{name}' not found"),
            XlsError::SheetIndex(idx) => write!(f, "No sheet at index {idx}"),
            XlsError::Unrecognized { typ, val } => write!(f, "Unrecognized {typ}: {val}"),
            XlsError::Eof(typ) => write!(f, "End of stream while reading {typ}"),
        }
    }
}

impl std::error::Error for XlsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            XlsError::Cursor(e) => Some(e),
            XlsError::Cfb(e) => Some(e),
            _ => None,
        }
    }
}

/// BIFF flavour, selected by the workbook BOF record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVersion {
    /// BIFF8: shared string table, UTF-16 or compressed strings
    Modern,
    /// BIFF5/7: strings stored in the cells, 8-bit code page text
    Legacy,
}

/// Xls reader options
///
/// Can be deserialized, missing fields take their default value.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct XlsOptions {
    /// Initial capacity of the buffer the input is read into
    pub initial_buffer_size: usize,
    /// Growth increment of that buffer
    pub buffer_grow_size: usize,
    /// Maximum input size, larger inputs are rejected while reading
    pub max_file_size: Option<u64>,
    /// Do not capture MSODRAWING and OBJ payloads
    pub drawings_disabled: bool,
    /// Do not decode DVAL and DV records
    pub cell_validation_disabled: bool,
    /// Leave BLANK and MULBLANK cells empty
    pub ignore_blanks: bool,
    /// Drop the compound file once the workbook stream is read
    pub property_sets_disabled: bool,
    /// Code page used instead of the CODEPAGE record
    pub force_codepage: Option<u16>,
}

impl Default for XlsOptions {
    fn default() -> Self {
        XlsOptions {
            initial_buffer_size: 5 * 1024 * 1024,
            buffer_grow_size: 1024 * 1024,
            max_file_size: None,
            drawings_disabled: false,
            cell_validation_disabled: false,
            ignore_blanks: false,
            property_sets_disabled: false,
            force_codepage: None,
        }
    }
}

impl XlsOptions {
    /// Sets the bulk read buffer sizes
    pub fn with_buffer_sizes(mut self, initial: usize, grow: usize) -> Self {
        self.initial_buffer_size = initial;
        self.buffer_grow_size = grow;
        self
    }

    /// Rejects inputs larger than `size` bytes
    pub fn with_max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = Some(size);
        self
    }

    /// Toggles drawing payload capture
    pub fn with_drawings(mut self, enabled: bool) -> Self {
        self.drawings_disabled = !enabled;
        self
    }

    /// Toggles data validation decoding
    pub fn with_cell_validation(mut self, enabled: bool) -> Self {
        self.cell_validation_disabled = !enabled;
        self
    }

    /// Leaves blank cells empty
    pub fn with_ignore_blanks(mut self, ignore: bool) -> Self {
        self.ignore_blanks = ignore;
        self
    }

    /// Toggles keeping the compound file for [`Xls::container`]
    pub fn with_property_sets(mut self, enabled: bool) -> Self {
        self.property_sets_disabled = !enabled;
        self
    }

    /// Forces the code page of 8-bit strings
    pub fn with_codepage(mut self, codepage: u16) -> Self {
        self.force_codepage = Some(codepage);
        self
    }

    fn limits(&self) -> LoadLimits {
        LoadLimits {
            initial: self.initial_buffer_size,
            grow: self.buffer_grow_size,
            max: self.max_file_size,
        }
    }
}

/// Type of sheet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetType {
    /// Worksheet
    WorkSheet,
    /// DialogSheet
    DialogSheet,
    /// MacroSheet
    MacroSheet,
    /// ChartSheet
    ChartSheet,
    /// VBA module
    Vba,
}

/// Type of visible sheet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetVisible {
    /// Visible
    Visible,
    /// Hidden
    Hidden,
    /// The sheet is hidden and cannot be displayed using the user interface
    VeryHidden,
}

/// A defined name (NAME record)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinedName {
    /// Name, built-in names are spelled `_xlnm.<name>`
    pub name: String,
    /// Raw formula tokens
    pub tokens: Vec<u8>,
    /// Sheet the name is local to, `None` for a workbook level name
    pub sheet_index: Option<usize>,
    /// Hidden name
    pub hidden: bool,
    /// Built-in name (print area, filter database ...)
    pub builtin: bool,
}

/// Sheet metadata from a BOUNDSHEET record
#[derive(Debug, Clone)]
struct SheetEntry {
    name: String,
    offset: usize,
    visible: SheetVisible,
    typ: SheetType,
}

/// A struct representing an old xls format file (CFB)
pub struct Xls {
    stream: Vec<u8>,
    version: FormatVersion,
    encoding: XlsEncoding,
    codepage: u16,
    is_1904: bool,
    formats: Formats,
    strings: Arc<SharedStrings>,
    sheets: Vec<SheetEntry>,
    names: Vec<DefinedName>,
    protection: Protection,
    options: XlsOptions,
    container: Option<Cfb>,
    sink: Sink,
}

impl fmt::Debug for Xls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Xls")
            .field("version", &self.version)
            .field("codepage", &self.codepage)
            .field("is_1904", &self.is_1904)
            .field("sheets", &self.sheets)
            .field("strings", &self.strings.len())
            .field("names", &self.names.len())
            .finish()
    }
}

impl Xls {
    /// Reads a workbook with default options, reporting to the `log` crate
    pub fn new<R: Read>(reader: R) -> Result<Self, XlsError> {
        Xls::with_options(
            reader,
            XlsOptions::default(),
            &CancelToken::new(),
            Arc::new(LogSink),
        )
    }

    /// Reads a workbook
    ///
    /// `cancel` aborts the initial read of `reader`, `sink` receives every warning raised
    /// while decoding, including the ones raised later by sheet reads.
    pub fn with_options<R: Read>(
        mut reader: R,
        options: XlsOptions,
        cancel: &CancelToken,
        sink: Sink,
    ) -> Result<Self, XlsError> {
        let cfb = Cfb::new(&mut reader, options.limits(), cancel, sink.clone())?;
        let stream = workbook_stream(&cfb)?;
        detect_password(&stream)?;

        let mut xls = Xls {
            stream: Vec::new(),
            version: FormatVersion::Modern,
            encoding: XlsEncoding::default_for(FormatVersion::Modern),
            codepage: 1252,
            is_1904: false,
            formats: Formats::default(),
            strings: Arc::default(),
            sheets: Vec::new(),
            names: Vec::new(),
            protection: Protection::default(),
            options,
            container: None,
            sink,
        };
        xls.parse_globals(&stream)?;
        xls.stream = stream;
        if !xls.options.property_sets_disabled {
            xls.container = Some(cfb);
        }
        Ok(xls)
    }

    fn parse_globals(&mut self, stream: &[u8]) -> Result<(), XlsError> {
        let location = Location::stream("Workbook");
        let mut reader = RecordReader::new(stream);
        let bof = reader.next()?.ok_or(XlsError::Eof("workbook BOF"))?;
        let payload = reader.payload(&bof)?;
        if bof.typ != BOF {
            if OLD_BOFS.contains(&bof.typ) {
                return Err(XlsError::UnrecognizedBiffVersion(
                    get_u16(&payload, 0).unwrap_or_default(),
                ));
            }
            return Err(XlsError::Unrecognized {
                typ: "workbook BOF",
                val: format!("{:#06x}", bof.typ),
            });
        }
        self.version = match get_u16(&payload, 0) {
            Some(0x0600) => FormatVersion::Modern,
            Some(0x0500) => FormatVersion::Legacy,
            v => return Err(XlsError::UnrecognizedBiffVersion(v.unwrap_or_default())),
        };
        match get_u16(&payload, 2) {
            Some(0x0005) => (),
            t => return Err(XlsError::ExpectedGlobals(t.unwrap_or_default())),
        }
        debug!("{:?} workbook globals", self.version);

        self.encoding = XlsEncoding::default_for(self.version);
        if let Some(cp) = self.options.force_codepage {
            self.set_codepage(cp, &location);
        }
        while let Some(mut frame) = reader.next()? {
            if frame.typ == EOF {
                break;
            }
            let here = location.clone().at(frame.offset).record(frame.typ);
            if let Err(e) = self.global_record(&mut reader, &mut frame, &here) {
                self.sink
                    .warn(Diagnostic::warning(format!("skipping record: {e}")).at(here));
            }
        }
        debug!(
            "{} sheets, {} shared strings, {} xfs",
            self.sheets.len(),
            self.strings.len(),
            self.formats.len()
        );
        Ok(())
    }

    fn global_record(
        &mut self,
        reader: &mut RecordReader<'_>,
        frame: &mut RecordFrame,
        here: &Location,
    ) -> Result<(), XlsError> {
        match frame.typ {
            CODEPAGE => {
                let cp = get_u16(&reader.payload(frame)?, 0).ok_or(XlsError::Len {
                    expected: 2,
                    found: frame.len,
                    typ: "codepage",
                })?;
                if self.options.force_codepage.is_none() {
                    self.set_codepage(cp, here);
                }
            }
            DATEMODE => self.is_1904 = get_u16(&reader.payload(frame)?, 0) == Some(1),
            BOUNDSHEET => {
                let sheet = parse_boundsheet(&reader.payload(frame)?, &self.encoding)?;
                debug!("sheet '{}' @0x{:x}", sheet.name, sheet.offset);
                self.sheets.push(sheet);
            }
            SST if self.version == FormatVersion::Modern => {
                reader.attach_continuations(frame)?;
                let (data, boundaries) = reader.payload_with_boundaries(frame)?;
                let strings = parse_sst(&data, &boundaries, self.sink.as_ref(), here)?;
                self.strings = Arc::new(strings);
            }
            FORMAT => {
                let (id, format) = parse_format(&reader.payload(frame)?, &self.encoding)?;
                self.formats.add_format(id, &format);
            }
            XF => {
                let format = get_u16(&reader.payload(frame)?, 2).ok_or(XlsError::Len {
                    expected: 4,
                    found: frame.len,
                    typ: "xf",
                })?;
                self.formats.add_xf(format);
            }
            NAME => {
                reader.attach_continuations(frame)?;
                let name = parse_name(&reader.payload(frame)?, &self.encoding)?;
                self.names.push(name);
            }
            WINDOW_PROTECT => {
                self.protection.windows = get_u16(&reader.payload(frame)?, 0) == Some(1)
            }
            PROTECT => self.protection.protected = get_u16(&reader.payload(frame)?, 0) == Some(1),
            PASSWORD => {
                self.protection.password_hash =
                    get_u16(&reader.payload(frame)?, 0).filter(|&h| h != 0)
            }
            _ => (),
        }
        Ok(())
    }

    fn set_codepage(&mut self, codepage: u16, location: &Location) {
        self.codepage = codepage;
        match XlsEncoding::from_codepage(self.version, codepage) {
            Some(encoding) => self.encoding = encoding,
            None => self.sink.warn(
                Diagnostic::warning(format!("unknown code page {codepage}, using windows-1252"))
                    .at(location.clone()),
            ),
        }
    }

    /// BIFF flavour of the workbook
    pub fn version(&self) -> FormatVersion {
        self.version
    }

    /// Code page of 8-bit strings
    pub fn codepage(&self) -> u16 {
        self.codepage
    }

    /// Are dates relative to 1904
    pub fn is_1904(&self) -> bool {
        self.is_1904
    }

    /// The shared string table, empty for BIFF5 workbooks
    pub fn shared_strings(&self) -> &Arc<SharedStrings> {
        &self.strings
    }

    /// Defined names
    pub fn defined_names(&self) -> &[DefinedName] {
        &self.names
    }

    /// Workbook level protection
    pub fn protection(&self) -> Protection {
        self.protection
    }

    /// The compound file, unless property sets are disabled
    pub fn container(&self) -> Option<&Cfb> {
        self.container.as_ref()
    }

    /// Sheet names in workbook order
    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    /// Handles on every sheet
    pub fn sheets(&self) -> impl Iterator<Item = SheetHandle<'_>> {
        (0..self.sheets.len()).map(move |index| SheetHandle {
            index,
            workbook: self,
        })
    }

    /// Decodes the sheet named `name`
    pub fn worksheet(&self, name: &str) -> Result<Worksheet, XlsError> {
        let index = self
            .sheets
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| XlsError::WorksheetNotFound(name.to_string()))?;
        self.worksheet_by_index(index)
    }

    /// Decodes the sheet at `index`
    pub fn worksheet_by_index(&self, index: usize) -> Result<Worksheet, XlsError> {
        let entry = self.sheets.get(index).ok_or(XlsError::SheetIndex(index))?;
        debug!("reading sheet '{}'", entry.name);
        SheetReader {
            stream: &self.stream,
            name: &entry.name,
            encoding: self.encoding,
            formats: &self.formats,
            is_1904: self.is_1904,
            strings: &self.strings,
            options: &self.options,
            sink: self.sink.as_ref(),
        }
        .read(entry.offset, entry.visible)
    }

    /// Decodes every sheet, in workbook order
    pub fn worksheets(&self) -> Vec<Result<Worksheet, XlsError>> {
        self.sheets().map(|s| s.read()).collect()
    }
}

/// A sheet of a workbook, decoded on [`SheetHandle::read`]
#[derive(Debug, Clone, Copy)]
pub struct SheetHandle<'a> {
    index: usize,
    workbook: &'a Xls,
}

impl<'a> SheetHandle<'a> {
    fn entry(&self) -> &'a SheetEntry {
        &self.workbook.sheets[self.index]
    }

    /// Position in the workbook
    pub fn index(&self) -> usize {
        self.index
    }

    /// Sheet name
    pub fn name(&self) -> &'a str {
        &self.entry().name
    }

    /// Visibility
    pub fn visible(&self) -> SheetVisible {
        self.entry().visible
    }

    /// Sheet type declared by the workbook
    pub fn sheet_type(&self) -> SheetType {
        self.entry().typ
    }

    /// Decodes the sheet
    pub fn read(&self) -> Result<Worksheet, XlsError> {
        self.workbook.worksheet_by_index(self.index)
    }
}

/// The "Workbook" stream, or the "Book" stream of BIFF5 files
fn workbook_stream(cfb: &Cfb) -> Result<Vec<u8>, XlsError> {
    match cfb.get_stream("Workbook") {
        Err(CfbError::StreamNotFound(_)) => (),
        res => return Ok(res?),
    }
    match cfb.get_stream("Book") {
        Err(CfbError::StreamNotFound(_)) => Err(XlsError::StreamNotFound),
        res => Ok(res?),
    }
}

/// Scans every frame header for a FILEPASS record
///
/// Headers are never encrypted, so this runs before any payload is interpreted.
fn detect_password(stream: &[u8]) -> Result<(), XlsError> {
    let mut reader = RecordReader::new(stream);
    // a broken frame is reported by the globals parser
    while let Ok(Some(frame)) = reader.next() {
        if frame.typ == FILEPASS {
            return Err(XlsError::PasswordProtected);
        }
    }
    Ok(())
}

fn parse_boundsheet(r: &[u8], encoding: &XlsEncoding) -> Result<SheetEntry, XlsError> {
    if r.len() < 7 {
        return Err(XlsError::Len {
            expected: 7,
            found: r.len(),
            typ: "boundsheet",
        });
    }
    let offset = get_u32(r, 0).unwrap_or_default() as usize;
    let visible = match r[4] & 0x03 {
        0 => SheetVisible::Visible,
        1 => SheetVisible::Hidden,
        _ => SheetVisible::VeryHidden,
    };
    let typ = match r[5] {
        0x00 => SheetType::WorkSheet,
        0x01 => SheetType::MacroSheet,
        0x02 => SheetType::ChartSheet,
        0x06 => SheetType::Vba,
        t => {
            return Err(XlsError::Unrecognized {
                typ: "sheet type",
                val: format!("{t:#04x}"),
            })
        }
    };
    let name = encoding.short_string(&r[6..])?.text;
    Ok(SheetEntry {
        name,
        offset,
        visible,
        typ,
    })
}

fn parse_format(r: &[u8], encoding: &XlsEncoding) -> Result<(u16, String), XlsError> {
    if r.len() < 3 {
        return Err(XlsError::Len {
            expected: 3,
            found: r.len(),
            typ: "format",
        });
    }
    let id = read_u16(r);
    let s = match encoding.version() {
        FormatVersion::Modern => encoding.unicode_string(&r[2..])?,
        FormatVersion::Legacy => encoding.short_string(&r[2..])?,
    };
    Ok((id, s.text))
}

/// Names of the built-in defined names, by their one character code
const BUILTIN_NAMES: [&str; 14] = [
    "Consolidate_Area",
    "Auto_Open",
    "Auto_Close",
    "Extract",
    "Database",
    "Criteria",
    "Print_Area",
    "Print_Titles",
    "Recorder",
    "Data_Form",
    "Auto_Activate",
    "Auto_Deactivate",
    "Sheet_Title",
    "_FilterDatabase",
];

fn parse_name(r: &[u8], encoding: &XlsEncoding) -> Result<DefinedName, XlsError> {
    if r.len() < 15 {
        return Err(XlsError::Len {
            expected: 15,
            found: r.len(),
            typ: "name",
        });
    }
    let flags = read_u16(r);
    let cch = r[3] as usize;
    let cce = read_u16(&r[4..]) as usize;
    let itab = read_u16(&r[8..]) as usize;
    let builtin = flags & 0x0020 != 0;
    let s = encoding.string_no_cch(&r[14..], cch)?;
    let name = if builtin {
        let code = s.text.chars().next().map_or(u32::MAX, u32::from);
        match BUILTIN_NAMES.get(code as usize) {
            Some(n) => format!("_xlnm.{n}"),
            None => s.text,
        }
    } else {
        s.text
    };
    let start = 14 + s.consumed;
    let tokens = r
        .get(start..start + cce)
        .ok_or(XlsError::Len {
            expected: start + cce,
            found: r.len(),
            typ: "name formula",
        })?
        .to_vec();
    Ok(DefinedName {
        name,
        tokens,
        sheet_index: itab.checked_sub(1),
        hidden: flags & 0x0001 != 0,
        builtin,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modern() -> XlsEncoding {
        XlsEncoding::default_for(FormatVersion::Modern)
    }

    #[test]
    fn boundsheet() {
        let mut r = vec![0x00, 0x10, 0, 0, 1, 2, 3, 0];
        r.extend(b"abc");
        let s = parse_boundsheet(&r, &modern()).unwrap();
        assert_eq!(s.offset, 0x1000);
        assert_eq!(s.visible, SheetVisible::Hidden);
        assert_eq!(s.typ, SheetType::ChartSheet);
        assert_eq!(s.name, "abc");
        r[5] = 9;
        assert!(parse_boundsheet(&r, &modern()).is_err());
    }

    #[test]
    fn builtin_and_local_names() {
        // Print_Area local to the second sheet: ptgArea3d
        let mut r = vec![0x20, 0, 0, 1, 3, 0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0x06];
        r.extend([0x3B, 0, 0]);
        let n = parse_name(&r, &modern()).unwrap();
        assert_eq!(n.name, "_xlnm.Print_Area");
        assert_eq!(n.sheet_index, Some(1));
        assert_eq!(n.tokens, vec![0x3B, 0, 0]);
        assert!(n.builtin && !n.hidden);

        let mut r = vec![0x01, 0, 0, 4, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        r.extend(b"Rate");
        r.push(0x1E);
        let n = parse_name(&r, &modern()).unwrap();
        assert_eq!(n.name, "Rate");
        assert_eq!(n.sheet_index, None);
        assert!(n.hidden);

        r.pop();
        assert!(parse_name(&r, &modern()).is_err());
    }

    #[test]
    fn format_record() {
        let r = [0xA4, 0, 4, 0, 0, b'0', b'.', b'0', b'0'];
        assert_eq!(
            parse_format(&r, &modern()).unwrap(),
            (164, "0.00".to_string())
        );
        let legacy = XlsEncoding::default_for(FormatVersion::Legacy);
        let r = [0xA4, 0, 2, b'd', b'd'];
        assert_eq!(parse_format(&r, &legacy).unwrap(), (164, "dd".to_string()));
    }

    #[test]
    fn options_builder() {
        let o = XlsOptions::default()
            .with_ignore_blanks(true)
            .with_drawings(false);
        assert!(o.ignore_blanks && o.drawings_disabled);
        assert_eq!(o.initial_buffer_size, 5 * 1024 * 1024);
        assert!(!o.cell_validation_disabled);
    }
}
