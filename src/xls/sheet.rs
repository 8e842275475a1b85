//! Worksheet substreams
//!
//! A sheet is decoded in a single pass over its records. Cells are collected first and the grid
//! is allocated once from their extent, DIMENSIONS only being reported.

use std::sync::Arc;

use log::debug;

use super::cells::CellDecoder;
use super::formula::{
    parse_array, parse_formula, parse_shared_formula, parse_string, CachedValue, SharedFormulas,
};
use super::records::*;
use super::settings::{
    parse_autofilter, parse_bool, parse_cf, parse_col_info, parse_condfmt, parse_dimensions,
    parse_dv, parse_dval, parse_header_footer, parse_margin, parse_pane, parse_row, AutoFilter,
    Dimensions, Drawing, SheetSettings,
};
use super::sst::{continued_string, SharedStrings};
use super::strings::XlsEncoding;
use super::{FormatVersion, SheetType, SheetVisible, XlsError, XlsOptions};
use crate::datatype::{Data, DataRef, Formula, FormulaValue, Label};
use crate::diagnostics::{Diagnostic, DiagnosticSink, Location};
use crate::formats::Formats;
use crate::utils::get_u16;
use crate::{Cell, Range};

/// A decoded worksheet
///
/// Labels point into the workbook shared string table, which the worksheet keeps alive.
#[derive(Debug, Clone)]
pub struct Worksheet {
    name: String,
    sheet_type: SheetType,
    visible: SheetVisible,
    dimensions: Option<Dimensions>,
    range: Range<Data>,
    settings: SheetSettings,
    strings: Arc<SharedStrings>,
}

impl Worksheet {
    /// Sheet name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sheet type
    pub fn sheet_type(&self) -> SheetType {
        self.sheet_type
    }

    /// Visibility
    pub fn visible(&self) -> SheetVisible {
        self.visible
    }

    /// Extent declared by the DIMENSIONS record, if any
    pub fn dimensions(&self) -> Option<Dimensions> {
        self.dimensions
    }

    /// Grid size as (rows, columns), the grid always starts at (0, 0)
    pub fn size(&self) -> (usize, usize) {
        self.range.get_size()
    }

    /// The cell grid
    pub fn range(&self) -> &Range<Data> {
        &self.range
    }

    /// Sheet level settings
    pub fn settings(&self) -> &SheetSettings {
        &self.settings
    }

    /// The workbook shared string table
    pub fn shared_strings(&self) -> &SharedStrings {
        &self.strings
    }

    /// Cell at (row, col), `None` outside the grid
    pub fn get(&self, row: u32, col: u32) -> Option<&Data> {
        self.range.get_value((row, col))
    }

    /// Resolved value at (row, col)
    ///
    /// Labels are looked up in the shared string table, formulas give their cached value.
    pub fn value(&self, row: u32, col: u32) -> DataRef<'_> {
        self.get(row, col)
            .map_or(DataRef::Empty, |data| self.resolve(data))
    }

    /// Text of a label cell or of a formula with a text result
    pub fn label(&self, row: u32, col: u32) -> Option<&str> {
        match self.value(row, col) {
            DataRef::String(s) => Some(s),
            _ => None,
        }
    }

    /// Raw tokens of a formula cell
    pub fn formula_tokens(&self, row: u32, col: u32) -> Option<&[u8]> {
        self.get(row, col)?.get_formula().map(|f| f.tokens())
    }

    /// Iterates over non-empty cells as (row, col, value)
    pub fn used_values(&self) -> impl Iterator<Item = (u32, u32, DataRef<'_>)> {
        self.range
            .used_cells()
            .filter(|(_, _, data)| !data.is_empty())
            .map(|(row, col, data)| (row as u32, col as u32, self.resolve(data)))
    }

    fn resolve<'a>(&'a self, data: &'a Data) -> DataRef<'a> {
        match data {
            Data::Empty | Data::Blank => DataRef::Empty,
            Data::Number(v) => DataRef::Float(*v),
            Data::Label(Label::Shared(i)) => {
                self.strings.get(*i).map_or(DataRef::Empty, DataRef::String)
            }
            Data::Label(Label::Inline(s)) => DataRef::String(s),
            Data::Bool(b) => DataRef::Bool(*b),
            Data::Error(e) => DataRef::Error(e),
            Data::Date(d) => DataRef::DateTime(*d),
            Data::Formula(f) => match f.value() {
                FormulaValue::Number(v) => DataRef::Float(*v),
                FormulaValue::String(s) => DataRef::String(s),
                FormulaValue::Bool(b) => DataRef::Bool(*b),
                FormulaValue::Error(e) => DataRef::Error(e),
            },
        }
    }
}

/// Cells of one sheet, laid out in a dense grid once every record is read
///
/// The grid spans the cells actually found, DIMENSIONS is only compared against it.
struct Grid {
    cells: Vec<Cell<Data>>,
    /// Number of rows and columns a cell record may address
    limits: (u32, u32),
    dropped: usize,
    ignore_blanks: bool,
}

impl Grid {
    fn new(version: FormatVersion, ignore_blanks: bool) -> Self {
        let limits = match version {
            FormatVersion::Modern => (0x1_0000, 0x100),
            FormatVersion::Legacy => (0x4000, 0x100),
        };
        Grid {
            cells: Vec::new(),
            limits,
            dropped: 0,
            ignore_blanks,
        }
    }

    fn place(&mut self, cell: Cell<Data>) {
        if self.ignore_blanks && matches!(cell.get_value(), Data::Blank) {
            return;
        }
        let (row, col) = cell.get_position();
        if row >= self.limits.0 || col >= self.limits.1 {
            self.dropped += 1;
            return;
        }
        self.cells.push(cell);
    }

    /// Sets the text result of a plain formula already placed at (row, col)
    fn set_string(&mut self, row: u32, col: u32, text: String) -> bool {
        let target = self
            .cells
            .iter_mut()
            .rev()
            .find(|c| c.get_position() == (row, col))
            .map(|c| &mut c.val);
        match target {
            Some(Data::Formula(f)) => {
                *f = Formula::new(FormulaValue::String(text), f.tokens_arc().clone());
                true
            }
            _ => false,
        }
    }

    /// Allocates the grid from the extent of the cells read, then fills it
    fn finish(
        self,
        declared: Option<&Dimensions>,
        sink: &dyn DiagnosticSink,
        location: &Location,
    ) -> Range<Data> {
        if self.dropped > 0 {
            sink.warn(
                Diagnostic::warning(format!(
                    "{} cells beyond the {}x{} sheet limits dropped",
                    self.dropped, self.limits.0, self.limits.1
                ))
                .at(location.clone()),
            );
        }
        let end = match self
            .cells
            .iter()
            .map(Cell::get_position)
            .reduce(|(r, c), (row, col)| (r.max(row), c.max(col)))
        {
            Some(end) => end,
            None => return Range::empty(),
        };
        let mut range = Range::new((0, 0), end);
        if let Some(d) = declared.filter(|d| !d.is_empty()) {
            let outside = self
                .cells
                .iter()
                .filter(|c| {
                    let (row, col) = c.get_position();
                    !d.contains(row, col)
                })
                .count();
            if outside > 0 {
                sink.warn(
                    Diagnostic::warning(format!(
                        "{outside} cells outside the declared {}x{} grid, grown to {}x{}",
                        d.last_row,
                        d.last_col,
                        range.height(),
                        range.width()
                    ))
                    .at(location.clone()),
                );
            }
        }
        for cell in self.cells {
            let (row, col) = cell.get_position();
            range[(row as usize, col as usize)] = cell.into_value();
        }
        range
    }
}

/// Mutable state of one sheet pass
struct SheetState {
    grid: Grid,
    dimensions: Option<Dimensions>,
    settings: SheetSettings,
    shared: SharedFormulas,
    validations: Option<u32>,
    /// String formula whose STRING record was not found right after it: (row, col, shared)
    pending_string: Option<(u32, u32, bool)>,
    /// WSBOOL fDialog, the substream is a dialog sheet
    dialog: bool,
}

/// Decodes one sheet substream
///
/// Borrows the immutable workbook state only, several sheets may be read concurrently.
pub(crate) struct SheetReader<'a> {
    pub stream: &'a [u8],
    pub name: &'a str,
    pub encoding: XlsEncoding,
    pub formats: &'a Formats,
    pub is_1904: bool,
    pub strings: &'a Arc<SharedStrings>,
    pub options: &'a XlsOptions,
    pub sink: &'a dyn DiagnosticSink,
}

impl SheetReader<'_> {
    /// Reads the substream starting with the BOF at `offset`
    pub fn read(&self, offset: usize, visible: SheetVisible) -> Result<Worksheet, XlsError> {
        let location = Location::stream(self.name);
        let mut reader = RecordReader::at(self.stream, offset);
        let bof = match reader.next()? {
            Some(frame) if frame.typ == BOF => frame,
            _ => {
                return Err(XlsError::Unrecognized {
                    typ: "sheet BOF",
                    val: format!("{} @0x{offset:x}", self.name),
                })
            }
        };
        let bof_payload = reader.payload(&bof)?;
        let sheet_type = match get_u16(&bof_payload, 2) {
            Some(0x0010) => SheetType::WorkSheet,
            Some(0x0020) => SheetType::ChartSheet,
            Some(0x0040) => SheetType::MacroSheet,
            Some(0x0006) => SheetType::Vba,
            t => {
                sink_warn(
                    self.sink,
                    &format!(
                        "unexpected substream type {:#06x}, read as a worksheet",
                        t.unwrap_or_default()
                    ),
                    &location,
                );
                SheetType::WorkSheet
            }
        };
        let mut worksheet = Worksheet {
            name: self.name.to_string(),
            sheet_type,
            visible,
            dimensions: None,
            range: Range::empty(),
            settings: SheetSettings::default(),
            strings: self.strings.clone(),
        };
        if sheet_type != SheetType::WorkSheet {
            debug!("skipping {sheet_type:?} '{}'", self.name);
            if !reader.skip_substream()? {
                sink_warn(self.sink, "sheet ends without EOF record", &location);
            }
            return Ok(worksheet);
        }

        let mut state = SheetState {
            grid: Grid::new(self.encoding.version(), self.options.ignore_blanks),
            dimensions: None,
            settings: SheetSettings::default(),
            shared: SharedFormulas::default(),
            validations: None,
            pending_string: None,
            dialog: false,
        };
        let mut terminated = false;
        loop {
            let mut frame = match reader.next() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    sink_warn(self.sink, &format!("sheet stream is truncated: {e}"), &location);
                    break;
                }
            };
            match frame.typ {
                EOF => {
                    terminated = true;
                    break;
                }
                BOF => {
                    // embedded chart
                    match reader.skip_substream() {
                        Ok(true) => continue,
                        Ok(false) => break,
                        Err(e) => {
                            sink_warn(self.sink, &format!("embedded substream: {e}"), &location);
                            break;
                        }
                    }
                }
                _ => (),
            }
            let here = location.clone().at(frame.offset).record(frame.typ);
            match self.record(&mut reader, &mut frame, &mut state, &here) {
                Ok(()) => (),
                Err(e @ XlsError::PasswordProtected) => return Err(e),
                Err(e) => sink_warn(self.sink, &format!("skipping record: {e}"), &here),
            }
        }
        if !terminated {
            sink_warn(self.sink, "sheet ends without EOF record", &location);
        }

        if let Some((row, col, _)) = state.pending_string {
            missing_string(self.sink, &location.clone().cell(row, col));
        }
        for cell in state.shared.finish(self.sink, &location) {
            state.grid.place(cell);
        }
        if let Some(declared) = state.validations {
            let found = state.settings.data_validations.len();
            if declared as usize != found {
                sink_warn(
                    self.sink,
                    &format!("{declared} data validations declared, {found} found"),
                    &location,
                );
            }
        }
        worksheet.range = state
            .grid
            .finish(state.dimensions.as_ref(), self.sink, &location);
        if state.dialog {
            worksheet.sheet_type = SheetType::DialogSheet;
        }
        worksheet.dimensions = state.dimensions;
        worksheet.settings = state.settings;
        Ok(worksheet)
    }

    fn cells(&self) -> CellDecoder<'_> {
        CellDecoder {
            formats: self.formats,
            encoding: self.encoding,
            is_1904: self.is_1904,
            strings: self.strings.len(),
            sink: self.sink,
        }
    }

    /// Routes one record to its decoder
    fn record(
        &self,
        reader: &mut RecordReader<'_>,
        frame: &mut RecordFrame,
        state: &mut SheetState,
        here: &Location,
    ) -> Result<(), XlsError> {
        let cells = self.cells();
        let settings = &mut state.settings;
        match frame.typ {
            FILEPASS => return Err(XlsError::PasswordProtected),
            DIMENSIONS => {
                let d = parse_dimensions(&reader.payload(frame)?)?;
                state.dimensions.get_or_insert(d);
            }
            NUMBER => state.grid.place(cells.number(&reader.payload(frame)?)?),
            RK => state.grid.place(cells.rk(&reader.payload(frame)?)?),
            MULRK => {
                for cell in cells.mul_rk(&reader.payload(frame)?)? {
                    state.grid.place(cell);
                }
            }
            BLANK => state.grid.place(cells.blank(&reader.payload(frame)?)?),
            MULBLANK => {
                for cell in cells.mul_blank(&reader.payload(frame)?)? {
                    state.grid.place(cell);
                }
            }
            BOOLERR => state
                .grid
                .place(cells.bool_err(&reader.payload(frame)?, here)?),
            LABELSST => state
                .grid
                .place(cells.label_sst(&reader.payload(frame)?, here)?),
            LABEL | RSTRING => state.grid.place(cells.label(&reader.payload(frame)?, here)?),
            FORMULA => {
                let mut formula = parse_formula(&reader.payload(frame)?)?;
                if let Some((row, col, _)) = state.pending_string.take() {
                    missing_string(self.sink, &here.clone().cell(row, col));
                }
                if formula.value == CachedValue::PendingString {
                    match self.formula_string(reader, frame) {
                        Some(text) => {
                            formula.value = CachedValue::Value(FormulaValue::String(text))
                        }
                        None => {
                            state.pending_string = Some((formula.row, formula.col, formula.shared))
                        }
                    }
                }
                if formula.shared {
                    if let Some(orphan) = state.shared.add_cell(formula, self.sink, here) {
                        state.grid.place(orphan.into_cell());
                    }
                } else {
                    state.grid.place(formula.into_cell());
                }
            }
            SHRFMLA => {
                let group = parse_shared_formula(&reader.payload(frame)?)?;
                if let Some(orphan) = state.shared.add_group(group, self.sink, here) {
                    state.grid.place(orphan.into_cell());
                }
            }
            ARRAY => settings
                .array_formulas
                .push(parse_array(&reader.payload(frame)?)?),
            ROW => settings.rows.push(parse_row(&reader.payload(frame)?)?),
            COLINFO => settings.columns.push(parse_col_info(&reader.payload(frame)?)?),
            DEFCOLWIDTH => {
                settings.default_column_width = get_u16(&reader.payload(frame)?, 0);
            }
            DEFAULT_ROW_HEIGHT => {
                settings.default_row_height = get_u16(&reader.payload(frame)?, 2);
            }
            SETUP => settings.page_setup.parse_setup(&reader.payload(frame)?)?,
            LEFT_MARGIN => {
                settings.page_setup.margins.left = Some(parse_margin(&reader.payload(frame)?)?)
            }
            RIGHT_MARGIN => {
                settings.page_setup.margins.right = Some(parse_margin(&reader.payload(frame)?)?)
            }
            TOP_MARGIN => {
                settings.page_setup.margins.top = Some(parse_margin(&reader.payload(frame)?)?)
            }
            BOTTOM_MARGIN => {
                settings.page_setup.margins.bottom = Some(parse_margin(&reader.payload(frame)?)?)
            }
            HEADER => {
                settings.page_setup.header =
                    parse_header_footer(&reader.payload(frame)?, &self.encoding)?
            }
            FOOTER => {
                settings.page_setup.footer =
                    parse_header_footer(&reader.payload(frame)?, &self.encoding)?
            }
            WSBOOL => {
                let flags = get_u16(&reader.payload(frame)?, 0).unwrap_or_default();
                settings.page_setup.fit_to_page = flags & 0x0100 != 0;
                state.dialog = flags & 0x0010 != 0;
            }
            HCENTER => {
                settings.page_setup.center_horizontally =
                    parse_bool(&reader.payload(frame)?, "hcenter")?
            }
            VCENTER => {
                settings.page_setup.center_vertically =
                    parse_bool(&reader.payload(frame)?, "vcenter")?
            }
            PROTECT => {
                settings.protection.protected = parse_bool(&reader.payload(frame)?, "protect")?
            }
            PASSWORD => {
                settings.protection.password_hash =
                    get_u16(&reader.payload(frame)?, 0).filter(|&h| h != 0)
            }
            OBJECT_PROTECT => {
                settings.protection.objects = parse_bool(&reader.payload(frame)?, "objprotect")?
            }
            SCENARIO_PROTECT => {
                settings.protection.scenarios =
                    parse_bool(&reader.payload(frame)?, "scenprotect")?
            }
            AUTOFILTER_INFO => {
                let columns = get_u16(&reader.payload(frame)?, 0).unwrap_or_default();
                settings.autofilter.get_or_insert_with(AutoFilter::default).columns = columns;
            }
            AUTOFILTER => {
                let column = parse_autofilter(&reader.payload(frame)?)?;
                settings
                    .autofilter
                    .get_or_insert_with(AutoFilter::default)
                    .filters
                    .push(column);
            }
            CONDFMT => {
                reader.attach_continuations(frame)?;
                settings
                    .conditional_formats
                    .push(parse_condfmt(&reader.payload(frame)?)?);
            }
            CF => {
                let rule = parse_cf(&reader.payload(frame)?)?;
                match settings.conditional_formats.last_mut() {
                    Some(cf) => cf.rules.push(rule),
                    None => sink_warn(self.sink, "CF record without CONDFMT", here),
                }
            }
            MERGED_CELLS => settings.parse_merged_cells(&reader.payload(frame)?)?,
            WINDOW2 => settings.parse_window2(&reader.payload(frame)?)?,
            PANE => settings.pane = Some(parse_pane(&reader.payload(frame)?)?),
            DVAL if !self.options.cell_validation_disabled => {
                state.validations = Some(parse_dval(&reader.payload(frame)?)?);
            }
            DV if !self.options.cell_validation_disabled => {
                settings
                    .data_validations
                    .push(parse_dv(&reader.payload(frame)?, &self.encoding)?);
            }
            MSODRAWING | OBJ if !self.options.drawings_disabled => {
                if frame.typ == MSODRAWING {
                    reader.attach_continuations(frame)?;
                }
                settings.drawings.push(Drawing {
                    record: frame.typ,
                    offset: frame.offset,
                    data: reader.payload(frame)?.into_owned(),
                });
            }
            TXO => {
                // the text and its formatting runs follow as CONTINUE frames
                reader.attach_continuations(frame)?;
            }
            STRING => {
                // usually already read ahead by its FORMULA
                if let Some((row, col, shared)) = state.pending_string.take() {
                    reader.attach_continuations(frame)?;
                    let text = self.string_record(reader, frame)?;
                    let filled = if shared {
                        state.shared.set_string(row, col, &text)
                    } else {
                        state.grid.set_string(row, col, text)
                    };
                    if !filled {
                        missing_string(self.sink, &here.clone().cell(row, col));
                    }
                }
            }
            _ => (),
        }
        Ok(())
    }

    /// Looks for the STRING record holding the result of the FORMULA just read
    ///
    /// SHRFMLA, ARRAY and TABLE records may sit in between. The reader position is restored,
    /// a frame which cannot be read ends the search.
    fn formula_string(
        &self,
        reader: &mut RecordReader<'_>,
        formula: &RecordFrame,
    ) -> Option<String> {
        let saved = reader.save_and_seek(formula.end());
        let text = self.next_string(reader).unwrap_or_else(|e| {
            debug!("no STRING after formula @0x{:x}: {e}", formula.offset);
            None
        });
        reader.restore(saved);
        text
    }

    fn next_string(&self, reader: &mut RecordReader<'_>) -> Result<Option<String>, XlsError> {
        while let Some(mut frame) = reader.next()? {
            match frame.typ {
                SHRFMLA | ARRAY | TABLE => (),
                STRING => {
                    reader.attach_continuations(&mut frame)?;
                    return self.string_record(reader, &frame).map(Some);
                }
                _ => return Ok(None),
            }
        }
        Ok(None)
    }

    fn string_record(
        &self,
        reader: &RecordReader<'_>,
        frame: &RecordFrame,
    ) -> Result<String, XlsError> {
        match self.encoding.version() {
            FormatVersion::Modern => {
                let (data, boundaries) = reader.payload_with_boundaries(frame)?;
                match continued_string(&data, &boundaries) {
                    Some((text, _)) => Ok(text),
                    None => Err(XlsError::Len {
                        expected: 3,
                        found: data.len(),
                        typ: "string",
                    }),
                }
            }
            FormatVersion::Legacy => parse_string(&reader.payload(frame)?, &self.encoding),
        }
    }
}

fn missing_string(sink: &dyn DiagnosticSink, location: &Location) {
    sink_warn(sink, "string formula without STRING record", location);
}

fn sink_warn(sink: &dyn DiagnosticSink, message: &str, location: &Location) {
    sink.warn(Diagnostic::warning(message).at(location.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Collector;

    fn dims(rows: u32, cols: u32) -> Dimensions {
        Dimensions {
            first_row: 0,
            last_row: rows,
            first_col: 0,
            last_col: cols,
        }
    }

    #[test]
    fn grid_grows_past_dimensions() {
        let mut grid = Grid::new(FormatVersion::Modern, false);
        grid.place(Cell::new((3, 1), Data::Number(1.)));
        grid.place(Cell::new((20, 2), Data::Number(2.)));
        grid.place(Cell::new((9, 4), Data::Bool(true)));
        let sink = Collector::new();
        let range = grid.finish(Some(&dims(10, 5)), &sink, &Location::default());
        assert_eq!(range.get_size(), (21, 5));
        assert_eq!(range.get_value((3, 1)), Some(&Data::Number(1.)));
        assert_eq!(range.get_value((9, 4)), Some(&Data::Bool(true)));
        assert_eq!(range.get_value((20, 2)), Some(&Data::Number(2.)));
        assert!(sink.contains("1 cells outside the declared 10x5 grid, grown to 21x5"));
    }

    #[test]
    fn grid_without_dimensions() {
        let mut grid = Grid::new(FormatVersion::Modern, true);
        grid.place(Cell::new((1, 1), Data::Blank));
        grid.place(Cell::new((2, 0), Data::Number(3.)));
        let sink = Collector::new();
        let range = grid.finish(None, &sink, &Location::default());
        assert_eq!(range.get_size(), (3, 1));
        assert!(sink.diagnostics().is_empty());
    }

    #[test]
    fn grid_ignores_declared_extent_of_empty_sheet() {
        let grid = Grid::new(FormatVersion::Modern, false);
        let sink = Collector::new();
        let range = grid.finish(Some(&dims(0x1_0000, 0x100)), &sink, &Location::default());
        assert!(range.is_empty());
        assert_eq!(range.get_size(), (0, 0));
        assert!(sink.diagnostics().is_empty());
    }

    #[test]
    fn grid_drops_cells_beyond_sheet_limits() {
        let mut grid = Grid::new(FormatVersion::Modern, false);
        grid.place(Cell::new((1, 0), Data::Number(1.)));
        grid.place(Cell::new((0xFFFF, 0xFFFF), Data::Number(2.)));
        grid.place(Cell::new((2, 0x100), Data::Number(3.)));
        let sink = Collector::new();
        let range = grid.finish(None, &sink, &Location::default());
        assert_eq!(range.get_size(), (2, 1));
        assert_eq!(range.get_value((1, 0)), Some(&Data::Number(1.)));
        assert!(sink.contains("2 cells beyond the 65536x256 sheet limits dropped"));
    }

    #[test]
    fn legacy_grid_limits() {
        let mut grid = Grid::new(FormatVersion::Legacy, false);
        grid.place(Cell::new((0x4000, 0), Data::Number(1.)));
        grid.place(Cell::new((0x3FFF, 2), Data::Number(2.)));
        let sink = Collector::new();
        let range = grid.finish(None, &sink, &Location::default());
        assert_eq!(range.get_size(), (0x4000, 3));
        assert!(sink.contains("beyond the 16384x256 sheet limits"));
    }
}
