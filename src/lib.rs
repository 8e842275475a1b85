//! Rust reader for legacy binary Excel workbooks (`.xls`)
//!
//! # Status
//!
//! **xlsbiff** reads BIFF8 (Excel 97-2003) and BIFF5/7 (Excel 5.0/95) workbooks stored in an
//! OLE compound file. It exposes sheet names, sheet extents, cell values and, for formulas, the
//! raw token bytes with their last calculated value.
//!
//! Writing, decrypting and evaluating formulas are out of scope: password protected workbooks
//! are detected and rejected with [`XlsError::PasswordProtected`].
//!
//! # Examples
//! ```no_run
//! use xlsbiff::{open_workbook, Data, DataRef};
//!
//! let workbook = open_workbook("tests/simple.xls").expect("Cannot open file");
//!
//! for sheet in workbook.sheets() {
//!     let sheet = sheet.read().expect("Cannot read sheet");
//!     let (rows, cols) = sheet.size();
//!     println!("'{}': {rows} rows, {cols} columns", sheet.name());
//!
//!     for (row, col, cell) in sheet.range().used_cells() {
//!         match cell {
//!             Data::Formula(f) => println!("({row}, {col}) formula, {} token bytes", f.tokens().len()),
//!             _ => {
//!                 if let DataRef::String(s) = sheet.value(row as u32, col as u32) {
//!                     println!("({row}, {col}) text: {s}");
//!                 }
//!             }
//!         }
//!     }
//! }
//! ```
#![deny(missing_docs)]

#[macro_use]
mod utils;

mod cursor;
mod datatype;
mod diagnostics;
mod formats;
mod xls;

pub mod cfb;
pub mod errors;

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::ops::{Index, IndexMut};
use std::path::Path;

pub use crate::cfb::{Cfb, CfbError, Directory, EntryType};
pub use crate::cursor::{ByteCursor, CancelToken, CursorError, LoadLimits};
pub use crate::datatype::{
    Data, DataRef, ExcelDateTime, ExcelDateTimeType, Formula, FormulaValue, Label,
};
pub use crate::diagnostics::{
    Collector, Diagnostic, DiagnosticSink, Location, LogSink, NullSink, Severity, Sink,
};
pub use crate::errors::Error;
pub use crate::formats::{detect_custom_number_format, CellFormat};
pub use crate::xls::{
    ArrayFormula, AutoFilter, AutoFilterColumn, CellRange, ColumnInfo, ConditionalFormat,
    ConditionalRule, DataValidation, DefinedName, Dimensions, Drawing, FormatVersion, Margins,
    PageSetup, Pane, Protection, RowInfo, SharedStrings, SheetHandle, SheetSettings, SheetType,
    SheetVisible, Worksheet, Xls, XlsError, XlsOptions,
};

// https://msdn.microsoft.com/en-us/library/office/ff839168.aspx
/// An enum to represent all different errors that can appear as
/// a value in a worksheet cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellErrorType {
    /// Division by 0 error
    Div0,
    /// Unavailable value error
    NA,
    /// Invalid name error
    Name,
    /// Null value error
    Null,
    /// Number error
    Num,
    /// Invalid cell reference error
    Ref,
    /// Value error
    Value,
    /// Getting data
    GettingData,
}

impl CellErrorType {
    /// Maps a BIFF error code (BErr) to an error type
    pub fn from_code(code: u8) -> Option<CellErrorType> {
        Some(match code {
            0x00 => CellErrorType::Null,
            0x07 => CellErrorType::Div0,
            0x0F => CellErrorType::Value,
            0x17 => CellErrorType::Ref,
            0x1D => CellErrorType::Name,
            0x24 => CellErrorType::Num,
            0x2A => CellErrorType::NA,
            0x2B => CellErrorType::GettingData,
            _ => return None,
        })
    }
}

impl fmt::Display for CellErrorType {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        match *self {
            CellErrorType::Div0 => write!(f, "#DIV/0!"),
            CellErrorType::NA => write!(f, "#N/A"),
            CellErrorType::Name => write!(f, "#NAME?"),
            CellErrorType::Null => write!(f, "#NULL!"),
            CellErrorType::Num => write!(f, "#NUM!"),
            CellErrorType::Ref => write!(f, "#REF!"),
            CellErrorType::Value => write!(f, "#VALUE!"),
            CellErrorType::GettingData => write!(f, "#DATA!"),
        }
    }
}

/// Opens a workbook from a file path with default options
///
/// Diagnostics go to the `log` crate.
pub fn open_workbook<P: AsRef<Path>>(path: P) -> Result<Xls, Error> {
    let file = BufReader::new(File::open(path)?);
    Ok(Xls::new(file)?)
}

/// A trait to constrain cells
pub trait CellType: Default + Clone + PartialEq {}
impl<T: Default + Clone + PartialEq> CellType for T {}

/// A struct to hold cell position and value
#[derive(Debug, Clone)]
pub struct Cell<T: CellType> {
    /// Position for the cell (row, column)
    pos: (u32, u32),
    /// Value for the cell
    val: T,
}

impl<T: CellType> Cell<T> {
    /// Creates a new `Cell`
    pub fn new(position: (u32, u32), value: T) -> Cell<T> {
        Cell {
            pos: position,
            val: value,
        }
    }

    /// Gets `Cell` position
    pub fn get_position(&self) -> (u32, u32) {
        self.pos
    }

    /// Gets `Cell` value
    pub fn get_value(&self) -> &T {
        &self.val
    }

    /// Consumes the `Cell`, returning its value
    pub fn into_value(self) -> T {
        self.val
    }
}

/// A struct which represents a squared selection of cells
#[derive(Debug, Default, Clone)]
pub struct Range<T: CellType> {
    start: (u32, u32),
    end: (u32, u32),
    inner: Vec<T>,
}

impl<T: CellType> Range<T> {
    /// Creates a new `Range` spanning `start` to `end` (inclusive)
    pub fn new(start: (u32, u32), end: (u32, u32)) -> Range<T> {
        assert!(
            start.0 <= end.0 && start.1 <= end.1,
            "invalid range bounds"
        );
        Range {
            start,
            end,
            inner: vec![
                T::default();
                (end.0 - start.0 + 1) as usize * (end.1 - start.1 + 1) as usize
            ],
        }
    }

    /// Creates a `Range` with no cells
    pub fn empty() -> Range<T> {
        Range {
            start: (0, 0),
            end: (0, 0),
            inner: Vec::new(),
        }
    }

    /// Get top left cell position (row, column)
    pub fn start(&self) -> Option<(u32, u32)> {
        if self.is_empty() {
            None
        } else {
            Some(self.start)
        }
    }

    /// Get bottom right cell position (row, column)
    pub fn end(&self) -> Option<(u32, u32)> {
        if self.is_empty() {
            None
        } else {
            Some(self.end)
        }
    }

    /// Get column width
    pub fn width(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.end.1 - self.start.1 + 1) as usize
        }
    }

    /// Get row height
    pub fn height(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.end.0 - self.start.0 + 1) as usize
        }
    }

    /// Get size in (height, width) format
    pub fn get_size(&self) -> (usize, usize) {
        (self.height(), self.width())
    }

    /// Is range empty
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Grows the range so that `end` (absolute, inclusive) is inside it
    ///
    /// Rows and columns are extended independently, existing cells keep their position.
    /// Does nothing if `end` is already inside the range.
    pub fn grow_to(&mut self, end: (u32, u32)) {
        if self.is_empty() {
            *self = Range::new((0, 0), end);
            return;
        }
        let new_end = (self.end.0.max(end.0), self.end.1.max(end.1));
        if new_end == self.end {
            return;
        }
        let old_width = self.width();
        let width = (new_end.1 - self.start.1 + 1) as usize;
        let height = (new_end.0 - self.start.0 + 1) as usize;
        if width == old_width {
            // missing some rows
            self.inner.resize(width * height, T::default());
        } else {
            // missing some columns
            let mut data = Vec::with_capacity(width * height);
            for row in self.inner.chunks(old_width) {
                data.extend_from_slice(row);
                data.resize(data.len() + width - old_width, T::default());
            }
            data.resize(width * height, T::default());
            self.inner = data;
        }
        self.end = new_end;
    }

    /// Set inner value from absolute position
    ///
    /// Will resize inner structure if the value is out of bounds.
    /// For relative positions, use Index trait
    ///
    /// # Examples
    /// ```
    /// use xlsbiff::{Range, Data};
    ///
    /// let mut range = Range::new((0, 0), (5, 2));
    /// assert_eq!(range.get_value((2, 1)), Some(&Data::Empty));
    /// range.set_value((2, 1), Data::Number(1.0)).unwrap();
    /// assert_eq!(range.get_value((2, 1)), Some(&Data::Number(1.0)));
    /// ```
    pub fn set_value(&mut self, absolute_position: (u32, u32), value: T) -> Result<(), Error> {
        if !self.is_empty()
            && (absolute_position.0 < self.start.0 || absolute_position.1 < self.start.1)
        {
            return Err(Error::CellOutOfRange {
                try_pos: absolute_position,
                min_pos: self.start,
            });
        }
        self.grow_to(absolute_position);
        let idx = (absolute_position.0 - self.start.0) as usize * self.width()
            + (absolute_position.1 - self.start.1) as usize;
        self.inner[idx] = value;
        Ok(())
    }

    /// Get cell value from absolute position
    ///
    /// The coordinate format is (row, column). For relative positions, use Index trait
    pub fn get_value(&self, absolute_position: (u32, u32)) -> Option<&T> {
        let (row, col) = absolute_position;
        if self.is_empty()
            || row < self.start.0
            || col < self.start.1
            || row > self.end.0
            || col > self.end.1
        {
            return None;
        }
        let idx = (row - self.start.0) as usize * self.width() + (col - self.start.1) as usize;
        self.inner.get(idx)
    }

    /// Get cell value from relative position
    pub fn get(&self, relative_position: (usize, usize)) -> Option<&T> {
        let (row, col) = relative_position;
        if col >= self.width() {
            return None;
        }
        self.inner.get(row * self.width() + col)
    }

    /// Get an iterator over inner rows
    ///
    /// # Examples
    /// ```
    /// use xlsbiff::{Range, Data};
    ///
    /// let range: Range<Data> = Range::new((0, 0), (5, 2));
    /// // with rows item row: &[Data]
    /// assert_eq!(range.rows().map(|r| r.len()).sum::<usize>(), 18);
    /// ```
    pub fn rows(&self) -> Rows<'_, T> {
        if self.inner.is_empty() {
            Rows { inner: None }
        } else {
            let width = self.width();
            Rows {
                inner: Some(self.inner.chunks(width)),
            }
        }
    }

    /// Get an iterator over used cells only
    ///
    /// Positions are relative to [`Self::start`].
    pub fn used_cells(&self) -> UsedCells<'_, T> {
        UsedCells {
            width: self.width(),
            inner: self.inner.iter().enumerate(),
        }
    }

    /// Get an iterator over all cells in this range
    pub fn cells(&self) -> Cells<'_, T> {
        Cells {
            width: self.width(),
            inner: self.inner.iter().enumerate(),
        }
    }
}

impl<T: CellType> Index<usize> for Range<T> {
    type Output = [T];
    fn index(&self, index: usize) -> &[T] {
        let width = self.width();
        &self.inner[index * width..(index + 1) * width]
    }
}

impl<T: CellType> Index<(usize, usize)> for Range<T> {
    type Output = T;
    fn index(&self, index: (usize, usize)) -> &T {
        let width = self.width();
        &self.inner[index.0 * width + index.1]
    }
}

impl<T: CellType> IndexMut<usize> for Range<T> {
    fn index_mut(&mut self, index: usize) -> &mut [T] {
        let width = self.width();
        &mut self.inner[index * width..(index + 1) * width]
    }
}

impl<T: CellType> IndexMut<(usize, usize)> for Range<T> {
    fn index_mut(&mut self, index: (usize, usize)) -> &mut T {
        let width = self.width();
        &mut self.inner[index.0 * width + index.1]
    }
}

/// A struct to iterate over all cells
#[derive(Debug)]
pub struct Cells<'a, T: CellType> {
    width: usize,
    inner: std::iter::Enumerate<std::slice::Iter<'a, T>>,
}

impl<'a, T: 'a + CellType> Iterator for Cells<'a, T> {
    type Item = (usize, usize, &'a T);
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(i, v)| {
            let row = i / self.width;
            let col = i % self.width;
            (row, col, v)
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// A struct to iterate over used cells
#[derive(Debug)]
pub struct UsedCells<'a, T: CellType> {
    width: usize,
    inner: std::iter::Enumerate<std::slice::Iter<'a, T>>,
}

impl<'a, T: 'a + CellType> Iterator for UsedCells<'a, T> {
    type Item = (usize, usize, &'a T);
    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .by_ref()
            .find(|&(_, v)| v != &T::default())
            .map(|(i, v)| {
                let row = i / self.width;
                let col = i % self.width;
                (row, col, v)
            })
    }
}

/// An iterator to read `Range` struct row by row
#[derive(Debug)]
pub struct Rows<'a, T: CellType> {
    inner: Option<std::slice::Chunks<'a, T>>,
}

impl<'a, T: 'a + CellType> Iterator for Rows<'a, T> {
    type Item = &'a [T];
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.as_mut().and_then(std::iter::Iterator::next)
    }
}
