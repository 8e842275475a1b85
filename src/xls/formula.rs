//! FORMULA, SHRFMLA, ARRAY and STRING records
//!
//! Cells of a shared formula store a single `PtgExp` token pointing at the group's base cell,
//! the real tokens are in the SHRFMLA record which follows the base cell. Groups are resolved
//! once the whole sheet has been read.

use std::sync::Arc;

use super::strings::XlsEncoding;
use super::XlsError;
use crate::datatype::{Data, Formula, FormulaValue};
use crate::diagnostics::{Diagnostic, DiagnosticSink, Location};
use crate::utils::{read_f64, read_u16};
use crate::{Cell, CellErrorType};

const SHARED_FLAG: u16 = 0x0008;

/// Last calculated value of a FORMULA record
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CachedValue {
    Value(FormulaValue),
    /// The text is in the STRING record following the formula
    PendingString,
}

/// A decoded FORMULA record
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FormulaRecord {
    pub row: u32,
    pub col: u32,
    pub value: CachedValue,
    pub shared: bool,
    pub tokens: Arc<[u8]>,
}

impl FormulaRecord {
    fn value(&self) -> FormulaValue {
        match &self.value {
            CachedValue::Value(v) => v.clone(),
            CachedValue::PendingString => FormulaValue::String(String::new()),
        }
    }

    /// The cell of a formula which is not part of a shared group
    pub fn into_cell(self) -> Cell<Data> {
        let value = self.value();
        Cell::new(
            (self.row, self.col),
            Data::Formula(Formula::new(value, self.tokens)),
        )
    }

    fn into_shared_cell(self, tokens: Arc<[u8]>) -> Cell<Data> {
        let value = self.value();
        Cell::new(
            (self.row, self.col),
            Data::Formula(Formula::shared(value, tokens)),
        )
    }
}

/// Decodes a FORMULA record
///
/// The 8 value bytes hold a float unless their last two bytes are `0xFFFF`, then byte 0 gives
/// the result type: 0 string, 1 boolean, 2 error, 3 empty string.
pub(crate) fn parse_formula(r: &[u8]) -> Result<FormulaRecord, XlsError> {
    if r.len() < 22 {
        return Err(XlsError::Len {
            expected: 22,
            found: r.len(),
            typ: "formula",
        });
    }
    let row = read_u16(r) as u32;
    let col = read_u16(&r[2..]) as u32;
    let value = if r[12] == 0xFF && r[13] == 0xFF {
        match r[6] {
            0x00 => CachedValue::PendingString,
            0x01 => CachedValue::Value(FormulaValue::Bool(r[8] != 0)),
            0x02 => CachedValue::Value(FormulaValue::Error(
                CellErrorType::from_code(r[8]).unwrap_or(CellErrorType::GettingData),
            )),
            0x03 => CachedValue::Value(FormulaValue::String(String::new())),
            t => {
                return Err(XlsError::Unrecognized {
                    typ: "formula result type",
                    val: format!("0x{t:02X}"),
                })
            }
        }
    } else {
        CachedValue::Value(FormulaValue::Number(read_f64(&r[6..])))
    };
    let flags = read_u16(&r[14..]);
    let cce = read_u16(&r[20..]) as usize;
    let tokens = r.get(22..22 + cce).ok_or(XlsError::Len {
        expected: 22 + cce,
        found: r.len(),
        typ: "formula tokens",
    })?;
    Ok(FormulaRecord {
        row,
        col,
        value,
        shared: flags & SHARED_FLAG != 0,
        tokens: Arc::from(tokens),
    })
}

/// Decodes the text of a STRING record
pub(crate) fn parse_string(r: &[u8], encoding: &XlsEncoding) -> Result<String, XlsError> {
    Ok(encoding.unicode_string(r)?.text)
}

/// A rectangular range `first..=last`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CellRange {
    /// First row
    pub first_row: u32,
    /// Last row (inclusive)
    pub last_row: u32,
    /// First column
    pub first_col: u32,
    /// Last column (inclusive)
    pub last_col: u32,
}

impl CellRange {
    /// Is (row, col) inside the range
    pub fn contains(&self, row: u32, col: u32) -> bool {
        (self.first_row..=self.last_row).contains(&row)
            && (self.first_col..=self.last_col).contains(&col)
    }

    /// `RefU`: rows as u16, columns as u8
    pub(crate) fn from_ref_u(r: &[u8]) -> CellRange {
        CellRange {
            first_row: read_u16(r) as u32,
            last_row: read_u16(&r[2..]) as u32,
            first_col: r[4] as u32,
            last_col: r[5] as u32,
        }
    }

    /// `Ref8U`: rows and columns as u16
    pub(crate) fn from_ref8(r: &[u8]) -> CellRange {
        CellRange {
            first_row: read_u16(r) as u32,
            last_row: read_u16(&r[2..]) as u32,
            first_col: read_u16(&r[4..]) as u32,
            last_col: read_u16(&r[6..]) as u32,
        }
    }
}

/// A decoded SHRFMLA record
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SharedFormulaRecord {
    pub range: CellRange,
    pub tokens: Vec<u8>,
}

pub(crate) fn parse_shared_formula(r: &[u8]) -> Result<SharedFormulaRecord, XlsError> {
    if r.len() < 10 {
        return Err(XlsError::Len {
            expected: 10,
            found: r.len(),
            typ: "shrfmla",
        });
    }
    let cce = read_u16(&r[8..]) as usize;
    let tokens = r.get(10..10 + cce).ok_or(XlsError::Len {
        expected: 10 + cce,
        found: r.len(),
        typ: "shrfmla tokens",
    })?;
    Ok(SharedFormulaRecord {
        range: CellRange::from_ref_u(r),
        tokens: tokens.to_vec(),
    })
}

/// An array formula (ARRAY record) and the range it fills
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayFormula {
    /// Cells computed by the formula
    pub range: CellRange,
    /// Raw formula tokens
    pub tokens: Vec<u8>,
}

pub(crate) fn parse_array(r: &[u8]) -> Result<ArrayFormula, XlsError> {
    if r.len() < 14 {
        return Err(XlsError::Len {
            expected: 14,
            found: r.len(),
            typ: "array",
        });
    }
    let cce = read_u16(&r[12..]) as usize;
    let tokens = r.get(14..14 + cce).ok_or(XlsError::Len {
        expected: 14 + cce,
        found: r.len(),
        typ: "array tokens",
    })?;
    Ok(ArrayFormula {
        range: CellRange::from_ref_u(r),
        tokens: tokens.to_vec(),
    })
}

#[derive(Debug)]
struct SharedGroup {
    range: CellRange,
    tokens: Arc<[u8]>,
    base: Option<FormulaRecord>,
    members: Vec<FormulaRecord>,
}

/// Groups shared formula cells while a sheet is read
#[derive(Debug, Default)]
pub(crate) struct SharedFormulas {
    groups: Vec<SharedGroup>,
    /// Flagged cell not matching any group yet, expected to be followed by its SHRFMLA
    pending: Option<FormulaRecord>,
    last_tokens: Option<Arc<[u8]>>,
}

impl SharedFormulas {
    /// Registers a formula flagged as shared
    ///
    /// The cell joins the first group containing it, else it becomes the base of the next
    /// SHRFMLA record. Returns a cell which must be placed as an ordinary formula: a previous
    /// pending base which never got its SHRFMLA.
    pub fn add_cell(
        &mut self,
        formula: FormulaRecord,
        sink: &dyn DiagnosticSink,
        location: &Location,
    ) -> Option<FormulaRecord> {
        if let Some(group) = self
            .groups
            .iter_mut()
            .find(|g| g.range.contains(formula.row, formula.col))
        {
            group.members.push(formula);
            return None;
        }
        let orphan = self.pending.replace(formula)?;
        sink.warn(orphan_warning(&orphan, location));
        Some(orphan)
    }

    /// Opens a group from a SHRFMLA record, bound to the pending base cell
    ///
    /// Returns the pending base if it lies outside the group range.
    pub fn add_group(
        &mut self,
        record: SharedFormulaRecord,
        sink: &dyn DiagnosticSink,
        location: &Location,
    ) -> Option<FormulaRecord> {
        let tokens: Arc<[u8]> = if record.tokens.is_empty() {
            match &self.last_tokens {
                Some(t) => {
                    sink.warn(
                        Diagnostic::warning(
                            "shared formula without tokens, reusing the previous template",
                        )
                        .at(location.clone()),
                    );
                    t.clone()
                }
                None => {
                    sink.warn(
                        Diagnostic::warning("shared formula without tokens and no template")
                            .at(location.clone()),
                    );
                    Arc::from(Vec::new())
                }
            }
        } else {
            Arc::from(record.tokens)
        };
        self.last_tokens = Some(tokens.clone());

        let mut reverted = None;
        let base = match self.pending.take() {
            Some(base) if record.range.contains(base.row, base.col) => Some(base),
            Some(base) => {
                sink.warn(orphan_warning(&base, location));
                reverted = Some(base);
                None
            }
            None => {
                sink.warn(
                    Diagnostic::warning("shared formula group without a base cell")
                        .at(location.clone()),
                );
                None
            }
        };
        self.groups.push(SharedGroup {
            range: record.range,
            tokens,
            base,
            members: Vec::new(),
        });
        reverted
    }

    /// Sets the text result of a pending string formula at (row, col)
    pub fn set_string(&mut self, row: u32, col: u32, text: &str) -> bool {
        let at = |f: &&mut FormulaRecord| f.row == row && f.col == col;
        let target = self.pending.as_mut().filter(at).or_else(|| {
            self.groups
                .iter_mut()
                .rev()
                .flat_map(|g| g.base.iter_mut().chain(g.members.iter_mut().rev()))
                .find(at)
        });
        match target {
            Some(f) => {
                f.value = CachedValue::Value(FormulaValue::String(text.to_string()));
                true
            }
            None => false,
        }
    }

    /// Resolves all groups into cells
    ///
    /// Every cell of a group shares the group token allocation and keeps its own value. A
    /// pending base left at the end of the sheet is returned as an ordinary formula.
    pub fn finish(self, sink: &dyn DiagnosticSink, location: &Location) -> Vec<Cell<Data>> {
        let mut cells = Vec::new();
        if let Some(orphan) = self.pending {
            sink.warn(orphan_warning(&orphan, location));
            cells.push(orphan.into_cell());
        }
        for group in self.groups {
            let tokens = group.tokens;
            cells.extend(
                group
                    .base
                    .into_iter()
                    .chain(group.members)
                    .map(|f| f.into_shared_cell(tokens.clone())),
            );
        }
        cells
    }
}

fn orphan_warning(formula: &FormulaRecord, location: &Location) -> Diagnostic {
    Diagnostic::warning("shared formula cell outside any group, kept as an ordinary formula")
        .at(location.clone().cell(formula.row, formula.col))
}
