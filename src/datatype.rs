use std::fmt;
use std::sync::Arc;
#[cfg(feature = "chrono")]
use std::sync::OnceLock;

use super::CellErrorType;

#[cfg(feature = "chrono")]
static EXCEL_EPOCH: OnceLock<chrono::NaiveDateTime> = OnceLock::new();

#[cfg(feature = "chrono")]
/// https://learn.microsoft.com/en-us/office/troubleshoot/excel/1900-and-1904-date-system
const EXCEL_1900_1904_DIFF: f64 = 1462.;

#[cfg(feature = "chrono")]
const MS_MULTIPLIER: f64 = 24f64 * 60f64 * 60f64 * 1e+3f64;

/// A cell as stored in a worksheet grid
///
/// Text is not owned by the cell: [`Data::Label`] holds an index into the workbook shared
/// string table (or, for records carrying their own text, the text itself).
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Data {
    /// No record for this position
    #[default]
    Empty,
    /// A BLANK/MULBLANK record (formatted, no value)
    Blank,
    /// Number
    Number(f64),
    /// Text
    Label(Label),
    /// Boolean
    Bool(bool),
    /// Error
    Error(CellErrorType),
    /// Number formatted as a date or time
    Date(ExcelDateTime),
    /// Formula with its last calculated value
    Formula(Formula),
}

impl Data {
    /// Is the cell empty (no record or a blank record)
    pub fn is_empty(&self) -> bool {
        matches!(self, Data::Empty | Data::Blank)
    }

    /// Is the cell a formula
    pub fn is_formula(&self) -> bool {
        matches!(self, Data::Formula(_))
    }

    /// Numeric value of a number, date or numeric formula cell
    pub fn get_float(&self) -> Option<f64> {
        match self {
            Data::Number(v) => Some(*v),
            Data::Date(d) => Some(d.as_f64()),
            Data::Formula(f) => match f.value() {
                FormulaValue::Number(v) => Some(*v),
                _ => None,
            },
            _ => None,
        }
    }

    /// Boolean value of a boolean or boolean formula cell
    pub fn get_bool(&self) -> Option<bool> {
        match self {
            Data::Bool(b) => Some(*b),
            Data::Formula(f) => match f.value() {
                FormulaValue::Bool(b) => Some(*b),
                _ => None,
            },
            _ => None,
        }
    }

    /// Error value of an error or error formula cell
    pub fn get_error(&self) -> Option<&CellErrorType> {
        match self {
            Data::Error(e) => Some(e),
            Data::Formula(f) => match f.value() {
                FormulaValue::Error(e) => Some(e),
                _ => None,
            },
            _ => None,
        }
    }

    /// The formula of a formula cell
    pub fn get_formula(&self) -> Option<&Formula> {
        match self {
            Data::Formula(f) => Some(f),
            _ => None,
        }
    }
}

/// Text of a label cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Label {
    /// Index into the shared string table (LABELSST)
    Shared(usize),
    /// Text stored in the cell record itself (LABEL, RSTRING)
    Inline(String),
}

/// Last calculated value of a formula
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaValue {
    /// Numeric result
    Number(f64),
    /// Text result (from the STRING record following the formula)
    String(String),
    /// Boolean result
    Bool(bool),
    /// Error result
    Error(CellErrorType),
}

/// A formula cell: raw parsed-expression tokens plus the cached result
///
/// Cells of a shared formula group all point to the same token allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    value: FormulaValue,
    tokens: Arc<[u8]>,
    shared: bool,
}

impl Formula {
    /// Creates a standalone formula
    pub fn new(value: FormulaValue, tokens: Arc<[u8]>) -> Self {
        Formula {
            value,
            tokens,
            shared: false,
        }
    }

    /// Creates a formula belonging to a shared formula group
    pub fn shared(value: FormulaValue, tokens: Arc<[u8]>) -> Self {
        Formula {
            value,
            tokens,
            shared: true,
        }
    }

    /// Last calculated value
    pub fn value(&self) -> &FormulaValue {
        &self.value
    }

    /// Raw BIFF token bytes (`rgce`)
    ///
    /// Relative references are stored as in the file, resolving them against the cell position
    /// is up to the expression parser.
    pub fn tokens(&self) -> &[u8] {
        &self.tokens
    }

    /// The shared allocation behind [`Self::tokens`]
    pub fn tokens_arc(&self) -> &Arc<[u8]> {
        &self.tokens
    }

    /// Is this cell a member of a shared formula group
    pub fn is_shared(&self) -> bool {
        self.shared
    }
}

/// A borrowed, resolved view over a [`Data`] cell
///
/// Labels are looked up in the shared string table and formulas are reduced to their value.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum DataRef<'a> {
    /// Float
    Float(f64),
    /// String
    String(&'a str),
    /// Boolean
    Bool(bool),
    /// Date or Time
    DateTime(ExcelDateTime),
    /// Error
    Error(&'a CellErrorType),
    /// Empty cell
    #[default]
    Empty,
}

impl fmt::Display for DataRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataRef::Float(v) => write!(f, "{v}"),
            DataRef::String(s) => write!(f, "{s}"),
            DataRef::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            DataRef::DateTime(d) => write!(f, "{d}"),
            DataRef::Error(e) => write!(f, "{e}"),
            DataRef::Empty => Ok(()),
        }
    }
}

/// Excel datetime type. Possible: date, time, datetime, duration.
/// At this time we can only determine datetime (date and time are datetime too) and duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExcelDateTimeType {
    /// DateTime
    DateTime,
    /// TimeDelta (Duration)
    TimeDelta,
}

/// Structure for Excel date and time representation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExcelDateTime {
    value: f64,
    datetime_type: ExcelDateTimeType,
    is_1904: bool,
}

impl ExcelDateTime {
    /// Creates a new `ExcelDateTime`
    pub fn new(value: f64, datetime_type: ExcelDateTimeType, is_1904: bool) -> Self {
        ExcelDateTime {
            value,
            datetime_type,
            is_1904,
        }
    }

    /// True if excel datetime has duration format ([hh]:mm:ss, for example)
    pub fn is_duration(&self) -> bool {
        matches!(self.datetime_type, ExcelDateTimeType::TimeDelta)
    }

    /// True if excel datetime has datetime format (not duration)
    pub fn is_datetime(&self) -> bool {
        matches!(self.datetime_type, ExcelDateTimeType::DateTime)
    }

    /// Is the serial number relative to the 1904 date system
    pub fn is_1904(&self) -> bool {
        self.is_1904
    }

    /// Converting data type into a float
    pub fn as_f64(&self) -> f64 {
        self.value
    }

    /// Try converting data type into a duration
    #[cfg(feature = "chrono")]
    pub fn as_duration(&self) -> Option<chrono::Duration> {
        let ms = self.value * MS_MULTIPLIER;
        Some(chrono::Duration::milliseconds(ms.round() as i64))
    }

    /// Try converting data type into a datetime
    #[cfg(feature = "chrono")]
    pub fn as_datetime(&self) -> Option<chrono::NaiveDateTime> {
        let excel_epoch = EXCEL_EPOCH.get_or_init(|| {
            chrono::NaiveDate::from_ymd_opt(1899, 12, 30)
                .unwrap_or_default()
                .and_time(chrono::NaiveTime::MIN)
        });
        let f = if self.is_1904 {
            self.value + EXCEL_1900_1904_DIFF
        } else {
            self.value
        };
        let f = if f >= 60.0 { f } else { f + 1.0 };
        let ms = f * MS_MULTIPLIER;
        let excel_duration = chrono::Duration::try_milliseconds(ms.round() as i64)?;
        excel_epoch.checked_add_signed(excel_duration)
    }
}

impl Default for ExcelDateTime {
    fn default() -> Self {
        ExcelDateTime {
            value: 0.,
            datetime_type: ExcelDateTimeType::DateTime,
            is_1904: false,
        }
    }
}

impl fmt::Display for ExcelDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> std::result::Result<(), fmt::Error> {
        write!(f, "{}", self.value)
    }
}
