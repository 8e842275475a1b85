//! `Error` management module
//!
//! Provides the top level error, wrapping the container and BIFF errors

use crate::cfb::CfbError;
use crate::cursor::CursorError;
use crate::xls::XlsError;

/// A struct to handle any error and a message
#[derive(Debug)]
pub enum Error {
    /// IO error
    Io(std::io::Error),

    /// Compound file error
    Cfb(CfbError),
    /// xls specific error
    Xls(XlsError),

    /// A cell was placed before the start of a range
    CellOutOfRange {
        /// position tried
        try_pos: (u32, u32),
        /// minimum position
        min_pos: (u32, u32),
    },
    /// No worksheet with that name
    WorksheetName(String),
    /// No worksheet at that index
    WorksheetIndex {
        /// index tried
        idx: usize,
    },
}

from_err!(std::io::Error, Error, Io);
from_err!(CfbError, Error, Cfb);

impl From<XlsError> for Error {
    fn from(e: XlsError) -> Error {
        match e {
            XlsError::WorksheetNotFound(name) => Error::WorksheetName(name),
            XlsError::SheetIndex(idx) => Error::WorksheetIndex { idx },
            e => Error::Xls(e),
        }
    }
}

impl From<CursorError> for Error {
    fn from(e: CursorError) -> Error {
        Error::Cfb(CfbError::Cursor(e))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Cfb(e) => write!(f, "Cfb error: {e}"),
            Error::Xls(e) => write!(f, "Xls error: {e}"),
            Error::CellOutOfRange { try_pos, min_pos } => write!(
                f,
                "there is no cell at position '{try_pos:?}'. Minimum position is '{min_pos:?}'"
            ),
            Error::WorksheetName(name) => write!(f, "invalid worksheet name: '{name}'"),
            Error::WorksheetIndex { idx } => write!(f, "invalid worksheet index: {idx}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Cfb(e) => Some(e),
            Error::Xls(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sheet_lookup_errors() {
        let e: Error = XlsError::SheetIndex(3).into();
        assert!(matches!(e, Error::WorksheetIndex { idx: 3 }));
        let e: Error = XlsError::WorksheetNotFound("a".into()).into();
        assert_eq!(e.to_string(), "invalid worksheet name: 'a'");
        let e: Error = XlsError::PasswordProtected.into();
        assert!(matches!(e, Error::Xls(XlsError::PasswordProtected)));
    }
}
