//! The decoded sheet/cell matrix the extractor's pipeline operates on.
//!
//! Decoding the workbook's binary format is a library call explicitly
//! outside this system's core (it's an external collaborator, not a
//! pipeline stage); [`WorkbookDecoder`] is the seam a concrete decoder
//! plugs into.

use serde::{Deserialize, Serialize};

/// A single decoded cell, preserving enough of the original formatting to
/// drive formula gating, number parsing, and evidence capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    /// The A1-style reference of this cell, e.g. `"C14"`.
    pub a1: String,
    /// The raw value as decoded (a formula's last-calculated display value
    /// when `is_formula` is set, never the formula source itself).
    pub raw_value: String,
    /// `true` if the decoder found a formula marker on this cell.
    pub is_formula: bool,
    /// The cell's number format string, if any.
    pub number_format: Option<String>,
    /// `true` if the cell is within a hidden row or column.
    pub hidden: bool,
}

/// One decoded worksheet as a dense row-major matrix of cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetMatrix {
    /// The worksheet's name.
    pub name: String,
    /// Rows of cells; rows may have differing lengths if the decoder does
    /// not pad short rows.
    pub rows: Vec<Vec<Cell>>,
}

impl SheetMatrix {
    /// The cell at `(row, col)`, if the matrix is large enough.
    pub fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        self.rows.get(row)?.get(col)
    }

    /// The widest row's column count.
    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }
}

/// A decoded workbook: one or more worksheets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workbook {
    /// The decoded worksheets, in their original order.
    pub sheets: Vec<SheetMatrix>,
}

/// Decodes opaque workbook bytes into a [`Workbook`].
///
/// This is the seam for the external binary-format library the system
/// treats as a collaborator rather than part of its own core; the
/// extractor's pipeline (steps 2-11 of the deterministic pass) operates
/// entirely on the decoder's output and never looks at raw bytes.
pub trait WorkbookDecoder: Send + Sync {
    /// The decoder's failure type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Decodes `bytes` into a workbook.
    fn decode(&self, bytes: &[u8]) -> Result<Workbook, Self::Error>;
}
